//! Shared coupling state.
//!
//! A [`Channel`] holds the three sub-records both sides see: the driver's
//! input slot, the engine's output slot and the [`ControlFlags`]. Each slot
//! has a single writer per phase and is only read after the writer's flag
//! transition, so the mutexes never contend in a correct exchange.
//!
//! At most one channel is live per process. [`Registration`] claims the
//! process-wide slot and releases it on drop.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use roomflow_core::error::try_zeroed;
use roomflow_core::{ControlFlags, LogSink, Result, RoomflowError, Severity, TracingSink};

use crate::layout::ExchangeLayout;

static CHANNEL_LIVE: AtomicBool = AtomicBool::new(false);

/// Proof that this process holds the single channel slot.
#[derive(Debug)]
pub struct Registration {
    _private: (),
}

impl Registration {
    /// Claim the slot. Fails without side effects if it is taken.
    pub fn acquire() -> Result<Self> {
        CHANNEL_LIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Registration { _private: () })
            .map_err(|_| RoomflowError::AlreadyInitialized)
    }

    /// Whether some channel is live.
    pub fn is_held() -> bool {
        CHANNEL_LIVE.load(Ordering::Acquire)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        CHANNEL_LIVE.store(false, Ordering::Release);
    }
}

/// Driver-to-engine record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriverInput {
    /// Driver time at the start of the interval (s).
    pub time: f64,
    /// Interval length requested by the driver (s).
    pub dt: f64,
    /// Input vector in driver order.
    pub values: Vec<f64>,
}

/// Engine-to-driver record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineOutput {
    /// Engine time after the interval (s).
    pub time: f64,
    /// Output vector in driver order.
    pub values: Vec<f64>,
}

/// The shared record.
#[derive(Debug)]
pub struct Channel {
    layout: ExchangeLayout,
    input: Mutex<DriverInput>,
    output: Mutex<EngineOutput>,
    flags: ControlFlags,
}

impl Channel {
    /// Allocate both slots for `layout`.
    ///
    /// Allocation failure is reported, never aborted on, and leaves nothing
    /// behind.
    pub fn new(layout: ExchangeLayout) -> Result<Self> {
        let input = DriverInput {
            values: try_zeroed("driver input vector", layout.n_inputs())?,
            ..Default::default()
        };
        let output = EngineOutput {
            values: try_zeroed("engine output vector", layout.n_outputs())?,
            ..Default::default()
        };
        debug!(
            inputs = layout.n_inputs(),
            outputs = layout.n_outputs(),
            "Allocated coupling channel"
        );
        Ok(Self {
            layout,
            input: Mutex::new(input),
            output: Mutex::new(output),
            flags: ControlFlags::new(),
        })
    }

    /// Vector layout.
    pub fn layout(&self) -> &ExchangeLayout {
        &self.layout
    }

    /// Handshake flags.
    pub fn flags(&self) -> &ControlFlags {
        &self.flags
    }

    /// Driver side: fill the input slot.
    pub fn write_input(&self, time: f64, dt: f64, values: &[f64]) -> Result<()> {
        let mut slot = self.input.lock();
        if values.len() != slot.values.len() {
            return Err(RoomflowError::LayoutMismatch {
                what: "driver inputs",
                expected: slot.values.len(),
                actual: values.len(),
            });
        }
        slot.time = time;
        slot.dt = dt;
        slot.values.copy_from_slice(values);
        Ok(())
    }

    /// Engine side: copy the input slot out.
    pub fn read_input(&self) -> DriverInput {
        self.input.lock().clone()
    }

    /// Engine side: fill the output slot.
    pub fn write_output(&self, time: f64, values: &[f64]) -> Result<()> {
        let mut slot = self.output.lock();
        if values.len() != slot.values.len() {
            return Err(RoomflowError::LayoutMismatch {
                what: "engine outputs",
                expected: slot.values.len(),
                actual: values.len(),
            });
        }
        slot.time = time;
        slot.values.copy_from_slice(values);
        Ok(())
    }

    /// Driver side: copy the output slot out.
    pub fn read_output(&self) -> EngineOutput {
        self.output.lock().clone()
    }
}

/// Log sink for the engine thread.
///
/// Forwards to `tracing` and turns every error record into the channel
/// error flag, so the driver sees it as a peer fault.
pub struct ChannelSink {
    channel: std::sync::Arc<Channel>,
    inner: TracingSink,
}

impl ChannelSink {
    /// Sink bound to `channel`.
    pub fn new(channel: std::sync::Arc<Channel>) -> Self {
        Self {
            channel,
            inner: TracingSink,
        }
    }
}

impl LogSink for ChannelSink {
    fn record(&self, severity: Severity, message: &str) {
        self.inner.record(severity, message);
        if severity == Severity::Error {
            self.channel.flags().raise_error(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomflow_ffd::config::SpeciesLayout;
    use std::sync::Arc;

    fn layout() -> ExchangeLayout {
        ExchangeLayout {
            surfaces: 1,
            shades: 0,
            ports: 1,
            species: 0,
            trace: 0,
            sensors: 0,
            species_layout: SpeciesLayout::SpeciesMajor,
        }
    }

    #[test]
    fn test_slots_sized_by_layout() {
        let channel = Channel::new(layout()).unwrap();
        assert_eq!(channel.read_input().values.len(), 6);
        assert_eq!(channel.read_output().values.len(), 3);
    }

    #[test]
    fn test_input_slot_round() {
        let channel = Channel::new(layout()).unwrap();
        let u = [293.15, 0.0, 0.0, 101_325.0, 0.1, 291.15];
        channel.write_input(60.0, 30.0, &u).unwrap();
        let input = channel.read_input();
        assert_eq!(input.time, 60.0);
        assert_eq!(input.dt, 30.0);
        assert_eq!(input.values, u);
        assert!(channel.write_input(0.0, 1.0, &u[..2]).is_err());
    }

    #[test]
    fn test_oversized_layout_fails_cleanly() {
        let huge = ExchangeLayout {
            sensors: usize::MAX / 4,
            ..layout()
        };
        let err = Channel::new(huge).unwrap_err();
        assert!(matches!(err, RoomflowError::AllocationFailed { .. }));
    }

    #[test]
    fn test_error_record_raises_flag() {
        let channel = Arc::new(Channel::new(layout()).unwrap());
        let sink = ChannelSink::new(Arc::clone(&channel));
        sink.warning("tile pressure clipped");
        assert!(channel.flags().error().is_none());
        sink.error("solver diverged");
        assert_eq!(
            channel.flags().check_peer(),
            Err(RoomflowError::PeerFault("solver diverged".into()))
        );
    }
}
