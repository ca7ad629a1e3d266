//! Driver-facing session API.
//!
//! [`CouplingSession::init`] claims the process-wide channel, builds the
//! engine and starts its thread. [`CouplingSession::exchange`] runs one
//! handshake round. [`CouplingSession::shutdown`] consumes the session, so
//! it runs at most once; dropping a session without it stops the engine
//! without waiting.

use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{info, warn};

use roomflow_core::{HandshakeStats, Result, RetryPolicy, RoomflowError, Slot};
use roomflow_ffd::config::CaseConfig;

use crate::channel::{Channel, Registration};
use crate::engine::{ffd_engine, run_engine, CouplingEngine, EngineExit};
use crate::layout::ExchangeLayout;

/// Name of the engine thread.
pub const ENGINE_THREAD_NAME: &str = "roomflow-engine";

/// Result of a stop request.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReport {
    /// The engine left its loop.
    Acknowledged {
        /// How it left.
        exit: EngineExit,
    },
    /// The engine never acknowledged; its thread was detached.
    TimedOut {
        /// Polls performed.
        attempts: u32,
    },
}

impl StopReport {
    /// Whether the engine acknowledged.
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, StopReport::Acknowledged { .. })
    }

    /// `Err(ShutdownTimeout)` for a timeout, `Ok` otherwise.
    pub fn into_result(self) -> Result<()> {
        match self {
            StopReport::Acknowledged { .. } => Ok(()),
            StopReport::TimedOut { attempts } => Err(RoomflowError::ShutdownTimeout { attempts }),
        }
    }
}

/// Session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionStats {
    /// Completed exchanges.
    pub exchanges: u64,
    /// Engine time after the last exchange (s).
    pub engine_time: f64,
    /// Flag transitions.
    pub handshake: HandshakeStats,
}

/// Owned handle to a live coupling.
pub struct CouplingSession {
    channel: Arc<Channel>,
    engine: Option<JoinHandle<EngineExit>>,
    registration: Option<Registration>,
    handshake: RetryPolicy,
    shutdown: RetryPolicy,
    exchanges: u64,
    engine_time: f64,
}

impl CouplingSession {
    /// Start a solver-backed coupling for `case`.
    ///
    /// Fails with [`RoomflowError::AlreadyInitialized`] while another
    /// session is live; the live session is untouched.
    pub fn init(case: CaseConfig) -> Result<Self> {
        let registration = Registration::acquire()?;
        let layout = ExchangeLayout::from_case(&case);
        let shutdown = case.coupling.shutdown;
        let channel = Arc::new(Channel::new(layout)?);
        let engine = ffd_engine(case, &channel)?;
        Self::spawn(registration, channel, engine, shutdown)
    }

    /// Start a coupling around any engine.
    pub fn with_engine<E: CouplingEngine>(layout: ExchangeLayout, engine: E, shutdown: RetryPolicy) -> Result<Self> {
        let registration = Registration::acquire()?;
        let channel = Arc::new(Channel::new(layout)?);
        Self::spawn(registration, channel, engine, shutdown)
    }

    fn spawn<E: CouplingEngine>(
        registration: Registration,
        channel: Arc<Channel>,
        engine: E,
        shutdown: RetryPolicy,
    ) -> Result<Self> {
        let engine_channel = Arc::clone(&channel);
        let handle = std::thread::Builder::new()
            .name(ENGINE_THREAD_NAME.to_string())
            .spawn(move || run_engine(engine, engine_channel, RetryPolicy::unbounded()))
            .map_err(|_| RoomflowError::AllocationFailed {
                what: "engine thread",
                bytes: 0,
            })?;
        info!(
            inputs = channel.layout().n_inputs(),
            outputs = channel.layout().n_outputs(),
            "Coupling session started"
        );
        Ok(Self {
            channel,
            engine: Some(handle),
            registration: Some(registration),
            handshake: RetryPolicy::unbounded(),
            shutdown,
            exchanges: 0,
            engine_time: 0.0,
        })
    }

    /// Replace the stop-path retry policy.
    pub fn with_shutdown_policy(mut self, policy: RetryPolicy) -> Self {
        self.shutdown = policy;
        self
    }

    /// Exchange vector layout.
    pub fn layout(&self) -> &ExchangeLayout {
        self.channel.layout()
    }

    /// Shared channel.
    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Counters.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            exchanges: self.exchanges,
            engine_time: self.engine_time,
            handshake: self.channel.flags().stats(),
        }
    }

    fn engine_gone(&self) -> bool {
        self.engine.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait on the handshake policy, failing on a peer fault or a dead
    /// engine.
    fn wait(&self, ready: impl Fn(&Channel) -> bool) -> Result<()> {
        let flags = self.channel.flags();
        let outcome = flags.poll(&self.handshake, |f| {
            f.check_peer()?;
            if ready(&self.channel) {
                return Ok(Some(()));
            }
            if self.engine_gone() {
                return Err(RoomflowError::ChannelClosed);
            }
            Ok(None)
        })?;
        outcome.map_err(|attempts| RoomflowError::ShutdownTimeout { attempts })
    }

    /// Driver half one: publish inputs for the interval `[time, time + dt]`.
    ///
    /// Blocks while the previous input is unread.
    pub fn post_input(&mut self, time: f64, dt: f64, u: &[f64]) -> Result<()> {
        let expected = self.layout().n_inputs();
        if u.len() != expected {
            return Err(RoomflowError::LayoutMismatch {
                what: "driver inputs",
                expected,
                actual: u.len(),
            });
        }
        self.wait(|c| !c.flags().is_ready(Slot::Input))?;
        self.channel.write_input(time, dt, u)?;
        self.channel.flags().raise(Slot::Input)
    }

    /// Driver half two: wait for outputs and copy them out.
    pub fn take_output(&mut self) -> Result<(f64, Vec<f64>)> {
        self.wait(|c| c.flags().is_ready(Slot::Output))?;
        let output = self.channel.read_output();
        self.channel.flags().clear(Slot::Output)?;
        self.exchanges += 1;
        self.engine_time = output.time;
        Ok((output.time, output.values))
    }

    /// One coupling step: send `u`, wait for the engine to cover
    /// `[time, time + dt]`, return its time and `n_outputs` values.
    pub fn exchange(&mut self, time: f64, dt: f64, u: &[f64], n_outputs: usize) -> Result<(f64, Vec<f64>)> {
        let expected = self.layout().n_outputs();
        if n_outputs != expected {
            return Err(RoomflowError::LayoutMismatch {
                what: "engine outputs",
                expected,
                actual: n_outputs,
            });
        }
        self.post_input(time, dt, u)?;
        self.take_output()
    }

    /// Stop the engine and release the channel.
    pub fn shutdown(mut self) -> StopReport {
        self.stop(true)
    }

    fn stop(&mut self, wait: bool) -> StopReport {
        let flags = self.channel.flags();
        flags.request_stop();

        let attempts = if wait {
            match flags.poll(&self.shutdown, |f| Ok(f.stop_acknowledged().then_some(()))) {
                Ok(Ok(())) => None,
                Ok(Err(attempts)) => Some(attempts),
                Err(_) => Some(0),
            }
        } else if flags.stop_acknowledged() {
            None
        } else {
            Some(0)
        };

        let report = match (attempts, self.engine.take()) {
            (None, Some(handle)) => match handle.join() {
                Ok(exit) => StopReport::Acknowledged { exit },
                Err(_) => StopReport::Acknowledged {
                    exit: EngineExit::Failed(RoomflowError::ChannelClosed),
                },
            },
            (None, None) => StopReport::Acknowledged {
                exit: EngineExit::Stopped { intervals: 0 },
            },
            (Some(attempts), _) => StopReport::TimedOut { attempts },
        };

        if let StopReport::TimedOut { attempts } = report {
            if wait {
                warn!(attempts, "Could not stop in required time, detaching engine thread");
            }
        }
        self.registration.take();
        info!(exchanges = self.exchanges, "Coupling session closed");
        report
    }
}

impl Drop for CouplingSession {
    fn drop(&mut self) {
        if self.registration.is_some() {
            self.stop(false);
        }
    }
}

impl std::fmt::Debug for CouplingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CouplingSession")
            .field("layout", self.channel.layout())
            .field("exchanges", &self.exchanges)
            .field("engine_time", &self.engine_time)
            .field("live", &self.registration.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::DriverInput;
    use parking_lot::Mutex;
    use roomflow_ffd::config::SolverConfig;
    use std::time::Duration;

    // The channel slot is process-wide
    static SERIAL: Mutex<()> = parking_lot::const_mutex(());

    fn small_box() -> CaseConfig {
        let mut case = CaseConfig::ventilated_box(4);
        case.solver = SolverConfig::default().with_sweeps(4).with_parallel(false);
        case
    }

    fn inputs(layout: &ExchangeLayout) -> Vec<f64> {
        let mut u = vec![0.0; layout.n_inputs()];
        // supply mass flow and both port temperatures
        u[3] = 0.02;
        u[5] = 293.15;
        u[6] = 293.15;
        u
    }

    #[test]
    fn test_exchange_advances_engine() {
        let _serial = SERIAL.lock();
        let mut session = CouplingSession::init(small_box()).unwrap();
        let layout = session.layout().clone();
        let u = inputs(&layout);

        let (t1, y1) = session.exchange(0.0, 0.5, &u, layout.n_outputs()).unwrap();
        assert!((t1 - 0.5).abs() < 1e-9);
        assert_eq!(y1.len(), layout.n_outputs());
        let (t2, _) = session.exchange(t1, 0.5, &u, layout.n_outputs()).unwrap();
        assert!((t2 - 1.0).abs() < 1e-9);

        let stats = session.stats();
        assert_eq!(stats.exchanges, 2);
        assert_eq!(stats.handshake.inputs_raised, 2);
        assert_eq!(stats.handshake.outputs_cleared, 2);
        assert_eq!(stats.handshake.violations, 0);

        let report = session.shutdown();
        assert_eq!(report, StopReport::Acknowledged { exit: EngineExit::Stopped { intervals: 2 } });
    }

    #[test]
    fn test_second_init_rejected() {
        let _serial = SERIAL.lock();
        let mut first = CouplingSession::init(small_box()).unwrap();
        let err = CouplingSession::init(small_box()).unwrap_err();
        assert_eq!(err, RoomflowError::AlreadyInitialized);

        // The live session still works
        let layout = first.layout().clone();
        first.exchange(0.0, 0.1, &inputs(&layout), layout.n_outputs()).unwrap();
        assert!(first.shutdown().is_acknowledged());

        let again = CouplingSession::init(small_box()).unwrap();
        drop(again);
        assert!(!Registration::is_held());
    }

    #[test]
    fn test_layout_checked_before_handshake() {
        let _serial = SERIAL.lock();
        let mut session = CouplingSession::init(small_box()).unwrap();
        let n_out = session.layout().n_outputs();
        assert!(matches!(
            session.exchange(0.0, 1.0, &[0.0; 2], n_out),
            Err(RoomflowError::LayoutMismatch { what: "driver inputs", .. })
        ));
        let u = inputs(session.layout());
        assert!(matches!(
            session.exchange(0.0, 1.0, &u, n_out + 1),
            Err(RoomflowError::LayoutMismatch { what: "engine outputs", .. })
        ));
        assert_eq!(session.stats().handshake.inputs_raised, 0);
        assert!(session.shutdown().is_acknowledged());
    }

    #[test]
    fn test_engine_fault_reaches_driver() {
        struct Failing;
        impl CouplingEngine for Failing {
            fn interval(&mut self, _: &DriverInput, _: &mut [f64]) -> Result<f64> {
                Err(RoomflowError::config("thermal kind 7"))
            }
        }
        let _serial = SERIAL.lock();
        let layout = ExchangeLayout::from_case(&small_box());
        let mut session = CouplingSession::with_engine(layout.clone(), Failing, RetryPolicy::shutdown()).unwrap();
        let err = session
            .exchange(0.0, 1.0, &inputs(&layout), layout.n_outputs())
            .unwrap_err();
        assert!(matches!(err, RoomflowError::PeerFault(ref m) if m.contains("thermal kind 7")), "{err}");
        assert!(matches!(
            session.shutdown(),
            StopReport::Acknowledged { exit: EngineExit::Failed(_) }
        ));
    }

    #[test]
    fn test_stuck_engine_times_out() {
        struct Stuck(std::sync::mpsc::Receiver<()>);
        impl CouplingEngine for Stuck {
            fn interval(&mut self, _: &DriverInput, _: &mut [f64]) -> Result<f64> {
                let _ = self.0.recv();
                Ok(0.0)
            }
        }
        let _serial = SERIAL.lock();
        let (release, rx) = std::sync::mpsc::channel();
        let layout = ExchangeLayout::from_case(&small_box());
        let u = inputs(&layout);
        let mut session = CouplingSession::with_engine(layout, Stuck(rx), RetryPolicy::shutdown())
            .unwrap()
            .with_shutdown_policy(RetryPolicy::bounded(5, Duration::from_millis(2)));

        // First input is taken, the second is never consumed
        session.post_input(0.0, 1.0, &u).unwrap();
        session.post_input(1.0, 1.0, &u).unwrap();
        assert!(session.channel().flags().is_ready(Slot::Input));

        let channel = Arc::clone(session.channel());
        assert_eq!(session.shutdown(), StopReport::TimedOut { attempts: 5 });
        assert!(!Registration::is_held());

        // Let the detached engine finish
        release.send(()).unwrap();
        let policy = RetryPolicy::bounded(500, Duration::from_millis(10));
        let done = channel.flags().poll(&policy, |f| Ok(f.stop_acknowledged().then_some(())));
        assert!(matches!(done, Ok(Ok(()))));
    }
}
