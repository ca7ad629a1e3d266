//! Shared control flags for the driver/engine handshake.
//!
//! Each direction has a single-slot ready flag. A producer may only raise a
//! flag that is down and a consumer may only lower a flag that is up; both
//! transitions are compare-and-swap so a broken sequence is detected instead
//! of silently losing a message.
//!
//! ```text
//!   driver                      flags                       engine
//!   ------                      -----                       ------
//!   wait !input_ready  ──────►  input_ready = 1  ──────►  copy inputs
//!                               input_ready = 0  ◄──────  (after copy)
//!   copy outputs  ◄──────────  output_ready = 1  ◄──────  wait !output_ready
//!   (after copy)  ──────────►  output_ready = 0
//! ```
//!
//! Waiters block on a condition variable with a timeout taken from their
//! [`RetryPolicy`], so stop and error flags are re-checked before every sleep.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::backoff::RetryPolicy;
use crate::error::{Result, RoomflowError};

/// Handshake flags plus the error slot.
#[derive(Debug, Default)]
pub struct ControlFlags {
    input_ready: AtomicBool,
    output_ready: AtomicBool,
    error_flag: AtomicBool,
    stop_requested: AtomicBool,
    stop_acknowledged: AtomicBool,
    error_message: Mutex<String>,
    generation: Mutex<u64>,
    changed: Condvar,
    counters: HandshakeCounters,
}

#[derive(Debug, Default)]
struct HandshakeCounters {
    inputs_raised: AtomicU64,
    inputs_cleared: AtomicU64,
    outputs_raised: AtomicU64,
    outputs_cleared: AtomicU64,
    violations: AtomicU64,
}

/// Snapshot of flag transition counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandshakeStats {
    /// Times the driver raised `input_ready`.
    pub inputs_raised: u64,
    /// Times the engine cleared `input_ready`.
    pub inputs_cleared: u64,
    /// Times the engine raised `output_ready`.
    pub outputs_raised: u64,
    /// Times the driver cleared `output_ready`.
    pub outputs_cleared: u64,
    /// Rejected transitions.
    pub violations: u64,
}

/// Which single-slot flag a transition applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Driver to engine.
    Input,
    /// Engine to driver.
    Output,
}

impl ControlFlags {
    /// Create flags with everything lowered.
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self, slot: Slot) -> &AtomicBool {
        match slot {
            Slot::Input => &self.input_ready,
            Slot::Output => &self.output_ready,
        }
    }

    /// Whether the slot currently holds an unread message.
    pub fn is_ready(&self, slot: Slot) -> bool {
        self.flag(slot).load(Ordering::Acquire)
    }

    /// Mark the slot as filled. Fails if it already was.
    pub fn raise(&self, slot: Slot) -> Result<()> {
        self.transition(slot, false, true)?;
        let counter = match slot {
            Slot::Input => &self.counters.inputs_raised,
            Slot::Output => &self.counters.outputs_raised,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.notify();
        Ok(())
    }

    /// Mark the slot as consumed. Fails if it was empty.
    pub fn clear(&self, slot: Slot) -> Result<()> {
        self.transition(slot, true, false)?;
        let counter = match slot {
            Slot::Input => &self.counters.inputs_cleared,
            Slot::Output => &self.counters.outputs_cleared,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.notify();
        Ok(())
    }

    fn transition(&self, slot: Slot, from: bool, to: bool) -> Result<()> {
        self.flag(slot)
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| {
                self.counters.violations.fetch_add(1, Ordering::Relaxed);
                RoomflowError::HandshakeViolation(format!(
                    "{slot:?} ready flag expected {} but was {}",
                    from as u8, !from as u8
                ))
            })
    }

    /// Store an error message and raise the error flag.
    ///
    /// The first message wins; later calls only keep the flag raised.
    pub fn raise_error(&self, message: impl Into<String>) {
        {
            let mut slot = self.error_message.lock();
            if slot.is_empty() {
                *slot = message.into();
            }
        }
        self.error_flag.store(true, Ordering::Release);
        self.notify();
    }

    /// Error message if the error flag is raised.
    pub fn error(&self) -> Option<String> {
        if self.error_flag.load(Ordering::Acquire) {
            Some(self.error_message.lock().clone())
        } else {
            None
        }
    }

    /// Fail with the peer's message if the error flag is raised.
    pub fn check_peer(&self) -> Result<()> {
        match self.error() {
            Some(msg) => Err(RoomflowError::PeerFault(msg)),
            None => Ok(()),
        }
    }

    /// Ask the engine to stop.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.notify();
    }

    /// Whether a stop was requested.
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Engine confirms it left its loop.
    pub fn acknowledge_stop(&self) {
        self.stop_acknowledged.store(true, Ordering::Release);
        self.notify();
    }

    /// Whether the engine confirmed the stop.
    pub fn stop_acknowledged(&self) -> bool {
        self.stop_acknowledged.load(Ordering::Acquire)
    }

    /// Transition counts.
    pub fn stats(&self) -> HandshakeStats {
        HandshakeStats {
            inputs_raised: self.counters.inputs_raised.load(Ordering::Relaxed),
            inputs_cleared: self.counters.inputs_cleared.load(Ordering::Relaxed),
            outputs_raised: self.counters.outputs_raised.load(Ordering::Relaxed),
            outputs_cleared: self.counters.outputs_cleared.load(Ordering::Relaxed),
            violations: self.counters.violations.load(Ordering::Relaxed),
        }
    }

    fn notify(&self) {
        {
            let mut generation = self.generation.lock();
            *generation = generation.wrapping_add(1);
        }
        self.changed.notify_all();
    }

    /// Poll `check` until it yields a value or the policy runs out.
    ///
    /// Returns the value and the number of sleeps taken, or `None` with the
    /// attempt count when a bounded policy is exhausted. Between polls the
    /// caller sleeps on the condition variable, woken early by any flag
    /// change.
    pub fn poll<T>(
        &self,
        policy: &RetryPolicy,
        mut check: impl FnMut(&Self) -> Result<Option<T>>,
    ) -> Result<std::result::Result<T, u32>> {
        let mut attempt = 0u32;
        loop {
            let observed = *self.generation.lock();
            if let Some(value) = check(self)? {
                return Ok(Ok(value));
            }
            if !policy.allows(attempt) {
                return Ok(Err(attempt));
            }
            let delay = policy.get_delay(attempt);
            let mut generation = self.generation.lock();
            if *generation == observed && !delay.is_zero() {
                let _ = self.changed.wait_for(&mut generation, delay);
            }
            attempt = attempt.saturating_add(1);
        }
    }
}
