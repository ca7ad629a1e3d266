//! # Roomflow Core
//!
//! Shared building blocks for the roomflow solver and its co-simulation
//! channel.
//!
//! ## Core Abstractions
//!
//! - [`RoomflowError`] - Error taxonomy with a coarse [`ErrorCategory`]
//! - [`ControlFlags`] - Single-slot ready flags, error slot and stop flags
//! - [`RetryPolicy`] - Bounded or unbounded polling with backoff
//! - [`LogSink`] - Three-severity log stream
//!
//! ## Example
//!
//! ```
//! use roomflow_core::prelude::*;
//!
//! let flags = ControlFlags::new();
//! flags.raise(Slot::Input).unwrap();
//! assert!(flags.raise(Slot::Input).is_err());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod control;
pub mod error;
pub mod log;
pub mod units;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::backoff::*;
    pub use crate::control::*;
    pub use crate::error::*;
    pub use crate::log::*;
    pub use crate::units::*;
}

// Re-exports for convenience
pub use backoff::{BackoffStrategy, RetryPolicy};
pub use control::{ControlFlags, HandshakeStats, Slot};
pub use error::{ErrorCategory, Result, RoomflowError};
pub use log::{LogSink, MemorySink, Severity, TracingSink};
