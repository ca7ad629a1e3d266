//! # Roomflow Co-Simulation
//!
//! Couples the room solver to a building-simulation driver through a
//! flag-gated, single-slot handshake.
//!
//! ```text
//!   driver thread                         engine thread
//!   ─────────────                         ─────────────
//!   exchange(t, dt, u) ──► input slot ──► decode, K → °C
//!                                         run steps to t + dt
//!   (t_next, y)        ◄── output slot ◄── encode, °C → K
//! ```
//!
//! ## Core Abstractions
//!
//! - [`CouplingSession`] - Owned handle: `init`, `exchange`, `shutdown`
//! - [`Channel`] - Input slot, output slot and control flags
//! - [`ExchangeLayout`] - Block layout of the exchange vectors
//! - [`CouplingEngine`] - One interval of engine work
//!
//! ## Example
//!
//! ```no_run
//! use roomflow_cosim::prelude::*;
//! use roomflow_ffd::CaseConfig;
//!
//! let case = CaseConfig::ventilated_box(10);
//! let mut session = CouplingSession::init(case)?;
//! let layout = session.layout().clone();
//! let u = vec![0.0; layout.n_inputs()];
//! let (t_next, y) = session.exchange(0.0, 60.0, &u, layout.n_outputs())?;
//! assert_eq!(y.len(), layout.n_outputs());
//! session.shutdown().into_result()?;
//! # let _ = t_next;
//! # Ok::<(), roomflow_core::RoomflowError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod engine;
pub mod layout;
pub mod session;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::channel::*;
    pub use crate::engine::*;
    pub use crate::layout::*;
    pub use crate::session::*;
}

// Re-exports for convenience
pub use channel::{Channel, DriverInput, EngineOutput, Registration};
pub use engine::{CouplingEngine, EngineExit, FfdEngine};
pub use layout::ExchangeLayout;
pub use roomflow_core::{Result, RoomflowError};
pub use session::{CouplingSession, StopReport};
