//! # Roomflow
//!
//! Coupled room airflow simulation.
//!
//! Roomflow computes time-resolved airflow, temperature and species fields
//! inside an enclosure with a Fast Fluid Dynamics solver, and trades
//! boundary data with a building-simulation driver once per coupling
//! interval.
//!
//! ## Features
//!
//! - **Fractional-step solver** with semi-Lagrangian or upwind advection
//! - **Boundary Index Table** driving every boundary kernel, dispatched in
//!   bounded segments
//! - **Data-center models**: rack black boxes, perforated tiles, Chen
//!   zero-equation turbulence
//! - **Single-slot handshake** between driver and engine threads
//!
//! ## Quick Start
//!
//! ```no_run
//! use roomflow::prelude::*;
//!
//! // Stand-alone solve
//! let mut solver = FfdSolver::new(CaseConfig::ventilated_box(10))?;
//! solver.run_interval(1.0)?;
//! println!("room at {:.2} °C", solver.room_mean_temperature()?);
//!
//! // Coupled solve
//! let mut session = CouplingSession::init(CaseConfig::ventilated_box(10))?;
//! let layout = session.layout().clone();
//! let u = vec![0.0; layout.n_inputs()];
//! let (_t, y) = session.exchange(0.0, 60.0, &u, layout.n_outputs())?;
//! session.shutdown().into_result()?;
//! # let _ = y;
//! # Ok::<(), RoomflowError>(())
//! ```
//!
//! ## Crates
//!
//! - [`core`] - Errors, control flags, retry policy, log sink, units
//! - [`ffd`] - Grid, boundary table, dispatch layer and solver
//! - [`cosim`] - Channel, exchange layout, engine thread and session

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use roomflow_core as core;
pub use roomflow_cosim as cosim;
pub use roomflow_ffd as ffd;

/// Prelude for convenient imports.
pub mod prelude {
    pub use roomflow_core::prelude::*;
    pub use roomflow_cosim::prelude::*;
    pub use roomflow_ffd::prelude::*;
}

pub use roomflow_core::{Result, RoomflowError};
pub use roomflow_cosim::{CouplingSession, StopReport};
pub use roomflow_ffd::{CaseConfig, FfdSolver};
