//! # Roomflow FFD
//!
//! Fast Fluid Dynamics solver for a single rectangular room.
//!
//! The room is a uniform staggered grid with one layer of ghost cells.
//! Velocities live on the positive faces of each cell, scalars at the
//! centres. Walls, blocks, openings, perforated tiles and equipment racks
//! are listed once in the [`BoundaryIndexTable`] and every boundary kernel
//! walks that table.
//!
//! ## Core Abstractions
//!
//! - [`GridGeometry`] / [`FieldStore`] - Padded grid and its field arrays
//! - [`CaseConfig`] - TOML case description
//! - [`BoundaryIndexTable`] - Flat list of boundary cells with owners
//! - [`Dispatcher`] - Named kernel ops with segmented boundary launches
//! - [`FfdSolver`] - Fractional-step time integration and driver I/O
//!
//! ## Example
//!
//! ```no_run
//! use roomflow_ffd::prelude::*;
//!
//! let mut solver = FfdSolver::new(CaseConfig::ventilated_box(10))?;
//! solver.run_interval(1.0)?;
//! let flows = solver.mass_flows()?;
//! assert!(flows.imbalance().abs() < 1e-9);
//! # Ok::<(), RoomflowError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod boundary;
pub mod config;
pub mod dispatch;
pub mod grid;
pub mod kernels;
pub mod params;
pub mod rack;
pub mod solver;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::boundary::*;
    pub use crate::config::*;
    pub use crate::dispatch::*;
    pub use crate::grid::*;
    pub use crate::params::*;
    pub use crate::rack::*;
    pub use crate::solver::*;
    pub use roomflow_core::{Result, RoomflowError};
}

// Re-exports for convenience
pub use boundary::{BoundaryIndexTable, ThermalKind};
pub use config::CaseConfig;
pub use dispatch::{ComputeDevice, CpuDevice, Dispatcher, KernelOp};
pub use grid::{FieldStore, GridGeometry, Var};
pub use roomflow_core::{Result, RoomflowError};
pub use solver::FfdSolver;
