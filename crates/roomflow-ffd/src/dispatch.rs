//! Kernel dispatch layer.
//!
//! Every physics sub-step is one named [`KernelOp`]. A grid op runs once over
//! the padded grid and writes only the fields it declares. A boundary op runs
//! over the Boundary Index Table. Because a device caps how many elements
//! one launch may cover, the table is cut into contiguous
//! [`segments`] no longer than the ceiling. Segmenting never changes which
//! entries are visited or their relative order.
//!
//! Launches may be asynchronous; [`Dispatcher::barrier`] is the full
//! issue/wait/read-back barrier and every host read goes through
//! [`Dispatcher::read_back`].

use std::collections::BTreeMap;
use std::ops::Range;

use tracing::trace;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use roomflow_core::{Result, RoomflowError};

use crate::boundary::BoundaryIndexTable;
use crate::grid::{Axis, FieldStore, FieldView, Var};
use crate::kernels::{self, Tile};
use crate::params::SolverParams;
use crate::rack::RackState;

/// Coefficient fields of the linear systems, in [`Tile`] slot order.
pub const COEFFICIENTS: [Var; 8] = [
    Var::Ap,
    Var::Ae,
    Var::Aw,
    Var::An,
    Var::As,
    Var::Af,
    Var::Ab,
    Var::B,
];

/// What an op iterates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    /// Every cell of the padded grid.
    Grid,
    /// Every Boundary Index Table entry, in segments.
    BoundaryTable,
}

/// Named compute operations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelOp {
    /// Semi-Lagrangian backtrace of `var` from its snapshot.
    AdvectSemiLagrangian {
        /// Transported variable.
        var: Var,
    },
    /// Implicit upwind advection coefficients for `var`.
    AssembleUpwind {
        /// Transported variable.
        var: Var,
    },
    /// Implicit diffusion coefficients for `var`.
    AssembleDiffusion {
        /// Diffused variable.
        var: Var,
    },
    /// Drop zero-gradient neighbours and rebuild the centre coefficient.
    RecomputeAp {
        /// Variable whose flags decide the neighbours.
        var: Var,
    },
    /// One Jacobi sweep of `var` into [`Var::Tmp5`].
    JacobiSweep {
        /// Solved variable.
        var: Var,
    },
    /// Boundary condition of `var` over the table.
    ApplyBoundary {
        /// Constrained variable.
        var: Var,
    },
    /// Pressure Poisson coefficients and divergence source.
    ProjectionSource,
    /// Subtract the pressure gradient from one velocity component.
    ProjectionCorrect {
        /// Corrected component.
        axis: Axis,
    },
    /// Distance from each fluid cell to the nearest solid boundary cell.
    MinWallDistance,
    /// Chen zero-equation turbulent viscosity.
    TurbulentViscosity,
    /// Uniform turbulent diffusivity over fluid cells.
    BroadcastAlphaT {
        /// Diffusivity (m²/s).
        value: f64,
    },
    /// Rack inlet/outlet substitution.
    RackBlackBox,
    /// Pressure-driven tile velocities.
    TileCorrection,
    /// Uniform outlet velocity correction.
    MassBalance {
        /// Outward velocity added at every outlet face (m/s).
        delta: f64,
    },
    /// Add `var` into its running sum.
    AccumulateMean {
        /// Averaged variable.
        var: Var,
    },
}

impl KernelOp {
    /// Short name for logs and statistics.
    pub fn name(&self) -> &'static str {
        match self {
            KernelOp::AdvectSemiLagrangian { .. } => "advect_semi_lagrangian",
            KernelOp::AssembleUpwind { .. } => "assemble_upwind",
            KernelOp::AssembleDiffusion { .. } => "assemble_diffusion",
            KernelOp::RecomputeAp { .. } => "recompute_ap",
            KernelOp::JacobiSweep { .. } => "jacobi_sweep",
            KernelOp::ApplyBoundary { .. } => "apply_boundary",
            KernelOp::ProjectionSource => "projection_source",
            KernelOp::ProjectionCorrect { .. } => "projection_correct",
            KernelOp::MinWallDistance => "min_wall_distance",
            KernelOp::TurbulentViscosity => "turbulent_viscosity",
            KernelOp::BroadcastAlphaT { .. } => "broadcast_alpha_t",
            KernelOp::RackBlackBox => "rack_black_box",
            KernelOp::TileCorrection => "tile_correction",
            KernelOp::MassBalance { .. } => "mass_balance",
            KernelOp::AccumulateMean { .. } => "accumulate_mean",
        }
    }

    /// Iteration domain.
    pub fn domain(&self) -> Domain {
        match self {
            KernelOp::ApplyBoundary { .. }
            | KernelOp::MinWallDistance
            | KernelOp::RackBlackBox
            | KernelOp::TileCorrection
            | KernelOp::MassBalance { .. } => Domain::BoundaryTable,
            _ => Domain::Grid,
        }
    }

    /// Fields the op writes. Grid ops receive these, in this order, as
    /// [`Tile`] slots.
    pub fn writes(&self) -> Vec<Var> {
        match *self {
            KernelOp::AdvectSemiLagrangian { var } => vec![var],
            KernelOp::AssembleUpwind { .. }
            | KernelOp::AssembleDiffusion { .. }
            | KernelOp::ProjectionSource => COEFFICIENTS.to_vec(),
            KernelOp::RecomputeAp { .. } => COEFFICIENTS[..7].to_vec(),
            KernelOp::JacobiSweep { .. } => vec![Var::Tmp5],
            KernelOp::ApplyBoundary { var } => vec![var],
            KernelOp::ProjectionCorrect { axis } => vec![Var::velocity(axis)],
            KernelOp::MinWallDistance => vec![Var::WallDistance],
            KernelOp::TurbulentViscosity => vec![Var::NuT],
            KernelOp::BroadcastAlphaT { .. } => vec![Var::AlphaT],
            KernelOp::RackBlackBox => vec![Var::VxBc, Var::VyBc, Var::VzBc, Var::TempBc],
            KernelOp::TileCorrection => vec![Var::VxBc, Var::VyBc, Var::VzBc],
            KernelOp::MassBalance { .. } => vec![Var::Vx, Var::Vy, Var::Vz],
            KernelOp::AccumulateMean { var } => var.mean().into_iter().collect(),
        }
    }

    /// Fields the op reads besides its writes.
    pub fn reads(&self) -> Vec<Var> {
        match *self {
            KernelOp::AdvectSemiLagrangian { var } | KernelOp::AssembleUpwind { var } => {
                let mut reads = vec![kernels::snapshot(var)];
                reads.extend(kernels::transport_velocity(var));
                reads
            }
            KernelOp::AssembleDiffusion { var } => {
                let mut reads = vec![var, kernels::eddy_diffusivity(var)];
                match var {
                    Var::Vz => reads.push(Var::Temp),
                    Var::Temp => reads.push(Var::HeatSource),
                    _ => {}
                }
                reads
            }
            KernelOp::RecomputeAp { .. } => Vec::new(),
            KernelOp::JacobiSweep { var } => {
                let mut reads = vec![var];
                reads.extend(COEFFICIENTS);
                reads
            }
            KernelOp::ApplyBoundary { var } => {
                let mut reads: Vec<Var> = var.boundary_value().into_iter().collect();
                if var == Var::Temp {
                    reads.extend([Var::QfluxBc, Var::AlphaT]);
                }
                reads
            }
            KernelOp::ProjectionSource => vec![Var::Vx, Var::Vy, Var::Vz],
            KernelOp::ProjectionCorrect { .. } => vec![Var::Pressure],
            KernelOp::MinWallDistance | KernelOp::BroadcastAlphaT { .. } => Vec::new(),
            KernelOp::TurbulentViscosity => vec![Var::Vx, Var::Vy, Var::Vz, Var::WallDistance],
            KernelOp::RackBlackBox => Vec::new(),
            KernelOp::TileCorrection => vec![Var::Pressure],
            KernelOp::MassBalance { .. } => Vec::new(),
            KernelOp::AccumulateMean { var } => vec![var],
        }
    }
}

/// Contiguous ranges covering `[0, count)`, none longer than `ceiling`; the
/// last one is clipped to `count`.
pub fn segments(count: usize, ceiling: usize) -> impl Iterator<Item = Range<usize>> {
    let ceiling = ceiling.max(1);
    (0..count)
        .step_by(ceiling)
        .map(move |start| start..(start + ceiling).min(count))
}

/// Buffers one launch may touch.
pub struct LaunchArgs<'a> {
    /// Field store.
    pub store: &'a mut FieldStore,
    /// Boundary table.
    pub table: &'a BoundaryIndexTable,
    /// Black-box state per rack, parallel to [`BoundaryIndexTable::racks`].
    pub racks: &'a [RackState],
}

/// Something that executes kernel ops.
pub trait ComputeDevice: Send {
    /// Device name for logs.
    fn name(&self) -> &str;

    /// Upload the parameter block.
    fn upload(&mut self, params: &[u8]) -> Result<()>;

    /// Run `op` over `range` of its domain. May return before the work is
    /// visible to the host.
    fn launch(&mut self, op: &KernelOp, range: Range<usize>, args: &mut LaunchArgs<'_>) -> Result<()>;

    /// Block until every launch has completed.
    fn finish(&mut self) -> Result<()>;

    /// Device-side buffer copy.
    fn copy(&mut self, store: &mut FieldStore, src: Var, dst: Var) -> Result<()> {
        store.copy_field(src, dst)
    }
}

/// CPU device. Grid ops split their writes into z slabs, run on the rayon
/// pool when `parallel` is set.
#[derive(Debug, Default)]
pub struct CpuDevice {
    params: Option<SolverParams>,
    parallel: bool,
}

impl CpuDevice {
    /// Create a device.
    pub fn new(parallel: bool) -> Self {
        Self {
            params: None,
            parallel: parallel && cfg!(feature = "parallel"),
        }
    }

    /// Whether grid ops use rayon.
    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    fn params(&self) -> Result<SolverParams> {
        self.params.ok_or_else(|| RoomflowError::KernelFailed {
            kernel: "launch",
            reason: "no parameter block uploaded".to_string(),
        })
    }

    fn launch_grid(&self, op: &KernelOp, range: Range<usize>, store: &mut FieldStore) -> Result<()> {
        let params = self.params()?;
        let chunk = store.geometry().slab();
        let writes = op.writes();
        let (fields, view) = store.split_mut(&writes)?;

        let mut per_field: Vec<std::vec::IntoIter<&mut [f64]>> = fields
            .into_iter()
            .map(|f| f[range.clone()].chunks_mut(chunk).collect::<Vec<_>>().into_iter())
            .collect();
        let mut tiles = Vec::with_capacity(range.len().div_ceil(chunk));
        for base in range.clone().step_by(chunk) {
            let fields: Vec<&mut [f64]> = per_field.iter_mut().filter_map(Iterator::next).collect();
            tiles.push(Tile::new(base, fields));
        }

        if self.parallel {
            run_tiles_parallel(op, &mut tiles, &view, &params);
        } else {
            for tile in &mut tiles {
                kernels::run_grid(op, tile, &view, &params);
            }
        }
        Ok(())
    }
}

#[cfg(feature = "parallel")]
fn run_tiles_parallel(op: &KernelOp, tiles: &mut [Tile<'_>], view: &FieldView<'_>, params: &SolverParams) {
    tiles
        .par_iter_mut()
        .for_each(|tile| kernels::run_grid(op, tile, view, params));
}

#[cfg(not(feature = "parallel"))]
fn run_tiles_parallel(op: &KernelOp, tiles: &mut [Tile<'_>], view: &FieldView<'_>, params: &SolverParams) {
    for tile in tiles {
        kernels::run_grid(op, tile, view, params);
    }
}

impl ComputeDevice for CpuDevice {
    fn name(&self) -> &str {
        if self.parallel {
            "cpu-rayon"
        } else {
            "cpu"
        }
    }

    fn upload(&mut self, params: &[u8]) -> Result<()> {
        self.params = Some(SolverParams::from_bytes(params)?);
        Ok(())
    }

    fn launch(&mut self, op: &KernelOp, range: Range<usize>, args: &mut LaunchArgs<'_>) -> Result<()> {
        match op.domain() {
            Domain::Grid => {
                if range.end > args.store.size() {
                    return Err(RoomflowError::KernelFailed {
                        kernel: op.name(),
                        reason: format!("range {range:?} exceeds grid size {}", args.store.size()),
                    });
                }
                self.launch_grid(op, range, args.store)
            }
            Domain::BoundaryTable => {
                if range.end > args.table.len() {
                    return Err(RoomflowError::KernelFailed {
                        kernel: op.name(),
                        reason: format!("range {range:?} exceeds table length {}", args.table.len()),
                    });
                }
                let params = self.params()?;
                kernels::run_boundary(op, range, args, &params)
            }
        }
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Launch counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Ops dispatched.
    pub dispatches: u64,
    /// Device launches, one per segment.
    pub launches: u64,
    /// Boundary-table segments issued.
    pub segments: u64,
    /// Barriers.
    pub barriers: u64,
    /// Buffer copies.
    pub copies: u64,
    /// Dispatches per op name.
    pub per_op: BTreeMap<&'static str, u64>,
}

/// Sequences ops onto a device, segmenting boundary-table ops.
#[derive(Debug)]
pub struct Dispatcher<D: ComputeDevice = CpuDevice> {
    device: D,
    ceiling: usize,
    dirty: bool,
    stats: DispatchStats,
}

impl<D: ComputeDevice> Dispatcher<D> {
    /// Create a dispatcher with a per-launch ceiling.
    pub fn new(device: D, ceiling: usize) -> Result<Self> {
        if ceiling == 0 {
            return Err(RoomflowError::config("dispatch ceiling must be at least 1"));
        }
        Ok(Self {
            device,
            ceiling,
            dirty: false,
            stats: DispatchStats::default(),
        })
    }

    /// Upload the parameter block.
    pub fn upload(&mut self, params: &SolverParams) -> Result<()> {
        self.device.upload(params.as_bytes())
    }

    /// Issue one op.
    pub fn dispatch(&mut self, op: KernelOp, args: &mut LaunchArgs<'_>) -> Result<()> {
        self.stats.dispatches += 1;
        *self.stats.per_op.entry(op.name()).or_default() += 1;
        match op.domain() {
            Domain::Grid => {
                let size = args.store.size();
                self.device.launch(&op, 0..size, args)?;
                self.stats.launches += 1;
            }
            Domain::BoundaryTable => {
                for range in segments(args.table.len(), self.ceiling) {
                    trace!(op = op.name(), start = range.start, end = range.end, "launch segment");
                    self.device.launch(&op, range, args)?;
                    self.stats.launches += 1;
                    self.stats.segments += 1;
                }
            }
        }
        self.dirty = true;
        Ok(())
    }

    /// Issue one Jacobi sweep followed by the copy back from the iterate.
    pub fn sweep(&mut self, var: Var, args: &mut LaunchArgs<'_>) -> Result<()> {
        self.dispatch(KernelOp::JacobiSweep { var }, args)?;
        self.copy(args.store, Var::Tmp5, var)
    }

    /// Device-side copy.
    pub fn copy(&mut self, store: &mut FieldStore, src: Var, dst: Var) -> Result<()> {
        self.device.copy(store, src, dst)?;
        self.stats.copies += 1;
        self.dirty = true;
        Ok(())
    }

    /// Full barrier.
    pub fn barrier(&mut self) -> Result<()> {
        self.device.finish()?;
        self.stats.barriers += 1;
        self.dirty = false;
        Ok(())
    }

    /// Barrier if needed, then hand the store to the host.
    pub fn read_back<'s>(&mut self, store: &'s FieldStore) -> Result<&'s FieldStore> {
        if self.dirty {
            self.barrier()?;
        }
        Ok(store)
    }

    /// Per-launch ceiling.
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Device.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Counters.
    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }
}
