//! Kernel bodies.
//!
//! Grid kernels receive a [`Tile`]: a contiguous run of cells, with one
//! mutable slice per written field, plus a read-only [`FieldView`] of
//! everything else. Boundary kernels walk a range of the Boundary Index
//! Table and write scattered cells.
//!
//! Linear systems use seven-point coefficients stored in
//! [`COEFFICIENTS`](crate::dispatch::COEFFICIENTS) order: `Ap`, then the
//! `+x, -x, +y, -y, +z, -z` neighbours, then `B`.

mod advection;
mod averaging;
mod boundary_conditions;
mod diffusion;
mod equipment;
mod projection;
mod turbulence;

use std::ops::Range;

use roomflow_core::Result;

use crate::dispatch::{KernelOp, LaunchArgs};
use crate::grid::{Axis, CellFlag, FieldView, FlagKind, GridGeometry, Location, Var};
use crate::params::SolverParams;

pub use equipment::tile_resistance;

/// Slot of `Ap` in a coefficient tile.
pub(crate) const AP: usize = 0;
/// Slot of `B` in a coefficient tile.
pub(crate) const B: usize = 7;

/// Coefficient slot of the neighbour on the `plus` or minus side of `axis`.
#[inline]
pub(crate) fn neighbor_slot(axis: Axis, plus: bool) -> usize {
    1 + 2 * axis.index() + usize::from(!plus)
}

/// A contiguous run of cells with the written fields of one grid op.
#[derive(Debug)]
pub struct Tile<'a> {
    base: usize,
    fields: Vec<&'a mut [f64]>,
}

impl<'a> Tile<'a> {
    /// Wrap the written slices, all starting at linear index `base`.
    pub fn new(base: usize, fields: Vec<&'a mut [f64]>) -> Self {
        Self { base, fields }
    }

    /// Linear indices covered.
    #[inline]
    pub fn cells(&self) -> Range<usize> {
        let len = self.fields.first().map_or(0, |f| f.len());
        self.base..self.base + len
    }

    /// Value of write slot `slot` at `cell`.
    #[inline]
    pub fn get(&self, slot: usize, cell: usize) -> f64 {
        self.fields[slot][cell - self.base]
    }

    /// Store into write slot `slot` at `cell`.
    #[inline]
    pub fn set(&mut self, slot: usize, cell: usize, value: f64) {
        self.fields[slot][cell - self.base] = value;
    }
}

/// Scratch field holding the pre-advection copy of `var`.
pub fn snapshot(var: Var) -> Var {
    match var {
        Var::Vx => Var::Tmp1,
        Var::Vy => Var::Tmp2,
        Var::Vz => Var::Tmp3,
        _ => Var::Tmp4,
    }
}

/// Velocity fields that carry `var`. Momentum is carried by the snapshot
/// so every component sees the same old field.
pub fn transport_velocity(var: Var) -> [Var; 3] {
    match var {
        Var::Vx | Var::Vy | Var::Vz => [Var::Tmp1, Var::Tmp2, Var::Tmp3],
        _ => [Var::Vx, Var::Vy, Var::Vz],
    }
}

/// Turbulent contribution to the diffusivity of `var`.
pub fn eddy_diffusivity(var: Var) -> Var {
    match var {
        Var::Vx | Var::Vy | Var::Vz => Var::NuT,
        _ => Var::AlphaT,
    }
}

/// Flags governing `var`.
#[inline]
pub(crate) fn flags_for<'a>(view: &FieldView<'a>, var: Var) -> &'a [CellFlag] {
    view.flags(FlagKind::for_location(var.location()))
}

/// Linear index of the neighbour along `axis`.
#[inline]
pub(crate) fn step(g: &GridGeometry, cell: usize, axis: Axis, plus: bool) -> usize {
    let s = g.stride(axis);
    if plus {
        cell + s
    } else {
        cell - s
    }
}

/// Distance between the nodes of `var` at `cell` and its neighbour.
pub(crate) fn node_distance(g: &GridGeometry, loc: Location, axis: Axis, cell: usize, plus: bool) -> f64 {
    if loc == Location::Face(axis) {
        return g.spacing(axis);
    }
    let (i, j, k) = g.coords(cell);
    let n = [i, j, k][axis.index()];
    let m = if plus { n + 1 } else { n - 1 };
    (g.center_coord(axis, m) - g.center_coord(axis, n))
        .abs()
        .max(1e-6 * g.spacing(axis))
}

/// Velocities through the plus and minus faces of the control volume of a
/// `loc` node, along `axis`.
pub(crate) fn face_velocities(
    g: &GridGeometry,
    velocity: &[f64],
    loc: Location,
    axis: Axis,
    cell: usize,
) -> (f64, f64) {
    let sa = g.stride(axis);
    match loc {
        Location::Center => (velocity[cell], velocity[cell - sa]),
        Location::Face(b) if b == axis => (
            0.5 * (velocity[cell] + velocity[cell + sa]),
            0.5 * (velocity[cell - sa] + velocity[cell]),
        ),
        Location::Face(b) => {
            let sb = g.stride(b);
            (
                0.5 * (velocity[cell] + velocity[cell + sb]),
                0.5 * (velocity[cell - sa] + velocity[cell - sa + sb]),
            )
        }
    }
}

/// Trilinear interpolation of a `loc` field at a physical position.
pub fn interpolate(field: &[f64], g: &GridGeometry, loc: Location, pos: [f64; 3]) -> f64 {
    let mut lo = [0usize; 3];
    let mut hi = [0usize; 3];
    let mut w = [0.0f64; 3];
    for axis in Axis::ALL {
        let a = axis.index();
        let last = [g.nx(), g.ny(), g.nz()][a] - 1;
        let offset = if loc == Location::Face(axis) { 0.0 } else { 0.5 };
        let p = pos[a].clamp(0.0, g.length(axis));
        let x = (p / g.spacing(axis) + offset).clamp(0.0, last as f64);
        let i0 = (x.floor() as usize).min(last);
        lo[a] = i0;
        hi[a] = (i0 + 1).min(last);
        w[a] = x - i0 as f64;
    }

    let at = |i: usize, j: usize, k: usize| field[g.ix(i, j, k)];
    let lerp = |a: f64, b: f64, t: f64| a + (b - a) * t;
    let c00 = lerp(at(lo[0], lo[1], lo[2]), at(hi[0], lo[1], lo[2]), w[0]);
    let c10 = lerp(at(lo[0], hi[1], lo[2]), at(hi[0], hi[1], lo[2]), w[0]);
    let c01 = lerp(at(lo[0], lo[1], hi[2]), at(hi[0], lo[1], hi[2]), w[0]);
    let c11 = lerp(at(lo[0], hi[1], hi[2]), at(hi[0], hi[1], hi[2]), w[0]);
    lerp(lerp(c00, c10, w[1]), lerp(c01, c11, w[1]), w[2])
}

/// Run a grid op over one tile.
pub fn run_grid(op: &KernelOp, tile: &mut Tile<'_>, view: &FieldView<'_>, params: &SolverParams) {
    match *op {
        KernelOp::AdvectSemiLagrangian { var } => advection::semi_lagrangian(var, tile, view, params),
        KernelOp::AssembleUpwind { var } => advection::assemble_upwind(var, tile, view, params),
        KernelOp::AssembleDiffusion { var } => diffusion::assemble(var, tile, view, params),
        KernelOp::RecomputeAp { var } => diffusion::recompute_ap(var, tile, view, params),
        KernelOp::JacobiSweep { var } => diffusion::jacobi_sweep(var, tile, view),
        KernelOp::ProjectionSource => projection::source(tile, view, params),
        KernelOp::ProjectionCorrect { axis } => projection::correct(axis, tile, view, params),
        KernelOp::TurbulentViscosity => turbulence::viscosity(tile, view),
        KernelOp::BroadcastAlphaT { value } => turbulence::broadcast_alpha_t(value, tile, view),
        KernelOp::AccumulateMean { var } => averaging::accumulate(var, tile, view),
        KernelOp::ApplyBoundary { .. }
        | KernelOp::MinWallDistance
        | KernelOp::RackBlackBox
        | KernelOp::TileCorrection
        | KernelOp::MassBalance { .. } => {}
    }
}

/// Run a boundary op over `range` of the table.
pub fn run_boundary(
    op: &KernelOp,
    range: Range<usize>,
    args: &mut LaunchArgs<'_>,
    params: &SolverParams,
) -> Result<()> {
    let table = args.table;
    let entries = &table.entries()[range];
    match *op {
        KernelOp::ApplyBoundary { var } => boundary_conditions::apply(var, entries, args.store, params),
        KernelOp::MinWallDistance => turbulence::min_wall_distance(entries, args.store),
        KernelOp::RackBlackBox => equipment::rack_black_box(entries, table, args.racks, args.store),
        KernelOp::TileCorrection => equipment::tile_correction(entries, table, args.store),
        KernelOp::MassBalance { delta } => averaging::mass_balance(delta, entries, args.store),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> GridGeometry {
        GridGeometry::new(4, 4, 4, 1.0, 1.0, 1.0).unwrap()
    }

    #[test]
    fn test_neighbor_slots_match_coefficients() {
        use crate::dispatch::COEFFICIENTS;
        assert_eq!(COEFFICIENTS[neighbor_slot(Axis::X, true)], Var::Ae);
        assert_eq!(COEFFICIENTS[neighbor_slot(Axis::X, false)], Var::Aw);
        assert_eq!(COEFFICIENTS[neighbor_slot(Axis::Y, true)], Var::An);
        assert_eq!(COEFFICIENTS[neighbor_slot(Axis::Z, false)], Var::Ab);
        assert_eq!(COEFFICIENTS[AP], Var::Ap);
        assert_eq!(COEFFICIENTS[B], Var::B);
    }

    #[test]
    fn test_interpolate_linear_field_exact() {
        let g = geometry();
        // f = x at cell centres, interior only matters here
        let mut field = vec![0.0; g.size()];
        for idx in 0..g.size() {
            let (i, _, _) = g.coords(idx);
            field[idx] = (i as f64 - 0.5) * g.dx();
        }
        let v = interpolate(&field, &g, Location::Center, [0.4, 0.5, 0.5]);
        assert!((v - 0.4).abs() < 1e-12, "{v}");
    }

    #[test]
    fn test_interpolate_clamps_outside() {
        let g = geometry();
        let field = vec![3.0; g.size()];
        let v = interpolate(&field, &g, Location::Face(Axis::X), [-5.0, 9.0, 0.5]);
        assert_eq!(v, 3.0);
    }

    #[test]
    fn test_node_distance_at_wall() {
        let g = geometry();
        let c = g.ix(1, 2, 2);
        assert!((node_distance(&g, Location::Center, Axis::X, c, false) - 0.125).abs() < 1e-12);
        assert!((node_distance(&g, Location::Center, Axis::X, c, true) - 0.25).abs() < 1e-12);
        assert_eq!(node_distance(&g, Location::Face(Axis::X), Axis::X, c, false), 0.25);
    }
}
