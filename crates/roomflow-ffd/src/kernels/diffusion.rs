//! Implicit diffusion assembly and the Jacobi smoother shared by every
//! linear solve.

use crate::grid::{Axis, FieldView, Location, Var};
use crate::params::SolverParams;

use super::{eddy_diffusivity, flags_for, neighbor_slot, node_distance, step, Tile, AP, B};

/// Effective diffusivity of `var` at `cell`.
fn diffusivity(var: Var, cell: usize, view: &FieldView<'_>, params: &SolverParams) -> f64 {
    let eddy = view.get(eddy_diffusivity(var));
    match var.location() {
        Location::Face(axis) => {
            let other = cell + view.geometry().stride(axis);
            params.viscosity + 0.5 * (eddy[cell] + eddy[other])
        }
        Location::Center => params.thermal_diffusivity + eddy[cell],
    }
}

/// Volumetric source of `var` at `cell`.
fn source(var: Var, cell: usize, view: &FieldView<'_>, params: &SolverParams) -> f64 {
    match var {
        Var::Vz => {
            let temp = view.get(Var::Temp);
            let above = cell + view.geometry().stride(Axis::Z);
            let t_face = 0.5 * (temp[cell] + temp[above]);
            params.gravity * params.expansion_coefficient * (t_face - params.reference_temperature)
        }
        Var::Temp => view.get(Var::HeatSource)[cell],
        _ => 0.0,
    }
}

pub(super) fn assemble(var: Var, tile: &mut Tile<'_>, view: &FieldView<'_>, params: &SolverParams) {
    let g = view.geometry();
    let loc = var.location();
    let flags = flags_for(view, var);
    let phi = view.get(var);
    let transient = params.transient();
    let volume = params.cell_volume();

    for cell in tile.cells() {
        if !flags[cell].is_fluid() {
            for slot in 0..=B {
                tile.set(slot, cell, 0.0);
            }
            continue;
        }
        let gamma = diffusivity(var, cell, view, params);
        let mut ap = transient;
        for axis in Axis::ALL {
            let area = g.face_area(axis);
            for plus in [true, false] {
                let a = gamma * area / node_distance(g, loc, axis, cell, plus);
                tile.set(neighbor_slot(axis, plus), cell, a);
                ap += a;
            }
        }
        tile.set(AP, cell, ap);
        tile.set(B, cell, transient * phi[cell] + source(var, cell, view, params) * volume);
    }
}

/// Zero the coefficients towards zero-gradient neighbours and rebuild `Ap`.
pub(super) fn recompute_ap(var: Var, tile: &mut Tile<'_>, view: &FieldView<'_>, params: &SolverParams) {
    let g = view.geometry();
    let flags = flags_for(view, var);
    let transient = params.transient();

    for cell in tile.cells() {
        if !flags[cell].is_fluid() {
            continue;
        }
        let mut ap = transient;
        for axis in Axis::ALL {
            for plus in [true, false] {
                let slot = neighbor_slot(axis, plus);
                if flags[step(g, cell, axis, plus)].is_zero_gradient() {
                    tile.set(slot, cell, 0.0);
                }
                ap += tile.get(slot, cell);
            }
        }
        tile.set(AP, cell, ap);
    }
}

/// `phi_new = (sum a_nb phi_nb + b) / a_p` into the iterate buffer.
pub(super) fn jacobi_sweep(var: Var, tile: &mut Tile<'_>, view: &FieldView<'_>) {
    let g = view.geometry();
    let flags = flags_for(view, var);
    let phi = view.get(var);
    let ap = view.get(Var::Ap);
    let b = view.get(Var::B);
    let neighbors = [
        (Axis::X, true, view.get(Var::Ae)),
        (Axis::X, false, view.get(Var::Aw)),
        (Axis::Y, true, view.get(Var::An)),
        (Axis::Y, false, view.get(Var::As)),
        (Axis::Z, true, view.get(Var::Af)),
        (Axis::Z, false, view.get(Var::Ab)),
    ];

    for cell in tile.cells() {
        if !flags[cell].is_fluid() || ap[cell] <= 0.0 {
            tile.set(0, cell, phi[cell]);
            continue;
        }
        let mut sum = b[cell];
        for (axis, plus, a) in &neighbors {
            sum += a[cell] * phi[step(g, cell, *axis, *plus)];
        }
        tile.set(0, cell, sum / ap[cell]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::BoundaryIndexTable;
    use crate::config::{RegionConfig, RegionKind};
    use crate::dispatch::COEFFICIENTS;
    use crate::grid::{FieldStore, GridGeometry};

    fn params() -> SolverParams {
        SolverParams {
            imax: 4,
            jmax: 4,
            kmax: 4,
            sweeps: 30,
            dt: 0.1,
            lx: 1.0,
            ly: 1.0,
            lz: 1.0,
            viscosity: 1.5e-5,
            thermal_diffusivity: 2.0e-5,
            density: 1.2,
            specific_heat: 1000.0,
            expansion_coefficient: 3.4e-3,
            gravity: 9.81,
            reference_temperature: 20.0,
        }
    }

    fn store(regions: &[RegionConfig]) -> FieldStore {
        let g = GridGeometry::new(4, 4, 4, 1.0, 1.0, 1.0).unwrap();
        let mut store = FieldStore::new(g).unwrap();
        BoundaryIndexTable::build(&g, regions).unwrap().apply_flags(&mut store);
        store
    }

    fn assemble_into(store: &mut FieldStore, var: Var, p: &SolverParams) {
        let (out, view) = store.split_mut(&COEFFICIENTS).unwrap();
        let mut tile = Tile::new(0, out);
        assemble(var, &mut tile, &view, p);
    }

    #[test]
    fn test_uniform_field_is_fixed_point() {
        let p = params();
        let mut store = store(&[]);
        store.fill(Var::Temp, 20.0);
        assemble_into(&mut store, Var::Temp, &p);
        let (out, view) = store.split_mut(&[Var::Tmp5]).unwrap();
        let mut tile = Tile::new(0, out);
        jacobi_sweep(Var::Temp, &mut tile, &view);
        assert!(tile.cells().all(|c| (tile.get(0, c) - 20.0).abs() < 1e-12));
    }

    #[test]
    fn test_half_cell_distance_at_walls() {
        let p = params();
        let mut store = store(&[]);
        assemble_into(&mut store, Var::Temp, &p);
        let g = *store.geometry();
        let c = g.ix(1, 2, 2);
        let aw = store.field(Var::Aw)[c];
        let ae = store.field(Var::Ae)[c];
        assert!((aw - 2.0 * ae).abs() < 1e-15);
    }

    #[test]
    fn test_buoyancy_source_lifts_warm_air() {
        let p = params();
        let mut store = store(&[]);
        store.fill(Var::Temp, 30.0);
        assemble_into(&mut store, Var::Vz, &p);
        let g = *store.geometry();
        let c = g.ix(2, 2, 2);
        let expected = 9.81 * 3.4e-3 * 10.0 * p.cell_volume();
        assert!((store.field(Var::B)[c] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_recompute_drops_outlet_neighbor() {
        let p = params();
        let outlet = RegionConfig::new("out", RegionKind::Outlet, [5, 1, 1], [5, 4, 4]);
        let mut store = store(&[outlet]);
        assemble_into(&mut store, Var::Temp, &p);
        let g = *store.geometry();
        let c = g.ix(4, 2, 2);
        assert!(store.field(Var::Ae)[c] > 0.0);
        {
            let (out, view) = store.split_mut(&COEFFICIENTS[..7]).unwrap();
            let mut tile = Tile::new(0, out);
            recompute_ap(Var::Temp, &mut tile, &view, &p);
        }
        assert_eq!(store.field(Var::Ae)[c], 0.0);
        let sum: f64 = [Var::Aw, Var::An, Var::As, Var::Af, Var::Ab]
            .iter()
            .map(|v| store.field(*v)[c])
            .sum();
        assert!((store.field(Var::Ap)[c] - (p.transient() + sum)).abs() < 1e-12);
    }
}
