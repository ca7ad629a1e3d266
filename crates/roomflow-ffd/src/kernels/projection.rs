//! Pressure projection.
//!
//! Pressure is kinematic (m²/s²). The Poisson system
//! `sum a_nb (p_nb - p) = div / dt` has `a_nb = A / d` towards fluid
//! neighbours and a Neumann condition everywhere else.

use crate::grid::{Axis, FieldView, FlagKind, Var};
use crate::params::SolverParams;

use super::{neighbor_slot, step, Tile, AP, B};

pub(super) fn source(tile: &mut Tile<'_>, view: &FieldView<'_>, params: &SolverParams) {
    let g = view.geometry();
    let flags = view.flags(FlagKind::Pressure);
    let velocity = [view.get(Var::Vx), view.get(Var::Vy), view.get(Var::Vz)];

    for cell in tile.cells() {
        for slot in 0..=B {
            tile.set(slot, cell, 0.0);
        }
        if !flags[cell].is_fluid() {
            continue;
        }
        let mut ap = 0.0;
        let mut divergence = 0.0;
        for axis in Axis::ALL {
            let area = g.face_area(axis);
            let u = velocity[axis.index()];
            divergence += (u[cell] - u[step(g, cell, axis, false)]) * area;
            for plus in [true, false] {
                if flags[step(g, cell, axis, plus)].is_fluid() {
                    let a = area / g.spacing(axis);
                    tile.set(neighbor_slot(axis, plus), cell, a);
                    ap += a;
                }
            }
        }
        tile.set(AP, cell, ap);
        tile.set(B, cell, -divergence / params.dt);
    }
}

/// `u -= dt * dp/dx` on fluid faces.
pub(super) fn correct(axis: Axis, tile: &mut Tile<'_>, view: &FieldView<'_>, params: &SolverParams) {
    let g = view.geometry();
    let faces = view.flags(FlagKind::for_location(Var::velocity(axis).location()));
    let pressure = view.get(Var::Pressure);
    let scale = params.dt / g.spacing(axis);

    for cell in tile.cells() {
        if !faces[cell].is_fluid() {
            continue;
        }
        let dp = pressure[step(g, cell, axis, true)] - pressure[cell];
        let u = tile.get(0, cell);
        tile.set(0, cell, u - scale * dp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::BoundaryIndexTable;
    use crate::dispatch::COEFFICIENTS;
    use crate::grid::{FieldStore, GridGeometry};

    fn setup() -> (FieldStore, SolverParams) {
        let g = GridGeometry::new(4, 4, 4, 1.0, 1.0, 1.0).unwrap();
        let mut store = FieldStore::new(g).unwrap();
        BoundaryIndexTable::build(&g, &[]).unwrap().apply_flags(&mut store);
        let params = SolverParams {
            dt: 0.1,
            imax: 4,
            jmax: 4,
            kmax: 4,
            lx: 1.0,
            ly: 1.0,
            lz: 1.0,
            ..bytemuck::Zeroable::zeroed()
        };
        (store, params)
    }

    #[test]
    fn test_divergence_source() {
        let (mut store, params) = setup();
        let g = *store.geometry();
        let c = g.ix(2, 2, 2);
        store.field_mut(Var::Vx)[c] = 1.0;
        let (out, view) = store.split_mut(&COEFFICIENTS).unwrap();
        let mut tile = Tile::new(0, out);
        source(&mut tile, &view, &params);
        // Outflow of 1 m/s through one 0.0625 m² face
        assert!((tile.get(B, c) + 0.0625 / 0.1).abs() < 1e-12);
        assert!((tile.get(B, c + 1) - 0.0625 / 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_wall_neighbors_are_neumann() {
        let (mut store, params) = setup();
        let g = *store.geometry();
        let (out, view) = store.split_mut(&COEFFICIENTS).unwrap();
        let mut tile = Tile::new(0, out);
        source(&mut tile, &view, &params);
        let corner = g.ix(1, 1, 1);
        assert_eq!(tile.get(neighbor_slot(Axis::X, false), corner), 0.0);
        assert!((tile.get(AP, corner) - 3.0 * 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_correction_only_on_fluid_faces() {
        let (mut store, params) = setup();
        let g = *store.geometry();
        for idx in 0..g.size() {
            let (i, _, _) = g.coords(idx);
            store.field_mut(Var::Pressure)[idx] = i as f64;
        }
        store.fill(Var::Vx, 1.0);
        let (out, view) = store.split_mut(&[Var::Vx]).unwrap();
        let mut tile = Tile::new(0, out);
        correct(Axis::X, &mut tile, &view, &params);
        assert!((tile.get(0, g.ix(2, 2, 2)) - (1.0 - 0.1 / 0.25)).abs() < 1e-12);
        assert_eq!(tile.get(0, g.ix(4, 2, 2)), 1.0);
        assert_eq!(tile.get(0, g.ix(0, 2, 2)), 1.0);
    }
}
