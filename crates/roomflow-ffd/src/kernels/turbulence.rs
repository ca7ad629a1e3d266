//! Chen zero-equation closure.
//!
//! The eddy viscosity is `nu_t = C |V| L_wall` with `L_wall` the distance to
//! the nearest solid boundary cell. Scalars do not use `nu_t / Pr_t`; they
//! get one uniform diffusivity broadcast over the fluid cells.

use roomflow_core::Result;

use crate::boundary::BoundaryEntry;
use crate::config::CHEN_COEFFICIENT;
use crate::grid::{Axis, CellFlag, FieldStore, FieldView, FlagKind, Var};

use super::{step, Tile};

/// Speed at a cell centre from the two faces along each axis.
pub(crate) fn center_speed(view: &FieldView<'_>, cell: usize) -> f64 {
    let g = view.geometry();
    Axis::ALL
        .iter()
        .map(|&axis| {
            let u = view.get(Var::velocity(axis));
            0.5 * (u[cell] + u[step(g, cell, axis, false)])
        })
        .map(|u| u * u)
        .sum::<f64>()
        .sqrt()
}

pub(super) fn viscosity(tile: &mut Tile<'_>, view: &FieldView<'_>) {
    let flags = view.flags(FlagKind::Pressure);
    let wall = view.get(Var::WallDistance);

    for cell in tile.cells() {
        let nu_t = if flags[cell].is_fluid() {
            CHEN_COEFFICIENT * center_speed(view, cell) * wall[cell]
        } else {
            0.0
        };
        tile.set(0, cell, nu_t);
    }
}

pub(super) fn broadcast_alpha_t(value: f64, tile: &mut Tile<'_>, view: &FieldView<'_>) {
    let flags = view.flags(FlagKind::Pressure);
    for cell in tile.cells() {
        tile.set(0, cell, if flags[cell].is_fluid() { value } else { 0.0 });
    }
}

/// Fold the solid entries of this segment into the running minimum.
///
/// The host seeds `WallDistance` with the domain diagonal before the first
/// segment, so each segment only ever lowers values.
pub(super) fn min_wall_distance(entries: &[BoundaryEntry], store: &mut FieldStore) -> Result<()> {
    let g = *store.geometry();
    let (mut out, view) = store.split_mut(&[Var::WallDistance])?;
    let distance = &mut out[0];
    let flags = view.flags(FlagKind::Pressure);

    let walls: Vec<[f64; 3]> = entries
        .iter()
        .filter(|e| e.flag == CellFlag::Solid)
        .map(|e| g.center(e.i, e.j, e.k))
        .collect();
    if walls.is_empty() {
        return Ok(());
    }

    for (cell, flag) in flags.iter().enumerate() {
        if !flag.is_fluid() {
            continue;
        }
        let (i, j, k) = g.coords(cell);
        let here = g.center(i, j, k);
        for wall in &walls {
            let d = ((here[0] - wall[0]).powi(2) + (here[1] - wall[1]).powi(2) + (here[2] - wall[2]).powi(2)).sqrt();
            if d < distance[cell] {
                distance[cell] = d;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::BoundaryIndexTable;
    use crate::dispatch::segments;
    use crate::grid::GridGeometry;

    fn setup() -> (FieldStore, BoundaryIndexTable) {
        let g = GridGeometry::new(4, 4, 4, 1.0, 1.0, 1.0).unwrap();
        let mut store = FieldStore::new(g).unwrap();
        let table = BoundaryIndexTable::build(&g, &[]).unwrap();
        table.apply_flags(&mut store);
        (store, table)
    }

    #[test]
    fn test_wall_distance_half_cell_from_wall() {
        let (mut store, table) = setup();
        store.fill(Var::WallDistance, 10.0);
        min_wall_distance(table.entries(), &mut store).unwrap();
        let g = *store.geometry();
        // First interior centre sits 0.125 m from the west wall plane
        assert!((store.field(Var::WallDistance)[g.ix(1, 2, 2)] - 0.125).abs() < 1e-12);
        assert!((store.field(Var::WallDistance)[g.ix(2, 2, 2)] - 0.375).abs() < 1e-12);
        // Ghosts keep the seed
        assert_eq!(store.field(Var::WallDistance)[g.ix(0, 2, 2)], 10.0);
    }

    #[test]
    fn test_wall_distance_independent_of_segments() {
        let (mut whole, table) = setup();
        whole.fill(Var::WallDistance, 10.0);
        min_wall_distance(table.entries(), &mut whole).unwrap();

        let (mut pieces, _) = setup();
        pieces.fill(Var::WallDistance, 10.0);
        for range in segments(table.len(), 7) {
            min_wall_distance(&table.entries()[range], &mut pieces).unwrap();
        }
        assert_eq!(whole.field(Var::WallDistance), pieces.field(Var::WallDistance));
    }

    #[test]
    fn test_viscosity_scales_with_speed() {
        let (mut store, _) = setup();
        let g = *store.geometry();
        store.fill(Var::Vx, 2.0);
        store.fill(Var::WallDistance, 0.5);
        let (out, view) = store.split_mut(&[Var::NuT]).unwrap();
        let mut tile = Tile::new(0, out);
        viscosity(&mut tile, &view);
        let expected = CHEN_COEFFICIENT * 2.0 * 0.5;
        assert!((tile.get(0, g.ix(2, 2, 2)) - expected).abs() < 1e-12);
        assert_eq!(tile.get(0, g.ix(0, 2, 2)), 0.0);
    }

    #[test]
    fn test_alpha_t_only_on_fluid() {
        let (mut store, _) = setup();
        let g = *store.geometry();
        let (out, view) = store.split_mut(&[Var::AlphaT]).unwrap();
        let mut tile = Tile::new(0, out);
        broadcast_alpha_t(1.0e-3, &mut tile, &view);
        assert_eq!(tile.get(0, g.ix(3, 3, 3)), 1.0e-3);
        assert_eq!(tile.get(0, g.ix(5, 3, 3)), 0.0);
    }
}
