//! Running sums and the outlet mass-balance correction.

use roomflow_core::Result;

use crate::boundary::BoundaryEntry;
use crate::grid::{CellFlag, FieldStore, FieldView, Var};

use super::Tile;

pub(super) fn accumulate(var: Var, tile: &mut Tile<'_>, view: &FieldView<'_>) {
    let value = view.get(var);
    for cell in tile.cells() {
        let sum = tile.get(0, cell);
        tile.set(0, cell, sum + value[cell]);
    }
}

/// Push every outlet face outward by `delta`.
pub(super) fn mass_balance(delta: f64, entries: &[BoundaryEntry], store: &mut FieldStore) -> Result<()> {
    for entry in entries {
        if entry.flag != CellFlag::Outlet {
            continue;
        }
        let Some(n) = entry.neighbor else { continue };
        let face = n.shared_face(entry.cell);
        store.field_mut(Var::velocity(n.axis))[face] -= f64::from(n.sign) * delta;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::BoundaryIndexTable;
    use crate::config::{RegionConfig, RegionKind};
    use crate::grid::GridGeometry;

    #[test]
    fn test_accumulate_adds_current_field() {
        let g = GridGeometry::new(2, 2, 2, 1.0, 1.0, 1.0).unwrap();
        let mut store = FieldStore::new(g).unwrap();
        store.fill(Var::Temp, 21.0);
        store.fill(Var::TempMean, 42.0);
        let (out, view) = store.split_mut(&[Var::TempMean]).unwrap();
        let mut tile = Tile::new(0, out);
        accumulate(Var::Temp, &mut tile, &view);
        assert!(tile.cells().all(|c| tile.get(0, c) == 63.0));
    }

    #[test]
    fn test_mass_balance_pushes_outward() {
        let g = GridGeometry::new(4, 4, 4, 1.0, 1.0, 1.0).unwrap();
        let mut store = FieldStore::new(g).unwrap();
        let east = RegionConfig::new("east", RegionKind::Outlet, [5, 2, 2], [5, 2, 2]);
        let west = RegionConfig::new("west", RegionKind::Outlet, [0, 2, 2], [0, 2, 2]);
        let table = BoundaryIndexTable::build(&g, &[east, west]).unwrap();
        mass_balance(0.3, table.entries(), &mut store).unwrap();
        // East face between i=4 and the outlet, west face of cell 1
        assert!((store.field(Var::Vx)[g.ix(4, 2, 2)] - 0.3).abs() < 1e-12);
        assert!((store.field(Var::Vx)[g.ix(0, 2, 2)] + 0.3).abs() < 1e-12);
    }
}
