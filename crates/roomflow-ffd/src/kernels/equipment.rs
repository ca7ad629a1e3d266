//! Rack black-box substitution and perforated-tile flow.

use roomflow_core::{Result, RoomflowError};

use crate::boundary::{BoundaryEntry, BoundaryIndexTable};
use crate::grid::{Axis, CellFlag, FieldStore, Var};
use crate::rack::RackState;

const VELOCITY_BC: [Var; 3] = [Var::VxBc, Var::VyBc, Var::VzBc];

/// Pressure-loss coefficient of a perforated plate with open-area ratio `r`.
///
/// `zeta = (1 / r²) (1 + 0.5 (1 - r)^0.75 + 1.414 (1 - r)^0.375)`
pub fn tile_resistance(r: f64) -> f64 {
    let closed = (1.0 - r).max(0.0);
    (1.0 + 0.5 * closed.powf(0.75) + 1.414 * closed.powf(0.375)) / (r * r)
}

/// Signed velocity through a tile driven by a kinematic pressure drop.
#[inline]
pub(crate) fn tile_velocity(dp: f64, zeta: f64) -> f64 {
    dp.signum() * (2.0 * dp.abs() / zeta).sqrt()
}

fn set_axis_velocity(bc: &mut [&mut [f64]], cell: usize, axis: Axis, value: f64) {
    for (a, field) in bc.iter_mut().enumerate() {
        field[cell] = if a == axis.index() { value } else { 0.0 };
    }
}

pub(super) fn rack_black_box(
    entries: &[BoundaryEntry],
    table: &BoundaryIndexTable,
    racks: &[RackState],
    store: &mut FieldStore,
) -> Result<()> {
    let (mut out, _) = store.split_mut(&[Var::VxBc, Var::VyBc, Var::VzBc, Var::TempBc])?;
    let (bc, temp) = out.split_at_mut(3);
    let temp = &mut temp[0];

    for entry in entries {
        if !matches!(entry.flag, CellFlag::RackInlet | CellFlag::RackOutlet) {
            continue;
        }
        let slot = table.owner(entry.owner).and_then(|o| o.rack);
        let (Some(spec), Some(state)) = (
            slot.and_then(|r| table.racks().get(r)),
            slot.and_then(|r| racks.get(r)),
        ) else {
            return Err(RoomflowError::KernelFailed {
                kernel: "rack_black_box",
                reason: format!("no rack state for owner {}", entry.owner),
            });
        };
        set_axis_velocity(bc, entry.cell, spec.direction.axis(), state.face_velocity);
        if entry.flag == CellFlag::RackOutlet {
            temp[entry.cell] = state.outlet_temperature;
        }
    }
    Ok(())
}

pub(super) fn tile_correction(entries: &[BoundaryEntry], table: &BoundaryIndexTable, store: &mut FieldStore) -> Result<()> {
    let (mut bc, view) = store.split_mut(&VELOCITY_BC)?;
    let pressure = view.get(Var::Pressure);

    for entry in entries {
        if entry.flag != CellFlag::Tile {
            continue;
        }
        let Some(n) = entry.neighbor else { continue };
        let Some(owner) = table.owner(entry.owner) else { continue };
        let zeta = tile_resistance(owner.open_ratio);
        let v = tile_velocity(owner.plenum_pressure - pressure[n.cell], zeta);
        set_axis_velocity(&mut bc, entry.cell, n.axis, f64::from(n.sign) * v);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RegionConfig, RegionKind};
    use crate::grid::GridGeometry;

    #[test]
    fn test_resistance_of_open_plate() {
        assert!((tile_resistance(1.0) - 1.0).abs() < 1e-12);
        // Smaller openings resist more
        assert!(tile_resistance(0.25) > tile_resistance(0.5));
        let r: f64 = 0.25;
        let expected = (1.0 + 0.5 * 0.75f64.powf(0.75) + 1.414 * 0.75f64.powf(0.375)) / (r * r);
        assert!((tile_resistance(r) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_tile_velocity_follows_pressure_drop() {
        assert!((tile_velocity(2.0, 1.0) - 2.0).abs() < 1e-12);
        assert!((tile_velocity(-2.0, 1.0) + 2.0).abs() < 1e-12);
        assert_eq!(tile_velocity(0.0, 4.0), 0.0);
    }

    #[test]
    fn test_floor_tile_blows_upward() {
        let g = GridGeometry::new(4, 4, 4, 1.0, 1.0, 1.0).unwrap();
        let mut store = FieldStore::new(g).unwrap();
        let mut tile = RegionConfig::new("tile", RegionKind::Tile, [2, 2, 0], [2, 2, 0]);
        tile.open_ratio = Some(1.0);
        tile.plenum_pressure = 2.0;
        let table = BoundaryIndexTable::build(&g, &[tile]).unwrap();
        table.apply_flags(&mut store);
        store.field_mut(Var::VxBc)[g.ix(2, 2, 0)] = 9.0;

        tile_correction(table.entries(), &table, &mut store).unwrap();
        let c = g.ix(2, 2, 0);
        assert!((store.field(Var::VzBc)[c] - 2.0).abs() < 1e-12);
        assert_eq!(store.field(Var::VxBc)[c], 0.0);
    }

    #[test]
    fn test_rack_faces_take_black_box_state() {
        let g = GridGeometry::new(6, 4, 4, 3.0, 2.0, 2.0).unwrap();
        let mut store = FieldStore::new(g).unwrap();
        let rack = RegionConfig::new("R1 -1 1000 0.0001", RegionKind::Rack, [2, 2, 1], [3, 3, 2]);
        let table = BoundaryIndexTable::build(&g, &[rack]).unwrap();
        table.apply_flags(&mut store);
        let state = RackState {
            owner: 0,
            inlet_temperature: 22.0,
            outlet_temperature: 31.0,
            face_velocity: -0.4,
            face_area: 0.25,
        };

        rack_black_box(table.entries(), &table, &[state], &mut store).unwrap();
        let inlet = g.ix(3, 2, 1);
        let outlet = g.ix(2, 2, 1);
        assert_eq!(store.field(Var::VxBc)[inlet], -0.4);
        assert_eq!(store.field(Var::VxBc)[outlet], -0.4);
        assert_eq!(store.field(Var::TempBc)[outlet], 31.0);
        assert_eq!(store.field(Var::TempBc)[inlet], 0.0);
    }

    #[test]
    fn test_rack_without_state_fails() {
        let g = GridGeometry::new(6, 4, 4, 3.0, 2.0, 2.0).unwrap();
        let mut store = FieldStore::new(g).unwrap();
        let rack = RegionConfig::new("R1 -1 1000 0.0001", RegionKind::Rack, [2, 2, 1], [3, 3, 2]);
        let table = BoundaryIndexTable::build(&g, &[rack]).unwrap();
        let err = rack_black_box(table.entries(), &table, &[], &mut store).unwrap_err();
        assert!(matches!(err, RoomflowError::KernelFailed { .. }));
    }
}
