//! Boundary conditions applied over the Boundary Index Table.
//!
//! Every entry with a neighbour constrains the value stored for its own cell
//! and, for the velocity component normal to the shared face, the face
//! itself. Entries without a neighbour (grid edges and corners, rack bodies)
//! are left alone.

use roomflow_core::Result;

use crate::boundary::{BoundaryEntry, ThermalKind};
use crate::grid::{Axis, CellFlag, FieldStore, Var};
use crate::params::SolverParams;

pub(super) fn apply(
    var: Var,
    entries: &[BoundaryEntry],
    store: &mut FieldStore,
    params: &SolverParams,
) -> Result<()> {
    match var {
        Var::Vx => velocity(Axis::X, entries, store),
        Var::Vy => velocity(Axis::Y, entries, store),
        Var::Vz => velocity(Axis::Z, entries, store),
        Var::Temp => temperature(entries, store, params),
        Var::Xi1 | Var::Xi2 | Var::C1 | Var::C2 => species(var, entries, store),
        Var::Pressure => pressure(entries, store),
        _ => Ok(()),
    }
}

fn prescribes_velocity(flag: CellFlag) -> bool {
    matches!(
        flag,
        CellFlag::Inlet | CellFlag::Tile | CellFlag::RackInlet | CellFlag::RackOutlet
    )
}

fn velocity(axis: Axis, entries: &[BoundaryEntry], store: &mut FieldStore) -> Result<()> {
    let var = Var::velocity(axis);
    let stride = store.geometry().stride(axis);
    let bc_var = var.boundary_value().unwrap_or(var);
    let (mut out, view) = store.split_mut(&[var])?;
    let field = &mut out[0];
    let bc = view.get(bc_var);

    for entry in entries {
        let Some(n) = entry.neighbor else { continue };
        let c = entry.cell;
        if n.axis == axis {
            let face = n.shared_face(c);
            field[face] = if prescribes_velocity(entry.flag) {
                bc[c]
            } else if entry.flag == CellFlag::Outlet {
                field[n.far_face(stride)]
            } else {
                0.0
            };
        } else {
            field[c] = if prescribes_velocity(entry.flag) {
                bc[c]
            } else if entry.flag == CellFlag::Outlet {
                field[n.cell]
            } else {
                0.0
            };
        }
    }
    Ok(())
}

fn temperature(entries: &[BoundaryEntry], store: &mut FieldStore, params: &SolverParams) -> Result<()> {
    let (mut out, view) = store.split_mut(&[Var::Temp])?;
    let temp = &mut out[0];
    let bc = view.get(Var::TempBc);
    let flux = view.get(Var::QfluxBc);
    let alpha_t = view.get(Var::AlphaT);

    for entry in entries {
        let Some(n) = entry.neighbor else { continue };
        let c = entry.cell;
        temp[c] = match entry.flag {
            CellFlag::Inlet | CellFlag::Tile | CellFlag::RackOutlet => bc[c],
            CellFlag::Outlet | CellFlag::RackInlet => temp[n.cell],
            CellFlag::Solid => match entry.thermal {
                ThermalKind::FixedTemperature => bc[c],
                ThermalKind::FixedHeatFlux => {
                    let conductivity = params.density
                        * params.specific_heat
                        * (params.thermal_diffusivity + alpha_t[n.cell]);
                    temp[n.cell] + flux[c] * n.distance / conductivity
                }
            },
            CellFlag::Fluid => temp[c],
        };
    }
    Ok(())
}

fn species(var: Var, entries: &[BoundaryEntry], store: &mut FieldStore) -> Result<()> {
    let bc_var = var.boundary_value().unwrap_or(var);
    let (mut out, view) = store.split_mut(&[var])?;
    let field = &mut out[0];
    let bc = view.get(bc_var);

    for entry in entries {
        let Some(n) = entry.neighbor else { continue };
        field[entry.cell] = match entry.flag {
            CellFlag::Inlet | CellFlag::Tile => bc[entry.cell],
            _ => field[n.cell],
        };
    }
    Ok(())
}

fn pressure(entries: &[BoundaryEntry], store: &mut FieldStore) -> Result<()> {
    let p = store.field_mut(Var::Pressure);
    for entry in entries {
        if let Some(n) = entry.neighbor {
            p[entry.cell] = p[n.cell];
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::BoundaryIndexTable;
    use crate::config::{RegionConfig, RegionKind};
    use crate::grid::GridGeometry;

    fn params() -> SolverParams {
        SolverParams {
            density: 1.0,
            specific_heat: 1000.0,
            thermal_diffusivity: 1.0e-4,
            ..bytemuck::Zeroable::zeroed()
        }
    }

    fn setup(regions: &[RegionConfig]) -> (FieldStore, BoundaryIndexTable) {
        let g = GridGeometry::new(4, 4, 4, 1.0, 1.0, 1.0).unwrap();
        let mut store = FieldStore::new(g).unwrap();
        let table = BoundaryIndexTable::build(&g, regions).unwrap();
        table.apply_flags(&mut store);
        (store, table)
    }

    #[test]
    fn test_inlet_sets_normal_face() {
        let inlet = RegionConfig::new("in", RegionKind::Inlet, [0, 2, 2], [0, 2, 2]);
        let (mut store, table) = setup(&[inlet]);
        let g = *store.geometry();
        let c = g.ix(0, 2, 2);
        store.field_mut(Var::VxBc)[c] = 1.5;
        apply(Var::Vx, table.entries(), &mut store, &params()).unwrap();
        assert_eq!(store.field(Var::Vx)[c], 1.5);
    }

    #[test]
    fn test_outlet_zero_gradient_east() {
        let outlet = RegionConfig::new("out", RegionKind::Outlet, [5, 2, 2], [5, 2, 2]);
        let (mut store, table) = setup(&[outlet]);
        let g = *store.geometry();
        store.field_mut(Var::Vx)[g.ix(3, 2, 2)] = 0.8;
        apply(Var::Vx, table.entries(), &mut store, &params()).unwrap();
        assert_eq!(store.field(Var::Vx)[g.ix(4, 2, 2)], 0.8);
    }

    #[test]
    fn test_walls_are_no_slip() {
        let (mut store, table) = setup(&[]);
        let g = *store.geometry();
        store.fill(Var::Vy, 2.0);
        apply(Var::Vy, table.entries(), &mut store, &params()).unwrap();
        // Normal face on the south wall, tangential ghost on the west wall
        assert_eq!(store.field(Var::Vy)[g.ix(2, 0, 2)], 0.0);
        assert_eq!(store.field(Var::Vy)[g.ix(0, 2, 2)], 0.0);
        assert_eq!(store.field(Var::Vy)[g.ix(2, 2, 2)], 2.0);
    }

    #[test]
    fn test_fixed_temperature_wall() {
        let wall = RegionConfig::new("hot", RegionKind::Wall, [0, 1, 1], [0, 4, 4])
            .with_thermal(ThermalKind::FixedTemperature, 35.0);
        let (mut store, table) = setup(&[wall]);
        let g = *store.geometry();
        let c = g.ix(0, 3, 3);
        store.field_mut(Var::TempBc)[c] = 35.0;
        apply(Var::Temp, table.entries(), &mut store, &params()).unwrap();
        assert_eq!(store.field(Var::Temp)[c], 35.0);
    }

    #[test]
    fn test_heat_flux_wall_raises_ghost() {
        let (mut store, table) = setup(&[]);
        let g = *store.geometry();
        store.fill(Var::Temp, 20.0);
        let c = g.ix(0, 2, 2);
        store.field_mut(Var::QfluxBc)[c] = 10.0;
        apply(Var::Temp, table.entries(), &mut store, &params()).unwrap();
        // 20 + 10 * 0.125 / (1 * 1000 * 1e-4)
        assert!((store.field(Var::Temp)[c] - 32.5).abs() < 1e-9);
        let adiabatic = g.ix(2, 0, 2);
        assert_eq!(store.field(Var::Temp)[adiabatic], 20.0);
    }

    #[test]
    fn test_species_inlet_and_copy() {
        let inlet = RegionConfig::new("in", RegionKind::Inlet, [0, 2, 2], [0, 2, 2]);
        let (mut store, table) = setup(&[inlet]);
        let g = *store.geometry();
        store.field_mut(Var::Xi1Bc)[g.ix(0, 2, 2)] = 0.01;
        store.field_mut(Var::Xi1)[g.ix(4, 2, 2)] = 0.003;
        apply(Var::Xi1, table.entries(), &mut store, &params()).unwrap();
        assert_eq!(store.field(Var::Xi1)[g.ix(0, 2, 2)], 0.01);
        assert_eq!(store.field(Var::Xi1)[g.ix(5, 2, 2)], 0.003);
    }
}
