//! Boundary Index Table.
//!
//! Regions from the case are flattened into one entry per boundary cell.
//! Regions are claimed in configuration order and a cell belongs to the
//! first region that covers it; later regions never reclassify it. Ghost
//! cells left unclaimed become an adiabatic default wall, appended last.
//!
//! The table also carries one [`BoundaryOwner`] per region so kernels can
//! look up region-wide values (rack state, port velocity) by owner id.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use roomflow_core::{Result, RoomflowError};

use crate::config::{RegionConfig, RegionKind};
use crate::grid::{Axis, CellFlag, FieldStore, FlagKind, GridGeometry};
use crate::rack::{FlowDirection, RackSpec};

/// Name given to the ghost cells no region claims.
pub const DEFAULT_WALL: &str = "default_wall";

/// Thermal condition of a boundary cell.
///
/// Case files name the kind (`"fixed_temperature"`) or give the integer
/// code used on the coupling interface (`1` or `2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "ThermalRepr")]
pub enum ThermalKind {
    /// Prescribed temperature.
    FixedTemperature,
    /// Prescribed heat flux.
    FixedHeatFlux,
}

impl TryFrom<i64> for ThermalKind {
    type Error = RoomflowError;

    fn try_from(code: i64) -> Result<Self> {
        match code {
            1 => Ok(ThermalKind::FixedTemperature),
            2 => Ok(ThermalKind::FixedHeatFlux),
            other => Err(RoomflowError::InvalidThermalKind(other)),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ThermalRepr {
    Code(i64),
    Name(String),
}

impl TryFrom<ThermalRepr> for ThermalKind {
    type Error = RoomflowError;

    fn try_from(repr: ThermalRepr) -> Result<Self> {
        match repr {
            ThermalRepr::Code(code) => Self::try_from(code),
            ThermalRepr::Name(name) => match name.as_str() {
                "fixed_temperature" => Ok(ThermalKind::FixedTemperature),
                "fixed_heat_flux" => Ok(ThermalKind::FixedHeatFlux),
                other => Err(RoomflowError::config(format!("unknown thermal kind '{other}'"))),
            },
        }
    }
}

/// What produced a boundary cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    /// Enclosure wall.
    Wall,
    /// Obstacle.
    Block,
    /// Supply opening.
    Inlet,
    /// Exhaust opening.
    Outlet,
    /// Perforated tile.
    Tile,
    /// Rack body or face.
    Rack,
}

impl From<RegionKind> for ObjectType {
    fn from(kind: RegionKind) -> Self {
        match kind {
            RegionKind::Wall => ObjectType::Wall,
            RegionKind::Block => ObjectType::Block,
            RegionKind::Inlet => ObjectType::Inlet,
            RegionKind::Outlet => ObjectType::Outlet,
            RegionKind::Tile => ObjectType::Tile,
            RegionKind::Rack => ObjectType::Rack,
        }
    }
}

/// The fluid cell a boundary cell faces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Linear index of the neighbour.
    pub cell: usize,
    /// Axis joining the two cells.
    pub axis: Axis,
    /// +1 when the neighbour is on the positive side.
    pub sign: i8,
    /// Centre-to-centre distance (m).
    pub distance: f64,
}

impl Neighbor {
    /// Linear index of the face shared with the boundary cell `cell`.
    #[inline]
    pub fn shared_face(&self, cell: usize) -> usize {
        if self.sign > 0 {
            cell
        } else {
            self.cell
        }
    }

    /// Face of the neighbour opposite the shared one.
    #[inline]
    pub fn far_face(&self, stride: usize) -> usize {
        if self.sign > 0 {
            self.cell
        } else {
            self.cell - stride
        }
    }
}

/// One active boundary cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundaryEntry {
    /// x index.
    pub i: usize,
    /// y index.
    pub j: usize,
    /// z index.
    pub k: usize,
    /// Thermal condition.
    pub thermal: ThermalKind,
    /// Owning region.
    pub owner: u32,
    /// Object type of the owner.
    pub object: ObjectType,
    /// Cell classification.
    pub flag: CellFlag,
    /// Linear index.
    pub cell: usize,
    /// Adjacent fluid cell, if any.
    pub neighbor: Option<Neighbor>,
}

/// Region-wide boundary data.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryOwner {
    /// Owner id (index into the owner list).
    pub id: u32,
    /// Region name.
    pub name: String,
    /// Object type.
    pub object: ObjectType,
    /// Thermal condition.
    pub thermal: ThermalKind,
    /// Temperature (°C) or heat flux (W/m²).
    pub value: f64,
    /// Prescribed velocity.
    pub velocity: [f64; 3],
    /// Inlet or plenum temperature (°C).
    pub temperature: f64,
    /// Species values.
    pub species: [f64; 2],
    /// Trace values.
    pub trace: [f64; 2],
    /// Tile open ratio.
    pub open_ratio: f64,
    /// Plenum pressure behind a tile.
    pub plenum_pressure: f64,
    /// Index into [`BoundaryIndexTable::racks`].
    pub rack: Option<usize>,
    /// Cells owned.
    pub cell_count: usize,
    /// Area of faces shared with fluid cells (m²).
    pub exposed_area: f64,
}

/// Flat list of boundary cells plus their owners.
#[derive(Debug, Clone, Default)]
pub struct BoundaryIndexTable {
    entries: Vec<BoundaryEntry>,
    owners: Vec<BoundaryOwner>,
    racks: Vec<RackSpec>,
    by_name: HashMap<String, u32>,
}

impl BoundaryIndexTable {
    /// Build the table from regions in precedence order.
    pub fn build(geometry: &GridGeometry, regions: &[RegionConfig]) -> Result<Self> {
        geometry.validate()?;
        let size = geometry.size();
        let mut claimed: Vec<Option<usize>> = vec![None; size];
        let mut table = BoundaryIndexTable::default();

        for region in regions {
            region.validate(geometry)?;
            let owner = table.push_owner(region)?;
            let rack = table.owners[owner as usize]
                .rack
                .map(|r| table.racks[r].direction);

            for k in region.start[2]..=region.end[2] {
                for j in region.start[1]..=region.end[1] {
                    for i in region.start[0]..=region.end[0] {
                        let cell = geometry.ix(i, j, k);
                        if claimed[cell].is_some() {
                            continue;
                        }
                        let (flag, thermal) = classify(region, rack, [i, j, k]);
                        claimed[cell] = Some(table.entries.len());
                        table.entries.push(BoundaryEntry {
                            i,
                            j,
                            k,
                            thermal,
                            owner,
                            object: region.kind.into(),
                            flag,
                            cell,
                            neighbor: None,
                        });
                        table.owners[owner as usize].cell_count += 1;
                    }
                }
            }
        }

        // Unclaimed ghost cells
        let mut default_owner = None;
        for k in 0..geometry.nz() {
            for j in 0..geometry.ny() {
                for i in 0..geometry.nx() {
                    let cell = geometry.ix(i, j, k);
                    if !geometry.is_ghost(i, j, k) || claimed[cell].is_some() {
                        continue;
                    }
                    let owner = match default_owner {
                        Some(owner) => owner,
                        None => {
                            let wall = RegionConfig::new(DEFAULT_WALL, RegionKind::Wall, [0; 3], [0; 3])
                                .with_thermal(ThermalKind::FixedHeatFlux, 0.0);
                            let owner = table.push_owner(&wall)?;
                            default_owner = Some(owner);
                            owner
                        }
                    };
                    claimed[cell] = Some(table.entries.len());
                    table.entries.push(BoundaryEntry {
                        i,
                        j,
                        k,
                        thermal: ThermalKind::FixedHeatFlux,
                        owner,
                        object: ObjectType::Wall,
                        flag: CellFlag::Solid,
                        cell,
                        neighbor: None,
                    });
                    table.owners[owner as usize].cell_count += 1;
                }
            }
        }

        table.resolve_neighbors(geometry);
        debug!(
            entries = table.entries.len(),
            owners = table.owners.len(),
            racks = table.racks.len(),
            "Built boundary index table"
        );
        Ok(table)
    }

    fn push_owner(&mut self, region: &RegionConfig) -> Result<u32> {
        let id = self.owners.len() as u32;
        let object: ObjectType = region.kind.into();
        let (name, rack) = if region.kind == RegionKind::Rack {
            let spec = rack_spec(region)?;
            let name = spec.name.clone();
            self.racks.push(spec);
            (name, Some(self.racks.len() - 1))
        } else {
            (region.name.clone(), None)
        };
        if self.by_name.contains_key(&name) {
            return Err(RoomflowError::region(&name, "duplicate region name"));
        }
        let thermal = match region.kind {
            RegionKind::Wall | RegionKind::Block => region
                .thermal
                .ok_or_else(|| RoomflowError::region(&name, "walls and blocks need a thermal kind"))?,
            RegionKind::Inlet | RegionKind::Tile => ThermalKind::FixedTemperature,
            RegionKind::Outlet | RegionKind::Rack => ThermalKind::FixedHeatFlux,
        };
        self.by_name.insert(name.clone(), id);
        self.owners.push(BoundaryOwner {
            id,
            name,
            object,
            thermal,
            value: region.value,
            velocity: region.velocity,
            temperature: region.temperature,
            species: region.species,
            trace: region.trace,
            open_ratio: region.open_ratio.unwrap_or(1.0),
            plenum_pressure: region.plenum_pressure,
            rack,
            cell_count: 0,
            exposed_area: 0.0,
        });
        Ok(id)
    }

    fn resolve_neighbors(&mut self, geometry: &GridGeometry) {
        let mut pressure_flags = vec![CellFlag::Fluid; geometry.size()];
        for entry in &self.entries {
            pressure_flags[entry.cell] = entry.flag;
        }

        for entry in &mut self.entries {
            let owner = &self.owners[entry.owner as usize];
            let rack = owner.rack.map(|r| self.racks[r].direction);
            entry.neighbor = find_neighbor(geometry, &pressure_flags, entry, rack);
        }

        for owner in &mut self.owners {
            owner.exposed_area = 0.0;
        }
        for entry in &self.entries {
            if let Some(n) = entry.neighbor {
                if pressure_flags[n.cell].is_fluid() {
                    self.owners[entry.owner as usize].exposed_area += geometry.face_area(n.axis);
                }
            }
        }
    }

    /// Write cell flags into the store and derive the face flags.
    pub fn apply_flags(&self, store: &mut FieldStore) {
        let geometry = *store.geometry();
        {
            let flags = store.flags_mut(FlagKind::Pressure);
            flags.fill(CellFlag::Fluid);
            for entry in &self.entries {
                flags[entry.cell] = entry.flag;
            }
        }
        mark_faces(&geometry, store);
    }

    /// All entries in insertion order.
    pub fn entries(&self) -> &[BoundaryEntry] {
        &self.entries
    }

    /// Entry count.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no boundary cells.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All owners.
    pub fn owners(&self) -> &[BoundaryOwner] {
        &self.owners
    }

    /// Owner by id.
    pub fn owner(&self, id: u32) -> Option<&BoundaryOwner> {
        self.owners.get(id as usize)
    }

    /// Owner by region name (rack names without their encoded fields).
    pub fn owner_by_name(&self, name: &str) -> Option<&BoundaryOwner> {
        self.by_name.get(name).and_then(|&id| self.owner(id))
    }

    /// Mutable owner by id.
    pub fn owner_mut(&mut self, id: u32) -> Option<&mut BoundaryOwner> {
        self.owners.get_mut(id as usize)
    }

    /// Rack specifications.
    pub fn racks(&self) -> &[RackSpec] {
        &self.racks
    }

    /// Mutable rack specifications.
    pub fn racks_mut(&mut self) -> &mut [RackSpec] {
        &mut self.racks
    }

    /// Entries owned by `owner`.
    pub fn entries_of(&self, owner: u32) -> impl Iterator<Item = &BoundaryEntry> + '_ {
        self.entries.iter().filter(move |e| e.owner == owner)
    }

    /// Number of entries with the given flag.
    pub fn count(&self, flag: CellFlag) -> usize {
        self.entries.iter().filter(|e| e.flag == flag).count()
    }

    /// Number of outlet cells.
    pub fn outlet_count(&self) -> usize {
        self.count(CellFlag::Outlet)
    }

    /// Whether any tile cells exist.
    pub fn has_tiles(&self) -> bool {
        self.count(CellFlag::Tile) > 0
    }
}

fn rack_spec(region: &RegionConfig) -> Result<RackSpec> {
    let mut spec = match region.direction {
        Some(direction) => RackSpec::new(
            region.name.clone(),
            direction,
            region.heat.unwrap_or(crate::rack::DEFAULT_RACK_POWER),
            region.flow_ratio.unwrap_or(crate::rack::DEFAULT_FLOW_RATIO),
        )?,
        None => RackSpec::from_structured_name(&region.name)?,
    };
    let axis = spec.direction.axis().index();
    if region.end[axis] == region.start[axis] {
        return Err(RoomflowError::region(
            &region.name,
            "a rack needs at least two cells along its flow direction",
        ));
    }
    spec.resolve_flow();
    Ok(spec)
}

fn classify(region: &RegionConfig, rack: Option<FlowDirection>, at: [usize; 3]) -> (CellFlag, ThermalKind) {
    match region.kind {
        RegionKind::Wall | RegionKind::Block => (
            CellFlag::Solid,
            region.thermal.unwrap_or(ThermalKind::FixedHeatFlux),
        ),
        RegionKind::Inlet => (CellFlag::Inlet, ThermalKind::FixedTemperature),
        RegionKind::Outlet => (CellFlag::Outlet, ThermalKind::FixedHeatFlux),
        RegionKind::Tile => (CellFlag::Tile, ThermalKind::FixedTemperature),
        RegionKind::Rack => {
            let Some(direction) = rack else {
                return (CellFlag::Solid, ThermalKind::FixedHeatFlux);
            };
            let axis = direction.axis().index();
            let (upstream, downstream) = if direction.sign() > 0 {
                (region.start[axis], region.end[axis])
            } else {
                (region.end[axis], region.start[axis])
            };
            if at[axis] == upstream {
                (CellFlag::RackInlet, ThermalKind::FixedHeatFlux)
            } else if at[axis] == downstream {
                (CellFlag::RackOutlet, ThermalKind::FixedTemperature)
            } else {
                (CellFlag::Solid, ThermalKind::FixedHeatFlux)
            }
        }
    }
}

fn step(geometry: &GridGeometry, at: [usize; 3], axis: Axis, sign: i8) -> Option<usize> {
    let mut to = at;
    let n = &mut to[axis.index()];
    if sign > 0 {
        *n += 1;
    } else {
        *n = n.checked_sub(1)?;
    }
    geometry
        .contains(to[0], to[1], to[2])
        .then(|| geometry.ix(to[0], to[1], to[2]))
}

fn neighbor_at(geometry: &GridGeometry, entry: &BoundaryEntry, axis: Axis, sign: i8) -> Option<Neighbor> {
    let at = [entry.i, entry.j, entry.k];
    let cell = step(geometry, at, axis, sign)?;
    let (ni, nj, nk) = geometry.coords(cell);
    let here = geometry.center(entry.i, entry.j, entry.k);
    let there = geometry.center(ni, nj, nk);
    Some(Neighbor {
        cell,
        axis,
        sign,
        distance: (there[axis.index()] - here[axis.index()]).abs(),
    })
}

fn find_neighbor(
    geometry: &GridGeometry,
    flags: &[CellFlag],
    entry: &BoundaryEntry,
    rack: Option<FlowDirection>,
) -> Option<Neighbor> {
    let at = [entry.i, entry.j, entry.k];

    // Rack faces look along the rack axis
    if let Some(direction) = rack {
        let sign = direction.sign();
        return match entry.flag {
            CellFlag::RackInlet => neighbor_at(geometry, entry, direction.axis(), -sign),
            CellFlag::RackOutlet => neighbor_at(geometry, entry, direction.axis(), sign),
            _ => None,
        };
    }

    if geometry.is_ghost(entry.i, entry.j, entry.k) {
        // Only ghosts on a single boundary plane face an interior cell
        let outside: Vec<Axis> = Axis::ALL
            .into_iter()
            .filter(|&a| at[a.index()] == 0 || at[a.index()] > geometry.cells(a))
            .collect();
        if outside.len() != 1 {
            return None;
        }
        let axis = outside[0];
        let sign = if at[axis.index()] == 0 { 1 } else { -1 };
        return neighbor_at(geometry, entry, axis, sign);
    }

    for axis in Axis::ALL {
        for sign in [-1i8, 1] {
            if let Some(n) = neighbor_at(geometry, entry, axis, sign) {
                if flags[n.cell].is_fluid() {
                    return Some(n);
                }
            }
        }
    }
    None
}

/// Classification of the face between two cells.
fn face_flag(a: CellFlag, b: CellFlag) -> CellFlag {
    match (a, b) {
        (CellFlag::Fluid, CellFlag::Fluid) => CellFlag::Fluid,
        (other, CellFlag::Fluid) | (CellFlag::Fluid, other) => other,
        (a, _) if a.is_opening() => a,
        (_, b) if b.is_opening() => b,
        _ => CellFlag::Solid,
    }
}

/// Derive u/v/w face flags from the cell flags.
///
/// A face between two fluid cells is fluid; a face touching an opening takes
/// the opening's classification; anything else, including the outermost
/// faces of the padded grid, is solid.
pub fn mark_faces(geometry: &GridGeometry, store: &mut FieldStore) {
    let cells = store.flags(FlagKind::Pressure).to_vec();
    for (axis, kind) in [(Axis::X, FlagKind::U), (Axis::Y, FlagKind::V), (Axis::Z, FlagKind::W)] {
        let stride = geometry.stride(axis);
        let limit = [geometry.nx(), geometry.ny(), geometry.nz()][axis.index()];
        let faces = store.flags_mut(kind);
        for (idx, face) in faces.iter_mut().enumerate() {
            let (i, j, k) = geometry.coords(idx);
            let n = [i, j, k][axis.index()];
            *face = if n + 1 < limit {
                face_flag(cells[idx], cells[idx + stride])
            } else {
                CellFlag::Solid
            };
        }
    }
}
