//! Padded 3D grid and the flat field store.
//!
//! The grid has `imax × jmax × kmax` interior cells wrapped in one ghost
//! layer, so every axis has `n + 2` entries and cell `(i, j, k)` lives at
//! `IX(i,j,k) = i + j*(imax+2) + k*(imax+2)*(jmax+2)`.
//!
//! Velocities are staggered: `vx[IX(i,j,k)]` sits on the +x face of cell
//! `(i, j, k)`, likewise `vy` and `vz`. Scalars sit at cell centres. Ghost
//! cells are placed on the domain boundary planes.

use serde::{Deserialize, Serialize};

use roomflow_core::error::try_zeroed;
use roomflow_core::{Result, RoomflowError};

/// Coordinate axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// x.
    X,
    /// y.
    Y,
    /// z.
    Z,
}

impl Axis {
    /// All axes in order.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Position in `[x, y, z]` arrays.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Where a variable lives inside a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    /// Cell centre.
    Center,
    /// Positive face along the axis.
    Face(Axis),
}

/// Grid extents and resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridGeometry {
    /// Interior cells along x.
    pub imax: usize,
    /// Interior cells along y.
    pub jmax: usize,
    /// Interior cells along z.
    pub kmax: usize,
    /// Domain length along x (m).
    pub lx: f64,
    /// Domain length along y (m).
    pub ly: f64,
    /// Domain length along z (m).
    pub lz: f64,
}

impl GridGeometry {
    /// Create a geometry, validating extents.
    pub fn new(imax: usize, jmax: usize, kmax: usize, lx: f64, ly: f64, lz: f64) -> Result<Self> {
        let geometry = Self {
            imax,
            jmax,
            kmax,
            lx,
            ly,
            lz,
        };
        geometry.validate()?;
        Ok(geometry)
    }

    /// Check cell counts and lengths.
    pub fn validate(&self) -> Result<()> {
        if self.imax == 0 || self.jmax == 0 || self.kmax == 0 {
            return Err(RoomflowError::config(format!(
                "grid must have at least one interior cell per axis, got {}x{}x{}",
                self.imax, self.jmax, self.kmax
            )));
        }
        for (name, len) in [("lx", self.lx), ("ly", self.ly), ("lz", self.lz)] {
            if !(len.is_finite() && len > 0.0) {
                return Err(RoomflowError::config(format!("{name} must be positive, got {len}")));
            }
        }
        Ok(())
    }

    /// Padded size along x.
    #[inline]
    pub fn nx(&self) -> usize {
        self.imax + 2
    }

    /// Padded size along y.
    #[inline]
    pub fn ny(&self) -> usize {
        self.jmax + 2
    }

    /// Padded size along z.
    #[inline]
    pub fn nz(&self) -> usize {
        self.kmax + 2
    }

    /// Total padded cell count.
    #[inline]
    pub fn size(&self) -> usize {
        self.nx() * self.ny() * self.nz()
    }

    /// Cells in one z slab.
    #[inline]
    pub fn slab(&self) -> usize {
        self.nx() * self.ny()
    }

    /// Interior cell count along `axis`.
    #[inline]
    pub fn cells(&self, axis: Axis) -> usize {
        match axis {
            Axis::X => self.imax,
            Axis::Y => self.jmax,
            Axis::Z => self.kmax,
        }
    }

    /// Linear index stride along `axis`.
    #[inline]
    pub fn stride(&self, axis: Axis) -> usize {
        match axis {
            Axis::X => 1,
            Axis::Y => self.nx(),
            Axis::Z => self.slab(),
        }
    }

    /// Linearized index.
    #[inline]
    pub fn ix(&self, i: usize, j: usize, k: usize) -> usize {
        i + j * self.nx() + k * self.slab()
    }

    /// Inverse of [`ix`](Self::ix).
    #[inline]
    pub fn coords(&self, idx: usize) -> (usize, usize, usize) {
        let k = idx / self.slab();
        let rem = idx % self.slab();
        (rem % self.nx(), rem / self.nx(), k)
    }

    /// Cell size along x.
    #[inline]
    pub fn dx(&self) -> f64 {
        self.lx / self.imax as f64
    }

    /// Cell size along y.
    #[inline]
    pub fn dy(&self) -> f64 {
        self.ly / self.jmax as f64
    }

    /// Cell size along z.
    #[inline]
    pub fn dz(&self) -> f64 {
        self.lz / self.kmax as f64
    }

    /// Cell size along `axis`.
    #[inline]
    pub fn spacing(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.dx(),
            Axis::Y => self.dy(),
            Axis::Z => self.dz(),
        }
    }

    /// Domain length along `axis`.
    #[inline]
    pub fn length(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.lx,
            Axis::Y => self.ly,
            Axis::Z => self.lz,
        }
    }

    /// Area of a cell face normal to `axis`.
    #[inline]
    pub fn face_area(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.dy() * self.dz(),
            Axis::Y => self.dx() * self.dz(),
            Axis::Z => self.dx() * self.dy(),
        }
    }

    /// Interior cell volume.
    #[inline]
    pub fn cell_volume(&self) -> f64 {
        self.dx() * self.dy() * self.dz()
    }

    /// Whether `(i, j, k)` is in the ghost layer.
    #[inline]
    pub fn is_ghost(&self, i: usize, j: usize, k: usize) -> bool {
        i == 0 || j == 0 || k == 0 || i > self.imax || j > self.jmax || k > self.kmax
    }

    /// Whether `(i, j, k)` is inside the padded grid.
    #[inline]
    pub fn contains(&self, i: usize, j: usize, k: usize) -> bool {
        i < self.nx() && j < self.ny() && k < self.nz()
    }

    /// Coordinate of cell centre `n` along `axis`; ghosts sit on the walls.
    #[inline]
    pub fn center_coord(&self, axis: Axis, n: usize) -> f64 {
        let cells = self.cells(axis);
        if n == 0 {
            0.0
        } else if n > cells {
            self.length(axis)
        } else {
            (n as f64 - 0.5) * self.spacing(axis)
        }
    }

    /// Physical position of cell centre `(i, j, k)`.
    pub fn center(&self, i: usize, j: usize, k: usize) -> [f64; 3] {
        [
            self.center_coord(Axis::X, i),
            self.center_coord(Axis::Y, j),
            self.center_coord(Axis::Z, k),
        ]
    }

    /// Physical position where a variable at `loc` is stored for cell `(i, j, k)`.
    pub fn position(&self, loc: Location, i: usize, j: usize, k: usize) -> [f64; 3] {
        let mut p = self.center(i, j, k);
        if let Location::Face(axis) = loc {
            let n = [i, j, k][axis.index()];
            p[axis.index()] = (n as f64 * self.spacing(axis)).min(self.length(axis));
        }
        p
    }

    /// Interior cell nearest to a physical point.
    pub fn nearest_cell(&self, pos: [f64; 3]) -> (usize, usize, usize) {
        let pick = |axis: Axis| {
            let n = (pos[axis.index()] / self.spacing(axis)).floor() as isize + 1;
            n.clamp(1, self.cells(axis) as isize) as usize
        };
        (pick(Axis::X), pick(Axis::Y), pick(Axis::Z))
    }
}

/// Per-cell classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellFlag {
    /// Solved fluid cell.
    #[default]
    Fluid,
    /// Solid wall, block or rack body.
    Solid,
    /// Supply opening with prescribed velocity.
    Inlet,
    /// Exhaust opening with zero-gradient velocity.
    Outlet,
    /// Rack face drawing room air in.
    RackInlet,
    /// Rack face discharging heated air.
    RackOutlet,
    /// Perforated tile.
    Tile,
}

impl CellFlag {
    /// Whether the solver updates this cell.
    #[inline]
    pub fn is_fluid(self) -> bool {
        self == CellFlag::Fluid
    }

    /// Openings carry flow across the boundary.
    #[inline]
    pub fn is_opening(self) -> bool {
        matches!(
            self,
            CellFlag::Inlet
                | CellFlag::Outlet
                | CellFlag::RackInlet
                | CellFlag::RackOutlet
                | CellFlag::Tile
        )
    }

    /// Boundary where the solved quantity has zero normal gradient.
    #[inline]
    pub fn is_zero_gradient(self) -> bool {
        matches!(self, CellFlag::Outlet | CellFlag::RackInlet)
    }
}

/// Which flag array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagKind {
    /// Cell centres.
    Pressure,
    /// x faces.
    U,
    /// y faces.
    V,
    /// z faces.
    W,
}

impl FlagKind {
    const COUNT: usize = 4;

    /// Flag array for a storage location.
    pub fn for_location(loc: Location) -> FlagKind {
        match loc {
            Location::Center => FlagKind::Pressure,
            Location::Face(Axis::X) => FlagKind::U,
            Location::Face(Axis::Y) => FlagKind::V,
            Location::Face(Axis::Z) => FlagKind::W,
        }
    }

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

macro_rules! vars {
    ($($(#[$doc:meta])* $name:ident => $label:literal, $loc:expr;)*) => {
        /// Variable kinds held by the [`FieldStore`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Var {
            $($(#[$doc])* $name,)*
        }

        impl Var {
            /// Every variable, in storage order.
            pub const ALL: &'static [Var] = &[$(Var::$name,)*];

            /// Number of variables.
            pub const COUNT: usize = Var::ALL.len();

            /// Short name used in logs and errors.
            pub fn name(self) -> &'static str {
                match self {
                    $(Var::$name => $label,)*
                }
            }

            /// Storage location.
            pub fn location(self) -> Location {
                match self {
                    $(Var::$name => $loc,)*
                }
            }
        }
    };
}

vars! {
    /// x velocity.
    Vx => "vx", Location::Face(Axis::X);
    /// y velocity.
    Vy => "vy", Location::Face(Axis::Y);
    /// z velocity.
    Vz => "vz", Location::Face(Axis::Z);
    /// Kinematic pressure.
    Pressure => "p", Location::Center;
    /// Temperature (°C).
    Temp => "temp", Location::Center;
    /// Species mass fraction 1.
    Xi1 => "xi1", Location::Center;
    /// Species mass fraction 2.
    Xi2 => "xi2", Location::Center;
    /// Trace substance 1.
    C1 => "c1", Location::Center;
    /// Trace substance 2.
    C2 => "c2", Location::Center;
    /// Scratch: previous vx.
    Tmp1 => "tmp1", Location::Face(Axis::X);
    /// Scratch: previous vy.
    Tmp2 => "tmp2", Location::Face(Axis::Y);
    /// Scratch: previous vz.
    Tmp3 => "tmp3", Location::Face(Axis::Z);
    /// Scratch: previous scalar.
    Tmp4 => "tmp4", Location::Center;
    /// Scratch: Jacobi iterate.
    Tmp5 => "tmp5", Location::Center;
    /// Turbulent viscosity.
    NuT => "nu_t", Location::Center;
    /// Turbulent scalar diffusivity.
    AlphaT => "alpha_t", Location::Center;
    /// Distance to the nearest solid boundary.
    WallDistance => "wall_distance", Location::Center;
    /// Centre coefficient.
    Ap => "ap", Location::Center;
    /// East coefficient.
    Ae => "ae", Location::Center;
    /// West coefficient.
    Aw => "aw", Location::Center;
    /// North coefficient.
    An => "an", Location::Center;
    /// South coefficient.
    As => "as", Location::Center;
    /// Front (+z) coefficient.
    Af => "af", Location::Center;
    /// Back (-z) coefficient.
    Ab => "ab", Location::Center;
    /// Right-hand side.
    B => "b", Location::Center;
    /// Boundary x velocity.
    VxBc => "vx_bc", Location::Center;
    /// Boundary y velocity.
    VyBc => "vy_bc", Location::Center;
    /// Boundary z velocity.
    VzBc => "vz_bc", Location::Center;
    /// Boundary temperature.
    TempBc => "temp_bc", Location::Center;
    /// Boundary heat flux (W/m²).
    QfluxBc => "qflux_bc", Location::Center;
    /// Boundary species 1.
    Xi1Bc => "xi1_bc", Location::Center;
    /// Boundary species 2.
    Xi2Bc => "xi2_bc", Location::Center;
    /// Boundary trace 1.
    C1Bc => "c1_bc", Location::Center;
    /// Boundary trace 2.
    C2Bc => "c2_bc", Location::Center;
    /// Volumetric heat source (K/s).
    HeatSource => "heat_source", Location::Center;
    /// Running sum of vx.
    VxMean => "vx_mean", Location::Face(Axis::X);
    /// Running sum of vy.
    VyMean => "vy_mean", Location::Face(Axis::Y);
    /// Running sum of vz.
    VzMean => "vz_mean", Location::Face(Axis::Z);
    /// Running sum of temperature.
    TempMean => "temp_mean", Location::Center;
    /// Running sum of species 1.
    Xi1Mean => "xi1_mean", Location::Center;
    /// Running sum of trace 1.
    C1Mean => "c1_mean", Location::Center;
}

impl Var {
    /// Storage slot.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Boundary shadow value for a transported variable.
    pub fn boundary_value(self) -> Option<Var> {
        match self {
            Var::Vx => Some(Var::VxBc),
            Var::Vy => Some(Var::VyBc),
            Var::Vz => Some(Var::VzBc),
            Var::Temp => Some(Var::TempBc),
            Var::Xi1 => Some(Var::Xi1Bc),
            Var::Xi2 => Some(Var::Xi2Bc),
            Var::C1 => Some(Var::C1Bc),
            Var::C2 => Some(Var::C2Bc),
            _ => None,
        }
    }

    /// Velocity component for an axis.
    pub fn velocity(axis: Axis) -> Var {
        match axis {
            Axis::X => Var::Vx,
            Axis::Y => Var::Vy,
            Axis::Z => Var::Vz,
        }
    }

    /// Running-sum slot, if the variable is time averaged.
    pub fn mean(self) -> Option<Var> {
        match self {
            Var::Vx => Some(Var::VxMean),
            Var::Vy => Some(Var::VyMean),
            Var::Vz => Some(Var::VzMean),
            Var::Temp => Some(Var::TempMean),
            Var::Xi1 => Some(Var::Xi1Mean),
            Var::C1 => Some(Var::C1Mean),
            _ => None,
        }
    }
}

/// Flat storage for every [`Var`] and the four flag arrays.
///
/// Sized once from the geometry and never reallocated; kernels borrow views.
#[derive(Debug, Clone)]
pub struct FieldStore {
    geometry: GridGeometry,
    size: usize,
    data: Vec<f64>,
    flags: Vec<CellFlag>,
}

impl FieldStore {
    /// Allocate zeroed fields and all-fluid flags.
    pub fn new(geometry: GridGeometry) -> Result<Self> {
        geometry.validate()?;
        let size = geometry.size();
        let total = size
            .checked_mul(Var::COUNT)
            .ok_or_else(|| RoomflowError::allocation::<f64>("field store", usize::MAX))?;
        let data = try_zeroed::<f64>("field store", total)?;
        let flag_total = size * FlagKind::COUNT;
        let mut flags = Vec::new();
        flags
            .try_reserve_exact(flag_total)
            .map_err(|_| RoomflowError::allocation::<CellFlag>("cell flags", flag_total))?;
        flags.resize(flag_total, CellFlag::Fluid);

        Ok(Self {
            geometry,
            size,
            data,
            flags,
        })
    }

    /// Grid geometry.
    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    /// Cells per field.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Read a field.
    pub fn field(&self, var: Var) -> &[f64] {
        let start = var.index() * self.size;
        &self.data[start..start + self.size]
    }

    /// Mutate a field.
    pub fn field_mut(&mut self, var: Var) -> &mut [f64] {
        let start = var.index() * self.size;
        &mut self.data[start..start + self.size]
    }

    /// Read a flag array.
    pub fn flags(&self, kind: FlagKind) -> &[CellFlag] {
        let start = kind.index() * self.size;
        &self.flags[start..start + self.size]
    }

    /// Mutate a flag array.
    pub fn flags_mut(&mut self, kind: FlagKind) -> &mut [CellFlag] {
        let start = kind.index() * self.size;
        &mut self.flags[start..start + self.size]
    }

    /// Fill a field with a constant.
    pub fn fill(&mut self, var: Var, value: f64) {
        self.field_mut(var).fill(value);
    }

    /// Borrow the `writes` fields mutably, in order, and the rest read-only.
    pub fn split_mut(&mut self, writes: &[Var]) -> Result<(Vec<&mut [f64]>, FieldView<'_>)> {
        let mut slots: Vec<Option<&mut [f64]>> =
            self.data.chunks_exact_mut(self.size).map(Some).collect();
        let mut out = Vec::with_capacity(writes.len());
        for var in writes {
            match slots[var.index()].take() {
                Some(field) => out.push(field),
                None => {
                    return Err(RoomflowError::KernelFailed {
                        kernel: "split_mut",
                        reason: format!("{} requested twice for writing", var.name()),
                    })
                }
            }
        }
        let view = FieldView {
            geometry: &self.geometry,
            reads: slots.into_iter().map(|s| s.map(freeze)).collect(),
            flags: &self.flags,
            size: self.size,
        };
        Ok((out, view))
    }

    /// Borrow `N` distinct fields mutably and the rest read-only.
    pub fn view_mut<const N: usize>(
        &mut self,
        writes: [Var; N],
    ) -> Result<([&mut [f64]; N], FieldView<'_>)> {
        let (fields, view) = self.split_mut(&writes)?;
        let mut fields = fields.into_iter();
        let out: [&mut [f64]; N] = std::array::from_fn(|_| fields.next().unwrap_or_default());
        Ok((out, view))
    }

    /// Copy one field into another.
    pub fn copy_field(&mut self, src: Var, dst: Var) -> Result<()> {
        if src == dst {
            return Ok(());
        }
        let (mut out, view) = self.split_mut(&[dst])?;
        out[0].copy_from_slice(view.get(src));
        Ok(())
    }

    /// Read-only view of everything.
    pub fn view(&self) -> FieldView<'_> {
        FieldView {
            geometry: &self.geometry,
            reads: self.data.chunks_exact(self.size).map(Some).collect(),
            flags: &self.flags,
            size: self.size,
        }
    }

    /// Raw bytes of one field, for dumping.
    pub fn field_bytes(&self, var: Var) -> &[u8] {
        bytemuck::cast_slice(self.field(var))
    }
}

fn freeze(field: &mut [f64]) -> &[f64] {
    field
}

/// Read-only view over the fields not borrowed for writing.
#[derive(Debug)]
pub struct FieldView<'a> {
    geometry: &'a GridGeometry,
    reads: Vec<Option<&'a [f64]>>,
    flags: &'a [CellFlag],
    size: usize,
}

impl<'a> FieldView<'a> {
    /// Grid geometry.
    #[inline]
    pub fn geometry(&self) -> &'a GridGeometry {
        self.geometry
    }

    /// A readable field. Fields borrowed for writing read as empty.
    #[inline]
    pub fn get(&self, var: Var) -> &'a [f64] {
        debug_assert!(self.reads[var.index()].is_some(), "{} is being written", var.name());
        self.reads[var.index()].unwrap_or(&[])
    }

    /// A flag array.
    #[inline]
    pub fn flags(&self, kind: FlagKind) -> &'a [CellFlag] {
        let start = kind as usize * self.size;
        &self.flags[start..start + self.size]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_geometry() -> GridGeometry {
        GridGeometry::new(4, 3, 2, 4.0, 3.0, 2.0).unwrap()
    }

    #[test]
    fn test_index_layout() {
        let g = create_test_geometry();
        assert_eq!(g.size(), 6 * 5 * 4);
        assert_eq!(g.ix(0, 0, 0), 0);
        assert_eq!(g.ix(1, 0, 0), 1);
        assert_eq!(g.ix(0, 1, 0), 6);
        assert_eq!(g.ix(0, 0, 1), 30);

        for idx in [0, 7, 31, g.size() - 1] {
            let (i, j, k) = g.coords(idx);
            assert_eq!(g.ix(i, j, k), idx);
        }
    }

    #[test]
    fn test_ghost_detection() {
        let g = create_test_geometry();
        assert!(g.is_ghost(0, 1, 1));
        assert!(g.is_ghost(5, 1, 1));
        assert!(!g.is_ghost(1, 1, 1));
        assert!(!g.is_ghost(4, 3, 2));
    }

    #[test]
    fn test_positions() {
        let g = create_test_geometry();
        assert_eq!(g.center(0, 1, 1), [0.0, 0.5, 0.5]);
        assert_eq!(g.center(5, 4, 3), [4.0, 3.0, 2.0]);
        assert_eq!(g.position(Location::Face(Axis::X), 1, 1, 1), [1.0, 0.5, 0.5]);
        assert_eq!(g.nearest_cell([3.9, 0.1, 1.5]), (4, 1, 2));
    }

    #[test]
    fn test_invalid_geometry() {
        assert!(GridGeometry::new(0, 1, 1, 1.0, 1.0, 1.0).is_err());
        assert!(GridGeometry::new(1, 1, 1, -1.0, 1.0, 1.0).is_err());
    }

    #[test]
    fn test_store_fields_independent() {
        let mut store = FieldStore::new(create_test_geometry()).unwrap();
        store.fill(Var::Temp, 20.0);
        assert!(store.field(Var::Temp).iter().all(|&t| t == 20.0));
        assert!(store.field(Var::Vx).iter().all(|&v| v == 0.0));
        assert_eq!(store.field(Var::Pressure).len(), store.size());
    }

    #[test]
    fn test_view_mut_disjoint() {
        let mut store = FieldStore::new(create_test_geometry()).unwrap();
        store.fill(Var::Tmp4, 3.0);
        {
            let ([temp, b], view) = store.view_mut([Var::Temp, Var::B]).unwrap();
            let old = view.get(Var::Tmp4);
            for (idx, t) in temp.iter_mut().enumerate() {
                *t = old[idx] * 2.0;
            }
            b.fill(1.0);
        }
        assert!(store.field(Var::Temp).iter().all(|&t| t == 6.0));
        assert!(store.field(Var::B).iter().all(|&b| b == 1.0));
    }

    #[test]
    fn test_view_mut_rejects_duplicates() {
        let mut store = FieldStore::new(create_test_geometry()).unwrap();
        assert!(store.view_mut([Var::Vx, Var::Vx]).is_err());
    }

    #[test]
    fn test_var_table() {
        assert_eq!(Var::ALL.len(), Var::COUNT);
        for (slot, var) in Var::ALL.iter().enumerate() {
            assert_eq!(var.index(), slot);
        }
        assert_eq!(Var::Vy.location(), Location::Face(Axis::Y));
        assert_eq!(Var::Temp.boundary_value(), Some(Var::TempBc));
    }
}
