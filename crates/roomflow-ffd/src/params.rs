//! Device parameter block.

use bytemuck::{Pod, Zeroable};

use roomflow_core::{Result, RoomflowError};

use crate::config::CaseConfig;
use crate::grid::{Axis, GridGeometry};

/// Constants every kernel reads, uploaded once per configuration as raw
/// bytes.
///
/// `#[repr(C)]` with four `u32` first keeps the `f64` fields aligned and the
/// struct free of padding.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SolverParams {
    /// Interior cells along x.
    pub imax: u32,
    /// Interior cells along y.
    pub jmax: u32,
    /// Interior cells along z.
    pub kmax: u32,
    /// Jacobi sweeps per solve.
    pub sweeps: u32,
    /// Time step (s).
    pub dt: f64,
    /// Domain length along x.
    pub lx: f64,
    /// Domain length along y.
    pub ly: f64,
    /// Domain length along z.
    pub lz: f64,
    /// Kinematic viscosity.
    pub viscosity: f64,
    /// Thermal diffusivity.
    pub thermal_diffusivity: f64,
    /// Density.
    pub density: f64,
    /// Specific heat.
    pub specific_heat: f64,
    /// Expansion coefficient.
    pub expansion_coefficient: f64,
    /// Gravity.
    pub gravity: f64,
    /// Boussinesq reference temperature.
    pub reference_temperature: f64,
}

impl SolverParams {
    /// Size of the uploaded block in bytes.
    pub const SIZE: usize = std::mem::size_of::<SolverParams>();

    /// Build from a case.
    pub fn from_case(case: &CaseConfig) -> Result<Self> {
        let g = &case.geometry;
        let narrow = |n: usize| {
            u32::try_from(n).map_err(|_| RoomflowError::config(format!("grid extent {n} does not fit a u32")))
        };
        Ok(Self {
            imax: narrow(g.imax)?,
            jmax: narrow(g.jmax)?,
            kmax: narrow(g.kmax)?,
            sweeps: case.solver.sweeps,
            dt: case.solver.dt,
            lx: g.lx,
            ly: g.ly,
            lz: g.lz,
            viscosity: case.fluid.viscosity,
            thermal_diffusivity: case.fluid.thermal_diffusivity,
            density: case.fluid.density,
            specific_heat: case.fluid.specific_heat,
            expansion_coefficient: case.fluid.expansion_coefficient,
            gravity: case.fluid.gravity,
            reference_temperature: case.fluid.reference_temperature,
        })
    }

    /// Raw bytes for upload.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Decode an uploaded block.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::SIZE {
            return Err(RoomflowError::LayoutMismatch {
                what: "parameter block",
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    /// Geometry described by the block.
    pub fn geometry(&self) -> GridGeometry {
        GridGeometry {
            imax: self.imax as usize,
            jmax: self.jmax as usize,
            kmax: self.kmax as usize,
            lx: self.lx,
            ly: self.ly,
            lz: self.lz,
        }
    }

    /// Cell volume.
    #[inline]
    pub fn cell_volume(&self) -> f64 {
        self.geometry().cell_volume()
    }

    /// Transient coefficient `V / dt`.
    #[inline]
    pub fn transient(&self) -> f64 {
        self.cell_volume() / self.dt
    }

    /// Face area normal to `axis`.
    #[inline]
    pub fn face_area(&self, axis: Axis) -> f64 {
        self.geometry().face_area(axis)
    }
}
