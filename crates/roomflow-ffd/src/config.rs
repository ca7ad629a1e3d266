//! Case configuration.
//!
//! A case is one TOML document: geometry, fluid properties, solver
//! settings, boundary regions, sensors and the coupling layout. Temperatures
//! in the file are in degrees Celsius; the coupling layer converts driver
//! kelvin at its boundary.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use roomflow_core::backoff::RetryPolicy;
use roomflow_core::{Result, RoomflowError};

use crate::boundary::ThermalKind;
use crate::grid::GridGeometry;
use crate::rack::FlowDirection;

/// Sweeps per linear solve.
pub const DEFAULT_SWEEPS: u32 = 30;

/// Largest boundary-table range handed to one kernel launch.
pub const DEFAULT_DISPATCH_CEILING: usize = 20_000;

/// Coefficient of the Chen zero-equation model.
pub const CHEN_COEFFICIENT: f64 = 0.03874;

/// Air and gravity properties.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FluidProperties {
    /// Density (kg/m³).
    pub density: f64,
    /// Specific heat (J/(kg K)).
    pub specific_heat: f64,
    /// Kinematic viscosity (m²/s).
    pub viscosity: f64,
    /// Thermal diffusivity (m²/s).
    pub thermal_diffusivity: f64,
    /// Thermal expansion coefficient (1/K).
    pub expansion_coefficient: f64,
    /// Gravitational acceleration (m/s²).
    pub gravity: f64,
    /// Boussinesq reference temperature (°C).
    pub reference_temperature: f64,
}

impl Default for FluidProperties {
    fn default() -> Self {
        Self::air()
    }
}

impl FluidProperties {
    /// Air at 20 °C.
    pub fn air() -> Self {
        Self {
            density: 1.205,
            specific_heat: 1006.0,
            viscosity: 1.53e-5,
            thermal_diffusivity: 2.16e-5,
            expansion_coefficient: 3.4e-3,
            gravity: 9.81,
            reference_temperature: 20.0,
        }
    }

    /// Thermal conductivity implied by the diffusivity (W/(m K)).
    pub fn conductivity(&self, turbulent_diffusivity: f64) -> f64 {
        self.density * self.specific_heat * (self.thermal_diffusivity + turbulent_diffusivity)
    }

    fn validate(&self) -> Result<()> {
        let positive = [
            ("density", self.density),
            ("specific_heat", self.specific_heat),
            ("viscosity", self.viscosity),
            ("thermal_diffusivity", self.thermal_diffusivity),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(RoomflowError::config(format!("fluid.{name} must be positive")));
            }
        }
        Ok(())
    }
}

/// Advection scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvectionScheme {
    /// Implicit first-order upwind with its own Jacobi solve.
    Upwind,
    /// Semi-Lagrangian backtrace.
    #[default]
    SemiLagrangian,
}

/// Turbulence closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurbulenceModel {
    /// Molecular viscosity only.
    Laminar,
    /// Chen zero-equation mixing length.
    #[default]
    ChenZeroEquation,
}

/// Solver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Time step (s).
    pub dt: f64,
    /// Advection scheme.
    pub advection: AdvectionScheme,
    /// Jacobi sweeps per linear solve.
    pub sweeps: u32,
    /// Rescale outlet velocities to match inflow.
    pub mass_balance: bool,
    /// Pressure-driven tile velocities.
    pub tile_flow_correction: bool,
    /// Time after which running averages accumulate (s).
    pub steady_after: f64,
    /// Largest boundary range per kernel launch.
    pub dispatch_ceiling: usize,
    /// Turbulence closure.
    pub turbulence: TurbulenceModel,
    /// Length scale for the uniform turbulent diffusivity; defaults to the
    /// shortest domain side.
    pub characteristic_length: Option<f64>,
    /// Fail the coupling interval on non-finite velocity or temperature.
    pub finite_guard: bool,
    /// Run grid kernels on the rayon pool.
    pub parallel: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            dt: 0.1,
            advection: AdvectionScheme::default(),
            sweeps: DEFAULT_SWEEPS,
            mass_balance: true,
            tile_flow_correction: false,
            steady_after: 0.0,
            dispatch_ceiling: DEFAULT_DISPATCH_CEILING,
            turbulence: TurbulenceModel::default(),
            characteristic_length: None,
            finite_guard: false,
            parallel: true,
        }
    }
}

impl SolverConfig {
    /// Set the time step.
    pub fn with_dt(mut self, dt: f64) -> Self {
        self.dt = dt;
        self
    }

    /// Set the advection scheme.
    pub fn with_advection(mut self, scheme: AdvectionScheme) -> Self {
        self.advection = scheme;
        self
    }

    /// Set sweeps per linear solve.
    pub fn with_sweeps(mut self, sweeps: u32) -> Self {
        self.sweeps = sweeps;
        self
    }

    /// Enable or disable the mass-balance correction.
    pub fn with_mass_balance(mut self, enabled: bool) -> Self {
        self.mass_balance = enabled;
        self
    }

    /// Enable or disable the tile correction.
    pub fn with_tile_flow_correction(mut self, enabled: bool) -> Self {
        self.tile_flow_correction = enabled;
        self
    }

    /// Set the averaging threshold.
    pub fn with_steady_after(mut self, t: f64) -> Self {
        self.steady_after = t;
        self
    }

    /// Set the per-launch ceiling.
    pub fn with_dispatch_ceiling(mut self, ceiling: usize) -> Self {
        self.dispatch_ceiling = ceiling;
        self
    }

    /// Set the turbulence model.
    pub fn with_turbulence(mut self, model: TurbulenceModel) -> Self {
        self.turbulence = model;
        self
    }

    /// Enable or disable the finite guard.
    pub fn with_finite_guard(mut self, enabled: bool) -> Self {
        self.finite_guard = enabled;
        self
    }

    /// Enable or disable rayon.
    pub fn with_parallel(mut self, enabled: bool) -> Self {
        self.parallel = enabled;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(RoomflowError::config(format!("solver.dt must be positive, got {}", self.dt)));
        }
        if self.sweeps == 0 {
            return Err(RoomflowError::config("solver.sweeps must be at least 1"));
        }
        if self.dispatch_ceiling == 0 {
            return Err(RoomflowError::config("solver.dispatch_ceiling must be at least 1"));
        }
        if let Some(len) = self.characteristic_length {
            if !(len.is_finite() && len > 0.0) {
                return Err(RoomflowError::config("solver.characteristic_length must be positive"));
            }
        }
        Ok(())
    }
}

/// Initial room state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitialConditions {
    /// Temperature (°C).
    pub temperature: f64,
    /// Velocity (m/s).
    pub velocity: [f64; 3],
}

impl Default for InitialConditions {
    fn default() -> Self {
        Self {
            temperature: 20.0,
            velocity: [0.0; 3],
        }
    }
}

/// What a boundary region represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    /// Enclosure wall.
    Wall,
    /// Solid obstacle.
    Block,
    /// Supply opening.
    Inlet,
    /// Exhaust opening.
    Outlet,
    /// Perforated tile.
    Tile,
    /// Equipment rack.
    Rack,
}

fn default_region_temperature() -> f64 {
    20.0
}

/// A boundary region record. Extents are inclusive padded-grid indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Name. For racks without structured fields, the encoded
    /// `"<name> <dir> <heatW> <flowRatio>"` string.
    pub name: String,
    /// Region kind.
    pub kind: RegionKind,
    /// First cell (inclusive).
    pub start: [usize; 3],
    /// Last cell (inclusive).
    pub end: [usize; 3],
    /// Thermal condition for walls and blocks.
    #[serde(default)]
    pub thermal: Option<ThermalKind>,
    /// Wall temperature (°C) or heat flux (W/m²), per `thermal`.
    #[serde(default)]
    pub value: f64,
    /// Inlet velocity (m/s).
    #[serde(default)]
    pub velocity: [f64; 3],
    /// Inlet or plenum temperature (°C).
    #[serde(default = "default_region_temperature")]
    pub temperature: f64,
    /// Tile open-area ratio in (0, 1].
    #[serde(default)]
    pub open_ratio: Option<f64>,
    /// Plenum kinematic pressure behind a tile (m²/s²).
    #[serde(default)]
    pub plenum_pressure: f64,
    /// Inlet species mass fractions.
    #[serde(default)]
    pub species: [f64; 2],
    /// Inlet trace-substance values.
    #[serde(default)]
    pub trace: [f64; 2],
    /// Rack flow direction.
    #[serde(default)]
    pub direction: Option<FlowDirection>,
    /// Rack heat dissipation (W).
    #[serde(default)]
    pub heat: Option<f64>,
    /// Rack flow per watt (m³/s/W).
    #[serde(default)]
    pub flow_ratio: Option<f64>,
}

impl RegionConfig {
    /// Region with every optional field at its default.
    pub fn new(name: impl Into<String>, kind: RegionKind, start: [usize; 3], end: [usize; 3]) -> Self {
        Self {
            name: name.into(),
            kind,
            start,
            end,
            thermal: None,
            value: 0.0,
            velocity: [0.0; 3],
            temperature: default_region_temperature(),
            open_ratio: None,
            plenum_pressure: 0.0,
            species: [0.0; 2],
            trace: [0.0; 2],
            direction: None,
            heat: None,
            flow_ratio: None,
        }
    }

    /// Set the thermal condition.
    pub fn with_thermal(mut self, kind: ThermalKind, value: f64) -> Self {
        self.thermal = Some(kind);
        self.value = value;
        self
    }

    /// Set inlet velocity.
    pub fn with_velocity(mut self, velocity: [f64; 3]) -> Self {
        self.velocity = velocity;
        self
    }

    /// Set inlet temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Number of cells covered.
    pub fn cell_count(&self) -> usize {
        (0..3)
            .map(|a| self.end[a].saturating_sub(self.start[a]) + 1)
            .product()
    }

    /// Validate extents against the padded grid.
    pub fn validate(&self, geometry: &GridGeometry) -> Result<()> {
        let limits = [geometry.nx(), geometry.ny(), geometry.nz()];
        for axis in 0..3 {
            if self.start[axis] > self.end[axis] {
                return Err(RoomflowError::region(
                    &self.name,
                    format!("start {:?} is past end {:?}", self.start, self.end),
                ));
            }
            if self.end[axis] >= limits[axis] {
                return Err(RoomflowError::region(
                    &self.name,
                    format!("end {:?} is outside the padded grid {:?}", self.end, limits),
                ));
            }
        }
        if matches!(self.kind, RegionKind::Wall | RegionKind::Block) && self.thermal.is_none() {
            return Err(RoomflowError::region(&self.name, "walls and blocks need a thermal kind"));
        }
        if let Some(r) = self.open_ratio {
            if !(r > 0.0 && r <= 1.0) {
                return Err(RoomflowError::region(&self.name, format!("open_ratio {r} not in (0, 1]")));
            }
        }
        Ok(())
    }
}

/// Rack power budget and external overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RackPowerConfig {
    /// Total power shared by all racks (W).
    pub total: f64,
    /// Fixed powers by rack name (W).
    #[serde(default)]
    pub overrides: BTreeMap<String, f64>,
}

/// What a sensor reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Temperature at the position (K on the coupling interface).
    Temperature,
    /// Speed at the position.
    Speed,
    /// Highest mean rack inlet temperature.
    RackInletMax,
}

impl SensorKind {
    /// Whether the reading is a temperature.
    pub fn is_temperature(self) -> bool {
        matches!(self, SensorKind::Temperature | SensorKind::RackInletMax)
    }
}

/// A point sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Name.
    pub name: String,
    /// Measured quantity.
    pub kind: SensorKind,
    /// Position (m). Ignored by `rack_inlet_max`.
    #[serde(default)]
    pub position: [f64; 3],
}

/// Order of port species values in exchange vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeciesLayout {
    /// All ports for species 0, then all ports for species 1.
    #[default]
    SpeciesMajor,
    /// All species for port 0, then all species for port 1.
    PortMajor,
}

impl SpeciesLayout {
    /// Offset of `(port, species)` inside a block of `ports × species`.
    #[inline]
    pub fn offset(self, port: usize, species: usize, ports: usize, per_port: usize) -> usize {
        match self {
            SpeciesLayout::SpeciesMajor => species * ports + port,
            SpeciesLayout::PortMajor => port * per_port + species,
        }
    }
}

/// How the case maps onto the driver's exchange vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CouplingConfig {
    /// Region names exchanged as surfaces, in driver order.
    pub surfaces: Vec<String>,
    /// Region names exchanged as fluid ports, in driver order.
    pub ports: Vec<String>,
    /// Surfaces carrying a shading device, in driver order.
    pub shaded_windows: Vec<String>,
    /// Species per port (at most 2).
    pub species: usize,
    /// Trace substances per port (at most 2).
    pub trace: usize,
    /// Species block ordering.
    pub species_layout: SpeciesLayout,
    /// Retry policy for the stop command.
    pub shutdown: RetryPolicy,
}

impl Default for CouplingConfig {
    fn default() -> Self {
        Self {
            surfaces: Vec::new(),
            ports: Vec::new(),
            shaded_windows: Vec::new(),
            species: 0,
            trace: 0,
            species_layout: SpeciesLayout::default(),
            shutdown: RetryPolicy::shutdown(),
        }
    }
}

fn default_case_name() -> String {
    "case".to_string()
}

/// A complete case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseConfig {
    /// Case name.
    #[serde(default = "default_case_name")]
    pub name: String,
    /// Grid.
    pub geometry: GridGeometry,
    /// Fluid properties.
    #[serde(default)]
    pub fluid: FluidProperties,
    /// Solver settings.
    #[serde(default)]
    pub solver: SolverConfig,
    /// Initial state.
    #[serde(default)]
    pub initial: InitialConditions,
    /// Boundary regions in precedence order: earlier regions win overlaps.
    #[serde(default)]
    pub regions: Vec<RegionConfig>,
    /// Rack power budget.
    #[serde(default)]
    pub rack_power: Option<RackPowerConfig>,
    /// Point sensors.
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
    /// Coupling layout.
    #[serde(default)]
    pub coupling: CouplingConfig,
}

impl CaseConfig {
    /// Empty box with the given grid.
    pub fn new(geometry: GridGeometry) -> Self {
        Self {
            name: default_case_name(),
            geometry,
            fluid: FluidProperties::default(),
            solver: SolverConfig::default(),
            initial: InitialConditions::default(),
            regions: Vec::new(),
            rack_power: None,
            sensors: Vec::new(),
            coupling: CouplingConfig::default(),
        }
    }

    /// Cube of `n³` cells with a supply on the west wall and an exhaust on
    /// the east wall.
    ///
    /// The supply blows +x at 1 m/s and 20 °C through the middle of the
    /// west wall; the exhaust covers the same span on the east wall.
    pub fn ventilated_box(n: usize) -> Self {
        let n = n.max(3);
        let lo = n / 3 + 1;
        let hi = (2 * n) / 3;
        let geometry = GridGeometry {
            imax: n,
            jmax: n,
            kmax: n,
            lx: 1.0,
            ly: 1.0,
            lz: 1.0,
        };
        let mut case = Self::new(geometry);
        case.name = "ventilated_box".to_string();
        case.regions = vec![
            RegionConfig::new("supply", RegionKind::Inlet, [0, lo, lo], [0, hi, hi])
                .with_velocity([1.0, 0.0, 0.0])
                .with_temperature(20.0),
            RegionConfig::new("exhaust", RegionKind::Outlet, [n + 1, lo, lo], [n + 1, hi, hi]),
        ];
        case.coupling.ports = vec!["supply".to_string(), "exhaust".to_string()];
        case
    }

    /// Small server room: floor tiles, two racks, a heated ceiling and a
    /// return grille.
    pub fn server_room() -> Self {
        let geometry = GridGeometry {
            imax: 12,
            jmax: 8,
            kmax: 8,
            lx: 6.0,
            ly: 4.0,
            lz: 3.0,
        };
        let mut case = Self::new(geometry);
        case.name = "server_room".to_string();
        case.solver = SolverConfig::default().with_tile_flow_correction(true);
        let mut tile = RegionConfig::new("tile", RegionKind::Tile, [5, 2, 0], [8, 6, 0]).with_temperature(15.0);
        tile.open_ratio = Some(0.25);
        tile.plenum_pressure = 5.0;
        let mut rack_a = RegionConfig::new("RackA", RegionKind::Rack, [2, 3, 1], [3, 5, 4]);
        rack_a.direction = Some(FlowDirection::NegX);
        rack_a.heat = Some(3000.0);
        rack_a.flow_ratio = Some(1.0e-4);
        let rack_b = RegionConfig::new("RackB 1 3000 0.0001", RegionKind::Rack, [10, 3, 1], [11, 5, 4]);
        case.regions = vec![
            tile,
            rack_a,
            rack_b,
            RegionConfig::new("return", RegionKind::Outlet, [6, 3, 9], [7, 5, 9]),
            RegionConfig::new("ceiling", RegionKind::Wall, [0, 0, 9], [13, 9, 9])
                .with_thermal(ThermalKind::FixedTemperature, 24.0),
        ];
        case.rack_power = Some(RackPowerConfig {
            total: 6000.0,
            overrides: BTreeMap::new(),
        });
        case.sensors = vec![
            SensorConfig {
                name: "centre".to_string(),
                kind: SensorKind::Temperature,
                position: [3.0, 2.0, 1.5],
            },
            SensorConfig {
                name: "rack_inlet".to_string(),
                kind: SensorKind::RackInletMax,
                position: [0.0; 3],
            },
        ];
        case.coupling.surfaces = vec!["ceiling".to_string()];
        case.coupling.ports = vec!["tile".to_string(), "return".to_string()];
        case
    }

    /// Replace the solver settings.
    pub fn with_solver(mut self, solver: SolverConfig) -> Self {
        self.solver = solver;
        self
    }

    /// Append a region (lowest precedence so far).
    pub fn with_region(mut self, region: RegionConfig) -> Self {
        self.regions.push(region);
        self
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let case: CaseConfig =
            toml::from_str(text).map_err(|e| RoomflowError::config(e.to_string()))?;
        case.validate()?;
        Ok(case)
    }

    /// Read, parse and validate a case file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| RoomflowError::CaseFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| RoomflowError::config(e.to_string()))
    }

    /// Check everything that can be checked without building the grid.
    pub fn validate(&self) -> Result<()> {
        self.geometry.validate()?;
        self.fluid.validate()?;
        self.solver.validate()?;
        for region in &self.regions {
            region.validate(&self.geometry)?;
        }
        if self.coupling.species > 2 {
            return Err(RoomflowError::config(format!(
                "at most 2 species per port are supported, got {}",
                self.coupling.species
            )));
        }
        if self.coupling.trace > 2 {
            return Err(RoomflowError::config(format!(
                "at most 2 trace substances per port are supported, got {}",
                self.coupling.trace
            )));
        }
        if let Some(budget) = &self.rack_power {
            if !(budget.total.is_finite() && budget.total >= 0.0) {
                return Err(RoomflowError::config("rack_power.total must be >= 0"));
            }
        }
        let known = |name: &str| {
            self.regions
                .iter()
                .any(|r| r.name == name || r.name.split_whitespace().next() == Some(name))
        };
        for name in self
            .coupling
            .surfaces
            .iter()
            .chain(&self.coupling.ports)
            .chain(&self.coupling.shaded_windows)
        {
            if !known(name.as_str()) {
                return Err(RoomflowError::config(format!("coupling refers to unknown region '{name}'")));
            }
        }
        let has_rack = self.regions.iter().any(|r| r.kind == RegionKind::Rack);
        if let Some(sensor) = self
            .sensors
            .iter()
            .find(|s| s.kind == SensorKind::RackInletMax && !has_rack)
        {
            return Err(RoomflowError::config(format!(
                "sensor '{}' reads rack inlets but the case has no racks",
                sensor.name
            )));
        }
        for name in &self.coupling.shaded_windows {
            if !self.coupling.surfaces.contains(name) {
                return Err(RoomflowError::config(format!(
                    "shaded window '{name}' must also be listed as a surface"
                )));
            }
        }
        self.coupling.shutdown.validate_bounded("coupling.shutdown")?;
        Ok(())
    }
}
