//! Fractional-step solver.
//!
//! One [`FfdSolver::step`] runs, in this order and each over the whole grid
//! before the next starts:
//!
//! 1. tile and rack corrections,
//! 2. advection of u, v, w and the scalars, each followed by its boundary
//!    condition,
//! 3. turbulence update and implicit diffusion,
//! 4. pressure projection,
//! 5. outlet mass balance,
//! 6. clock advance and running averages.
//!
//! Every sub-step is a [`KernelOp`] issued through the [`Dispatcher`]. Host
//! reads (rack inlet means, mass-flow sums, outputs) go through a barrier
//! first.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use roomflow_core::units::air_density;
use roomflow_core::{LogSink, Result, RoomflowError, TracingSink};

use crate::boundary::{BoundaryIndexTable, ObjectType, ThermalKind};
use crate::config::{AdvectionScheme, CaseConfig, SensorKind, TurbulenceModel, CHEN_COEFFICIENT};
use crate::dispatch::{ComputeDevice, CpuDevice, DispatchStats, Dispatcher, KernelOp, LaunchArgs};
use crate::grid::{Axis, CellFlag, FieldStore, FlagKind, Var};
use crate::kernels::snapshot;
use crate::params::SolverParams;
use crate::rack::{redistribute_power, RackSpec, RackState};

/// Convective film coefficient used to turn absorbed shade radiation into a
/// temperature rise (W/(m² K)).
pub const SHADE_FILM_COEFFICIENT: f64 = 8.0;

/// Variables with running sums.
const AVERAGED: [Var; 6] = [Var::Vx, Var::Vy, Var::Vz, Var::Temp, Var::Xi1, Var::C1];

/// Simulated time and step counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SolverClock {
    /// Simulated time (s).
    pub time: f64,
    /// Steps taken.
    pub step: u64,
    /// Steps folded into the running averages.
    pub step_mean: u64,
}

/// Outcome of one coupling interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalReport {
    /// Steps taken in this interval.
    pub steps: u64,
    /// Simulated time at the end of the interval (s).
    pub time: f64,
}

/// Integrated mass flow across the openings (kg/s).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MassFlows {
    /// Flow entering through inlets and tiles.
    pub inflow: f64,
    /// Flow leaving through outlets.
    pub outflow: f64,
}

impl MassFlows {
    /// `inflow - outflow`.
    pub fn imbalance(&self) -> f64 {
        self.inflow - self.outflow
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct VolumeFlows {
    inflow: f64,
    outflow: f64,
    outlet_area: f64,
}

/// Mean fluid state over a port.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PortMean {
    /// Temperature (°C).
    pub temperature: f64,
    /// Species mass fractions.
    pub species: [f64; 2],
    /// Trace substances.
    pub trace: [f64; 2],
}

/// Driver-side shading input for one window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ShadeInput {
    /// Control signal in [0, 1].
    pub control: f64,
    /// Radiation absorbed by the shade (W).
    pub absorbed: f64,
}

/// Boundary values a driver supplies for one port.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PortInput {
    /// Mass flow into the room (kg/s).
    pub mass_flow: f64,
    /// Temperature (°C).
    pub temperature: f64,
    /// Species mass fractions.
    pub species: [f64; 2],
    /// Trace substances.
    pub trace: [f64; 2],
}

/// The room solver.
pub struct FfdSolver<D: ComputeDevice = CpuDevice> {
    case: CaseConfig,
    params: SolverParams,
    store: FieldStore,
    table: BoundaryIndexTable,
    dispatcher: Dispatcher<D>,
    rack_states: Vec<RackState>,
    rack_inlets: Vec<Vec<usize>>,
    scalars: Vec<Var>,
    shades: Vec<ShadeInput>,
    alpha_t: f64,
    heat_source: f64,
    clock: SolverClock,
    sink: Arc<dyn LogSink>,
}

impl FfdSolver<CpuDevice> {
    /// Build a solver on the CPU device.
    pub fn new(case: CaseConfig) -> Result<Self> {
        let device = CpuDevice::new(case.solver.parallel);
        Self::with_device(case, device)
    }
}

impl<D: ComputeDevice> FfdSolver<D> {
    /// Build a solver on an arbitrary device.
    pub fn with_device(case: CaseConfig, device: D) -> Result<Self> {
        case.validate()?;
        let params = SolverParams::from_case(&case)?;
        let mut store = FieldStore::new(case.geometry)?;
        let mut table = BoundaryIndexTable::build(&case.geometry, &case.regions)?;
        table.apply_flags(&mut store);

        if let Some(budget) = &case.rack_power {
            let supplied: Vec<Option<f64>> = table
                .racks()
                .iter()
                .map(|r| budget.overrides.get(&r.name).copied())
                .collect();
            let powers = redistribute_power(budget.total, &supplied)?;
            for (rack, power) in table.racks_mut().iter_mut().zip(powers) {
                rack.set_power(power);
            }
        }

        let geometry = case.geometry;
        let mut rack_inlets = vec![Vec::new(); table.racks().len()];
        let mut rack_states = vec![RackState::default(); table.racks().len()];
        for owner in table.owners() {
            if let Some(slot) = owner.rack {
                rack_states[slot].owner = owner.id;
            }
        }
        for entry in table.entries() {
            if entry.flag != CellFlag::RackInlet {
                continue;
            }
            let (Some(n), Some(slot)) = (entry.neighbor, table.owner(entry.owner).and_then(|o| o.rack)) else {
                continue;
            };
            rack_inlets[slot].push(n.cell);
            rack_states[slot].face_area += geometry.face_area(n.axis);
        }

        let mut scalars = vec![Var::Temp];
        scalars.extend([Var::Xi1, Var::Xi2].into_iter().take(case.coupling.species));
        scalars.extend([Var::C1, Var::C2].into_iter().take(case.coupling.trace));

        let mut dispatcher = Dispatcher::new(device, case.solver.dispatch_ceiling)?;
        dispatcher.upload(&params)?;

        let shades = vec![ShadeInput::default(); case.coupling.shaded_windows.len()];
        let mut solver = Self {
            case,
            params,
            store,
            table,
            dispatcher,
            rack_states,
            rack_inlets,
            scalars,
            shades,
            alpha_t: 0.0,
            heat_source: 0.0,
            clock: SolverClock::default(),
            sink: Arc::new(TracingSink),
        };
        solver.initialize()?;
        info!(
            case = %solver.case.name,
            cells = solver.store.size(),
            boundary_cells = solver.table.len(),
            racks = solver.rack_states.len(),
            device = solver.dispatcher.device().name(),
            "Solver initialized"
        );
        Ok(solver)
    }

    /// Route log records to `sink`.
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    fn initialize(&mut self) -> Result<()> {
        let initial = self.case.initial;
        self.store.fill(Var::Temp, initial.temperature);
        for axis in Axis::ALL {
            let var = Var::velocity(axis);
            let kind = FlagKind::for_location(var.location());
            let (mut out, view) = self.store.split_mut(&[var])?;
            let flags = view.flags(kind);
            for (u, flag) in out[0].iter_mut().zip(flags) {
                *u = if flag.is_fluid() { initial.velocity[axis.index()] } else { 0.0 };
            }
        }

        let ids: Vec<u32> = self.table.owners().iter().map(|o| o.id).collect();
        for id in ids {
            self.write_owner(id)?;
        }
        self.update_racks()?;
        if !self.rack_states.is_empty() {
            self.run(KernelOp::RackBlackBox)?;
        }

        if self.case.solver.turbulence == TurbulenceModel::ChenZeroEquation {
            let g = self.case.geometry;
            let diagonal = (g.lx * g.lx + g.ly * g.ly + g.lz * g.lz).sqrt();
            self.store.fill(Var::WallDistance, diagonal);
            self.run(KernelOp::MinWallDistance)?;
        }
        self.refresh_alpha_t();

        let mut vars = vec![Var::Vx, Var::Vy, Var::Vz, Var::Pressure];
        vars.extend(self.scalars.iter().copied());
        for var in vars {
            self.run(KernelOp::ApplyBoundary { var })?;
        }
        self.dispatcher.barrier()
    }

    fn run(&mut self, op: KernelOp) -> Result<()> {
        let mut args = LaunchArgs {
            store: &mut self.store,
            table: &self.table,
            racks: &self.rack_states,
        };
        self.dispatcher.dispatch(op, &mut args)
    }

    fn copy(&mut self, src: Var, dst: Var) -> Result<()> {
        self.dispatcher.copy(&mut self.store, src, dst)
    }

    fn solve(&mut self, var: Var) -> Result<()> {
        for _ in 0..self.params.sweeps {
            let mut args = LaunchArgs {
                store: &mut self.store,
                table: &self.table,
                racks: &self.rack_states,
            };
            self.dispatcher.sweep(var, &mut args)?;
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.dispatcher.read_back(&self.store).map(|_| ())
    }

    // ===== Time stepping =====

    /// Advance one time step.
    pub fn step(&mut self) -> Result<()> {
        self.correct_geometry()?;
        self.advect()?;
        self.diffuse()?;
        self.project()?;
        self.balance_mass()?;
        self.advance_clock()
    }

    /// Advance `steps` time steps.
    pub fn run_steps(&mut self, steps: u64) -> Result<()> {
        let step_total = self.clock.step + steps;
        while self.clock.step < step_total {
            self.step()?;
        }
        Ok(())
    }

    /// Advance over one coupling interval of length `interval` seconds.
    ///
    /// The step count is fixed up front; there is no early exit. With the
    /// finite guard enabled, velocity and temperature are checked once at
    /// the end.
    pub fn run_interval(&mut self, interval: f64) -> Result<IntervalReport> {
        let steps = steps_for(interval, self.params.dt);
        self.run_steps(steps)?;
        self.sync()?;
        if self.case.solver.finite_guard {
            self.check_finite()?;
        }
        debug!(steps, time = self.clock.time, "Coupling interval complete");
        self.sink.normal(&format!(
            "advanced {} steps to t = {:.3} s",
            steps, self.clock.time
        ));
        Ok(IntervalReport {
            steps,
            time: self.clock.time,
        })
    }

    /// Advance until the clock reaches `t_end`.
    pub fn run_until(&mut self, t_end: f64) -> Result<IntervalReport> {
        self.run_interval((t_end - self.clock.time).max(0.0))
    }

    fn correct_geometry(&mut self) -> Result<()> {
        if self.case.solver.tile_flow_correction && self.table.has_tiles() {
            self.run(KernelOp::TileCorrection)?;
        }
        if !self.rack_states.is_empty() {
            self.update_racks()?;
            self.run(KernelOp::RackBlackBox)?;
        }
        Ok(())
    }

    fn advect(&mut self) -> Result<()> {
        for axis in Axis::ALL {
            let var = Var::velocity(axis);
            self.copy(var, snapshot(var))?;
        }
        for axis in Axis::ALL {
            self.transport(Var::velocity(axis))?;
        }
        for var in self.scalars.clone() {
            self.copy(var, snapshot(var))?;
            self.transport(var)?;
        }
        Ok(())
    }

    fn transport(&mut self, var: Var) -> Result<()> {
        match self.case.solver.advection {
            AdvectionScheme::SemiLagrangian => self.run(KernelOp::AdvectSemiLagrangian { var })?,
            AdvectionScheme::Upwind => {
                self.run(KernelOp::AssembleUpwind { var })?;
                self.run(KernelOp::RecomputeAp { var })?;
                self.solve(var)?;
            }
        }
        self.run(KernelOp::ApplyBoundary { var })
    }

    fn diffuse(&mut self) -> Result<()> {
        if self.case.solver.turbulence == TurbulenceModel::ChenZeroEquation {
            self.run(KernelOp::TurbulentViscosity)?;
            self.run(KernelOp::BroadcastAlphaT { value: self.alpha_t })?;
        }
        let vars: Vec<Var> = Axis::ALL
            .iter()
            .map(|&a| Var::velocity(a))
            .chain(self.scalars.iter().copied())
            .collect();
        for var in vars {
            self.run(KernelOp::AssembleDiffusion { var })?;
            self.run(KernelOp::RecomputeAp { var })?;
            self.solve(var)?;
            self.run(KernelOp::ApplyBoundary { var })?;
        }
        Ok(())
    }

    fn project(&mut self) -> Result<()> {
        self.run(KernelOp::ProjectionSource)?;
        self.solve(Var::Pressure)?;
        self.run(KernelOp::ApplyBoundary { var: Var::Pressure })?;
        for axis in Axis::ALL {
            self.run(KernelOp::ProjectionCorrect { axis })?;
        }
        for axis in Axis::ALL {
            self.run(KernelOp::ApplyBoundary {
                var: Var::velocity(axis),
            })?;
        }
        Ok(())
    }

    fn balance_mass(&mut self) -> Result<()> {
        if !self.case.solver.mass_balance || self.table.outlet_count() == 0 {
            return Ok(());
        }
        let flows = self.volume_flows()?;
        if flows.outlet_area <= 0.0 {
            warn!("Outlets expose no face to the room, skipping mass balance");
            return Ok(());
        }
        let delta = (flows.inflow - flows.outflow) / flows.outlet_area;
        self.run(KernelOp::MassBalance { delta })
    }

    fn advance_clock(&mut self) -> Result<()> {
        self.clock.time += self.params.dt;
        self.clock.step += 1;
        if self.clock.time > self.case.solver.steady_after {
            for var in AVERAGED {
                self.run(KernelOp::AccumulateMean { var })?;
            }
            self.clock.step_mean += 1;
        }
        Ok(())
    }

    fn update_racks(&mut self) -> Result<()> {
        if self.rack_states.is_empty() {
            return Ok(());
        }
        let store = self.dispatcher.read_back(&self.store)?;
        let temp = store.field(Var::Temp);
        let (density, specific_heat) = (self.params.density, self.params.specific_heat);
        for ((state, spec), cells) in self
            .rack_states
            .iter_mut()
            .zip(self.table.racks())
            .zip(&self.rack_inlets)
        {
            let inlet = if cells.is_empty() {
                state.inlet_temperature
            } else {
                cells.iter().map(|&c| temp[c]).sum::<f64>() / cells.len() as f64
            };
            state.update(spec, inlet, density, specific_heat);
        }
        Ok(())
    }

    fn refresh_alpha_t(&mut self) {
        if self.case.solver.turbulence != TurbulenceModel::ChenZeroEquation {
            self.alpha_t = 0.0;
            return;
        }
        let g = self.case.geometry;
        let length = self
            .case
            .solver
            .characteristic_length
            .unwrap_or_else(|| g.lx.min(g.ly).min(g.lz));
        let openings = self
            .table
            .owners()
            .iter()
            .filter(|o| o.rack.is_none())
            .map(|o| o.velocity.iter().map(|v| v * v).sum::<f64>().sqrt());
        let racks = self.rack_states.iter().map(|s| s.face_velocity.abs());
        let u_max = openings.chain(racks).fold(0.0, f64::max);
        self.alpha_t = CHEN_COEFFICIENT * u_max * length;
    }

    fn volume_flows(&mut self) -> Result<VolumeFlows> {
        let store = self.dispatcher.read_back(&self.store)?;
        let g = store.geometry();
        let mut flows = VolumeFlows::default();
        for entry in self.table.entries() {
            let Some(n) = entry.neighbor else { continue };
            let area = g.face_area(n.axis);
            let u = store.field(Var::velocity(n.axis))[n.shared_face(entry.cell)];
            let inward = f64::from(n.sign) * u * area;
            match entry.flag {
                CellFlag::Inlet | CellFlag::Tile => flows.inflow += inward,
                CellFlag::Outlet => {
                    flows.outflow -= inward;
                    flows.outlet_area += area;
                }
                _ => {}
            }
        }
        Ok(flows)
    }

    /// Fail with [`RoomflowError::NonFinite`] if velocity or temperature
    /// holds NaN or infinity.
    pub fn check_finite(&mut self) -> Result<()> {
        self.sync()?;
        for var in [Var::Vx, Var::Vy, Var::Vz, Var::Temp] {
            if self.store.field(var).iter().any(|v| !v.is_finite()) {
                self.sink
                    .error(&format!("non-finite {} after step {}", var.name(), self.clock.step));
                return Err(RoomflowError::NonFinite {
                    field: var.name(),
                    step: self.clock.step,
                });
            }
        }
        Ok(())
    }

    // ===== Driver inputs =====

    fn owner_id(&self, name: &str) -> Result<u32> {
        self.table
            .owner_by_name(name)
            .map(|o| o.id)
            .ok_or_else(|| RoomflowError::config(format!("unknown region '{name}'")))
    }

    /// Rewrite the boundary fields of one owner from its stored values.
    fn write_owner(&mut self, id: u32) -> Result<()> {
        let Some(owner) = self.table.owner(id) else {
            return Err(RoomflowError::config(format!("unknown owner id {id}")));
        };
        let flux = match owner.thermal {
            ThermalKind::FixedHeatFlux => owner.value,
            ThermalKind::FixedTemperature => 0.0,
        };
        let (mut out, _) = self.store.split_mut(&[
            Var::VxBc,
            Var::VyBc,
            Var::VzBc,
            Var::TempBc,
            Var::QfluxBc,
            Var::Xi1Bc,
            Var::Xi2Bc,
            Var::C1Bc,
            Var::C2Bc,
        ])?;
        for entry in self.table.entries_of(id) {
            let c = entry.cell;
            match entry.flag {
                CellFlag::Solid => match entry.thermal {
                    ThermalKind::FixedTemperature => out[3][c] = owner.value,
                    ThermalKind::FixedHeatFlux => out[4][c] = flux,
                },
                CellFlag::Inlet | CellFlag::Tile | CellFlag::Outlet => {
                    for axis in 0..3 {
                        out[axis][c] = owner.velocity[axis];
                    }
                    out[3][c] = owner.temperature;
                    out[5][c] = owner.species[0];
                    out[6][c] = owner.species[1];
                    out[7][c] = owner.trace[0];
                    out[8][c] = owner.trace[1];
                }
                CellFlag::RackInlet | CellFlag::RackOutlet | CellFlag::Fluid => {}
            }
        }
        Ok(())
    }

    /// Apply a driver value to a coupled surface.
    ///
    /// Fixed-temperature surfaces take °C. Fixed-flux surfaces take a heat
    /// flow in W, spread over the area the surface exposes to the room.
    pub fn set_surface(&mut self, name: &str, value: f64) -> Result<()> {
        self.sync()?;
        let id = self.owner_id(name)?;
        if let Some(owner) = self.table.owner_mut(id) {
            owner.value = match owner.thermal {
                ThermalKind::FixedTemperature => value,
                ThermalKind::FixedHeatFlux if owner.exposed_area > 0.0 => value / owner.exposed_area,
                ThermalKind::FixedHeatFlux => 0.0,
            };
        }
        self.write_owner(id)?;
        self.run(KernelOp::ApplyBoundary { var: Var::Temp })
    }

    /// Apply driver conditions to a fluid port.
    ///
    /// Inlets and tiles blow `m / (rho A)` along their inward normal, with
    /// `rho` from `pressure` when it is positive. Outlets keep their
    /// zero-gradient velocity.
    pub fn set_port(&mut self, name: &str, input: &PortInput, pressure: f64) -> Result<()> {
        self.sync()?;
        let id = self.owner_id(name)?;
        let normal = self
            .table
            .entries_of(id)
            .find_map(|e| e.neighbor)
            .map(|n| (n.axis, n.sign));
        let density = if pressure > 0.0 {
            air_density(pressure, input.temperature)
        } else {
            self.params.density
        };
        if let Some(owner) = self.table.owner_mut(id) {
            owner.temperature = input.temperature;
            owner.species = input.species;
            owner.trace = input.trace;
            let is_supply = matches!(owner.object, ObjectType::Inlet | ObjectType::Tile);
            if let (true, Some((axis, sign))) = (is_supply, normal) {
                let area = owner.exposed_area;
                let speed = if area > 0.0 { input.mass_flow / (density * area) } else { 0.0 };
                owner.velocity = [0.0; 3];
                owner.velocity[axis.index()] = f64::from(sign) * speed;
            }
        }
        self.write_owner(id)?;
        self.refresh_alpha_t();
        Ok(())
    }

    /// Spread a sensible heat gain (W) uniformly over the fluid cells.
    pub fn set_heat_source(&mut self, watts: f64) -> Result<()> {
        self.sync()?;
        self.heat_source = watts;
        let flags = self.store.flags(FlagKind::Pressure);
        let fluid = flags.iter().filter(|f| f.is_fluid()).count();
        let volume = fluid as f64 * self.params.cell_volume();
        let rate = if volume > 0.0 {
            watts / (self.params.density * self.params.specific_heat * volume)
        } else {
            0.0
        };
        let (mut out, view) = self.store.split_mut(&[Var::HeatSource])?;
        for (q, flag) in out[0].iter_mut().zip(view.flags(FlagKind::Pressure)) {
            *q = if flag.is_fluid() { rate } else { 0.0 };
        }
        Ok(())
    }

    /// Record the shading state of the `index`-th shaded window.
    pub fn set_shading(&mut self, index: usize, input: ShadeInput) -> Result<()> {
        let count = self.shades.len();
        let slot = self
            .shades
            .get_mut(index)
            .ok_or_else(|| RoomflowError::config(format!("shaded window {index} out of {count}")))?;
        *slot = input;
        Ok(())
    }

    /// Share `total` watts across the racks, keeping supplied powers.
    pub fn set_rack_powers(&mut self, total: f64, supplied: &[Option<f64>]) -> Result<()> {
        if supplied.len() != self.table.racks().len() {
            return Err(RoomflowError::LayoutMismatch {
                what: "rack powers",
                expected: self.table.racks().len(),
                actual: supplied.len(),
            });
        }
        let powers = redistribute_power(total, supplied)?;
        for (rack, power) in self.table.racks_mut().iter_mut().zip(powers) {
            rack.set_power(power);
        }
        self.update_racks()?;
        self.refresh_alpha_t();
        Ok(())
    }

    // ===== Outputs =====

    /// Averaged value of `var` at `cell`, or the instantaneous value when no
    /// steps have been averaged yet.
    fn mean_at(&self, var: Var, cell: usize) -> f64 {
        match var.mean() {
            Some(mean) if self.clock.step_mean > 0 => {
                self.store.field(mean)[cell] / self.clock.step_mean as f64
            }
            _ => self.store.field(var)[cell],
        }
    }

    fn mean_over(&self, var: Var, cells: impl Iterator<Item = usize>) -> Option<f64> {
        let (sum, count) = cells.fold((0.0, 0usize), |(s, n), c| (s + self.mean_at(var, c), n + 1));
        (count > 0).then(|| sum / count as f64)
    }

    /// Driver response for a coupled surface.
    ///
    /// Fixed-temperature surfaces report the convective heat flow into the
    /// room (W). Fixed-flux surfaces report their mean temperature (°C).
    pub fn surface_response(&mut self, name: &str) -> Result<f64> {
        self.sync()?;
        let id = self.owner_id(name)?;
        let thermal = self.table.owner(id).map(|o| o.thermal);
        let g = *self.store.geometry();
        let fluid = self.store.flags(FlagKind::Pressure);
        match thermal {
            Some(ThermalKind::FixedTemperature) => {
                let alpha_t = self.store.field(Var::AlphaT);
                let mut heat = 0.0;
                for entry in self.table.entries_of(id) {
                    let Some(n) = entry.neighbor else { continue };
                    if !fluid[n.cell].is_fluid() || n.distance <= 0.0 {
                        continue;
                    }
                    let k = self.params.density
                        * self.params.specific_heat
                        * (self.params.thermal_diffusivity + alpha_t[n.cell]);
                    let dt = self.mean_at(Var::Temp, entry.cell) - self.mean_at(Var::Temp, n.cell);
                    heat += k * dt / n.distance * g.face_area(n.axis);
                }
                Ok(heat)
            }
            _ => Ok(self
                .mean_over(Var::Temp, self.table.entries_of(id).map(|e| e.cell))
                .unwrap_or(self.case.initial.temperature)),
        }
    }

    /// Volume-mean room temperature (°C).
    pub fn room_mean_temperature(&mut self) -> Result<f64> {
        self.sync()?;
        let fluid = self.store.flags(FlagKind::Pressure);
        Ok(self
            .mean_over(Var::Temp, (0..fluid.len()).filter(|&c| fluid[c].is_fluid()))
            .unwrap_or(self.case.initial.temperature))
    }

    /// Temperature of the `index`-th shade (°C).
    pub fn shade_temperature(&mut self, index: usize) -> Result<f64> {
        let name = self
            .case
            .coupling
            .shaded_windows
            .get(index)
            .cloned()
            .ok_or_else(|| RoomflowError::config(format!("no shaded window {index}")))?;
        self.sync()?;
        let id = self.owner_id(&name)?;
        let surface = self
            .mean_over(Var::Temp, self.table.entries_of(id).map(|e| e.cell))
            .unwrap_or(self.case.initial.temperature);
        let area = self.table.owner(id).map_or(0.0, |o| o.exposed_area);
        let absorbed = self.shades.get(index).map_or(0.0, |s| s.absorbed);
        let rise = if area > 0.0 {
            absorbed / (SHADE_FILM_COEFFICIENT * area)
        } else {
            0.0
        };
        Ok(surface + rise)
    }

    /// Mean state over a port's boundary cells.
    pub fn port_mean(&mut self, name: &str) -> Result<PortMean> {
        self.sync()?;
        let id = self.owner_id(name)?;
        let cells: Vec<usize> = self
            .table
            .entries_of(id)
            .filter(|e| e.neighbor.is_some())
            .map(|e| e.cell)
            .collect();
        let mean = |var| self.mean_over(var, cells.iter().copied()).unwrap_or(0.0);
        Ok(PortMean {
            temperature: mean(Var::Temp),
            species: [mean(Var::Xi1), mean(Var::Xi2)],
            trace: [mean(Var::C1), mean(Var::C2)],
        })
    }

    fn rack_inlet_max(&self) -> Option<f64> {
        self.rack_inlets
            .iter()
            .filter_map(|cells| self.mean_over(Var::Temp, cells.iter().copied()))
            .reduce(f64::max)
    }

    /// Sensor readings in configuration order: temperatures in °C, speeds in
    /// m/s.
    pub fn sensor_values(&mut self) -> Result<Vec<f64>> {
        self.sync()?;
        let g = *self.store.geometry();
        let mut values = Vec::with_capacity(self.case.sensors.len());
        for sensor in &self.case.sensors {
            let (i, j, k) = g.nearest_cell(sensor.position);
            let cell = g.ix(i, j, k);
            let value = match sensor.kind {
                SensorKind::Temperature => self.mean_at(Var::Temp, cell),
                SensorKind::Speed => Axis::ALL
                    .iter()
                    .map(|&axis| {
                        let var = Var::velocity(axis);
                        let below = cell - g.stride(axis);
                        0.5 * (self.mean_at(var, cell) + self.mean_at(var, below))
                    })
                    .map(|u| u * u)
                    .sum::<f64>()
                    .sqrt(),
                SensorKind::RackInletMax => self.rack_inlet_max().unwrap_or(self.case.initial.temperature),
            };
            values.push(value);
        }
        Ok(values)
    }

    /// Mass flow through inlets, tiles and outlets.
    pub fn mass_flows(&mut self) -> Result<MassFlows> {
        let flows = self.volume_flows()?;
        Ok(MassFlows {
            inflow: self.params.density * flows.inflow,
            outflow: self.params.density * flows.outflow,
        })
    }

    // ===== Accessors =====

    /// A field after a barrier.
    pub fn field(&mut self, var: Var) -> Result<&[f64]> {
        Ok(self.dispatcher.read_back(&self.store)?.field(var))
    }

    /// Case being solved.
    pub fn case(&self) -> &CaseConfig {
        &self.case
    }

    /// Uploaded parameter block.
    pub fn params(&self) -> &SolverParams {
        &self.params
    }

    /// Boundary table.
    pub fn table(&self) -> &BoundaryIndexTable {
        &self.table
    }

    /// Racks with their current power and flow.
    pub fn racks(&self) -> &[RackSpec] {
        self.table.racks()
    }

    /// Black-box state per rack.
    pub fn rack_states(&self) -> &[RackState] {
        &self.rack_states
    }

    /// Transported scalars.
    pub fn scalars(&self) -> &[Var] {
        &self.scalars
    }

    /// Uniform turbulent diffusivity currently broadcast.
    pub fn alpha_t(&self) -> f64 {
        self.alpha_t
    }

    /// Last sensible heat input (W).
    pub fn heat_source(&self) -> f64 {
        self.heat_source
    }

    /// Recorded shading inputs.
    pub fn shades(&self) -> &[ShadeInput] {
        &self.shades
    }

    /// Clock.
    pub fn clock(&self) -> SolverClock {
        self.clock
    }

    /// Simulated time (s).
    pub fn time(&self) -> f64 {
        self.clock.time
    }

    /// Dispatch counters.
    pub fn dispatch_stats(&self) -> &DispatchStats {
        self.dispatcher.stats()
    }

    /// Log sink.
    pub fn log_sink(&self) -> &Arc<dyn LogSink> {
        &self.sink
    }
}

impl<D: ComputeDevice> fmt::Debug for FfdSolver<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FfdSolver")
            .field("case", &self.case.name)
            .field("device", &self.dispatcher.device().name())
            .field("clock", &self.clock)
            .field("boundary_cells", &self.table.len())
            .finish()
    }
}

/// Steps needed to cover `interval` at `dt`, tolerating round-off in the
/// quotient.
pub fn steps_for(interval: f64, dt: f64) -> u64 {
    if !(interval > 0.0) || !(dt > 0.0) {
        return 0;
    }
    let exact = interval / dt;
    let rounded = exact.round();
    if (exact - rounded).abs() < 1e-9 * rounded.max(1.0) {
        rounded as u64
    } else {
        exact.ceil() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FluidProperties, RegionConfig, RegionKind, SolverConfig};
    use crate::grid::GridGeometry;
    use roomflow_core::{MemorySink, Severity};

    fn ventilated(mass_balance: bool) -> FfdSolver {
        let mut case = CaseConfig::ventilated_box(6);
        case.solver = SolverConfig::default()
            .with_dt(0.1)
            .with_sweeps(10)
            .with_mass_balance(mass_balance)
            .with_parallel(false);
        FfdSolver::new(case).unwrap()
    }

    #[test]
    fn test_steps_for_interval() {
        assert_eq!(steps_for(1.0, 0.1), 10);
        assert_eq!(steps_for(0.3, 0.1), 3);
        assert_eq!(steps_for(0.25, 0.1), 3);
        assert_eq!(steps_for(0.0, 0.1), 0);
        assert_eq!(steps_for(1.0, 0.0), 0);
    }

    #[test]
    fn test_interval_advances_clock() {
        let mut solver = ventilated(true);
        let report = solver.run_interval(0.5).unwrap();
        assert_eq!(report.steps, 5);
        assert!((report.time - 0.5).abs() < 1e-12);
        assert_eq!(solver.clock().step, 5);
        assert_eq!(solver.clock().step_mean, 5);
        assert!(solver.dispatch_stats().barriers > 0);
    }

    #[test]
    fn test_mass_balance_matches_outflow() {
        let mut solver = ventilated(true);
        solver.run_steps(3).unwrap();
        let flows = solver.mass_flows().unwrap();
        assert!(flows.inflow > 0.0);
        assert!(flows.imbalance().abs() < 1e-9 * flows.inflow, "{flows:?}");
    }

    #[test]
    fn test_fields_stay_finite() {
        let mut solver = ventilated(true);
        solver.run_steps(5).unwrap();
        solver.check_finite().unwrap();
        let t = solver.room_mean_temperature().unwrap();
        assert!((t - 20.0).abs() < 1e-6, "{t}");
    }

    #[test]
    fn test_steady_threshold_delays_averaging() {
        let mut case = CaseConfig::ventilated_box(4);
        case.solver = SolverConfig::default()
            .with_steady_after(0.25)
            .with_sweeps(4)
            .with_parallel(false);
        let mut solver = FfdSolver::new(case).unwrap();
        solver.run_steps(4).unwrap();
        // t = 0.3 and 0.4 exceed the threshold
        assert_eq!(solver.clock().step_mean, 2);
    }

    #[test]
    fn test_heat_source_warms_room() {
        let mut case = CaseConfig::new(GridGeometry::new(4, 4, 4, 1.0, 1.0, 1.0).unwrap());
        case.solver = SolverConfig::default()
            .with_sweeps(5)
            .with_turbulence(TurbulenceModel::Laminar)
            .with_parallel(false);
        let mut solver = FfdSolver::new(case).unwrap();
        // 1205 W into 1 m³ of air warms it by about 1 K/s
        solver.set_heat_source(1205.0 * 1.006).unwrap();
        solver.run_steps(10).unwrap();
        let t = solver.room_mean_temperature().unwrap();
        assert!(t > 20.4 && t < 21.1, "{t}");
    }

    #[test]
    fn test_fixed_temperature_surface_reports_heat_flow() {
        let mut case = CaseConfig::new(GridGeometry::new(4, 4, 4, 1.0, 1.0, 1.0).unwrap());
        case.solver = SolverConfig::default()
            .with_sweeps(5)
            .with_turbulence(TurbulenceModel::Laminar)
            .with_parallel(false);
        case.regions.push(
            RegionConfig::new("window", RegionKind::Wall, [0, 1, 1], [0, 4, 4])
                .with_thermal(ThermalKind::FixedTemperature, 30.0),
        );
        case.coupling.surfaces = vec!["window".to_string()];
        let mut solver = FfdSolver::new(case).unwrap();
        // Wall 10 K above the room: k * 10 / 0.125 over 1 m²
        let q = solver.surface_response("window").unwrap();
        let k = FluidProperties::air().conductivity(0.0);
        assert!((q - k * 10.0 / 0.125).abs() < 1e-9, "{q}");

        solver.set_surface("window", 20.0).unwrap();
        assert!(solver.surface_response("window").unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_flux_surface_reports_temperature() {
        let mut case = CaseConfig::new(GridGeometry::new(4, 4, 4, 1.0, 1.0, 1.0).unwrap());
        case.solver = SolverConfig::default().with_turbulence(TurbulenceModel::Laminar);
        case.regions.push(
            RegionConfig::new("floor", RegionKind::Wall, [1, 1, 0], [4, 4, 0])
                .with_thermal(ThermalKind::FixedHeatFlux, 0.0),
        );
        let mut solver = FfdSolver::new(case).unwrap();
        // Adiabatic floor mirrors the room
        assert!((solver.surface_response("floor").unwrap() - 20.0).abs() < 1e-12);
        // 10 W over 1 m²
        solver.set_surface("floor", 10.0).unwrap();
        let owner = solver.table().owner_by_name("floor").unwrap();
        assert!((owner.value - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_port_mass_flow_sets_inlet_velocity() {
        let mut solver = ventilated(false);
        let input = PortInput {
            mass_flow: 0.1205 / 9.0,
            temperature: 18.0,
            ..Default::default()
        };
        // Supply covers 2 x 2 cells of 1/6 m: A = 1/9 m²
        solver.set_port("supply", &input, 0.0).unwrap();
        let owner = solver.table().owner_by_name("supply").unwrap();
        let expected = input.mass_flow / (solver.params().density * owner.exposed_area);
        assert!((owner.velocity[0] - expected).abs() < 1e-12);
        assert_eq!(owner.temperature, 18.0);
    }

    #[test]
    fn test_outlet_port_ignores_mass_flow() {
        let mut solver = ventilated(false);
        let input = PortInput {
            mass_flow: 5.0,
            temperature: 25.0,
            ..Default::default()
        };
        solver.set_port("exhaust", &input, 101_325.0).unwrap();
        assert_eq!(solver.table().owner_by_name("exhaust").unwrap().velocity, [0.0; 3]);
    }

    #[test]
    fn test_server_room_racks_heat_air() {
        let mut case = CaseConfig::server_room();
        case.solver = case.solver.with_sweeps(5).with_parallel(false);
        let mut solver = FfdSolver::new(case).unwrap();
        assert_eq!(solver.racks().len(), 2);
        let total: f64 = solver.racks().iter().map(|r| r.power).sum();
        assert_eq!(total, 6000.0);
        solver.run_steps(2).unwrap();
        for state in solver.rack_states() {
            assert!(state.outlet_temperature > state.inlet_temperature);
            assert!(state.face_area > 0.0);
        }
        let sensors = solver.sensor_values().unwrap();
        assert_eq!(sensors.len(), 2);
        assert!(sensors.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_rack_power_override_layout() {
        let mut solver = FfdSolver::new(CaseConfig::server_room()).unwrap();
        assert!(matches!(
            solver.set_rack_powers(1000.0, &[None]),
            Err(RoomflowError::LayoutMismatch { .. })
        ));
        solver.set_rack_powers(1000.0, &[Some(400.0), None]).unwrap();
        assert_eq!(solver.racks()[1].power, 600.0);
    }

    #[test]
    fn test_shade_rise() {
        let mut case = CaseConfig::new(GridGeometry::new(4, 4, 4, 1.0, 1.0, 1.0).unwrap());
        case.regions.push(
            RegionConfig::new("glass", RegionKind::Wall, [0, 1, 1], [0, 4, 4])
                .with_thermal(ThermalKind::FixedHeatFlux, 0.0),
        );
        case.coupling.surfaces = vec!["glass".to_string()];
        case.coupling.shaded_windows = vec!["glass".to_string()];
        let mut solver = FfdSolver::new(case).unwrap();
        solver
            .set_shading(0, ShadeInput { control: 1.0, absorbed: 16.0 })
            .unwrap();
        let t = solver.shade_temperature(0).unwrap();
        assert!((t - (20.0 + 16.0 / SHADE_FILM_COEFFICIENT)).abs() < 1e-9, "{t}");
        assert!(solver.set_shading(1, ShadeInput::default()).is_err());
    }

    #[test]
    fn test_finite_guard_reports_field() {
        let mut solver = ventilated(false);
        solver.store.field_mut(Var::Temp)[0] = f64::NAN;
        let sink = Arc::new(MemorySink::new(16));
        let mut solver = solver.with_log_sink(sink.clone());
        let err = solver.check_finite().unwrap_err();
        assert_eq!(err, RoomflowError::NonFinite { field: "temp", step: 0 });
        assert_eq!(sink.at_least(Severity::Error).len(), 1);
    }
}
