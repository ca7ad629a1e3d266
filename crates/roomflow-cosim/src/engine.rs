//! Engine side of the coupling.
//!
//! The engine thread runs [`run_engine`]: wait for input or stop, copy the
//! input out, clear the flag, advance the room, publish the output. A
//! [`CouplingEngine`] does the work for one interval; [`FfdEngine`] is the
//! solver-backed one.

use std::sync::Arc;

use tracing::{debug, error, info};

use roomflow_core::units::{celsius_to_kelvin, kelvin_to_celsius};
use roomflow_core::{ControlFlags, LogSink, Result, RetryPolicy, RoomflowError, Slot};
use roomflow_ffd::boundary::ThermalKind;
use roomflow_ffd::config::CaseConfig;
use roomflow_ffd::solver::{FfdSolver, PortInput};

use crate::channel::{Channel, ChannelSink, DriverInput};
use crate::layout::{ExchangeLayout, RoomInputs, RoomOutputs};

/// One coupling interval's worth of engine work.
pub trait CouplingEngine: Send + 'static {
    /// Apply `input`, advance to `input.time + input.dt` and write the
    /// outputs into `y`. Returns the engine time reached.
    fn interval(&mut self, input: &DriverInput, y: &mut [f64]) -> Result<f64>;
}

/// Solver-backed engine.
pub struct FfdEngine {
    solver: FfdSolver,
    layout: ExchangeLayout,
    surfaces: Vec<(String, ThermalKind)>,
    ports: Vec<String>,
}

impl FfdEngine {
    /// Build the solver for `case`.
    pub fn new(case: CaseConfig) -> Result<Self> {
        let layout = ExchangeLayout::from_case(&case);
        let solver = FfdSolver::new(case)?;
        let surfaces = solver
            .case()
            .coupling
            .surfaces
            .iter()
            .map(|name| {
                solver
                    .table()
                    .owner_by_name(name)
                    .map(|o| (name.clone(), o.thermal))
                    .ok_or_else(|| RoomflowError::config(format!("unknown surface '{name}'")))
            })
            .collect::<Result<Vec<_>>>()?;
        let ports = solver.case().coupling.ports.clone();
        Ok(Self {
            solver,
            layout,
            surfaces,
            ports,
        })
    }

    /// Route solver log records to `sink`.
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.solver = self.solver.with_log_sink(sink);
        self
    }

    /// Layout this engine encodes and decodes.
    pub fn layout(&self) -> &ExchangeLayout {
        &self.layout
    }

    /// The solver.
    pub fn solver(&mut self) -> &mut FfdSolver {
        &mut self.solver
    }

    /// Translate driver inputs and hand them to the solver.
    pub fn apply(&mut self, inputs: &RoomInputs) -> Result<()> {
        for ((name, thermal), &value) in self.surfaces.iter().zip(&inputs.surfaces) {
            let value = match thermal {
                ThermalKind::FixedTemperature => kelvin_to_celsius(value),
                ThermalKind::FixedHeatFlux => value,
            };
            self.solver.set_surface(name, value)?;
        }
        for (index, shade) in inputs.shades.iter().enumerate() {
            self.solver.set_shading(index, *shade)?;
        }
        self.solver.set_heat_source(inputs.sensible_heat)?;
        for (name, port) in self.ports.iter().zip(&inputs.ports) {
            let input = PortInput {
                mass_flow: port.mass_flow,
                temperature: kelvin_to_celsius(port.temperature),
                species: port.species,
                trace: port.trace,
            };
            self.solver.set_port(name, &input, inputs.pressure)?;
        }
        Ok(())
    }

    /// Collect outputs from the solver in driver units.
    pub fn collect(&mut self) -> Result<RoomOutputs> {
        let mut out = RoomOutputs::default();
        for (name, thermal) in &self.surfaces {
            let response = self.solver.surface_response(name)?;
            out.surfaces.push(match thermal {
                ThermalKind::FixedTemperature => response,
                ThermalKind::FixedHeatFlux => celsius_to_kelvin(response),
            });
        }
        out.room_temperature = celsius_to_kelvin(self.solver.room_mean_temperature()?);
        for index in 0..self.layout.shades {
            out.shades.push(celsius_to_kelvin(self.solver.shade_temperature(index)?));
        }
        for name in &self.ports {
            let mean = self.solver.port_mean(name)?;
            out.port_temperatures.push(celsius_to_kelvin(mean.temperature));
            out.port_species.push(mean.species);
            out.port_trace.push(mean.trace);
        }
        let readings = self.solver.sensor_values()?;
        for (sensor, value) in self.solver.case().sensors.iter().zip(readings) {
            out.sensors.push(if sensor.kind.is_temperature() {
                celsius_to_kelvin(value)
            } else {
                value
            });
        }
        Ok(out)
    }
}

impl CouplingEngine for FfdEngine {
    fn interval(&mut self, input: &DriverInput, y: &mut [f64]) -> Result<f64> {
        let inputs = self.layout.decode_inputs(&input.values)?;
        self.apply(&inputs)?;
        let report = self.solver.run_until(input.time + input.dt)?;
        let outputs = self.collect()?;
        self.layout.encode_outputs(&outputs, y)?;
        Ok(report.time)
    }
}

/// How the engine loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineExit {
    /// Stop was requested.
    Stopped {
        /// Intervals completed.
        intervals: u64,
    },
    /// An interval failed; the error flag is raised.
    Failed(RoomflowError),
}

enum Wake {
    Input,
    Stop,
}

fn wait_for(flags: &ControlFlags, policy: &RetryPolicy, ready: impl Fn(&ControlFlags) -> bool) -> Result<Wake> {
    let outcome = flags.poll(policy, |f| {
        f.check_peer()?;
        if f.stop_requested() {
            return Ok(Some(Wake::Stop));
        }
        Ok(ready(f).then_some(Wake::Input))
    })?;
    // Unbounded policies never run out
    outcome.map_err(|attempts| RoomflowError::ShutdownTimeout { attempts })
}

fn serve<E: CouplingEngine>(engine: &mut E, channel: &Channel, policy: &RetryPolicy, intervals: &mut u64) -> Result<()> {
    let flags = channel.flags();
    let mut y = vec![0.0; channel.layout().n_outputs()];
    loop {
        if let Wake::Stop = wait_for(flags, policy, |f| f.is_ready(Slot::Input))? {
            return Ok(());
        }
        let input = channel.read_input();
        flags.clear(Slot::Input)?;

        let time = engine.interval(&input, &mut y)?;

        if let Wake::Stop = wait_for(flags, policy, |f| !f.is_ready(Slot::Output))? {
            return Ok(());
        }
        channel.write_output(time, &y)?;
        flags.raise(Slot::Output)?;
        *intervals += 1;
        debug!(interval = *intervals, time, "Published engine outputs");
    }
}

/// Engine thread body. Always acknowledges the stop before returning.
pub fn run_engine<E: CouplingEngine>(mut engine: E, channel: Arc<Channel>, policy: RetryPolicy) -> EngineExit {
    let mut intervals = 0;
    let exit = match serve(&mut engine, &channel, &policy, &mut intervals) {
        Ok(()) => {
            info!(intervals, "Engine stopped");
            EngineExit::Stopped { intervals }
        }
        Err(e) => {
            error!(error = %e, intervals, "Engine failed");
            channel.flags().raise_error(e.to_string());
            EngineExit::Failed(e)
        }
    };
    channel.flags().acknowledge_stop();
    exit
}

/// Solver-backed engine whose error records reach the driver.
pub fn ffd_engine(case: CaseConfig, channel: &Arc<Channel>) -> Result<FfdEngine> {
    let sink: Arc<dyn LogSink> = Arc::new(ChannelSink::new(Arc::clone(channel)));
    Ok(FfdEngine::new(case)?.with_log_sink(sink))
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomflow_ffd::config::SolverConfig;

    fn small_box() -> CaseConfig {
        let mut case = CaseConfig::ventilated_box(4);
        case.solver = SolverConfig::default().with_sweeps(4).with_parallel(false);
        case
    }

    #[test]
    fn test_apply_converts_kelvin() {
        let mut engine = FfdEngine::new(small_box()).unwrap();
        let layout = engine.layout().clone();
        let mut u = vec![0.0; layout.n_inputs()];
        // sensible, latent, p
        u[2] = 101_325.0;
        // supply and exhaust mass flow, then temperatures
        u[3] = 0.05;
        u[5] = 291.15;
        u[6] = 300.0;
        let inputs = layout.decode_inputs(&u).unwrap();
        engine.apply(&inputs).unwrap();
        let supply = engine.solver().table().owner_by_name("supply").unwrap().clone();
        assert!((supply.temperature - 18.0).abs() < 1e-9);
        assert!(supply.velocity[0] > 0.0);
    }

    #[test]
    fn test_interval_reports_kelvin() {
        let mut engine = FfdEngine::new(small_box()).unwrap();
        let layout = engine.layout().clone();
        let mut u = vec![0.0; layout.n_inputs()];
        u[3] = 0.02;
        u[5] = 293.15;
        u[6] = 293.15;
        let input = DriverInput { time: 0.0, dt: 0.3, values: u };
        let mut y = vec![0.0; layout.n_outputs()];
        let t = engine.interval(&input, &mut y).unwrap();
        assert!((t - 0.3).abs() < 1e-9);
        // room, supply, exhaust
        for v in &y {
            assert!((v - 293.15).abs() < 0.5, "{y:?}");
        }
    }

    #[test]
    fn test_engine_exits_on_stop() {
        let layout = ExchangeLayout::from_case(&small_box());
        let channel = Arc::new(Channel::new(layout).unwrap());
        channel.flags().request_stop();
        let engine = FfdEngine::new(small_box()).unwrap();
        let exit = run_engine(engine, Arc::clone(&channel), RetryPolicy::unbounded());
        assert_eq!(exit, EngineExit::Stopped { intervals: 0 });
        assert!(channel.flags().stop_acknowledged());
    }

    #[test]
    fn test_engine_failure_raises_flag() {
        struct Failing;
        impl CouplingEngine for Failing {
            fn interval(&mut self, _: &DriverInput, _: &mut [f64]) -> Result<f64> {
                Err(RoomflowError::NonFinite { field: "temp", step: 12 })
            }
        }
        let layout = ExchangeLayout::from_case(&small_box());
        let n = layout.n_inputs();
        let channel = Arc::new(Channel::new(layout).unwrap());
        channel.write_input(0.0, 1.0, &vec![0.0; n]).unwrap();
        channel.flags().raise(Slot::Input).unwrap();

        let exit = run_engine(Failing, Arc::clone(&channel), RetryPolicy::unbounded());
        assert!(matches!(exit, EngineExit::Failed(RoomflowError::NonFinite { .. })));
        let message = channel.flags().error().unwrap();
        assert!(message.contains("non-finite"), "{message}");
        // Input was consumed before the failure
        assert!(!channel.flags().is_ready(Slot::Input));
    }

    /// A fault raised by the driver ends a waiting engine.
    #[test]
    fn test_engine_exits_on_peer_fault() {
        struct Idle;
        impl CouplingEngine for Idle {
            fn interval(&mut self, _: &DriverInput, _: &mut [f64]) -> Result<f64> {
                unreachable!("no input is posted")
            }
        }
        let channel = Arc::new(Channel::new(ExchangeLayout::from_case(&small_box())).unwrap());
        let engine_channel = Arc::clone(&channel);
        let handle = std::thread::spawn(move || run_engine(Idle, engine_channel, RetryPolicy::unbounded()));

        std::thread::sleep(std::time::Duration::from_millis(20));
        channel.flags().raise_error("driver fault");

        let exit = handle.join().unwrap();
        assert!(
            matches!(exit, EngineExit::Failed(RoomflowError::PeerFault(ref m)) if m == "driver fault"),
            "{exit:?}"
        );
        assert!(channel.flags().stop_acknowledged());
        assert_eq!(channel.flags().error().as_deref(), Some("driver fault"));
    }
}
