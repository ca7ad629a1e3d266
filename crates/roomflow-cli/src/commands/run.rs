//! `roomflow run` command - Run a case against a synthetic driver.
//!
//! Stand-alone runs advance the solver directly with the case's own
//! boundary values. Coupled runs start the engine thread and exchange a
//! constant input vector once per interval, the way a building simulation
//! would.

use std::path::Path;
use std::time::Instant;

use colored::Colorize;
use roomflow::core::units::celsius_to_kelvin;
use roomflow::cosim::ExchangeLayout;
use roomflow::ffd::boundary::ThermalKind;
use roomflow::{CaseConfig, CouplingSession, FfdSolver};
use tracing::info;

use crate::error::{CliError, CliResult};

use super::load_case;

/// Options for a run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Number of coupling intervals.
    pub intervals: u32,
    /// Interval length (s).
    pub interval: f64,
    /// Port supply temperature (K).
    pub supply: f64,
    /// Mass flow sent to every port (kg/s).
    pub mass_flow: f64,
    /// Go through the coupling handshake.
    pub coupled: bool,
}

/// Execute the `run` command.
pub fn execute(path: &Path, options: &RunOptions) -> CliResult<()> {
    if !(options.interval.is_finite() && options.interval > 0.0) {
        return Err(CliError::InvalidArgument(format!(
            "interval must be positive, got {}",
            options.interval
        )));
    }
    let case = load_case(path)?;
    println!(
        "{} Running {} for {} interval(s) of {} s ({})",
        "→".bright_cyan(),
        case.name.bright_white(),
        options.intervals,
        options.interval,
        if options.coupled { "coupled" } else { "stand-alone" }
    );

    let started = Instant::now();
    if options.coupled {
        run_coupled(case, options)?;
    } else {
        run_standalone(case, options)?;
    }
    println!(
        "{} Finished in {:.2} s",
        "✓".bright_green(),
        started.elapsed().as_secs_f64()
    );
    Ok(())
}

fn run_standalone(case: CaseConfig, options: &RunOptions) -> CliResult<()> {
    let mut solver = FfdSolver::new(case)?;
    for interval in 1..=options.intervals {
        let report = solver.run_interval(options.interval)?;
        let room = solver.room_mean_temperature()?;
        let flows = solver.mass_flows()?;
        info!(
            interval,
            time = report.time,
            steps = report.steps,
            room = room,
            inflow = flows.inflow,
            outflow = flows.outflow,
            "Interval complete"
        );
    }

    let room = solver.room_mean_temperature()?;
    let sensors = solver.sensor_values()?;
    let stats = solver.dispatch_stats();
    println!();
    println!("{}:", "Result".bright_white().underline());
    println!("  Room mean: {:.3} °C", room);
    println!("  Steps: {}", solver.clock().step);
    println!(
        "  Dispatches: {} ({} segments, {} barriers)",
        stats.dispatches, stats.segments, stats.barriers
    );
    for (sensor, value) in solver.case().sensors.iter().zip(sensors) {
        println!("  {}: {:.3}", sensor.name.bright_white(), value);
    }
    Ok(())
}

/// Input vector a constant driver sends every interval.
///
/// Fixed-temperature surfaces stay at their configured temperature, flux
/// surfaces are adiabatic, every port gets the same mass flow and supply
/// temperature.
pub fn driver_inputs(case: &CaseConfig, layout: &ExchangeLayout, options: &RunOptions) -> Vec<f64> {
    let mut u = Vec::with_capacity(layout.n_inputs());
    for name in &case.coupling.surfaces {
        let region = case.regions.iter().find(|r| &r.name == name);
        let value = match region {
            Some(r) if r.thermal == Some(ThermalKind::FixedTemperature) => celsius_to_kelvin(r.value),
            _ => 0.0,
        };
        u.push(value);
    }
    // shade control and absorbed radiation
    u.extend(std::iter::repeat(0.0).take(2 * layout.shades));
    // sensible, latent, pressure
    u.extend([0.0, 0.0, 0.0]);
    u.extend(std::iter::repeat(options.mass_flow).take(layout.ports));
    u.extend(std::iter::repeat(options.supply).take(layout.ports));
    u.resize(layout.n_inputs(), 0.0);
    u
}

fn run_coupled(case: CaseConfig, options: &RunOptions) -> CliResult<()> {
    let layout = ExchangeLayout::from_case(&case);
    let u = driver_inputs(&case, &layout, options);
    let mut session = CouplingSession::init(case)?;

    let mut time = 0.0;
    let mut last = Vec::new();
    for interval in 1..=options.intervals {
        let (t_next, y) = session.exchange(time, options.interval, &u, layout.n_outputs())?;
        info!(interval, time = t_next, room = y[layout.surfaces], "Exchange complete");
        time = t_next;
        last = y;
    }

    let stats = session.stats();
    let report = session.shutdown();
    println!();
    println!("{}:", "Result".bright_white().underline());
    if let Some(room) = last.get(layout.surfaces) {
        println!("  Room mean: {:.3} K", room);
    }
    println!("  Engine time: {:.1} s", stats.engine_time);
    println!("  Exchanges: {}", stats.exchanges);
    println!(
        "  Handshake: {} in / {} out, {} violation(s)",
        stats.handshake.inputs_raised, stats.handshake.outputs_raised, stats.handshake.violations
    );
    report.into_result()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> RunOptions {
        RunOptions {
            intervals: 2,
            interval: 0.2,
            supply: 293.15,
            mass_flow: 0.01,
            coupled: false,
        }
    }

    #[test]
    fn test_driver_inputs_layout() {
        let case = CaseConfig::server_room();
        let layout = ExchangeLayout::from_case(&case);
        let u = driver_inputs(&case, &layout, &options());
        assert_eq!(u.len(), layout.n_inputs());
        // ceiling held at 24 °C
        assert!((u[0] - 297.15).abs() < 1e-9);
        assert_eq!(&u[1..4], &[0.0, 0.0, 0.0]);
        assert_eq!(&u[4..6], &[0.01, 0.01]);
        assert_eq!(&u[6..8], &[293.15, 293.15]);
    }

    #[test]
    fn test_standalone_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("box.toml");
        std::fs::write(&path, CaseConfig::ventilated_box(4).to_toml().unwrap()).unwrap();
        execute(&path, &options()).unwrap();
    }

    #[test]
    fn test_rejects_bad_interval() {
        let mut opts = options();
        opts.interval = 0.0;
        let err = execute(Path::new("unused.toml"), &opts).unwrap_err();
        assert!(matches!(err, CliError::InvalidArgument(_)));
    }
}
