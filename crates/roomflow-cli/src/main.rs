//! Roomflow CLI - validate case files and run them against a synthetic
//! building-simulation driver.
//!
//! # Commands
//!
//! - `roomflow check <case>` - Parse and validate a case file
//! - `roomflow run <case>` - Run a case stand-alone or through the coupling
//! - `roomflow preset <name>` - Write a preset case as TOML
//!
//! # Examples
//!
//! ```bash
//! # Write the ventilated box preset and validate it
//! roomflow preset ventilated-box --size 12 --output box.toml
//! roomflow check box.toml --detailed
//!
//! # Ten coupling intervals of 60 s with a 293.15 K supply
//! roomflow run box.toml --intervals 10 --interval 60 --coupled
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

mod commands;
mod error;

use commands::{check, preset, run};

/// Roomflow - coupled room airflow simulation
#[derive(Parser)]
#[command(name = "roomflow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a case file
    Check {
        /// Case file (TOML)
        case: PathBuf,

        /// Print the boundary table summary per region
        #[arg(long)]
        detailed: bool,
    },

    /// Run a case against a synthetic driver
    Run {
        /// Case file (TOML)
        case: PathBuf,

        /// Number of coupling intervals
        #[arg(short = 'n', long, default_value = "10")]
        intervals: u32,

        /// Coupling interval length (s)
        #[arg(short, long, default_value = "60.0")]
        interval: f64,

        /// Supply temperature sent to every port (K)
        #[arg(long, default_value = "293.15")]
        supply: f64,

        /// Mass flow sent to every port (kg/s)
        #[arg(long, default_value = "0.05")]
        mass_flow: f64,

        /// Drive the engine thread through the coupling handshake
        #[arg(long)]
        coupled: bool,
    },

    /// Write a preset case as TOML
    Preset {
        /// Preset name (ventilated-box, server-room)
        name: String,

        /// Cells per side for the ventilated box
        #[arg(short, long, default_value = "10")]
        size: usize,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Check { case, detailed } => check::execute(&case, detailed),

        Commands::Run {
            case,
            intervals,
            interval,
            supply,
            mass_flow,
            coupled,
        } => run::execute(
            &case,
            &run::RunOptions {
                intervals,
                interval,
                supply,
                mass_flow,
                coupled,
            },
        ),

        Commands::Preset { name, size, output } => preset::execute(&name, size, output.as_deref()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::from(e.exit_code())
        }
    }
}
