//! `roomflow check` command - Parse and validate a case file.

use std::path::Path;

use colored::Colorize;
use roomflow::cosim::ExchangeLayout;
use roomflow::ffd::grid::CellFlag;
use roomflow::ffd::BoundaryIndexTable;

use crate::error::CliResult;

use super::load_case;

const FLAGS: [(CellFlag, &str); 6] = [
    (CellFlag::Solid, "solid"),
    (CellFlag::Inlet, "inlet"),
    (CellFlag::Outlet, "outlet"),
    (CellFlag::Tile, "tile"),
    (CellFlag::RackInlet, "rack inlet"),
    (CellFlag::RackOutlet, "rack outlet"),
];

/// Execute the `check` command.
pub fn execute(path: &Path, detailed: bool) -> CliResult<()> {
    println!("{} Checking case {}", "→".bright_cyan(), path.display().to_string().bright_yellow());

    let case = load_case(path)?;
    let table = BoundaryIndexTable::build(&case.geometry, &case.regions)?;
    let layout = ExchangeLayout::from_case(&case);
    let g = &case.geometry;

    println!("  {} Name: {}", "•".dimmed(), case.name.bright_white());
    println!(
        "  {} Grid: {}x{}x{} cells over {} x {} x {} m",
        "•".dimmed(),
        g.imax,
        g.jmax,
        g.kmax,
        g.lx,
        g.ly,
        g.lz
    );
    println!(
        "  {} Regions: {}, racks: {}, sensors: {}",
        "•".dimmed(),
        case.regions.len(),
        table.racks().len(),
        case.sensors.len()
    );
    println!(
        "  {} Exchange: {} inputs, {} outputs",
        "•".dimmed(),
        layout.n_inputs().to_string().bright_white(),
        layout.n_outputs().to_string().bright_white()
    );
    println!();

    println!("{}:", "Boundary Index Table".bright_white().underline());
    println!("  {} entries", table.len().to_string().bright_white());
    for (flag, label) in FLAGS {
        let count = table.count(flag);
        if count > 0 {
            println!("    {:>12}: {}", label, count);
        }
    }

    if detailed {
        println!();
        println!("{}:", "Owners".bright_white().underline());
        for owner in table.owners() {
            let cells = table.entries_of(owner.id).count();
            let status = if cells > 0 { "✓".bright_green() } else { "⚠".yellow() };
            println!(
                "    {} {:<16} {:?}/{:?} {} cell(s)",
                status,
                owner.name.bright_white(),
                owner.object,
                owner.thermal,
                cells
            );
        }
        for rack in table.racks() {
            println!("    {} rack {}", "•".dimmed(), rack);
        }
    }

    println!();
    println!("{} Case is valid", "✓".bright_green());
    Ok(())
}
