//! `roomflow preset` command - Write a preset case as TOML.

use std::fs;
use std::path::Path;

use colored::Colorize;
use roomflow::CaseConfig;

use crate::error::{CliError, CliResult};

/// Build a preset by name.
pub fn preset(name: &str, size: usize) -> CliResult<CaseConfig> {
    match name {
        "ventilated-box" | "ventilated_box" | "box" => Ok(CaseConfig::ventilated_box(size)),
        "server-room" | "server_room" => Ok(CaseConfig::server_room()),
        other => Err(CliError::UnknownPreset(other.to_string())),
    }
}

/// Execute the `preset` command.
pub fn execute(name: &str, size: usize, output: Option<&Path>) -> CliResult<()> {
    let case = preset(name, size)?;
    let text = case.to_toml()?;
    match output {
        Some(path) => {
            fs::write(path, text)?;
            println!(
                "{} Wrote {} to {}",
                "✓".bright_green(),
                case.name.bright_white(),
                path.display().to_string().bright_yellow()
            );
        }
        None => print!("{text}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::load_case;

    #[test]
    fn test_presets_round_trip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["ventilated-box", "server-room"] {
            let path = dir.path().join(format!("{name}.toml"));
            execute(name, 6, Some(&path)).unwrap();
            let loaded = load_case(&path).unwrap();
            assert_eq!(loaded, preset(name, 6).unwrap());
        }
    }

    #[test]
    fn test_unknown_preset() {
        assert!(matches!(preset("attic", 4), Err(CliError::UnknownPreset(_))));
    }

    #[test]
    fn test_parse_error_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "geometry = [").unwrap();
        let err = load_case(&path).unwrap_err();
        assert!(matches!(err, CliError::Parse(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_invalid_case_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad_dt.toml");
        let mut case = CaseConfig::ventilated_box(4);
        case.solver.dt = 0.0;
        fs::write(&path, case.to_toml().unwrap()).unwrap();
        let err = load_case(&path).unwrap_err();
        assert!(matches!(err, CliError::Roomflow(_)));
        assert_eq!(err.exit_code(), 2);
    }
}
