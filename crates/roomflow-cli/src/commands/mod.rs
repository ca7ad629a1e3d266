//! CLI command implementations.

pub mod check;
pub mod preset;
pub mod run;

use std::fs;
use std::path::Path;

use roomflow::CaseConfig;

use crate::error::CliResult;

/// Read and validate a case file.
///
/// TOML errors surface with their line and column; semantic errors come
/// from case validation.
pub fn load_case(path: &Path) -> CliResult<CaseConfig> {
    let text = fs::read_to_string(path)?;
    let case: CaseConfig = toml::from_str(&text)?;
    case.validate()?;
    Ok(case)
}
