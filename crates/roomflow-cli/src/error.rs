//! Error types for the roomflow CLI.

use roomflow::RoomflowError;
use thiserror::Error;

/// CLI result type alias.
pub type CliResult<T> = Result<T, CliError>;

/// CLI error type.
#[derive(Error, Debug)]
pub enum CliError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Case file is not valid TOML for a case.
    #[error("Case file error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Solver or coupling failure.
    #[error(transparent)]
    Roomflow(#[from] RoomflowError),

    /// Unknown preset name.
    #[error("Unknown preset: {0} (expected ventilated-box or server-room)")]
    UnknownPreset(String),

    /// Invalid command-line argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Io(_) | CliError::Parse(_) | CliError::UnknownPreset(_) | CliError::InvalidArgument(_) => 2,
            CliError::Roomflow(e) if e.category() == roomflow::core::ErrorCategory::Configuration => 2,
            CliError::Roomflow(_) => 1,
        }
    }
}
