use std::path::PathBuf;

use calclink_core::{ConfigError, LinkError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("{line:?}: {source}")]
    Config { line: String, source: ConfigError },

    #[error("{path}:{line}: {message}")]
    InitScript {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Audio device error: {0}")]
    Audio(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sensitivity must be between 0 and 1, got {0}")]
    Sensitivity(f64),

    #[error("{0}")]
    Failed(String),

    #[error("Worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl CliError {
    pub fn audio(err: impl std::fmt::Display) -> Self {
        CliError::Audio(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CliError>;
