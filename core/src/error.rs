use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Unsupported WAV format: {0}")]
    InvalidWav(String),

    #[error("Transmitter is closed")]
    TransmitterClosed,

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Insufficient data")]
    InsufficientData,

    #[error("No files to send")]
    NoFiles,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Operation interrupted")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, LinkError>;
