//! Error types for MargaNav.

use thiserror::Error;

/// MargaNav error type
#[derive(Error, Debug)]
pub enum MargaError {
    #[error("Connection failed: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Map error: {0}")]
    Map(String),

    #[error("Planning failed: {0}")]
    Planning(String),

    #[error("Robot stalled")]
    Stalled,
}

impl From<prost::DecodeError> for MargaError {
    fn from(e: prost::DecodeError) -> Self {
        MargaError::Protocol(e.to_string())
    }
}

impl From<toml::de::Error> for MargaError {
    fn from(e: toml::de::Error) -> Self {
        MargaError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MargaError>;
