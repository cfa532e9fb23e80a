//! Error types for apiscope

use thiserror::Error;

/// Result type alias using the apiscope Error
pub type Result<T> = std::result::Result<T, Error>;

/// apiscope error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config file error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Unknown transport: {0}")]
    UnknownTransport(String),

    #[error("Pattern error: {0}")]
    Regex(#[from] regex::Error),
}
