//! Error types for the execution harness

use thiserror::Error;

/// Failure of a single backend call. Never escapes the executor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("browser request failed: {0}")]
    Browser(String),

    #[error("transport '{0}' is not available")]
    Unavailable(String),
}

impl TransportError {
    /// Name reported as `exception_type` on status-0 results
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Connect(_) => "Connect",
            TransportError::Timeout(_) => "Timeout",
            TransportError::Http(_) => "Http",
            TransportError::Browser(_) => "Browser",
            TransportError::Unavailable(_) => "Unavailable",
        }
    }
}

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Playwright not found. Install with: npx playwright install")]
    PlaywrightNotFound,

    #[error("Playwright error: {0}")]
    Playwright(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Aggregation must run in the coordinator, not in worker '{0}'")]
    NotCoordinator(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Common(#[from] apiscope_common::Error),
}

pub type HarnessResult<T> = Result<T, HarnessError>;
