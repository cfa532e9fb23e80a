//! apiscope Common Library
//!
//! Call model, redaction, retry and configuration shared by the
//! apiscope harness and CLI.

pub mod config;
pub mod error;
pub mod redact;
pub mod retry;
pub mod types;

// Re-export commonly used types
pub use config::{HarnessConfig, RedactionSettings, RetryDefaults};
pub use error::{Error, Result};
pub use redact::{RedactionRules, Redactor, REDACTION_MARKER};
pub use retry::{
    Backoff, CallFailure, RecordingSleeper, RetryEngine, RetryPolicy, Sleeper, SuccessCondition,
    ThreadSleeper,
};
pub use types::*;

/// apiscope version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
