//! apiscope CLI
//!
//! Command-line front end for the apiscope harness: parallel runs,
//! report aggregation, one-off calls and redaction checks.

pub mod commands;
pub mod output;
