//! CLI Commands

pub mod aggregate;
pub mod call;
pub mod redact;
pub mod run;
