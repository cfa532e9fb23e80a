//! Redact Command
//!
//! Runs the same redaction the executor applies to logs and traces, so
//! payloads can be checked before they end up in a report.

use anyhow::{Context, Result};
use apiscope_common::{HarnessConfig, HeaderMap, RedactionRules, Redactor};
use clap::Args;
use serde_json::Value;
use std::io::Read;
use std::path::PathBuf;

use crate::output::{print_json, OutputFormat};

#[derive(Args, Debug, Clone)]
pub struct RedactArgs {
    /// Input file; stdin when omitted
    pub input: Option<PathBuf>,

    /// Treat the input as plain text rather than JSON
    #[arg(long, conflicts_with_all = ["headers", "url"])]
    pub text: bool,

    /// Treat the input as a JSON object of headers
    #[arg(long, conflicts_with = "url")]
    pub headers: bool,

    /// Redact this URL instead of reading input
    #[arg(long)]
    pub url: Option<String>,

    /// Also redact UUIDs
    #[arg(long)]
    pub uuids: bool,

    /// Override the maximum body size in bytes
    #[arg(long)]
    pub max_body_size: Option<usize>,

    /// Extra sensitive field names
    #[arg(long = "field", value_name = "NAME")]
    pub fields: Vec<String>,
}

fn read_input(input: &Option<PathBuf>) -> Result<String> {
    match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            Ok(buf)
        }
    }
}

fn build_redactor(args: &RedactArgs, config: &HarnessConfig) -> Redactor {
    let mut rules = RedactionRules::from_settings(&config.redaction);
    if args.uuids {
        rules = rules.with_uuids(true);
    }
    if let Some(max) = args.max_body_size {
        rules = rules.with_max_body_size(max);
    }
    for field in &args.fields {
        rules = rules.with_field(field);
    }
    Redactor::new(rules)
}

/// Redacted view of the input described by `args`
pub fn redact(args: &RedactArgs, config: &HarnessConfig, raw: Option<&str>) -> Result<Value> {
    let redactor = build_redactor(args, config);

    if let Some(url) = &args.url {
        return Ok(Value::String(redactor.redact_url(url)));
    }
    let raw = raw.context("No input to redact")?;

    if args.text {
        return Ok(redactor.redact_text(raw));
    }
    if args.headers {
        let headers: HeaderMap =
            serde_json::from_str(raw).context("Headers must be a JSON object of strings")?;
        return Ok(serde_json::to_value(redactor.redact_headers(&headers))?);
    }
    let body: Value = serde_json::from_str(raw).context("Input is not valid JSON (use --text)")?;
    Ok(redactor.redact_body(&body))
}

pub async fn execute(args: RedactArgs, format: OutputFormat) -> Result<()> {
    let config = HarnessConfig::from_env().context("Invalid configuration")?;
    let raw = match args.url {
        Some(_) => None,
        None => Some(read_input(&args.input)?),
    };
    let value = redact(&args, &config, raw.as_deref())?;
    print_json(&value, format);
    Ok(())
}
