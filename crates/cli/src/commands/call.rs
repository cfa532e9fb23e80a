//! Call Command
//!
//! One-off call through the executor, using the same transport selection,
//! redaction and retry rules a test step would get.

use anyhow::{anyhow, bail, Context, Result};
use apiscope_common::{CallRequest, HarnessConfig, HttpMethod, RetryPolicy, TraceScope, TransportKind};
use apiscope_harness::{
    ArtifactRenderer, ExecutionContext, Executor, MockState, PlaywrightRenderer, TraceRecorder,
    TraceStore, TransportRouter, WorkerSession,
};
use clap::Args;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use crate::output::{print_json, print_success, status_label, OutputFormat};

#[derive(Args, Debug, Clone)]
pub struct CallArgs {
    /// HTTP method
    pub method: HttpMethod,

    /// Path relative to API_BASE_URL
    pub path: String,

    /// JSON request body
    #[arg(short, long)]
    pub body: Option<String>,

    /// Extra header as "Name: value"
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,

    /// Transport for this call (mock, http, browser)
    #[arg(short, long)]
    pub transport: Option<TransportKind>,

    /// Step label used in logs and traces
    #[arg(long, default_value = "cli call")]
    pub step: String,

    /// Retry with the configured linear policy, up to this many attempts
    #[arg(long, value_name = "ATTEMPTS")]
    pub retry: Option<u32>,

    /// Write the trace to the reports directory
    #[arg(long)]
    pub record: bool,
}

#[derive(Debug, Serialize)]
pub struct CallOutcome {
    pub status: u16,
    pub transport: Option<TransportKind>,
    pub body: Value,
    pub trace_file: Option<PathBuf>,
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("Header '{}' is not in 'Name: value' form", raw))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("Header '{}' has an empty name", raw);
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn build_request(args: &CallArgs) -> Result<CallRequest> {
    let mut request = CallRequest::new(&args.step, args.method, &args.path);
    if let Some(body) = &args.body {
        let body: Value = serde_json::from_str(body).context("--body is not valid JSON")?;
        request = request.with_body(body);
    }
    for raw in &args.headers {
        let (name, value) = parse_header(raw)?;
        request = request.with_header(name, value);
    }
    Ok(request)
}

fn renderer(config: &HarnessConfig) -> Option<Box<dyn ArtifactRenderer>> {
    if !config.render_artifacts {
        return None;
    }
    match PlaywrightRenderer::new() {
        Ok(renderer) => Some(Box::new(renderer)),
        Err(e) => {
            warn!("Artifact rendering disabled: {}", e);
            None
        }
    }
}

/// Run the call on the current thread with every backend the config allows
pub fn perform(args: &CallArgs, config: HarnessConfig) -> Result<CallOutcome> {
    let router = TransportRouter::from_config(&config, MockState::new());
    perform_with(args, config, router)
}

/// [`perform`] over a prepared router
pub fn perform_with(args: &CallArgs, config: HarnessConfig, router: TransportRouter) -> Result<CallOutcome> {
    let request = build_request(args)?;

    let store = TraceStore::new();
    let recorder = Arc::new(TraceRecorder::new(store.clone(), renderer(&config)));
    let session = args.record.then(|| {
        WorkerSession::new(&config.reports_dir, config.worker_id.as_deref(), store.clone())
    });
    let executor = Executor::new(config, router, recorder);

    let mut ctx = ExecutionContext::new(TraceScope::new("cli", &args.step));
    if let Some(kind) = args.transport {
        ctx = ctx.with_transport(kind);
    }

    let result = match args.retry {
        Some(attempts) => {
            let policy = executor.config().retry.linear_policy();
            let policy = RetryPolicy {
                max_attempts: attempts,
                ..policy
            };
            executor.call_with_retry(&mut ctx, request, policy)?
        }
        None => executor.call(&mut ctx, request),
    };
    if !result.is_success() {
        executor.log_last_response_on_failure(&ctx);
    }

    let trace_file = match session {
        Some(session) => Some(session.finish()?),
        None => None,
    };
    let body = executor.redactor().redact_response(&result.body);

    Ok(CallOutcome {
        status: result.status,
        transport: result.transport,
        body,
        trace_file,
    })
}

pub async fn execute(args: CallArgs, format: OutputFormat) -> Result<()> {
    let config = HarnessConfig::from_env().context("Invalid configuration")?;
    // The HTTP transport blocks, so it must stay off the async workers.
    let outcome = tokio::task::spawn_blocking(move || perform(&args, config))
        .await
        .context("Call task panicked")??;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
        _ => {
            let via = outcome
                .transport
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".into());
            println!("{} via {}", status_label(outcome.status), via);
            print_json(&outcome.body, format);
        }
    }
    if let Some(path) = &outcome.trace_file {
        print_success(&format!("Trace written to {}", path.display()));
    }
    Ok(())
}
