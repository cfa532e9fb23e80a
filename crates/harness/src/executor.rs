//! Call execution: routing, redacted logging, tracing, retries

use apiscope_common::{
    CallRequest, CallResult, HarnessConfig, HeaderMap, HttpMethod, RedactionRules, Redactor,
    RetryEngine, RetryPolicy, TraceScope, TransportKind,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::context::ExecutionContext;
use crate::error::HarnessResult;
use crate::recorder::{RecordEntry, TraceRecorder};
use crate::transport::{join_url, TransportRouter};

const JSON: &str = "application/json";

/// Headers reported when a backend has none of its own
fn synthetic_headers() -> HeaderMap {
    HeaderMap::from([("content-type".to_string(), JSON.to_string())])
}

/// Single entry point for outbound calls
pub struct Executor {
    config: HarnessConfig,
    router: TransportRouter,
    recorder: Arc<TraceRecorder>,
    redactor: Redactor,
}

impl Executor {
    pub fn new(config: HarnessConfig, router: TransportRouter, recorder: Arc<TraceRecorder>) -> Self {
        let redactor = Redactor::new(RedactionRules::from_settings(&config.redaction));
        Self {
            config,
            router,
            recorder,
            redactor,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn router(&self) -> &TransportRouter {
        &self.router
    }

    pub fn recorder(&self) -> &Arc<TraceRecorder> {
        &self.recorder
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    /// Defaults merged with caller headers; caller wins regardless of case
    fn wire_headers(request: &CallRequest) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Accept".to_string(), JSON.to_string());
        if request.body.is_some() {
            headers.insert("Content-Type".to_string(), JSON.to_string());
        }
        for (name, value) in &request.headers {
            headers.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
            headers.insert(name.clone(), value.clone());
        }
        headers
    }

    fn display_url(&self, path: &str) -> String {
        self.redactor.redact_url(&join_url(&self.config.api_base_url, path))
    }

    /// Perform one call. Never fails; transport errors come back as status 0.
    pub fn call(&self, ctx: &mut ExecutionContext, request: CallRequest) -> CallResult {
        self.attempt(ctx, request, None)
    }

    /// One call; `attempt` is stamped on status-0 bodies when retrying
    fn attempt(&self, ctx: &mut ExecutionContext, request: CallRequest, attempt: Option<u32>) -> CallResult {
        let kind = self.router.select(ctx);
        let mut wire = request;
        wire.headers = Self::wire_headers(&wire);

        if !ctx.is_silent() {
            self.log_request(kind, &wire);
        }

        let result = match self.router.invoke(kind, &wire) {
            Ok(response) => CallResult::new(
                response.status,
                response.headers.unwrap_or_else(synthetic_headers),
                response.body,
                kind,
            ),
            Err(e) => {
                if ctx.is_silent() {
                    debug!("{} {} via {} failed: {}", wire.method, self.display_url(&wire.path), kind, e);
                } else {
                    warn!("{} {} via {} failed: {}", wire.method, self.display_url(&wire.path), kind, e);
                }
                CallResult::transport_failure(Some(kind), e.kind(), &e.to_string(), attempt)
            }
        };

        if !ctx.is_silent() {
            self.log_response(&wire, &result);
            self.record(&ctx.scope, &wire, &result, None);
        }

        ctx.set_last(wire, result.clone());
        result
    }

    /// Step-level convenience returning `(status, body)`
    pub fn call_step(
        &self,
        ctx: &mut ExecutionContext,
        step: &str,
        method: HttpMethod,
        path: &str,
        body: Option<Value>,
        headers: Option<HeaderMap>,
    ) -> (u16, Value) {
        let mut request = CallRequest::new(step, method, path);
        request.body = body;
        if let Some(headers) = headers {
            request = request.with_headers(headers);
        }
        self.call(ctx, request).into_pair()
    }

    /// Record the cached last call under `step`. Returns false when nothing was cached.
    pub fn record_final_attempt(&self, ctx: &ExecutionContext, step: &str) -> bool {
        match ctx.last_call() {
            Some(last) => {
                self.record(&ctx.scope, &last.request, &last.result, Some(step));
                true
            }
            None => {
                warn!("No previous call to record for step '{}'", step);
                false
            }
        }
    }

    /// Retry `request` under `policy`, recording only the final attempt
    pub fn call_with_retry(
        &self,
        ctx: &mut ExecutionContext,
        request: CallRequest,
        policy: RetryPolicy,
    ) -> HarnessResult<CallResult> {
        let engine = RetryEngine::new(policy)?;
        Ok(self.call_with_engine(ctx, request, &engine))
    }

    /// [`call_with_retry`](Self::call_with_retry) with a prepared engine
    pub fn call_with_engine(
        &self,
        ctx: &mut ExecutionContext,
        request: CallRequest,
        engine: &RetryEngine,
    ) -> CallResult {
        let step = request.step.clone();
        let result = {
            let mut window = ctx.silent();
            engine.execute_infallible(|n| self.attempt(&mut window, request.clone(), Some(n)))
        };

        if result.is_budget_exhausted() {
            let mut wire = request;
            wire.headers = Self::wire_headers(&wire);
            ctx.set_last(wire, result.clone());
        }
        if !ctx.is_silent() {
            self.record_final_attempt(ctx, &step);
        }
        result
    }

    /// Dump the cached last response at error level
    pub fn log_last_response_on_failure(&self, ctx: &ExecutionContext) {
        let Some(last) = ctx.last_call() else {
            error!("Step failed and no API response was captured");
            return;
        };
        let body = self.redactor.redact_response(&last.result.body);
        error!(
            "Last API response: {} {} -> {}\n{}",
            last.request.method,
            self.display_url(&last.request.path),
            last.result.status,
            serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string())
        );
    }

    fn log_request(&self, kind: TransportKind, wire: &CallRequest) {
        if self.config.debug_api {
            let headers = self.redactor.redact_headers(&wire.headers);
            let body = wire.body.as_ref().map(|b| self.redactor.redact_body(b));
            info!(
                "[{}] -> {} {} via {}\nheaders: {}\nbody: {}",
                wire.step,
                wire.method,
                self.display_url(&wire.path),
                kind,
                serde_json::to_string(&headers).unwrap_or_default(),
                body.map(|b| b.to_string()).unwrap_or_else(|| "<none>".into()),
            );
        } else {
            debug!("[{}] -> {} {} via {}", wire.step, wire.method, self.display_url(&wire.path), kind);
        }
    }

    fn log_response(&self, wire: &CallRequest, result: &CallResult) {
        if self.config.debug_api {
            let headers = self.redactor.redact_headers(&result.headers);
            info!(
                "[{}] <- {}\nheaders: {}\nbody: {}",
                wire.step,
                result.status,
                serde_json::to_string(&headers).unwrap_or_default(),
                self.redactor.redact_response(&result.body),
            );
        } else {
            debug!("[{}] <- {} {} {}", wire.step, result.status, wire.method, self.display_url(&wire.path));
        }
    }

    fn record(&self, scope: &TraceScope, wire: &CallRequest, result: &CallResult, step: Option<&str>) {
        let entry = RecordEntry {
            step: step.unwrap_or(&wire.step).to_string(),
            method: wire.method.as_str().to_string(),
            url: self.display_url(&wire.path),
            status: Some(result.status),
            request_headers: Some(self.redactor.redact_headers(&wire.headers)),
            request_json: wire.body.as_ref().map(|b| self.redactor.redact_body(b)),
            response_headers: Some(self.redactor.redact_headers(&result.headers)),
            response_json: Some(self.redactor.redact_response(&result.body)),
        };
        self.recorder.record(scope, entry);
    }
}
