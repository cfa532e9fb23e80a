//! Transport backends and routing

pub mod browser;
pub mod http;
pub mod mock;

use apiscope_common::{CallRequest, HarnessConfig, HeaderMap, HttpMethod, ResponseBody, TransportKind};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::context::ExecutionContext;
use crate::error::{HarnessError, TransportError};

pub use browser::BrowserTransport;
pub use http::HttpTransport;
pub use mock::{MockState, MockTransport};

/// Raw backend answer
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    /// `None` when the backend has no real headers (mock)
    pub headers: Option<HeaderMap>,
    pub body: ResponseBody,
}

/// A way of performing one HTTP-shaped call
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    fn send(
        &self,
        method: HttpMethod,
        path: &str,
        headers: &HeaderMap,
        body: Option<&Value>,
    ) -> Result<TransportResponse, TransportError>;
}

/// `base + path` without doubling the slash
pub fn join_url(base: &str, path: &str) -> String {
    if base.is_empty() {
        return path.to_string();
    }
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base.trim_end_matches('/'), path),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}

/// Picks and invokes a backend per call
pub struct TransportRouter {
    backends: HashMap<TransportKind, Box<dyn Transport>>,
    env_override: Option<TransportKind>,
}

impl TransportRouter {
    /// Router with no backends registered
    pub fn new(env_override: Option<TransportKind>) -> Self {
        Self {
            backends: HashMap::new(),
            env_override,
        }
    }

    /// Register every backend the configuration allows.
    ///
    /// Direct HTTP and browser backends that cannot be built are left out;
    /// calls routed to them come back as status-0 results.
    pub fn from_config(config: &HarnessConfig, mock_state: MockState) -> Self {
        let mut router = Self::new(config.transport_override).register(Box::new(MockTransport::new(
            mock_state,
            config.test_username.clone(),
            config.test_password.clone(),
        )));

        match HttpTransport::new(config.api_base_url.clone(), config.timeout()) {
            Ok(http) => router = router.register(Box::new(http)),
            Err(e) => warn!("Direct HTTP transport unavailable: {}", e),
        }

        match BrowserTransport::new(config.api_base_url.clone(), config.timeout()) {
            Ok(browser) => router = router.register(Box::new(browser)),
            Err(HarnessError::PlaywrightNotFound) => {
                info!("Playwright not installed; browser transport disabled")
            }
            Err(e) => warn!("Browser transport unavailable: {}", e),
        }

        router
    }

    /// Add or replace the backend for `transport.kind()`
    pub fn register(mut self, transport: Box<dyn Transport>) -> Self {
        self.backends.insert(transport.kind(), transport);
        self
    }

    pub fn is_registered(&self, kind: TransportKind) -> bool {
        self.backends.contains_key(&kind)
    }

    pub fn env_override(&self) -> Option<TransportKind> {
        self.env_override
    }

    /// Context override, then process-wide override, then mock
    pub fn select(&self, ctx: &ExecutionContext) -> TransportKind {
        ctx.transport.or(self.env_override).unwrap_or_default()
    }

    pub fn invoke(&self, kind: TransportKind, request: &CallRequest) -> Result<TransportResponse, TransportError> {
        let backend = self
            .backends
            .get(&kind)
            .ok_or_else(|| TransportError::Unavailable(kind.to_string()))?;
        debug!("Dispatching {} {} via {}", request.method, request.path, kind);
        backend.send(request.method, &request.path, &request.headers, request.body.as_ref())
    }
}
