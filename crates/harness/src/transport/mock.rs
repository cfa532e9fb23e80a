//! In-process stub backend
//!
//! Deterministic responses keyed by `(method, path)`. Nothing here touches
//! the network. The retry stub keeps per-endpoint attempt counters in a
//! [`MockState`] that callers own and can reset between scenarios; counters
//! are local to the process, so parallel workers never share them.

use apiscope_common::{HeaderMap, HttpMethod, ResponseBody, TransportKind};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{Transport, TransportResponse};
use crate::error::TransportError;

const DEFAULT_MAX_FAILURES: u64 = 3;
const DEFAULT_ENDPOINT_ID: &str = "default";

/// Custom stub: request body in, `(status, body)` out
pub type Stub = Arc<dyn Fn(Option<&Value>) -> (u16, Value) + Send + Sync>;

/// Attempt counters for the retry stub, keyed by endpoint id
#[derive(Debug, Clone, Default)]
pub struct MockState {
    counters: Arc<Mutex<HashMap<String, u32>>>,
}

impl MockState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more attempt and return the new total
    fn bump(&self, endpoint_id: &str) -> u32 {
        let mut counters = self.counters.lock();
        let count = counters.entry(endpoint_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn attempts(&self, endpoint_id: &str) -> u32 {
        self.counters.lock().get(endpoint_id).copied().unwrap_or(0)
    }

    pub fn reset(&self, endpoint_id: &str) {
        self.counters.lock().remove(endpoint_id);
    }

    pub fn reset_all(&self) {
        self.counters.lock().clear();
    }
}

/// Stub backend
pub struct MockTransport {
    state: MockState,
    username: String,
    password: String,
    stubs: HashMap<(HttpMethod, String), Stub>,
}

impl MockTransport {
    /// `username`/`password` are the credentials the login stub accepts
    pub fn new(state: MockState, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            state,
            username: username.into(),
            password: password.into(),
            stubs: HashMap::new(),
        }
    }

    /// Register a stub that takes precedence over the built-in routes
    pub fn with_stub<F>(mut self, method: HttpMethod, path: impl Into<String>, stub: F) -> Self
    where
        F: Fn(Option<&Value>) -> (u16, Value) + Send + Sync + 'static,
    {
        self.stubs.insert((method, path.into()), Arc::new(stub));
        self
    }

    pub fn state(&self) -> &MockState {
        &self.state
    }

    fn login(&self, body: Option<&Value>) -> (u16, Value) {
        let field = |name: &str| body.and_then(|b| b.get(name)).and_then(Value::as_str);
        let ok = field("username") == Some(self.username.as_str())
            && field("password") == Some(self.password.as_str());
        if ok {
            (
                200,
                json!({ "access_token": "mock-123", "token_type": "Bearer", "expires_in": 3600 }),
            )
        } else {
            (401, json!({ "detail": "Invalid credentials" }))
        }
    }

    fn retry_test(&self, body: Option<&Value>) -> (u16, Value) {
        let max_failures = body
            .and_then(|b| b.get("max_failures"))
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_MAX_FAILURES);
        let endpoint_id = body
            .and_then(|b| b.get("endpoint_id"))
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_ENDPOINT_ID);

        let attempt = self.state.bump(endpoint_id);
        debug!("Mock retry endpoint '{}' attempt {}", endpoint_id, attempt);

        if u64::from(attempt) <= max_failures {
            (
                503,
                json!({ "status": "Running", "attempt": attempt, "message": "Service warming up" }),
            )
        } else {
            (
                200,
                json!({
                    "status": "Successful",
                    "attempt": attempt,
                    "message": format!("Service ready after {} attempts", attempt),
                }),
            )
        }
    }

    fn respond(&self, method: HttpMethod, path: &str, body: Option<&Value>) -> (u16, Value) {
        if let Some(stub) = self.stubs.get(&(method, path.to_string())) {
            return stub(body);
        }
        match (method, path) {
            (HttpMethod::Post, "/login") => self.login(body),
            (HttpMethod::Post, "/api/retry-test") => self.retry_test(body),
            (HttpMethod::Get, "/health") => (200, json!({ "status": "ok" })),
            _ => (200, json!({ "ok": true, "path": path, "method": method.as_str() })),
        }
    }
}

impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Mock
    }

    fn send(
        &self,
        method: HttpMethod,
        path: &str,
        _headers: &HeaderMap,
        body: Option<&Value>,
    ) -> Result<TransportResponse, TransportError> {
        let (status, value) = self.respond(method, path, body);
        Ok(TransportResponse {
            status,
            headers: None,
            body: ResponseBody::Json(value),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock() -> MockTransport {
        MockTransport::new(MockState::new(), "alice", "s3cret")
    }

    fn send(mock: &MockTransport, method: HttpMethod, path: &str, body: Option<Value>) -> (u16, Value) {
        let response = mock.send(method, path, &HeaderMap::new(), body.as_ref()).unwrap();
        (response.status, response.body.to_value())
    }

    #[test]
    fn test_login_stub() {
        let mock = mock();
        let (status, body) = send(
            &mock,
            HttpMethod::Post,
            "/login",
            Some(json!({ "username": "alice", "password": "s3cret" })),
        );
        assert_eq!(status, 200);
        assert_eq!(body["access_token"], "mock-123");

        let (status, body) = send(
            &mock,
            HttpMethod::Post,
            "/login",
            Some(json!({ "username": "alice", "password": "nope" })),
        );
        assert_eq!(status, 401);
        assert_eq!(body["detail"], "Invalid credentials");

        assert_eq!(send(&mock, HttpMethod::Post, "/login", None).0, 401);
    }

    #[test]
    fn test_retry_stub_counts_per_endpoint() {
        let mock = mock();
        let body = json!({ "max_failures": 2, "endpoint_id": "a" });

        let (status, first) = send(&mock, HttpMethod::Post, "/api/retry-test", Some(body.clone()));
        assert_eq!(status, 503);
        assert_eq!(first["status"], "Running");
        assert_eq!(first["attempt"], 1);
        assert_eq!(send(&mock, HttpMethod::Post, "/api/retry-test", Some(body.clone())).0, 503);

        let (status, ready) = send(&mock, HttpMethod::Post, "/api/retry-test", Some(body.clone()));
        assert_eq!(status, 200);
        assert_eq!(ready["status"], "Successful");
        assert_eq!(ready["message"], "Service ready after 3 attempts");

        // Other endpoints keep their own count
        let other = json!({ "max_failures": 0, "endpoint_id": "b" });
        assert_eq!(send(&mock, HttpMethod::Post, "/api/retry-test", Some(other)).0, 200);
        assert_eq!(mock.state().attempts("a"), 3);
        assert_eq!(mock.state().attempts("b"), 1);

        mock.state().reset("a");
        assert_eq!(mock.state().attempts("a"), 0);
        assert_eq!(send(&mock, HttpMethod::Post, "/api/retry-test", Some(body)).0, 503);

        mock.state().reset_all();
        assert_eq!(mock.state().attempts("a"), 0);
        assert_eq!(mock.state().attempts("b"), 0);
    }

    #[test]
    fn test_state_is_shared_between_clones() {
        let state = MockState::new();
        let mock = MockTransport::new(state.clone(), "", "");
        send(&mock, HttpMethod::Post, "/api/retry-test", Some(json!({ "endpoint_id": "shared" })));
        assert_eq!(state.attempts("shared"), 1);
    }

    #[test]
    fn test_default_and_custom_stubs() {
        let mock = mock().with_stub(HttpMethod::Get, "/users/7", |_| (404, json!({ "detail": "Not found" })));

        let (status, body) = send(&mock, HttpMethod::Get, "/health", None);
        assert_eq!((status, body), (200, json!({ "status": "ok" })));

        let (status, body) = send(&mock, HttpMethod::Delete, "/anything", None);
        assert_eq!(status, 200);
        assert_eq!(body, json!({ "ok": true, "path": "/anything", "method": "DELETE" }));

        assert_eq!(send(&mock, HttpMethod::Get, "/users/7", None).0, 404);
    }
}
