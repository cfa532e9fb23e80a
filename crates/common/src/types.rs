//! Core types for apiscope: calls, results and trace records

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Header map keyed by header name. Ordered so serialized traces are stable.
pub type HeaderMap = BTreeMap<String, String>;

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            _ => Err(Error::InvalidMethod(s.to_string())),
        }
    }
}

/// Which backend performed (or would perform) a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Deterministic in-process stubs. Never touches the network.
    #[default]
    Mock,
    /// Plain HTTP client against the configured base URL
    DirectHttp,
    /// Requests issued through a Playwright browser context
    BrowserBacked,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Mock => "mock",
            TransportKind::DirectHttp => "http",
            TransportKind::BrowserBacked => "browser",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(TransportKind::Mock),
            "http" | "direct" | "direct_http" | "requests" => Ok(TransportKind::DirectHttp),
            "browser" | "browser_backed" | "playwright" => Ok(TransportKind::BrowserBacked),
            _ => Err(Error::UnknownTransport(s.to_string())),
        }
    }
}

/// One outbound call as requested by a test step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    /// Human-readable step label
    pub step: String,
    pub method: HttpMethod,
    /// Path relative to the API base URL
    pub path: String,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub headers: HeaderMap,
}

impl CallRequest {
    pub fn new(step: impl Into<String>, method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            method,
            path: path.into(),
            body: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }
}

/// Response payload as received from a backend
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Bytes(Vec<u8>),
    #[default]
    Empty,
}

impl ResponseBody {
    /// Decode raw bytes using the response content type
    pub fn from_bytes(content_type: Option<&str>, bytes: Vec<u8>) -> Self {
        if bytes.is_empty() {
            return ResponseBody::Empty;
        }
        let is_json = content_type
            .map(|ct| ct.to_ascii_lowercase().contains("json"))
            .unwrap_or(false);
        if is_json {
            if let Ok(value) = serde_json::from_slice::<Value>(&bytes) {
                return ResponseBody::Json(value);
            }
        }
        match String::from_utf8(bytes) {
            Ok(text) => ResponseBody::Text(text),
            Err(e) => ResponseBody::Bytes(e.into_bytes()),
        }
    }

    /// JSON view used for assertions, logging and trace records
    pub fn to_value(&self) -> Value {
        match self {
            ResponseBody::Json(v) => v.clone(),
            ResponseBody::Text(t) => Value::String(t.clone()),
            ResponseBody::Bytes(b) => json!({ "_binary": true, "size": b.len() }),
            ResponseBody::Empty => Value::Object(Default::default()),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ResponseBody::Empty)
    }
}

/// Why a result was produced without an HTTP response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyntheticCause {
    /// Transport failure (refused, DNS, timeout, missing backend). Status is 0.
    Transport,
    /// Retry timeout budget exhausted. Status is 408.
    BudgetExhausted,
}

/// Outcome of one call attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResult {
    /// HTTP status, or 0 when no response was obtained
    pub status: u16,
    #[serde(default)]
    pub headers: HeaderMap,
    #[serde(default)]
    pub body: ResponseBody,
    /// Backend that produced the result; `None` for results synthesized by the retry engine
    #[serde(default)]
    pub transport: Option<TransportKind>,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub synthetic: Option<SyntheticCause>,
}

/// Status reserved for "no HTTP response was obtained"
pub const TRANSPORT_FAILURE_STATUS: u16 = 0;

/// Status used for an exhausted retry budget
pub const BUDGET_EXHAUSTED_STATUS: u16 = 408;

impl CallResult {
    pub fn new(status: u16, headers: HeaderMap, body: ResponseBody, transport: TransportKind) -> Self {
        Self {
            status,
            headers,
            body,
            transport: Some(transport),
            at: Utc::now(),
            synthetic: None,
        }
    }

    /// Status-0 result standing in for a failed transport call
    pub fn transport_failure(
        transport: Option<TransportKind>,
        exception_type: &str,
        message: &str,
        attempt: Option<u32>,
    ) -> Self {
        let mut body = json!({
            "error": "Connection/transport error",
            "exception_type": exception_type,
            "exception_message": message,
        });
        if let Some(attempt) = attempt {
            body["attempt"] = json!(attempt);
        }
        Self {
            status: TRANSPORT_FAILURE_STATUS,
            headers: HeaderMap::new(),
            body: ResponseBody::Json(body),
            transport,
            at: Utc::now(),
            synthetic: Some(SyntheticCause::Transport),
        }
    }

    /// Synthetic 408 for a retry loop that ran out of time
    pub fn budget_exhausted(elapsed_secs: f64) -> Self {
        Self {
            status: BUDGET_EXHAUSTED_STATUS,
            headers: HeaderMap::new(),
            body: ResponseBody::Json(json!({
                "error": "Request timeout",
                "elapsed_time": elapsed_secs,
            })),
            transport: None,
            at: Utc::now(),
            synthetic: Some(SyntheticCause::BudgetExhausted),
        }
    }

    pub fn is_transport_failure(&self) -> bool {
        self.synthetic == Some(SyntheticCause::Transport)
    }

    pub fn is_budget_exhausted(&self) -> bool {
        self.synthetic == Some(SyntheticCause::BudgetExhausted)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The `(status, body)` pair handed back to test steps
    pub fn into_pair(self) -> (u16, Value) {
        let body = self.body.to_value();
        (self.status, body)
    }
}

/// Feature/scenario a call belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceScope {
    pub feature: String,
    pub scenario: String,
}

impl TraceScope {
    pub fn new(feature: impl Into<String>, scenario: impl Into<String>) -> Self {
        Self {
            feature: feature.into(),
            scenario: scenario.into(),
        }
    }
}

/// Persisted trace of one completed call.
///
/// Every field defaults so worker files written by older builds still merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceRecord {
    pub feature: String,
    pub scenario: String,
    pub step: String,
    pub method: String,
    /// Already redacted
    pub url: String,
    pub status: Option<u16>,
    pub request_headers: HeaderMap,
    pub response_headers: HeaderMap,
    pub request_json: Option<Value>,
    pub response_json: Option<Value>,
    pub request_png_b64: Option<String>,
    pub response_png_b64: Option<String>,
    /// ISO-8601 UTC timestamp
    pub at: String,
}

/// Composite identity used to drop duplicate records at merge time
pub type DedupeKey = (String, String, String, String, String, Option<u16>, String);

impl TraceRecord {
    pub fn dedupe_key(&self) -> DedupeKey {
        (
            self.feature.clone(),
            self.scenario.clone(),
            self.step.clone(),
            self.method.clone(),
            self.url.clone(),
            self.status,
            self.at.clone(),
        )
    }
}

/// Timestamp format used on trace records
pub fn trace_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parse_is_case_insensitive() {
        assert_eq!("post".parse::<HttpMethod>().unwrap(), HttpMethod::Post);
        assert_eq!(" Get ".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert!("FETCH".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn test_transport_aliases() {
        assert_eq!("requests".parse::<TransportKind>().unwrap(), TransportKind::DirectHttp);
        assert_eq!("Playwright".parse::<TransportKind>().unwrap(), TransportKind::BrowserBacked);
        assert_eq!("MOCK".parse::<TransportKind>().unwrap(), TransportKind::Mock);
        assert!("carrier-pigeon".parse::<TransportKind>().is_err());
    }

    #[test]
    fn test_response_body_decoding() {
        let body = ResponseBody::from_bytes(Some("application/json; charset=utf-8"), br#"{"a":1}"#.to_vec());
        assert_eq!(body, ResponseBody::Json(json!({"a": 1})));

        let body = ResponseBody::from_bytes(Some("application/json"), b"not json".to_vec());
        assert_eq!(body, ResponseBody::Text("not json".to_string()));

        let body = ResponseBody::from_bytes(None, vec![0xff, 0xfe]);
        assert!(matches!(body, ResponseBody::Bytes(_)));

        assert!(ResponseBody::from_bytes(Some("text/plain"), vec![]).is_empty());
    }

    #[test]
    fn test_synthetic_results_are_tagged() {
        let failed = CallResult::transport_failure(Some(TransportKind::DirectHttp), "Connect", "refused", Some(2));
        assert_eq!(failed.status, 0);
        assert!(failed.is_transport_failure());
        let (_, body) = failed.into_pair();
        assert_eq!(body["exception_type"], "Connect");
        assert_eq!(body["attempt"], 2);

        let timeout = CallResult::budget_exhausted(1.5);
        assert_eq!(timeout.status, 408);
        assert!(timeout.is_budget_exhausted());
        assert!(!timeout.is_transport_failure());
    }

    #[test]
    fn test_trace_record_tolerates_missing_fields() {
        let record: TraceRecord = serde_json::from_str(r#"{"step": "login", "status": 200}"#).unwrap();
        assert_eq!(record.step, "login");
        assert_eq!(record.status, Some(200));
        assert!(record.feature.is_empty());
        assert!(record.request_headers.is_empty());
    }
}
