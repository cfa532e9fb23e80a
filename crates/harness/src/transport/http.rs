//! Direct HTTP backend

use apiscope_common::{HeaderMap, HttpMethod, ResponseBody, TransportKind};
use reqwest::blocking::Client;
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{join_url, Transport, TransportResponse};
use crate::error::{HarnessResult, TransportError};

/// Plain HTTP client against a fixed base URL
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> HarnessResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Absolute URL for a request path
    pub fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }
}

fn to_reqwest(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Options => Method::OPTIONS,
    }
}

fn map_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Http(e.to_string())
    }
}

impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::DirectHttp
    }

    fn send(
        &self,
        method: HttpMethod,
        path: &str,
        headers: &HeaderMap,
        body: Option<&Value>,
    ) -> Result<TransportResponse, TransportError> {
        let url = self.url(path);
        debug!("HTTP {} {}", method, url);

        let mut request = self.client.request(to_reqwest(method), &url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().map_err(map_error)?;
        let status = response.status().as_u16();
        let response_headers: HeaderMap = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let bytes = response.bytes().map_err(map_error)?;
        let content_type = response_headers.get("content-type").map(String::as_str);

        Ok(TransportResponse {
            status,
            body: ResponseBody::from_bytes(content_type, bytes.to_vec()),
            headers: Some(response_headers),
        })
    }
}
