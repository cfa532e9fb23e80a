//! Browser-backed backend
//!
//! Requests go through Playwright's `APIRequestContext`, driven by a
//! generated Node script, so they share the browser's networking stack.

use apiscope_common::{HeaderMap, HttpMethod, ResponseBody, TransportKind};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{join_url, Transport, TransportResponse};
use crate::error::{HarnessError, HarnessResult, TransportError};
use crate::node;

/// What the generated script prints on success
#[derive(Debug, Deserialize)]
struct BrowserReply {
    status: u16,
    #[serde(default)]
    headers: HeaderMap,
    #[serde(default)]
    body: String,
}

pub struct BrowserTransport {
    base_url: String,
    timeout: Duration,
}

impl BrowserTransport {
    /// Fails with [`HarnessError::PlaywrightNotFound`] when Playwright is missing
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> HarnessResult<Self> {
        node::check_playwright_installed()?;
        Ok(Self {
            base_url: base_url.into(),
            timeout,
        })
    }

    /// Build the Node script for one request
    pub fn build_script(
        &self,
        method: HttpMethod,
        path: &str,
        headers: &HeaderMap,
        body: Option<&Value>,
    ) -> HarnessResult<String> {
        let data = match body {
            Some(body) => format!(", data: {}", node::js_literal(body)?),
            None => String::new(),
        };

        Ok(format!(
            r#"
const {{ request }} = require('playwright');

(async () => {{
  const ctx = await request.newContext({{ timeout: {timeout} }});
  try {{
    const response = await ctx.fetch({url}, {{ method: {method}, headers: {headers}{data} }});
    const body = await response.text();
    console.log(JSON.stringify({{ status: response.status(), headers: response.headers(), body }}));
  }} catch (error) {{
    console.error(JSON.stringify({{ error: error.message }}));
    process.exit(1);
  }} finally {{
    await ctx.dispose();
  }}
}})();
"#,
            timeout = self.timeout.as_millis(),
            url = node::js_literal(&join_url(&self.base_url, path))?,
            method = node::js_literal(method.as_str())?,
            headers = node::js_literal(headers)?,
            data = data,
        ))
    }

    fn execute(
        &self,
        method: HttpMethod,
        path: &str,
        headers: &HeaderMap,
        body: Option<&Value>,
    ) -> HarnessResult<TransportResponse> {
        let script = self.build_script(method, path, headers, body)?;
        let workdir = tempfile::tempdir()?;
        let stdout = node::run_script(&script, workdir.path())?;

        let line = stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| HarnessError::Playwright("script produced no output".into()))?;
        let reply: BrowserReply = serde_json::from_str(line)?;
        debug!("Browser {} {} -> {}", method, path, reply.status);

        let content_type = reply.headers.get("content-type").cloned();
        Ok(TransportResponse {
            status: reply.status,
            body: ResponseBody::from_bytes(content_type.as_deref(), reply.body.into_bytes()),
            headers: Some(reply.headers),
        })
    }
}

impl Transport for BrowserTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::BrowserBacked
    }

    fn send(
        &self,
        method: HttpMethod,
        path: &str,
        headers: &HeaderMap,
        body: Option<&Value>,
    ) -> Result<TransportResponse, TransportError> {
        self.execute(method, path, headers, body)
            .map_err(|e| TransportError::Browser(e.to_string()))
    }
}
