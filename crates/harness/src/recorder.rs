//! Trace recording and per-worker persistence

use apiscope_common::config::WORKER_ENV_VARS;
use apiscope_common::{trace_timestamp, HeaderMap, TraceRecord, TraceScope};
use base64::Engine;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::HarnessResult;
use crate::render::ArtifactRenderer;
use crate::report;

/// Directory under the reports dir holding one file per worker
pub const WORKERS_DIR: &str = "workers";

/// Fallback worker id for a non-parallel run
pub const MAIN_WORKER: &str = "main";

/// One completed call, already redacted
#[derive(Debug, Clone, Default)]
pub struct RecordEntry {
    pub step: String,
    pub method: String,
    pub url: String,
    pub status: Option<u16>,
    pub request_headers: Option<HeaderMap>,
    pub request_json: Option<Value>,
    pub response_headers: Option<HeaderMap>,
    pub response_json: Option<Value>,
}

/// Append-only record list shared between the recorder and its session
#[derive(Debug, Clone, Default)]
pub struct TraceStore {
    records: Arc<Mutex<Vec<TraceRecord>>>,
}

impl TraceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: TraceRecord) {
        self.records.lock().push(record);
    }

    pub fn snapshot(&self) -> Vec<TraceRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Take every record, leaving the store empty
    pub fn drain(&self) -> Vec<TraceRecord> {
        std::mem::take(&mut *self.records.lock())
    }
}

/// Builds [`TraceRecord`]s and appends them to a [`TraceStore`]
pub struct TraceRecorder {
    store: TraceStore,
    renderer: Option<Box<dyn ArtifactRenderer>>,
}

impl TraceRecorder {
    pub fn new(store: TraceStore, renderer: Option<Box<dyn ArtifactRenderer>>) -> Self {
        Self { store, renderer }
    }

    pub fn store(&self) -> &TraceStore {
        &self.store
    }

    pub fn renders_artifacts(&self) -> bool {
        self.renderer.is_some()
    }

    /// Append one record. Rendering failures are logged and the record is kept.
    pub fn record(&self, scope: &TraceScope, entry: RecordEntry) {
        let (request_png_b64, response_png_b64) = match &self.renderer {
            Some(renderer) => {
                let request_ctx = json!({
                    "method": entry.method,
                    "url": entry.url,
                    "headers": entry.request_headers,
                    "body": entry.request_json,
                });
                let response_ctx = json!({
                    "url": entry.url,
                    "status": entry.status,
                    "headers": entry.response_headers,
                    "body": entry.response_json,
                });
                (
                    render_b64(renderer.as_ref(), "Request JSON", &request_ctx),
                    render_b64(renderer.as_ref(), "Response JSON", &response_ctx),
                )
            }
            None => (None, None),
        };

        debug!(
            "Recording '{}' {} {} -> {:?}",
            entry.step, entry.method, entry.url, entry.status
        );

        self.store.push(TraceRecord {
            feature: scope.feature.clone(),
            scenario: scope.scenario.clone(),
            step: entry.step,
            method: entry.method,
            url: entry.url,
            status: entry.status,
            request_headers: entry.request_headers.unwrap_or_default(),
            response_headers: entry.response_headers.unwrap_or_default(),
            request_json: entry.request_json,
            response_json: entry.response_json,
            request_png_b64,
            response_png_b64,
            at: trace_timestamp(Utc::now()),
        });
    }
}

fn render_b64(renderer: &dyn ArtifactRenderer, title: &str, payload: &Value) -> Option<String> {
    match renderer.render(title, payload) {
        Ok(png) => Some(base64::engine::general_purpose::STANDARD.encode(png)),
        Err(e) => {
            warn!("Failed to render '{}' artifact: {}", title, e);
            None
        }
    }
}

/// Worker id set by the parallel runner, if any
pub fn worker_id_from_env() -> Option<String> {
    WORKER_ENV_VARS
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|v| !v.trim().is_empty())
}

/// Keep `[A-Za-z0-9_-]`, replace everything else with `_`
pub fn sanitize_worker_id(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        MAIN_WORKER.to_string()
    } else {
        cleaned
    }
}

/// Write `bytes` to `path` through a temp file in the same directory
pub fn write_atomic(path: &Path, bytes: &[u8]) -> HarnessResult<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Owns one worker's trace store and writes it out at teardown
pub struct WorkerSession {
    worker_id: String,
    reports_dir: PathBuf,
    store: TraceStore,
    write_html: bool,
    finished: bool,
}

impl WorkerSession {
    pub fn new(reports_dir: impl Into<PathBuf>, worker_id: Option<&str>, store: TraceStore) -> Self {
        Self {
            worker_id: sanitize_worker_id(worker_id.unwrap_or(MAIN_WORKER)),
            reports_dir: reports_dir.into(),
            store,
            write_html: false,
            finished: false,
        }
    }

    /// Also write a per-worker HTML page next to the JSON file
    pub fn with_html(mut self, write_html: bool) -> Self {
        self.write_html = write_html;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn store(&self) -> &TraceStore {
        &self.store
    }

    pub fn json_path(&self) -> PathBuf {
        self.reports_dir
            .join(WORKERS_DIR)
            .join(format!("{}.json", self.worker_id))
    }

    pub fn html_path(&self) -> PathBuf {
        self.reports_dir
            .join(WORKERS_DIR)
            .join(format!("{}.html", self.worker_id))
    }

    fn flush(&self) -> HarnessResult<PathBuf> {
        let records = self.store.snapshot();
        let path = self.json_path();
        write_atomic(&path, &serde_json::to_vec_pretty(&records)?)?;
        if self.write_html {
            write_atomic(&self.html_path(), report::render_html(&records).as_bytes())?;
        }
        info!(
            "Worker {} wrote {} trace records to {}",
            self.worker_id,
            records.len(),
            path.display()
        );
        Ok(path)
    }

    /// Write the worker file and return its path
    pub fn finish(mut self) -> HarnessResult<PathBuf> {
        self.finished = true;
        self.flush()
    }
}

impl Drop for WorkerSession {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.flush() {
                warn!("Failed to flush traces for worker {}: {}", self.worker_id, e);
            }
        }
    }
}
