//! Combined report from per-worker trace files

use apiscope_common::{DedupeKey, TraceRecord};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{HarnessError, HarnessResult};
use crate::recorder::{worker_id_from_env, write_atomic, WORKERS_DIR};
use crate::render::escape_html;

pub const REPORT_JSON: &str = "api-report.json";
pub const REPORT_HTML: &str = "api-report.html";

#[derive(Debug, Clone)]
pub struct AggregateOptions {
    pub write_html: bool,
    /// Delete worker files once the combined report is written
    pub clean_workers: bool,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            write_html: true,
            clean_workers: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateSummary {
    pub files_read: usize,
    pub files_skipped: usize,
    /// Records before dedupe
    pub records_in: usize,
    pub duplicates: usize,
    /// Records in the combined report
    pub records: usize,
    pub json_path: Option<PathBuf>,
    pub html_path: Option<PathBuf>,
}

/// Merges `workers/*.json` into one report
pub struct ReportAggregator {
    reports_dir: PathBuf,
    worker_id: Option<String>,
}

impl ReportAggregator {
    pub fn new(reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            reports_dir: reports_dir.into(),
            worker_id: worker_id_from_env(),
        }
    }

    /// Override the worker id detected from the environment
    pub fn with_worker_id(mut self, worker_id: Option<String>) -> Self {
        self.worker_id = worker_id;
        self
    }

    pub fn reports_dir(&self) -> &Path {
        &self.reports_dir
    }

    pub fn workers_dir(&self) -> PathBuf {
        self.reports_dir.join(WORKERS_DIR)
    }

    /// Worker JSON files in name order
    pub fn worker_files(&self) -> Vec<PathBuf> {
        let dir = self.workers_dir();
        if !dir.is_dir() {
            return Vec::new();
        }
        WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().map_or(false, |ext| ext == "json"))
            .collect()
    }

    pub fn aggregate(&self, options: &AggregateOptions) -> HarnessResult<AggregateSummary> {
        if let Some(worker) = &self.worker_id {
            return Err(HarnessError::NotCoordinator(worker.clone()));
        }

        let files = self.worker_files();
        let mut summary = AggregateSummary::default();
        let mut merged = Vec::new();
        let mut read = Vec::new();

        for file in files {
            match read_worker_file(&file) {
                Ok(records) => {
                    debug!("Read {} records from {}", records.len(), file.display());
                    summary.files_read += 1;
                    merged.extend(records);
                    read.push(file);
                }
                Err(e) => {
                    warn!("Skipping unreadable worker file {}: {}", file.display(), e);
                    summary.files_skipped += 1;
                }
            }
        }

        summary.records_in = merged.len();
        let mut records = dedupe(merged);
        summary.duplicates = summary.records_in - records.len();
        sort_records(&mut records);
        summary.records = records.len();

        if records.is_empty() {
            info!("No trace records found under {}", self.workers_dir().display());
            return Ok(summary);
        }

        let json_path = self.reports_dir.join(REPORT_JSON);
        write_atomic(&json_path, &serde_json::to_vec_pretty(&records)?)?;
        summary.json_path = Some(json_path);

        if options.write_html {
            let html_path = self.reports_dir.join(REPORT_HTML);
            write_atomic(&html_path, render_html(&records).as_bytes())?;
            summary.html_path = Some(html_path);
        }

        if options.clean_workers {
            self.clean(&read);
        }

        info!(
            "Aggregated {} records ({} duplicates dropped) from {} worker files",
            summary.records, summary.duplicates, summary.files_read
        );
        Ok(summary)
    }

    /// Remove merged worker files. Unreadable ones stay for inspection.
    fn clean(&self, files: &[PathBuf]) {
        for json in files {
            for path in [json.clone(), json.with_extension("html")] {
                if path.exists() {
                    if let Err(e) = std::fs::remove_file(&path) {
                        warn!("Failed to remove {}: {}", path.display(), e);
                    }
                }
            }
        }
        // Only succeeds when nothing else is left
        let _ = std::fs::remove_dir(self.workers_dir());
    }
}

fn read_worker_file(path: &Path) -> HarnessResult<Vec<TraceRecord>> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Drop later copies of the same record, keeping first occurrences in order
pub fn dedupe(records: Vec<TraceRecord>) -> Vec<TraceRecord> {
    let mut seen: HashSet<DedupeKey> = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert(r.dedupe_key()))
        .collect()
}

/// Stable order by feature, scenario, timestamp
pub fn sort_records(records: &mut [TraceRecord]) {
    records.sort_by(|a, b| {
        (&a.feature, &a.scenario, &a.at).cmp(&(&b.feature, &b.scenario, &b.at))
    });
}

fn json_block(label: &str, value: Option<&serde_json::Value>, png_b64: Option<&str>) -> String {
    if let Some(png) = png_b64 {
        return format!(
            "<div class=\"part\"><h3>{}</h3><img alt=\"{}\" src=\"data:image/png;base64,{}\"></div>",
            label,
            label,
            escape_html(png)
        );
    }
    let text = value
        .map(|v| serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string()))
        .unwrap_or_default();
    format!(
        "<div class=\"part\"><h3>{}</h3><pre>{}</pre></div>",
        label,
        escape_html(&text)
    )
}

fn headers_block(label: &str, headers: &apiscope_common::HeaderMap) -> String {
    if headers.is_empty() {
        return String::new();
    }
    let rows: String = headers
        .iter()
        .map(|(k, v)| format!("<tr><td>{}</td><td>{}</td></tr>", escape_html(k), escape_html(v)))
        .collect();
    format!("<div class=\"part\"><h3>{}</h3><table>{}</table></div>", label, rows)
}

/// Plain HTML page, one card per record
pub fn render_html(records: &[TraceRecord]) -> String {
    let mut html = String::from(
        r#"<!DOCTYPE html>
<html><head><meta charset="utf-8"><title>API Report</title>
<style>
  body{font-family:-apple-system,Segoe UI,Roboto,system-ui,sans-serif;margin:24px;color:#1f2933}
  .card{border:1px solid #d9e2ec;border-radius:8px;padding:16px;margin-bottom:16px}
  .meta{color:#627d98;font-size:13px}
  .ok{color:#2f855a}.fail{color:#c53030}
  pre{background:#f5f7fa;padding:8px;white-space:pre-wrap}
  img{max-width:100%}
  td{padding:2px 8px;font-family:monospace;font-size:12px}
</style></head><body>
"#,
    );
    html.push_str(&format!("<h1>API Report</h1><p class=\"meta\">{} calls</p>\n", records.len()));

    for record in records {
        let status = record.status.map(|s| s.to_string()).unwrap_or_else(|| "-".into());
        let class = match record.status {
            Some(s) if (200..400).contains(&s) => "ok",
            _ => "fail",
        };
        html.push_str(&format!(
            "<div class=\"card\">\n<p class=\"meta\">{} / {} &middot; {}</p>\n<h2>{}</h2>\n<p><b>{}</b> {} &rarr; <span class=\"{}\">{}</span></p>\n",
            escape_html(&record.feature),
            escape_html(&record.scenario),
            escape_html(&record.at),
            escape_html(&record.step),
            escape_html(&record.method),
            escape_html(&record.url),
            class,
            status,
        ));
        html.push_str(&headers_block("Request headers", &record.request_headers));
        html.push_str(&json_block(
            "Request",
            record.request_json.as_ref(),
            record.request_png_b64.as_deref(),
        ));
        html.push_str(&headers_block("Response headers", &record.response_headers));
        html.push_str(&json_block(
            "Response",
            record.response_json.as_ref(),
            record.response_png_b64.as_deref(),
        ));
        html.push_str("</div>\n");
    }

    html.push_str("</body></html>\n");
    html
}
