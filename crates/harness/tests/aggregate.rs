//! Worker files merged into the combined report

use apiscope_common::{TraceRecord, TraceScope};
use apiscope_harness::report::{REPORT_HTML, REPORT_JSON};
use apiscope_harness::{
    AggregateOptions, RecordEntry, ReportAggregator, TraceRecorder, TraceStore, WorkerSession,
};
use std::path::Path;

fn record(feature: &str, scenario: &str, step: &str, at: &str) -> TraceRecord {
    TraceRecord {
        feature: feature.into(),
        scenario: scenario.into(),
        step: step.into(),
        method: "GET".into(),
        url: "https://api.test/health".into(),
        status: Some(200),
        at: at.into(),
        ..Default::default()
    }
}

fn write_worker(dir: &Path, id: &str, records: &[TraceRecord]) {
    let store = TraceStore::new();
    for r in records {
        store.push(r.clone());
    }
    WorkerSession::new(dir, Some(id), store).finish().unwrap();
}

fn coordinator(dir: &Path) -> ReportAggregator {
    ReportAggregator::new(dir).with_worker_id(None)
}

fn read_report(dir: &Path) -> Vec<TraceRecord> {
    serde_json::from_slice(&std::fs::read(dir.join(REPORT_JSON)).unwrap()).unwrap()
}

#[test]
fn merges_dedupes_and_sorts_two_workers() {
    let dir = tempfile::tempdir().unwrap();
    let shared = record("Billing", "Invoice", "fetch", "2024-05-01T10:00:00.000002Z");

    write_worker(
        dir.path(),
        "gw0",
        &[
            record("Billing", "Refund", "refund", "2024-05-01T10:00:00.000005Z"),
            shared.clone(),
        ],
    );
    write_worker(
        dir.path(),
        "gw1",
        &[
            shared,
            record("Auth", "Login", "login", "2024-05-01T10:00:00.000009Z"),
        ],
    );

    let summary = coordinator(dir.path())
        .aggregate(&AggregateOptions::default())
        .unwrap();

    assert_eq!(summary.files_read, 2);
    assert_eq!(summary.records_in, 4);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.records, 3);
    assert_eq!(summary.json_path, Some(dir.path().join(REPORT_JSON)));
    assert!(dir.path().join(REPORT_HTML).exists());

    let steps: Vec<String> = read_report(dir.path()).into_iter().map(|r| r.step).collect();
    assert_eq!(steps, vec!["login", "fetch", "refund"]);

    // Worker files stay unless cleanup was asked for
    assert!(dir.path().join("workers").join("gw0.json").exists());
}

#[test]
fn records_from_recorder_survive_the_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = TraceStore::new();
    let session = WorkerSession::new(dir.path(), Some("gw2"), store.clone());
    let recorder = TraceRecorder::new(store, None);
    recorder.record(
        &TraceScope::new("Health", "Ping"),
        RecordEntry {
            step: "ping".into(),
            method: "GET".into(),
            url: "/health".into(),
            status: Some(200),
            ..Default::default()
        },
    );
    session.finish().unwrap();

    let summary = coordinator(dir.path())
        .aggregate(&AggregateOptions::default())
        .unwrap();
    assert_eq!(summary.records, 1);
    let report = read_report(dir.path());
    assert_eq!(report[0].feature, "Health");
    assert_eq!(report[0].step, "ping");
}

#[test]
fn skips_corrupt_files_and_cleans_only_merged_ones() {
    let dir = tempfile::tempdir().unwrap();
    write_worker(
        dir.path(),
        "gw0",
        &[record("F", "S", "one", "2024-05-01T10:00:00.000001Z")],
    );
    std::fs::write(dir.path().join("workers").join("gw1.json"), b"{ not json").unwrap();
    std::fs::write(dir.path().join("workers").join("notes.txt"), b"ignored").unwrap();

    let options = AggregateOptions {
        write_html: false,
        clean_workers: true,
    };
    let summary = coordinator(dir.path()).aggregate(&options).unwrap();

    assert_eq!(summary.files_read, 1);
    assert_eq!(summary.files_skipped, 1);
    assert_eq!(summary.records, 1);
    assert!(summary.html_path.is_none());
    assert!(!dir.path().join(REPORT_HTML).exists());
    assert!(!dir.path().join("workers").join("gw0.json").exists());
    // The corrupt file was not merged, so it is kept
    assert_eq!(
        std::fs::read(dir.path().join("workers").join("gw1.json")).unwrap(),
        b"{ not json"
    );
    // Unrelated files are left alone, so the directory stays
    assert!(dir.path().join("workers").join("notes.txt").exists());
}

#[test]
fn empty_worker_files_write_nothing() {
    let dir = tempfile::tempdir().unwrap();
    write_worker(dir.path(), "gw0", &[]);

    let summary = coordinator(dir.path())
        .aggregate(&AggregateOptions::default())
        .unwrap();
    assert_eq!(summary.files_read, 1);
    assert_eq!(summary.records, 0);
    assert!(!dir.path().join(REPORT_JSON).exists());
}
