//! apiscope execution harness
//!
//! Runs API calls for test steps and keeps an audit trail of them:
//! - Routes each call to a mock, direct HTTP or browser-backed transport
//! - Redacts everything that is logged or recorded
//! - Retries with backoff while recording only the final attempt
//! - Writes one trace file per worker and merges them afterwards
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Executor                                                   │
//! │    ├── call(ctx, request) -> CallResult                     │
//! │    ├── call_with_retry(ctx, request, policy)                │
//! │    └── record_final_attempt(ctx, step)                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TransportRouter                                            │
//! │    ├── MockTransport      (stubs + MockState counters)      │
//! │    ├── HttpTransport      (reqwest blocking)                │
//! │    └── BrowserTransport   (Playwright over Node)            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TraceRecorder -> TraceStore -> WorkerSession               │
//! │    └── workers/<id>.json                                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ReportAggregator                                           │
//! │    └── api-report.json / api-report.html                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod context;
pub mod error;
pub mod executor;
mod node;
pub mod recorder;
pub mod render;
pub mod report;
pub mod transport;

pub use context::{ExecutionContext, LastCall, SilentWindow};
pub use error::{HarnessError, HarnessResult, TransportError};
pub use executor::Executor;
pub use recorder::{RecordEntry, TraceRecorder, TraceStore, WorkerSession};
pub use render::{ArtifactRenderer, PlaywrightRenderer};
pub use report::{AggregateOptions, AggregateSummary, ReportAggregator};
pub use transport::{MockState, MockTransport, Transport, TransportResponse, TransportRouter};
