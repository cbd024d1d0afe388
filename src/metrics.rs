//! Process-wide metrics sink.
//!
//! Built once at startup and handed to the middleware and interceptors that
//! feed it. Nothing here installs a global recorder, so every test can build
//! its own sink and read it back through [`Metrics::render`].
//!
//! | Metric | Type | Labels |
//! |---|---|---|
//! | `http_request_duration_seconds` | histogram | `path`, `method`, `code` |
//! | `http_requests_total` | counter | `path`, `method`, `code` |
//! | `http_errors_total` | counter | - |
//! | `http_panics_total` | counter | - |
//! | `db_call_duration_seconds` | histogram | `table`, `operation` |
//! | `db_calls_total` | counter | `table`, `operation` |

use std::time::Duration;

use ::metrics::{Key, Label, Level, Metadata, Recorder};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

pub const HTTP_REQUEST_DURATION: &str = "http_request_duration_seconds";
pub const HTTP_REQUESTS: &str = "http_requests_total";
pub const HTTP_ERRORS: &str = "http_errors_total";
pub const HTTP_PANICS: &str = "http_panics_total";
pub const DB_CALL_DURATION: &str = "db_call_duration_seconds";
pub const DB_CALLS: &str = "db_calls_total";

/// Prometheus client default buckets, in seconds.
const BUCKETS: [f64; 11] = [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Thread-safe counters and histograms keyed by name and labels.
pub struct Metrics {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl Metrics {
    pub fn new() -> Result<Self, BuildError> {
        let recorder = PrometheusBuilder::new().set_buckets(&BUCKETS)?.build_recorder();
        let handle = recorder.handle();
        Ok(Self { recorder, handle })
    }

    /// Records one observation, in seconds, on a histogram.
    pub fn observe(&self, name: &'static str, labels: Vec<Label>, seconds: f64) {
        self.recorder
            .register_histogram(&Key::from_parts(name, labels), &metadata())
            .record(seconds);
    }

    /// Adds one to a counter.
    pub fn increment(&self, name: &'static str, labels: Vec<Label>) {
        self.recorder
            .register_counter(&Key::from_parts(name, labels), &metadata())
            .increment(1);
    }

    /// One finished HTTP request.
    pub fn observe_request(&self, path: &str, method: &str, code: u16, elapsed: Duration) {
        let labels = || {
            vec![
                Label::new("path", path.to_owned()),
                Label::new("method", method.to_owned()),
                Label::new("code", code.to_string()),
            ]
        };
        self.observe(HTTP_REQUEST_DURATION, labels(), elapsed.as_secs_f64());
        self.increment(HTTP_REQUESTS, labels());
    }

    pub fn add_error(&self) {
        self.increment(HTTP_ERRORS, Vec::new());
    }

    pub fn add_panic(&self) {
        self.increment(HTTP_PANICS, Vec::new());
    }

    /// One finished data-store call.
    pub fn observe_db_call(&self, table: &str, operation: &str, elapsed: Duration) {
        let labels = || {
            vec![
                Label::new("table", table.to_owned()),
                Label::new("operation", operation.to_owned()),
            ]
        };
        self.observe(DB_CALL_DURATION, labels(), elapsed.as_secs_f64());
        self.increment(DB_CALLS, labels());
    }

    /// Prometheus text exposition of everything recorded so far.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

fn metadata() -> Metadata<'static> {
    Metadata::new(module_path!(), Level::INFO, Some(module_path!()))
}
