//! Process-wide structured logging.

use tracing::{info_span, Span};
use tracing_subscriber::EnvFilter;

/// Installs a JSON `tracing` subscriber filtered by `RUST_LOG` (default
/// `info`) and returns the root span carrying `service`.
///
/// Safe to call more than once; later calls keep the first subscriber.
/// Instrument top-level futures with the returned span so every event
/// carries the service name.
pub fn init(service: &'static str) -> Span {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(false)
        .with_target(false)
        .try_init();

    info_span!("service", service)
}
