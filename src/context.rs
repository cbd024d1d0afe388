//! Request-scoped state.
//!
//! A [`Context`] is created empty for every inbound request and bound exactly
//! once by the [`App`](crate::App) before any middleware runs. Binding stores a
//! [`Values`] record: trace id, start time and the response status, which the
//! error-translation step fills in and logging/metrics read afterwards.
//!
//! The handle is cheap to clone (one `Arc`) so it can move into boxed handler
//! futures, but it is never shared between requests.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::auth::Claims;
use crate::error::Error;

/// Trace id reported when a component runs outside a bound request.
pub const UNBOUND_TRACE_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Per-request state handle.
#[derive(Clone, Debug, Default)]
pub struct Context {
    inner: Arc<Slots>,
}

#[derive(Debug, Default)]
struct Slots {
    values: OnceLock<Values>,
    claims: OnceLock<Claims>,
}

/// The record bound to a request by the App.
#[derive(Debug)]
pub struct Values {
    trace_id: String,
    started_at: DateTime<Utc>,
    start: Instant,
    status: AtomicU16,
}

impl Values {
    fn fresh() -> Self {
        Self {
            trace_id: Uuid::now_v7().to_string(),
            started_at: Utc::now(),
            start: Instant::now(),
            status: AtomicU16::new(0),
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Final response status, or `0` until the error-translation step ran.
    pub fn status(&self) -> u16 {
        self.status.load(Ordering::Acquire)
    }
}

impl Context {
    /// An unbound context. Only the App should hand these to handlers, and only
    /// after calling [`attach`](Self::attach).
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a fresh record. First write wins: a second call keeps the original
    /// record and returns it.
    pub fn attach(&self) -> &Values {
        let mut created = false;
        let values = self.inner.values.get_or_init(|| {
            created = true;
            Values::fresh()
        });
        if !created {
            warn!(trace_id = %values.trace_id, "request context attached twice, keeping first record");
        }
        values
    }

    /// The bound record.
    ///
    /// A missing record means the handler chain is running outside the App,
    /// which is a misconfiguration the service cannot recover from, hence a
    /// shutdown error rather than a request error.
    pub fn values(&self) -> Result<&Values, Error> {
        self.inner
            .values
            .get()
            .ok_or_else(|| Error::shutdown("request context values not present"))
    }

    pub fn trace_id(&self) -> &str {
        self.inner.values.get().map_or(UNBOUND_TRACE_ID, Values::trace_id)
    }

    pub fn set_status(&self, status: u16) -> Result<(), Error> {
        self.values()?.status.store(status, Ordering::Release);
        Ok(())
    }

    /// Stores authenticated claims. Returns `false` if claims were already set,
    /// in which case the earlier claims are kept.
    pub fn set_claims(&self, claims: Claims) -> bool {
        self.inner.claims.set(claims).is_ok()
    }

    pub fn claims(&self) -> Option<&Claims> {
        self.inner.claims.get()
    }
}
