use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::error;

use super::Middleware;
use crate::context::Context;
use crate::error::Error;
use crate::handler::{BoxedHandler, Handler};
use crate::metrics::Metrics;
use crate::request::Request;

/// Recovery boundary: a panic anywhere inside becomes an ordinary
/// [`Error::Internal`] carrying the panic message and a captured backtrace,
/// so the [`Errors`](super::Errors) middleware can still answer with a 500.
///
/// This is the only place in the crate that catches unwinds.
pub struct Panics {
    metrics: Arc<Metrics>,
}

impl Panics {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

impl Middleware for Panics {
    fn name(&self) -> &'static str {
        "panics"
    }

    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        let metrics = Arc::clone(&self.metrics);
        (move |ctx: Context, req: Request| {
            let next = Arc::clone(&next);
            let metrics = Arc::clone(&metrics);
            async move {
                let trace_id = ctx.trace_id().to_owned();
                // Building the future can panic too, not just polling it.
                let outcome = match panic::catch_unwind(AssertUnwindSafe(move || next.call(ctx, req))) {
                    Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
                    Err(payload) => Err(payload),
                };
                outcome.unwrap_or_else(|payload| {
                    metrics.add_panic();
                    Err(recovered(&trace_id, payload))
                })
            }
        })
        .into_boxed_handler()
    }
}

fn recovered(trace_id: &str, payload: Box<dyn Any + Send>) -> Error {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned());
    let trace = Backtrace::force_capture();

    error!(%trace_id, panic = %message, "panic recovered");
    Error::Internal(anyhow::anyhow!("PANIC [{message}] TRACE[{trace}]"))
}
