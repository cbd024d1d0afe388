use std::sync::Arc;

use tracing::info;

use super::Middleware;
use crate::context::Context;
use crate::handler::{BoxedHandler, Handler};
use crate::request::Request;

/// Emits `request started` / `request ended` around the inner handler.
///
/// The ended event carries the final status and the time since the request
/// was bound. The inner result is returned untouched.
pub struct Logger;

impl Middleware for Logger {
    fn name(&self) -> &'static str {
        "logger"
    }

    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        (move |ctx: Context, req: Request| {
            let next = Arc::clone(&next);
            async move {
                let values = ctx.values()?;
                let method = req.method().clone();
                let path = req.path().to_owned();

                info!(trace_id = %values.trace_id(), %method, %path, "request started");

                let result = next.call(ctx.clone(), req).await;

                info!(
                    trace_id = %values.trace_id(),
                    %method,
                    %path,
                    status = values.status(),
                    elapsed = ?values.elapsed(),
                    "request ended"
                );

                result
            }
        })
        .into_boxed_handler()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::testing::*;
    use crate::Error;

    #[tokio::test]
    async fn passes_errors_through() {
        let handler = Logger.wrap(failing_handler(|| Error::request(http::StatusCode::GONE, "gone")));
        let err = handler.call(bound(), get("/")).await.unwrap_err();
        assert_eq!(err.status(), http::StatusCode::GONE);
    }

    #[tokio::test]
    async fn refuses_to_run_unbound() {
        let err = Logger.wrap(ok_handler()).call(Context::new(), get("/")).await.unwrap_err();
        assert!(err.is_shutdown());
    }
}
