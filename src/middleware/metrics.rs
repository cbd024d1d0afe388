use std::sync::Arc;
use std::time::Instant;

use super::Middleware;
use crate::context::Context;
use crate::handler::{BoxedHandler, Handler};
use crate::metrics::Metrics;
use crate::request::Request;

/// Records one latency observation per request, labelled by path, method and
/// final status, plus an error count for every request that ended in a 4xx
/// or 5xx or escaped the chain as an error.
///
/// Fires on every outcome, including errors that escape the chain.
pub struct RequestMetrics {
    metrics: Arc<Metrics>,
}

impl RequestMetrics {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

impl Middleware for RequestMetrics {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        let metrics = Arc::clone(&self.metrics);
        (move |ctx: Context, req: Request| {
            let next = Arc::clone(&next);
            let metrics = Arc::clone(&metrics);
            async move {
                let values = ctx.values()?;
                let method = req.method().clone();
                let path = req.path().to_owned();
                let begin = Instant::now();

                let result = next.call(ctx.clone(), req).await;

                // Status is only recorded by the error-translation step; fall
                // back to the outcome itself when that step is not inside us.
                let code = match (values.status(), &result) {
                    (0, Ok(res)) => res.status_code().as_u16(),
                    (0, Err(err)) => err.status().as_u16(),
                    (code, _) => code,
                };
                metrics.observe_request(&path, method.as_str(), code, begin.elapsed());
                if result.is_err() || code >= 400 {
                    metrics.add_error();
                }

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
    async fn observes_successful_requests() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let handler = RequestMetrics::new(Arc::clone(&metrics)).wrap(ok_handler());
        handler.call(bound(), get("/v1/books")).await.unwrap();

        let out = metrics.render();
        let line = out.lines().find(|l| l.starts_with("http_requests_total{")).unwrap();
        assert!(line.contains(r#"path="/v1/books""#));
        assert!(line.contains(r#"method="GET""#));
        assert!(line.contains(r#"code="200""#));
        assert!(line.ends_with(" 1"));
        assert!(!out.contains("http_errors_total"));
    }

    #[tokio::test]
    async fn still_fires_when_the_handler_fails() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let handler = RequestMetrics::new(Arc::clone(&metrics))
            .wrap(failing_handler(|| Error::from(anyhow::anyhow!("db down"))));
        handler.call(bound(), get("/v1/books")).await.unwrap_err();

        let out = metrics.render();
        assert!(out.contains(r#"code="500""#));
        assert!(out.contains("http_errors_total 1"));
    }

    #[tokio::test]
    async fn absorbed_errors_are_still_counted() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let handler = RequestMetrics::new(Arc::clone(&metrics)).wrap(
            crate::middleware::Errors.wrap(failing_handler(|| {
                Error::request(http::StatusCode::NOT_FOUND, "book not found")
            })),
        );
        handler.call(bound(), get("/v1/books/1")).await.unwrap();

        let out = metrics.render();
        assert!(out.contains(r#"code="404""#));
        assert!(out.contains("http_errors_total 1"));
    }
}
