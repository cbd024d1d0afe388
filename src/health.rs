//! Debug listener: Kubernetes probes and the Prometheus scrape endpoint.
//!
//! | Probe | Path | Question |
//! |---|---|---|
//! | **Liveness** | `/debug/liveness` | Is the process alive? Failure → restart. |
//! | **Readiness** | `/debug/readiness` | Can the pod reach its database? Failure → pulled from load-balancer. |
//! | **Metrics** | `/metrics` | Prometheus text exposition. |
//!
//! This App runs without middleware; probes should not show up in request
//! metrics or logs.

use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Method, StatusCode};
use serde::Serialize;
use tracing::warn;

use crate::context::Context;
use crate::database::Driver;
use crate::error::Error;
use crate::metrics::Metrics;
use crate::request::Request;
use crate::response::Response;
use crate::router::App;

const READINESS_TIMEOUT: Duration = Duration::from_secs(1);

/// Where the pod runs, as injected by the Kubernetes downward API.
#[derive(Debug, Serialize)]
pub struct Liveness {
    pub status: &'static str,
    pub build: String,
    pub host: String,
    pub name: String,
    #[serde(rename = "podIP")]
    pub pod_ip: String,
    pub node: String,
    pub namespace: String,
}

impl Liveness {
    fn from_env(build: &str) -> Self {
        let var = |name: &str| std::env::var(name).unwrap_or_else(|_| "unavailable".to_owned());
        Self {
            status: "up",
            build: build.to_owned(),
            host: var("HOSTNAME"),
            name: var("KUBERNETES_PODNAME"),
            pod_ip: var("KUBERNETES_NAMESPACE_POD_IP"),
            node: var("KUBERNETES_NODENAME"),
            namespace: var("KUBERNETES_NAMESPACE"),
        }
    }
}

/// Builds the debug App.
pub fn app(build: &'static str, db: Arc<dyn Driver>, metrics: Arc<Metrics>) -> App {
    App::new(Vec::new())
        .on(Method::GET, "/debug/liveness", move |_ctx: Context, _req: Request| async move {
            Response::json(StatusCode::OK, &Liveness::from_env(build))
        })
        .on(Method::GET, "/debug/readiness", move |_ctx: Context, _req: Request| {
            let db = Arc::clone(&db);
            async move { readiness(db.as_ref()).await }
        })
        .on(Method::GET, "/metrics", move |_ctx: Context, _req: Request| {
            let metrics = Arc::clone(&metrics);
            async move {
                Ok::<_, Error>(Response::text(metrics.render()).with_header(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; version=0.0.4"),
                ))
            }
        })
}

/// `200 {"status":"ok"}` when the database answers within a second, else
/// `500 {"status":"db not ready"}`.
pub async fn readiness(db: &dyn Driver) -> Result<Response, Error> {
    let failure = match tokio::time::timeout(READINESS_TIMEOUT, db.ping()).await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(_) => Some(format!("ping timed out after {READINESS_TIMEOUT:?}")),
    };

    match failure {
        None => Response::json(StatusCode::OK, &serde_json::json!({ "status": "ok" })),
        Some(reason) => {
            warn!(%reason, "readiness failure");
            Response::json(StatusCode::INTERNAL_SERVER_ERROR, &serde_json::json!({ "status": "db not ready" }))
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::database::DbError;

    struct Down;

    #[async_trait]
    impl Driver for Down {
        async fn query(&self, _: &str, _: &[Value]) -> Result<Vec<Value>, DbError> { Err(DbError::NoRows) }
        async fn query_row(&self, _: &str, _: &[Value]) -> Result<Value, DbError> { Err(DbError::NoRows) }
        async fn exec(&self, _: &str, _: &[Value]) -> Result<u64, DbError> { Err(DbError::NoRows) }
        async fn ping(&self) -> Result<(), DbError> {
            Err(DbError::Driver(anyhow::anyhow!("connection refused")))
        }
    }

    fn debug_app(db: Arc<dyn Driver>) -> App {
        app("test", db, Arc::new(Metrics::new().unwrap()))
    }

    #[tokio::test]
    async fn readiness_reports_db_state() {
        let res = debug_app(Arc::new(Down)).call(Request::new(Method::GET, "/debug/readiness")).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.body(), br#"{"status":"db not ready"}"#);

        let up = Arc::new(crate::database::testing::Scripted::default());
        let res = debug_app(up).call(Request::new(Method::GET, "/debug/readiness")).await;
        assert_eq!(res.status_code(), StatusCode::OK);
    }

    #[tokio::test]
    async fn liveness_is_always_up() {
        let res = debug_app(Arc::new(Down)).call(Request::new(Method::GET, "/debug/liveness")).await;
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["status"], "up");
        assert_eq!(body["build"], "test");
    }

    #[tokio::test]
    async fn metrics_are_served_as_text() {
        let metrics = Arc::new(Metrics::new().unwrap());
        metrics.add_panic();
        let app = app("test", Arc::new(Down), Arc::clone(&metrics));
        let res = app.call(Request::new(Method::GET, "/metrics")).await;
        assert!(String::from_utf8_lossy(res.body()).contains("http_panics_total 1"));
    }
}
