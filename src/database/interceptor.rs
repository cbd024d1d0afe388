use std::sync::Arc;
use std::time::Instant;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::info;

use super::driver::{Outcome, Statement};
use super::DbError;
use crate::context::Context;
use crate::metrics::Metrics;

/// One step of a data-layer chain. Same shape as an HTTP handler.
pub type Call = Arc<dyn Fn(Context, Statement) -> BoxFuture<'static, Result<Outcome, DbError>> + Send + Sync>;

/// A `Call -> Call` transformation, the data-layer twin of
/// [`Middleware`](crate::middleware::Middleware).
pub trait Interceptor: Send + Sync + 'static {
    fn wrap(&self, next: Call) -> Call;
}

pub type BoxedInterceptor = Arc<dyn Interceptor>;

/// Translates driver errors into domain errors.
pub type ErrorMapper = fn(DbError) -> DbError;

/// `NoRows` → `NotFound`, `UniqueViolation` → `NotUnique`; anything else as is.
pub fn default_error_mapper(err: DbError) -> DbError {
    match err {
        DbError::NoRows => DbError::NotFound,
        DbError::UniqueViolation => DbError::NotUnique,
        other => other,
    }
}

/// Wraps `call` so that `interceptors[0]` runs first.
pub fn wrap_interceptors(interceptors: &[BoxedInterceptor], call: Call) -> Call {
    interceptors.iter().rev().fold(call, |inner, i| i.wrap(inner))
}

/// Logs every statement with its arguments and the request's trace id.
pub struct Logging;

impl Interceptor for Logging {
    fn wrap(&self, next: Call) -> Call {
        Arc::new(move |ctx: Context, stmt: Statement| {
            info!(
                trace_id = %ctx.trace_id(),
                operation = ?stmt.operation,
                query = %stmt.sql,
                args = %serde_json::Value::from(stmt.args.clone()),
                "db call"
            );
            next(ctx, stmt)
        })
    }
}

/// Observes call latency under `table` and `operation`, failed calls included.
pub struct Timing {
    metrics: Arc<Metrics>,
    table: &'static str,
    operation: &'static str,
}

impl Timing {
    pub fn new(metrics: Arc<Metrics>, table: &'static str, operation: &'static str) -> Self {
        Self { metrics, table, operation }
    }
}

impl Interceptor for Timing {
    fn wrap(&self, next: Call) -> Call {
        let metrics = Arc::clone(&self.metrics);
        let (table, operation) = (self.table, self.operation);
        Arc::new(move |ctx: Context, stmt: Statement| {
            let metrics = Arc::clone(&metrics);
            let fut = next(ctx, stmt);
            async move {
                let start = Instant::now();
                let res = fut.await;
                metrics.observe_db_call(table, operation, start.elapsed());
                res
            }
            .boxed()
        })
    }
}

pub struct ErrorMapping {
    mapper: ErrorMapper,
}

impl ErrorMapping {
    pub fn new(mapper: ErrorMapper) -> Self {
        Self { mapper }
    }
}

impl Interceptor for ErrorMapping {
    fn wrap(&self, next: Call) -> Call {
        let mapper = self.mapper;
        Arc::new(move |ctx: Context, stmt: Statement| next(ctx, stmt).map(move |res| res.map_err(mapper)).boxed())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::database::driver::Operation;

    struct Tag {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Interceptor for Tag {
        fn wrap(&self, next: Call) -> Call {
            let (label, log) = (self.label, Arc::clone(&self.log));
            Arc::new(move |ctx: Context, stmt: Statement| {
                log.lock().unwrap().push(label);
                next(ctx, stmt)
            })
        }
    }

    fn statement() -> Statement {
        Statement { operation: Operation::Exec, sql: Arc::from("delete from books"), args: Vec::new() }
    }

    #[tokio::test]
    async fn every_interceptor_runs_before_the_driver() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let base: Call = {
            let log = Arc::clone(&log);
            Arc::new(move |_ctx: Context, _stmt: Statement| {
                log.lock().unwrap().push("driver");
                async { Ok::<_, DbError>(Outcome::Affected(3)) }.boxed()
            })
        };
        let chain: [BoxedInterceptor; 2] = [
            Arc::new(Tag { label: "first", log: Arc::clone(&log) }),
            Arc::new(Tag { label: "second", log: Arc::clone(&log) }),
        ];

        let res = wrap_interceptors(&chain, base)(Context::new(), statement()).await;
        assert!(matches!(res, Ok(Outcome::Affected(3))));
        assert_eq!(*log.lock().unwrap(), ["first", "second", "driver"]);
    }

    #[tokio::test]
    async fn mapping_leaves_other_errors_alone() {
        let base: Call = Arc::new(|_ctx: Context, _stmt: Statement| {
            async { Err::<Outcome, _>(DbError::Driver(anyhow::anyhow!("conn reset"))) }.boxed()
        });
        let call = ErrorMapping::new(default_error_mapper).wrap(base);
        let err = call(Context::new(), statement()).await.unwrap_err();
        assert_eq!(err.to_string(), "conn reset");
    }
}
