//! Data access: a three-operation [`Driver`] surface wrapped, per logical
//! operation, in a chain of [`Interceptor`]s.
//!
//! ```text
//! db.call("books", "QueryByID")   ← fresh chain: logging → metrics → error mapping
//!   .query_row_as::<Book>(&ctx, sql, args)
//! ```

mod driver;
mod interceptor;
pub mod postgres;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::context::Context;
use crate::metrics::Metrics;

pub use driver::{Driver, Operation, Outcome, Statement};
pub use interceptor::{
    default_error_mapper, wrap_interceptors, BoxedInterceptor, Call, ErrorMapper, ErrorMapping,
    Interceptor, Logging, Timing,
};

/// Postgres `unique_violation`.
pub const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// The driver found no row where one was required.
    #[error("no rows in result set")]
    NoRows,

    /// The driver rejected a write on a unique constraint.
    #[error("unique constraint violated")]
    UniqueViolation,

    #[error("entry not found")]
    NotFound,

    #[error("entry not unique")]
    NotUnique,

    #[error("decoding row: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Driver(#[from] anyhow::Error),
}

/// Entry point for stores: owns the driver and hands out per-operation chains.
#[derive(Clone)]
pub struct Database {
    driver: Arc<dyn Driver>,
    metrics: Arc<Metrics>,
    mapper: ErrorMapper,
}

impl Database {
    pub fn new(driver: Arc<dyn Driver>, metrics: Arc<Metrics>) -> Self {
        Self { driver, metrics, mapper: default_error_mapper }
    }

    pub fn with_error_mapper(mut self, mapper: ErrorMapper) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    /// Builds the interceptor chain for one logical operation on `table`.
    pub fn call(&self, table: &'static str, operation: &'static str) -> Session {
        let interceptors: [BoxedInterceptor; 3] = [
            Arc::new(Logging),
            Arc::new(Timing::new(Arc::clone(&self.metrics), table, operation)),
            Arc::new(ErrorMapping::new(self.mapper)),
        ];
        Session { call: wrap_interceptors(&interceptors, driver::base_call(Arc::clone(&self.driver))) }
    }
}

/// One composed chain. Cheap to clone; reusable for several statements.
#[derive(Clone)]
pub struct Session {
    call: Call,
}

impl Session {
    pub async fn query(&self, ctx: &Context, sql: &str, args: Vec<Value>) -> Result<Vec<Value>, DbError> {
        match self.run(ctx, Operation::Query, sql, args).await? {
            Outcome::Rows(rows) => Ok(rows),
            other => Err(unexpected(Operation::Query, &other)),
        }
    }

    pub async fn query_row(&self, ctx: &Context, sql: &str, args: Vec<Value>) -> Result<Value, DbError> {
        match self.run(ctx, Operation::QueryRow, sql, args).await? {
            Outcome::Row(row) => Ok(row),
            other => Err(unexpected(Operation::QueryRow, &other)),
        }
    }

    pub async fn exec(&self, ctx: &Context, sql: &str, args: Vec<Value>) -> Result<u64, DbError> {
        match self.run(ctx, Operation::Exec, sql, args).await? {
            Outcome::Affected(n) => Ok(n),
            other => Err(unexpected(Operation::Exec, &other)),
        }
    }

    pub async fn query_as<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        sql: &str,
        args: Vec<Value>,
    ) -> Result<Vec<T>, DbError> {
        self.query(ctx, sql, args)
            .await?
            .into_iter()
            .map(|row| serde_json::from_value(row).map_err(DbError::from))
            .collect()
    }

    pub async fn query_row_as<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        sql: &str,
        args: Vec<Value>,
    ) -> Result<T, DbError> {
        let row = self.query_row(ctx, sql, args).await?;
        Ok(serde_json::from_value(row)?)
    }

    async fn run(&self, ctx: &Context, operation: Operation, sql: &str, args: Vec<Value>) -> Result<Outcome, DbError> {
        let stmt = Statement { operation, sql: Arc::from(sql), args };
        (self.call)(ctx.clone(), stmt).await
    }
}

fn unexpected(operation: Operation, outcome: &Outcome) -> DbError {
    DbError::Driver(anyhow::anyhow!("{operation:?} produced {}", outcome.kind()))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    /// Replays queued results and records every statement it sees.
    #[derive(Default)]
    pub struct Scripted {
        pub results: Mutex<VecDeque<Result<Outcome, DbError>>>,
        pub seen: Mutex<Vec<(Operation, String, Vec<Value>)>>,
    }

    impl Scripted {
        pub fn push(&self, result: Result<Outcome, DbError>) {
            self.results.lock().unwrap().push_back(result);
        }

        fn next(&self, operation: Operation, sql: &str, args: &[Value]) -> Result<Outcome, DbError> {
            self.seen.lock().unwrap().push((operation, sql.to_owned(), args.to_vec()));
            self.results.lock().unwrap().pop_front().unwrap_or(Err(DbError::NoRows))
        }
    }

    #[async_trait]
    impl Driver for Scripted {
        async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Value>, DbError> {
            match self.next(Operation::Query, sql, args)? {
                Outcome::Rows(rows) => Ok(rows),
                _ => Ok(Vec::new()),
            }
        }

        async fn query_row(&self, sql: &str, args: &[Value]) -> Result<Value, DbError> {
            match self.next(Operation::QueryRow, sql, args)? {
                Outcome::Row(row) => Ok(row),
                _ => Err(DbError::NoRows),
            }
        }

        async fn exec(&self, sql: &str, args: &[Value]) -> Result<u64, DbError> {
            match self.next(Operation::Exec, sql, args)? {
                Outcome::Affected(n) => Ok(n),
                _ => Ok(0),
            }
        }

        async fn ping(&self) -> Result<(), DbError> {
            Ok(())
        }
    }
}
