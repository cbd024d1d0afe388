use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde_json::Value;

use super::interceptor::Call;
use super::DbError;
use crate::context::Context;

/// The store surface every chain bottoms out in.
///
/// Rows travel as JSON objects, one per row, keyed by column name. Positional
/// `$n` placeholders are bound from `args` in order.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Value>, DbError>;

    /// Exactly one row; [`DbError::NoRows`] when there is none.
    async fn query_row(&self, sql: &str, args: &[Value]) -> Result<Value, DbError>;

    /// Rows affected.
    async fn exec(&self, sql: &str, args: &[Value]) -> Result<u64, DbError>;

    async fn ping(&self) -> Result<(), DbError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Query,
    QueryRow,
    Exec,
}

/// What one statement travels through the chain as.
#[derive(Debug, Clone)]
pub struct Statement {
    pub operation: Operation,
    pub sql: Arc<str>,
    pub args: Vec<Value>,
}

#[derive(Debug)]
pub enum Outcome {
    Rows(Vec<Value>),
    Row(Value),
    Affected(u64),
}

impl Outcome {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Outcome::Rows(_) => "rows",
            Outcome::Row(_) => "a row",
            Outcome::Affected(_) => "an affected count",
        }
    }
}

/// The innermost call: dispatches a statement to `driver`.
pub(crate) fn base_call(driver: Arc<dyn Driver>) -> Call {
    Arc::new(move |_ctx: Context, stmt: Statement| {
        let driver = Arc::clone(&driver);
        async move {
            let Statement { operation, sql, args } = stmt;
            match operation {
                Operation::Query => driver.query(&sql, &args).await.map(Outcome::Rows),
                Operation::QueryRow => driver.query_row(&sql, &args).await.map(Outcome::Row),
                Operation::Exec => driver.exec(&sql, &args).await.map(Outcome::Affected),
            }
        }
        .boxed()
    })
}
