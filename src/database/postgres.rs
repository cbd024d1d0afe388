//! Postgres [`Driver`] on a `sqlx` pool.
//!
//! Rows come back as JSON: every statement that yields rows is wrapped as
//! `with t as (<sql>) select to_jsonb(t) from t`, so callers decode them with
//! serde instead of column-by-column.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};

use super::{DbError, Driver, UNIQUE_VIOLATION};
use crate::config::DbConfig;

pub struct PgDriver {
    pool: PgPool,
}

impl PgDriver {
    /// Builds a lazily connecting pool; nothing touches the network until the
    /// first statement or [`ping`](Driver::ping).
    pub fn open(cfg: &DbConfig) -> Result<Self, DbError> {
        let (host, port) = match cfg.host.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|e| DbError::Driver(anyhow::anyhow!("db port `{port}`: {e}")))?;
                (host, port)
            }
            None => (cfg.host.as_str(), 5432),
        };

        let options = PgConnectOptions::new()
            .host(host)
            .port(port)
            .username(&cfg.user)
            .password(&cfg.pass)
            .database(&cfg.name)
            .ssl_mode(PgSslMode::Disable);

        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy_with(options);

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Driver for PgDriver {
    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Value>, DbError> {
        let sql = as_json_rows(sql);
        let rows = bind(sqlx::query(&sql), args)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;
        rows.iter()
            .map(|row| row.try_get::<Value, _>(0).map_err(classify))
            .collect()
    }

    async fn query_row(&self, sql: &str, args: &[Value]) -> Result<Value, DbError> {
        let sql = as_json_rows(sql);
        let row = bind(sqlx::query(&sql), args)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?
            .ok_or(DbError::NoRows)?;
        row.try_get::<Value, _>(0).map_err(classify)
    }

    async fn exec(&self, sql: &str, args: &[Value]) -> Result<u64, DbError> {
        let done = bind(sqlx::query(sql), args)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(done.rows_affected())
    }

    async fn ping(&self) -> Result<(), DbError> {
        sqlx::query("select 1").execute(&self.pool).await.map_err(classify)?;
        Ok(())
    }
}

fn as_json_rows(sql: &str) -> String {
    format!("with t as ({}) select to_jsonb(t) from t", sql.trim().trim_end_matches(';'))
}

/// Binds JSON scalars as their natural Postgres types; arrays and objects go
/// in as `jsonb`.
fn bind<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    args: &'q [Value],
) -> Query<'q, Postgres, PgArguments> {
    for arg in args {
        query = match arg {
            Value::Null => query.bind(Option::<String>::None),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => query.bind(i),
                (None, Some(f)) => query.bind(f),
                (None, None) => query.bind(n.to_string()),
            },
            Value::String(s) => query.bind(s.as_str()),
            other => query.bind(sqlx::types::Json(other)),
        };
    }
    query
}

fn classify(err: sqlx::Error) -> DbError {
    match err {
        sqlx::Error::RowNotFound => DbError::NoRows,
        sqlx::Error::Database(ref db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            DbError::UniqueViolation
        }
        other => DbError::Driver(other.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_statements_as_json_rows() {
        assert_eq!(
            as_json_rows("select * from books where id = $1;"),
            "with t as (select * from books where id = $1) select to_jsonb(t) from t"
        );
    }

    #[test]
    fn row_not_found_is_no_rows() {
        assert!(matches!(classify(sqlx::Error::RowNotFound), DbError::NoRows));
        assert!(matches!(classify(sqlx::Error::PoolTimedOut), DbError::Driver(_)));
    }

    #[tokio::test]
    async fn open_parses_host_and_port() {
        let cfg = DbConfig { host: "db.internal:6543".into(), ..DbConfig::default() };
        assert!(PgDriver::open(&cfg).is_ok());

        let cfg = DbConfig { host: "db.internal:nope".into(), ..DbConfig::default() };
        assert!(PgDriver::open(&cfg).is_err());
    }
}
