//! SQL execution over a PostgreSQL pool. Rows are surfaced as JSON maps so
//! the model layer stays independent of column types.

use crate::config::DbConfig;
use crate::error::PersistenceError;
use crate::sql::params::BindValue;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Transaction};
use std::time::Duration;

/// One result row, column name -> JSON value.
pub type Row = serde_json::Map<String, Value>;

/// Execution seam for terminal query operations. Implemented by [`Db`] and by
/// in-memory fakes in tests.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, PersistenceError>;
    async fn fetch_optional(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<Option<Row>, PersistenceError>;
    /// Execute a statement, returning the number of affected rows.
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, PersistenceError>;
}

/// Database handle wrapping a sqlx pool. Checkout/checkin and connection
/// health are the pool's concern; acquisition fails after the configured
/// timeout instead of blocking indefinitely.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    pub async fn connect(config: &DbConfig) -> Result<Self, PersistenceError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url())
            .await?;
        Ok(Db { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Db { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Start a transaction. One transaction per unit of work; the borrow on
    /// the returned handle prevents nested `begin` on the same connection.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, PersistenceError> {
        Ok(self.pool.begin().await?)
    }

    /// Round-trip health probe, for readiness checks.
    pub async fn ping(&self) -> Result<(), PersistenceError> {
        sqlx::query("SELECT 1").fetch_optional(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SqlExecutor for Db {
    async fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, PersistenceError> {
        tracing::debug!(sql = %sql, params = ?params, "query");
        let rows = bind_params(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_map).collect())
    }

    async fn fetch_optional(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<Option<Row>, PersistenceError> {
        tracing::debug!(sql = %sql, params = ?params, "query");
        let row = bind_params(sqlx::query(sql), params)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_map))
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, PersistenceError> {
        tracing::debug!(sql = %sql, params = ?params, "execute");
        let done = bind_params(sqlx::query(sql), params)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }
}

/// Bind JSON params in order onto a prepared query.
pub(crate) fn bind_params<'q>(
    mut query: sqlx::query::Query<'q, Postgres, PgArguments>,
    params: &[Value],
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    for p in params {
        query = query.bind(BindValue::from_json(p));
    }
    query
}

/// Decode a row to a JSON map, one typed probe per column.
pub(crate) fn row_to_map(row: &PgRow) -> Row {
    use sqlx::Column;
    use sqlx::Row as _;
    let mut map = Row::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    map
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row as _;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%d %H:%M:%S").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}
