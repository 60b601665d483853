use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool};
use thiserror::Error;

pub mod sql;

/// Errors from the storage adapter. `NotFound` stays distinguishable so the
/// layers above can keep absence separate from failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("operation timed out")]
    Timeout,

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Per-operation deadline for storage work. Dropping the timed future on
/// expiry releases the operation on every exit path.
const QUERY_TIMEOUT: Duration = Duration::from_secs(1);

/// Thin Postgres adapter. Row types come and go through `FromRow`; write
/// statements are generated from each record's serialized fields.
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new().connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn timed<R, F>(&self, op: F) -> Result<R, StoreError>
    where
        F: std::future::Future<Output = Result<R, StoreError>>,
    {
        match tokio::time::timeout(QUERY_TIMEOUT, op).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout),
        }
    }

    /// Fetch a single row. Zero rows is `StoreError::NotFound`.
    pub async fn find_one<T>(
        &self,
        table: &str,
        joins: &[String],
        eager_selects: &[String],
        clause: &str,
        args: &[Value],
    ) -> Result<T, StoreError>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        sql::validate_identifier(table)?;
        let query = sql::select_sql(table, joins, eager_selects, clause);

        let row = self
            .timed(async {
                let mut q = sqlx::query_as::<_, T>(&query);
                for v in args {
                    q = sql::bind_value(q, v);
                }
                Ok(q.fetch_optional(&self.pool).await?)
            })
            .await?;

        row.ok_or(StoreError::NotFound)
    }

    /// Fetch all matching rows.
    pub async fn find_many<T>(
        &self,
        table: &str,
        joins: &[String],
        eager_selects: &[String],
        clause: &str,
        args: &[Value],
    ) -> Result<Vec<T>, StoreError>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        sql::validate_identifier(table)?;
        let query = sql::select_sql(table, joins, eager_selects, clause);

        let rows = self
            .timed(async {
                let mut q = sqlx::query_as::<_, T>(&query);
                for v in args {
                    q = sql::bind_value(q, v);
                }
                Ok(q.fetch_all(&self.pool).await?)
            })
            .await?;

        tracing::debug!(table, count = rows.len(), "found many records");
        Ok(rows)
    }

    /// Insert a record and return the stored row. The id column and null
    /// fields are left to the database.
    pub async fn create_one<T>(&self, table: &str, item: &T) -> Result<T, StoreError>
    where
        T: Serialize + for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        sql::validate_identifier(table)?;
        let record = sql::to_object(item)?;
        let (query, params) = sql::insert_sql(table, &record)?;

        let created = self
            .timed(async {
                let mut q = sqlx::query_as::<_, T>(&query);
                for v in &params {
                    q = sql::bind_value(q, v);
                }
                Ok(q.fetch_one(&self.pool).await?)
            })
            .await?;

        tracing::debug!(table, "created one record");
        Ok(created)
    }

    /// Partial update by id, returning the stored row. Null fields are left
    /// untouched; updating a vanished row is `StoreError::NotFound`.
    pub async fn update_one<T>(&self, table: &str, item_id: i64, item: &T) -> Result<T, StoreError>
    where
        T: Serialize + for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        sql::validate_identifier(table)?;
        let record = sql::to_object(item)?;
        let (query, params) = sql::update_sql(table, &record)?;

        let updated = self
            .timed(async {
                let mut q = sqlx::query_as::<_, T>(&query).bind(item_id);
                for v in &params {
                    q = sql::bind_value(q, v);
                }
                Ok(q.fetch_optional(&self.pool).await?)
            })
            .await?;

        tracing::debug!(table, item_id, "updated one record");
        updated.ok_or(StoreError::NotFound)
    }

    /// Delete by id. Deleting an absent row is not an error.
    pub async fn delete_one(&self, table: &str, item_id: i64) -> Result<(), StoreError> {
        sql::validate_identifier(table)?;
        let query = format!("DELETE FROM \"{}\" WHERE \"id\" = $1", table);

        let result = self
            .timed(async {
                Ok(sqlx::query(&query).bind(item_id).execute(&self.pool).await?)
            })
            .await?;

        tracing::debug!(table, item_id, rows = result.rows_affected(), "deleted one record");
        Ok(())
    }

    /// Run startup DDL statements in order.
    pub async fn migrate(&self, statements: &[&str]) -> Result<(), StoreError> {
        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        tracing::info!(count = statements.len(), "ran schema statements");
        Ok(())
    }

    /// Drop the given tables. Test and tooling helper.
    pub async fn drop_all(&self, tables: &[&str]) -> Result<(), StoreError> {
        for table in tables {
            sql::validate_identifier(table)?;
            let query = format!("DROP TABLE IF EXISTS \"{}\" CASCADE", table);
            sqlx::query(&query).execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Ping the pool to confirm connectivity.
    pub async fn health_check(&self) -> Result<(), StoreError> {
        self.timed(async {
            sqlx::query("SELECT 1").execute(&self.pool).await?;
            Ok(())
        })
        .await
    }
}
