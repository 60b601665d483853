use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::FromRow;

use crate::model::Model;
use crate::service::ServiceQuery;
use crate::store::{sql, Store, StoreError};

/// Storage seam for one entity type. The default implementation is
/// [`Repository`]; tests substitute in-memory doubles.
#[async_trait]
pub trait EntityRepository<T>: Send + Sync {
    async fn find_one_by_id(
        &self,
        item_id: i64,
        scope: Option<&ServiceQuery>,
    ) -> Result<T, StoreError>;

    async fn find_one_by_user(
        &self,
        user_id: i64,
        scope: Option<&ServiceQuery>,
    ) -> Result<T, StoreError>;

    async fn find_many_by_user(
        &self,
        user_id: i64,
        scope: Option<&ServiceQuery>,
    ) -> Result<Vec<T>, StoreError>;

    async fn create_one(&self, item: T) -> Result<T, StoreError>;

    async fn update_one(&self, item_id: i64, item: T) -> Result<T, StoreError>;

    async fn delete_one(&self, item_id: i64) -> Result<(), StoreError>;
}

/// Translates identity- and ownership-scoped lookups into store calls for one
/// table. The identity predicate is composed here, not by callers, so no
/// configuration can drop it.
pub struct Repository<T> {
    store: Arc<Store>,
    table: String,
    joins: Vec<String>,
    eager_selects: Vec<String>,
    _phantom: PhantomData<T>,
}

impl<T> Repository<T>
where
    T: Model + Serialize + for<'r> FromRow<'r, PgRow> + Send + Sync + Unpin,
{
    pub fn new(store: Arc<Store>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
            joins: Vec::new(),
            eager_selects: Vec::new(),
            _phantom: PhantomData,
        }
    }

    /// Add a join fragment applied to list queries.
    pub fn with_join(mut self, join: impl Into<String>) -> Self {
        self.joins.push(join.into());
        self
    }

    /// Add an eager select expression applied to list queries.
    pub fn with_eager_select(mut self, expr: impl Into<String>) -> Self {
        self.eager_selects.push(expr.into());
        self
    }
}

/// Compose the mandatory key predicate with an optional caller scope.
/// The key always binds as `$1`; scope placeholders renumber after it.
fn scope_filter(
    table: &str,
    column: &str,
    key: i64,
    scope: Option<&ServiceQuery>,
) -> (String, Vec<Value>) {
    let mut clause = format!("\"{}\".\"{}\" = $1", table, column);
    let mut args = vec![Value::from(key)];

    if let Some(extra) = scope {
        if !extra.clause().is_empty() {
            clause.push_str(" AND ");
            clause.push_str(&sql::renumber_placeholders(extra.clause(), 2));
            args.extend_from_slice(extra.args());
        }
    }

    (clause, args)
}

#[async_trait]
impl<T> EntityRepository<T> for Repository<T>
where
    T: Model + Serialize + for<'r> FromRow<'r, PgRow> + Send + Sync + Unpin,
{
    async fn find_one_by_id(
        &self,
        item_id: i64,
        scope: Option<&ServiceQuery>,
    ) -> Result<T, StoreError> {
        let (clause, args) = scope_filter(&self.table, "id", item_id, scope);
        let item: T = self
            .store
            .find_one(&self.table, &self.joins, &[], &clause, &args)
            .await?;

        tracing::debug!(table = %self.table, item = item.id(), "found one record");
        Ok(item)
    }

    async fn find_one_by_user(
        &self,
        user_id: i64,
        scope: Option<&ServiceQuery>,
    ) -> Result<T, StoreError> {
        let (clause, args) = scope_filter(&self.table, "user_id", user_id, scope);
        let item: T = self
            .store
            .find_one(&self.table, &self.joins, &[], &clause, &args)
            .await?;

        tracing::debug!(table = %self.table, item = item.id(), "found one record by user");
        Ok(item)
    }

    async fn find_many_by_user(
        &self,
        user_id: i64,
        scope: Option<&ServiceQuery>,
    ) -> Result<Vec<T>, StoreError> {
        let (clause, args) = scope_filter(&self.table, "user_id", user_id, scope);
        self.store
            .find_many(&self.table, &self.joins, &self.eager_selects, &clause, &args)
            .await
    }

    async fn create_one(&self, item: T) -> Result<T, StoreError> {
        self.store.create_one(&self.table, &item).await
    }

    async fn update_one(&self, item_id: i64, item: T) -> Result<T, StoreError> {
        self.store.update_one(&self.table, item_id, &item).await
    }

    async fn delete_one(&self, item_id: i64) -> Result<(), StoreError> {
        self.store.delete_one(&self.table, item_id).await
    }
}
