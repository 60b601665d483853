use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::model::Model;
use crate::repository::EntityRepository;
use crate::store::StoreError;

/// A named, reusable scoping predicate applied on top of the mandatory
/// identity filter for list and get operations. Immutable after
/// construction; one instance is shared read-only across requests.
#[derive(Debug, Clone)]
pub struct ServiceQuery {
    clause: String,
    args: Vec<Value>,
}

impl ServiceQuery {
    pub fn new(clause: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            clause: clause.into(),
            args,
        }
    }

    pub fn clause(&self) -> &str {
        &self.clause
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }
}

/// Errors from the orchestration layer. Each variant carries the operation
/// that failed; the not-found kind survives wrapping so the controller can
/// map it to a 404.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} failed: record not found")]
    NotFound(&'static str),

    #[error("{op} failed: {source}")]
    Store {
        op: &'static str,
        #[source]
        source: StoreError,
    },
}

impl ServiceError {
    fn wrap(op: &'static str, err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ServiceError::NotFound(op),
            other => ServiceError::Store { op, source: other },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::NotFound(_))
    }
}

/// The resource operations a controller binds to. Object-safe so tests can
/// substitute doubles for the default [`Service`].
#[async_trait]
pub trait ResourceService<T>: Send + Sync {
    async fn list_by_user(&self, user_id: i64) -> Result<Vec<T>, ServiceError>;

    async fn create_one(&self, user_id: i64, item: T) -> Result<T, ServiceError>;

    async fn get_one(&self, item_id: i64) -> Result<T, ServiceError>;

    async fn update_one(&self, item_id: i64, item: T) -> Result<T, ServiceError>;

    async fn delete_one(&self, item_id: i64) -> Result<(), ServiceError>;
}

/// Thin orchestration over a repository: the mandatory identity filter plus
/// two optional, configurable scope rules. Business rules for a concrete
/// resource live in its scope rules and its controller hooks, not here.
pub struct Service<T> {
    repo: Arc<dyn EntityRepository<T>>,
    list_scope: Option<ServiceQuery>,
    get_scope: Option<ServiceQuery>,
}

impl<T> Service<T>
where
    T: Model + Send + Sync + 'static,
{
    pub fn new(repo: Arc<dyn EntityRepository<T>>) -> Self {
        Self {
            repo,
            list_scope: None,
            get_scope: None,
        }
    }

    /// Narrow list results beyond the owner filter.
    pub fn with_list_scope(mut self, query: ServiceQuery) -> Self {
        self.list_scope = Some(query);
        self
    }

    /// Narrow single-record lookups beyond the id filter.
    pub fn with_get_scope(mut self, query: ServiceQuery) -> Self {
        self.get_scope = Some(query);
        self
    }
}

#[async_trait]
impl<T> ResourceService<T> for Service<T>
where
    T: Model + Send + Sync + 'static,
{
    async fn list_by_user(&self, user_id: i64) -> Result<Vec<T>, ServiceError> {
        self.repo
            .find_many_by_user(user_id, self.list_scope.as_ref())
            .await
            .map_err(|e| ServiceError::wrap("list user items", e))
    }

    async fn create_one(&self, user_id: i64, mut item: T) -> Result<T, ServiceError> {
        // Ownership is stamped here so no constructor can create an unowned record.
        item.set_user_id(user_id);

        self.repo
            .create_one(item)
            .await
            .map_err(|e| ServiceError::wrap("create item", e))
    }

    async fn get_one(&self, item_id: i64) -> Result<T, ServiceError> {
        self.repo
            .find_one_by_id(item_id, self.get_scope.as_ref())
            .await
            .map_err(|e| ServiceError::wrap("get item", e))
    }

    async fn update_one(&self, item_id: i64, item: T) -> Result<T, ServiceError> {
        self.repo
            .update_one(item_id, item)
            .await
            .map_err(|e| ServiceError::wrap("update item", e))
    }

    async fn delete_one(&self, item_id: i64) -> Result<(), ServiceError> {
        self.repo
            .delete_one(item_id)
            .await
            .map_err(|e| ServiceError::wrap("delete item", e))
    }
}
