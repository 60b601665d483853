use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::store::StoreError;

/// Stored, owned data. Every record carries its own id and the id of the
/// user that owns it.
pub trait Model {
    fn id(&self) -> i64;
    fn user_id(&self) -> i64;
    fn set_user_id(&mut self, user_id: i64);
}

/// A model that can be rendered to clients. The DTO is the external shape;
/// storage-only fields stay out of it.
pub trait Resource: Model {
    type Dto: Serialize + Send;

    fn to_dto(&self) -> Self::Dto;
}

/// Authenticated principal. The source of truth lives in an external user
/// store; this crate only reads the capability.
pub trait User: Send + Sync {
    fn id(&self) -> i64;
    fn is_admin(&self) -> bool;
}

/// External user-lookup capability consumed by the auth layer.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Resolve a user by id. Absent users report `StoreError::NotFound`.
    async fn find_by_id(&self, user_id: i64) -> Result<Arc<dyn User>, StoreError>;

    /// Resolve a user by credentials. A mismatch reports `StoreError::NotFound`.
    async fn find_by_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Arc<dyn User>, StoreError>;
}
