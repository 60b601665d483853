pub mod auth;
pub mod config;
pub mod controller;
pub mod error;
pub mod model;
pub mod repository;
pub mod service;
pub mod store;

pub use auth::{AuthService, Claims, CurrentUser};
pub use config::AppConfig;
pub use controller::{Controller, ControllerState, Loaded, Ownership};
pub use error::ApiError;
pub use model::{Model, Resource, User, UserStore};
pub use repository::{EntityRepository, Repository};
pub use service::{ResourceService, Service, ServiceError, ServiceQuery};
pub use store::{Store, StoreError};
