// Generic five-route resource controller with the load/ownership middleware chain
use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, MethodRouter},
    Extension, Json, Router,
};
use serde_json::Value;

use crate::auth::{self, AuthService, CurrentUser};
use crate::error::ApiError;
use crate::model::{Model, Resource, User};
use crate::service::ResourceService;

/// Builds an entity from a request body, optionally consulting the caller.
pub type PayloadConstructor<T> =
    Arc<dyn Fn(&CurrentUser, Value) -> Result<T, ApiError> + Send + Sync>;

/// Access rule for a single loaded entity. There is no silent default: every
/// controller names its rule at construction.
pub enum Ownership<T> {
    /// The entity's owner id must equal the caller's id.
    OwnerMatch,
    /// Caller-supplied rule for group or shared ownership models.
    Custom(Arc<dyn Fn(&dyn User, &T) -> bool + Send + Sync>),
}

impl<T: Model> Ownership<T> {
    fn allows(&self, user: &dyn User, item: &T) -> bool {
        match self {
            Ownership::OwnerMatch => item.user_id() == user.id(),
            Ownership::Custom(check) => check(user, item),
        }
    }
}

impl<T> Clone for Ownership<T> {
    fn clone(&self) -> Self {
        match self {
            Ownership::OwnerMatch => Ownership::OwnerMatch,
            Ownership::Custom(check) => Ownership::Custom(check.clone()),
        }
    }
}

/// The entity loaded for the current detail request. The extension key is the
/// type itself, so controllers over distinct entity types can nest without
/// colliding; wrap the entity in a newtype to compose two controllers over
/// the same type.
#[derive(Clone)]
pub struct Loaded<T>(pub T);

/// Shared state for a mounted controller's handlers and middleware. Custom
/// detail-route handlers receive it through `State`.
pub struct ControllerState<T> {
    svc: Arc<dyn ResourceService<T>>,
    create_ctor: PayloadConstructor<T>,
    update_ctor: PayloadConstructor<T>,
    ownership: Ownership<T>,
}

impl<T> ControllerState<T> {
    pub fn service(&self) -> &Arc<dyn ResourceService<T>> {
        &self.svc
    }
}

/// Binds a resource service and the auth service into a five-route sub-API:
///
/// ```text
/// GET    /        list the caller's records
/// POST   /        create a record owned by the caller
/// GET    /:id     fetch one record
/// PATCH  /:id     update one record
/// DELETE /:id     delete one record
/// ```
///
/// Detail routes run behind a two-stage middleware chain: the load stage
/// resolves `:id` and stores the entity in the request, then the ownership
/// stage checks the caller against it. Additional caller-supplied detail
/// routes mount behind the same chain.
pub struct Controller<T> {
    state: Arc<ControllerState<T>>,
    auth: Arc<AuthService>,
    detail_routes: Vec<(String, MethodRouter<Arc<ControllerState<T>>>)>,
}

impl<T> Controller<T>
where
    T: Resource + Clone + Send + Sync + 'static,
{
    pub fn new(
        svc: Arc<dyn ResourceService<T>>,
        auth: Arc<AuthService>,
        create_ctor: PayloadConstructor<T>,
        update_ctor: PayloadConstructor<T>,
        ownership: Ownership<T>,
    ) -> Self {
        Self {
            state: Arc::new(ControllerState {
                svc,
                create_ctor,
                update_ctor,
                ownership,
            }),
            auth,
            detail_routes: Vec::new(),
        }
    }

    /// Mount an extra route under `/:id` behind the load and ownership
    /// stages. The HTTP method rides in the `MethodRouter`.
    pub fn with_detail_route(
        mut self,
        path: impl Into<String>,
        handler: MethodRouter<Arc<ControllerState<T>>>,
    ) -> Self {
        self.detail_routes.push((path.into(), handler));
        self
    }

    pub fn into_router(self) -> Router {
        let state = self.state;

        let mut detail = Router::new().route(
            "/:id",
            get(get_one::<T>).patch(update_one::<T>).delete(delete_one::<T>),
        );
        for (path, handler) in self.detail_routes {
            detail = detail.route(&format!("/:id{}", path), handler);
        }

        // Layer order is inside-out: ownership first so the load stage wraps it.
        let detail = detail
            .route_layer(middleware::from_fn_with_state(
                state.clone(),
                check_ownership::<T>,
            ))
            .route_layer(middleware::from_fn_with_state(
                state.clone(),
                load_entity::<T>,
            ));

        Router::new()
            .route("/", get(list::<T>).post(create::<T>))
            .merge(detail)
            .layer(middleware::from_fn_with_state(self.auth, auth::require_auth))
            .with_state(state)
    }
}

/// Load stage: parse `:id`, fetch the entity, stash it in the request.
/// Absence is a dead end; nothing further runs.
async fn load_entity<T>(
    State(state): State<Arc<ControllerState<T>>>,
    Path(params): Path<HashMap<String, String>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError>
where
    T: Resource + Clone + Send + Sync + 'static,
{
    let raw_id = params
        .get("id")
        .ok_or_else(|| ApiError::not_found("Record not found"))?;
    let item_id: i64 = raw_id
        .parse()
        .map_err(|_| ApiError::bad_request(format!("failed to parse id: {}", raw_id)))?;

    let item = state.svc.get_one(item_id).await.map_err(|e| {
        if e.is_not_found() {
            ApiError::not_found("Record not found")
        } else {
            tracing::error!("Failed to look up record: {}", e);
            ApiError::internal_server_error("An error occurred while processing your request")
        }
    })?;

    request.extensions_mut().insert(Loaded(item));
    Ok(next.run(request).await)
}

/// Ownership stage: check the caller against the loaded entity. A mismatch
/// renders the same 404 as a missing row.
async fn check_ownership<T>(
    State(state): State<Arc<ControllerState<T>>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError>
where
    T: Resource + Clone + Send + Sync + 'static,
{
    let user = request
        .extensions()
        .get::<CurrentUser>()
        .cloned()
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    let Loaded(item) = request
        .extensions()
        .get::<Loaded<T>>()
        .ok_or_else(|| ApiError::internal_server_error("Record not loaded"))?;

    if !state.ownership.allows(user.0.as_ref(), item) {
        return Err(ApiError::not_found("Record not found"));
    }

    Ok(next.run(request).await)
}

async fn list<T>(
    State(state): State<Arc<ControllerState<T>>>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<Vec<T::Dto>>, ApiError>
where
    T: Resource + Clone + Send + Sync + 'static,
{
    let items = state.svc.list_by_user(user.id()).await.map_err(|e| {
        tracing::error!("Failed to list records: {}", e);
        ApiError::from(e)
    })?;

    Ok(Json(items.iter().map(|item| item.to_dto()).collect()))
}

async fn create<T>(
    State(state): State<Arc<ControllerState<T>>>,
    Extension(user): Extension<CurrentUser>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<T::Dto>), ApiError>
where
    T: Resource + Clone + Send + Sync + 'static,
{
    let Json(body) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let item = (state.create_ctor)(&user, body)?;

    let created = state.svc.create_one(user.id(), item).await.map_err(|e| {
        tracing::error!("Failed to create record: {}", e);
        ApiError::from(e)
    })?;

    Ok((StatusCode::CREATED, Json(created.to_dto())))
}

async fn get_one<T>(Extension(Loaded(item)): Extension<Loaded<T>>) -> Json<T::Dto>
where
    T: Resource + Clone + Send + Sync + 'static,
{
    Json(item.to_dto())
}

async fn update_one<T>(
    State(state): State<Arc<ControllerState<T>>>,
    Extension(user): Extension<CurrentUser>,
    Extension(Loaded(item)): Extension<Loaded<T>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<T::Dto>, ApiError>
where
    T: Resource + Clone + Send + Sync + 'static,
{
    let Json(body) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let update = (state.update_ctor)(&user, body)?;

    let updated = state.svc.update_one(item.id(), update).await.map_err(|e| {
        tracing::error!("Failed to update record: {}", e);
        ApiError::from(e)
    })?;

    Ok(Json(updated.to_dto()))
}

async fn delete_one<T>(
    State(state): State<Arc<ControllerState<T>>>,
    Extension(Loaded(item)): Extension<Loaded<T>>,
) -> Result<StatusCode, ApiError>
where
    T: Resource + Clone + Send + Sync + 'static,
{
    state.svc.delete_one(item.id()).await.map_err(|e| {
        tracing::error!("Failed to delete record: {}", e);
        ApiError::from(e)
    })?;

    Ok(StatusCode::NO_CONTENT)
}
