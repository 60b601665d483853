//! Shared fixtures: an in-memory notes service with a call counter, an
//! in-memory user store, and a router wired the same way a real consumer
//! would wire one.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::routing::post;
use axum::{Extension, Json, Router};
use serde::Serialize;
use serde_json::Value;
use tower::ServiceExt;

use restfold::auth::{self, AuthService, CurrentUser};
use restfold::controller::{Controller, ControllerState, Loaded, Ownership};
use restfold::error::ApiError;
use restfold::model::{Model, Resource, User, UserStore};
use restfold::service::{ResourceService, ServiceError};
use restfold::store::StoreError;

pub const TEST_SECRET: &str = "integration-test-secret";

pub const ALICE: i64 = 1;
pub const BOB: i64 = 2;
pub const ADMIN: i64 = 9;

#[derive(Debug, Clone, Serialize)]
pub struct TestNote {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub archived: bool,
}

impl Model for TestNote {
    fn id(&self) -> i64 {
        self.id
    }

    fn user_id(&self) -> i64 {
        self.user_id
    }

    fn set_user_id(&mut self, user_id: i64) {
        self.user_id = user_id;
    }
}

// The DTO deliberately omits user_id.
#[derive(Debug, Serialize)]
pub struct TestNoteDto {
    pub id: i64,
    pub title: String,
    pub archived: bool,
}

impl Resource for TestNote {
    type Dto = TestNoteDto;

    fn to_dto(&self) -> TestNoteDto {
        TestNoteDto {
            id: self.id,
            title: self.title.clone(),
            archived: self.archived,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TestUser {
    pub id: i64,
    pub admin: bool,
}

impl User for TestUser {
    fn id(&self) -> i64 {
        self.id
    }

    fn is_admin(&self) -> bool {
        self.admin
    }
}

/// Fixed set of users: alice, bob, and one admin.
pub struct MemoryUserStore {
    users: Vec<(TestUser, &'static str, &'static str)>,
}

impl MemoryUserStore {
    pub fn with_default_users() -> Self {
        Self {
            users: vec![
                (TestUser { id: ALICE, admin: false }, "alice", "alice-pw"),
                (TestUser { id: BOB, admin: false }, "bob", "bob-pw"),
                (TestUser { id: ADMIN, admin: true }, "root", "root-pw"),
            ],
        }
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, user_id: i64) -> Result<Arc<dyn User>, StoreError> {
        self.users
            .iter()
            .find(|(u, _, _)| u.id == user_id)
            .map(|(u, _, _)| Arc::new(u.clone()) as Arc<dyn User>)
            .ok_or(StoreError::NotFound)
    }

    async fn find_by_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Arc<dyn User>, StoreError> {
        self.users
            .iter()
            .find(|(_, name, pw)| *name == username && *pw == password)
            .map(|(u, _, _)| Arc::new(u.clone()) as Arc<dyn User>)
            .ok_or(StoreError::NotFound)
    }
}

/// In-memory notes service counting every call, so tests can assert that a
/// rejected request never reached storage.
pub struct MemoryNotes {
    items: Mutex<HashMap<i64, TestNote>>,
    next_id: AtomicI64,
    calls: AtomicUsize,
}

impl MemoryNotes {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn stored(&self, item_id: i64) -> Option<TestNote> {
        self.items.lock().unwrap().get(&item_id).cloned()
    }

    fn bump(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ResourceService<TestNote> for MemoryNotes {
    async fn list_by_user(&self, user_id: i64) -> Result<Vec<TestNote>, ServiceError> {
        self.bump();
        let mut items: Vec<TestNote> = self
            .items
            .lock()
            .unwrap()
            .values()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        items.sort_by_key(|n| n.id);
        Ok(items)
    }

    async fn create_one(&self, user_id: i64, mut item: TestNote) -> Result<TestNote, ServiceError> {
        self.bump();
        item.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        item.set_user_id(user_id);
        self.items.lock().unwrap().insert(item.id, item.clone());
        Ok(item)
    }

    async fn get_one(&self, item_id: i64) -> Result<TestNote, ServiceError> {
        self.bump();
        self.items
            .lock()
            .unwrap()
            .get(&item_id)
            .cloned()
            .ok_or(ServiceError::NotFound("get item"))
    }

    async fn update_one(&self, item_id: i64, mut item: TestNote) -> Result<TestNote, ServiceError> {
        self.bump();
        let mut items = self.items.lock().unwrap();
        let existing = items
            .get(&item_id)
            .cloned()
            .ok_or(ServiceError::NotFound("update item"))?;

        item.id = item_id;
        item.user_id = existing.user_id;
        items.insert(item_id, item.clone());
        Ok(item)
    }

    async fn delete_one(&self, item_id: i64) -> Result<(), ServiceError> {
        self.bump();
        self.items.lock().unwrap().remove(&item_id);
        Ok(())
    }
}

fn note_create(user: &CurrentUser, body: Value) -> Result<TestNote, ApiError> {
    let title = body
        .get("title")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::bad_request("title is required"))?;

    Ok(TestNote {
        id: 0,
        user_id: user.id(),
        title: title.to_string(),
        archived: false,
    })
}

fn note_update(user: &CurrentUser, body: Value) -> Result<TestNote, ApiError> {
    let title = body
        .get("title")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::bad_request("title is required"))?;
    let archived = body.get("archived").and_then(Value::as_bool).unwrap_or(false);

    Ok(TestNote {
        id: 0,
        user_id: user.id(),
        title: title.to_string(),
        archived,
    })
}

/// Caller-defined detail route mounted behind the load and ownership stages.
async fn archive_note(
    State(state): State<Arc<ControllerState<TestNote>>>,
    Extension(Loaded(note)): Extension<Loaded<TestNote>>,
) -> Result<Json<TestNoteDto>, ApiError> {
    let item_id = note.id;
    let mut update = note;
    update.archived = true;

    let archived = state.service().update_one(item_id, update).await?;
    Ok(Json(archived.to_dto()))
}

pub struct TestApp {
    pub router: Router,
    pub auth: Arc<AuthService>,
    pub notes: Arc<MemoryNotes>,
}

pub fn test_app() -> TestApp {
    let users = Arc::new(MemoryUserStore::with_default_users());
    let auth_svc = Arc::new(AuthService::new(
        TEST_SECRET,
        "restfold-tests",
        "restfold-tests",
        users,
    ));
    let notes = MemoryNotes::new();

    let controller = Controller::new(
        notes.clone() as Arc<dyn ResourceService<TestNote>>,
        auth_svc.clone(),
        Arc::new(note_create),
        Arc::new(note_update),
        Ownership::OwnerMatch,
    )
    .with_detail_route("/archive", post(archive_note));

    let router = Router::new()
        .nest("/auth", auth::routes(auth_svc.clone()))
        .nest("/notes", controller.into_router());

    TestApp {
        router,
        auth: auth_svc,
        notes,
    }
}

impl TestApp {
    pub fn token_for(&self, user_id: i64) -> String {
        self.auth
            .issue_token(&TestUser {
                id: user_id,
                admin: user_id == ADMIN,
            })
            .unwrap()
    }

    /// Send one request and return status plus parsed JSON body (Null when
    /// the body is empty).
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", t));
        }

        let request = match body {
            Some(json_body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json_body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            // Most responses are JSON, but framework-level extractor rejections
            // (e.g. a malformed login body) come back as plain text. Fall back
            // to a string value instead of panicking so tests that only assert
            // on the status can still inspect a parsed body.
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        (status, value)
    }
}
