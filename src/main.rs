use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use restfold::auth::{self, AuthService, CurrentUser};
use restfold::config::AppConfig;
use restfold::controller::{Controller, ControllerState, Loaded, Ownership};
use restfold::error::ApiError;
use restfold::model::{Model, Resource, User, UserStore};
use restfold::repository::Repository;
use restfold::service::{ResourceService, Service, ServiceQuery};
use restfold::store::{Store, StoreError};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        password_digest TEXT NOT NULL,
        is_admin BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
    "CREATE TABLE IF NOT EXISTS notes (
        id BIGSERIAL PRIMARY KEY,
        user_id BIGINT NOT NULL REFERENCES users(id),
        title TEXT NOT NULL,
        body TEXT NOT NULL DEFAULT '',
        archived BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
    "CREATE OR REPLACE FUNCTION touch_updated_at() RETURNS TRIGGER AS $$
    BEGIN
        NEW.updated_at = NOW();
        RETURN NEW;
    END;
    $$ LANGUAGE plpgsql",
    "DROP TRIGGER IF EXISTS notes_touch_updated_at ON notes",
    "CREATE TRIGGER notes_touch_updated_at
        BEFORE UPDATE ON notes
        FOR EACH ROW EXECUTE FUNCTION touch_updated_at()",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Build order: config, store, user store, auth, repository, service,
    // controller, router, server.
    let config = AppConfig::from_env().context("loading configuration")?;

    let store = Arc::new(
        Store::connect(&config.database_url)
            .await
            .context("connecting to database")?,
    );
    store.migrate(SCHEMA).await.context("running schema statements")?;

    let users: Arc<dyn UserStore> = Arc::new(PgUserStore::new(store.clone()));
    let auth_svc = Arc::new(AuthService::new(
        config.signing_secret.clone(),
        config.token_audience.clone(),
        config.token_issuer.clone(),
        users,
    ));

    let repo = Arc::new(Repository::<Note>::new(store.clone(), "notes"));
    let notes = Arc::new(Service::new(repo).with_list_scope(ServiceQuery::new(
        "\"notes\".\"archived\" = ?",
        vec![json!(false)],
    )));

    let controller = Controller::new(
        notes,
        auth_svc.clone(),
        Arc::new(note_from_create),
        Arc::new(note_from_update),
        Ownership::OwnerMatch,
    )
    .with_detail_route("/archive", post(archive_note));

    let app = Router::new()
        .merge(health_routes(store.clone()))
        .nest("/auth", auth::routes(auth_svc))
        .nest("/notes", controller.into_router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let bind_addr = format!("0.0.0.0:{}", config.listen_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {}", bind_addr))?;

    tracing::info!("Listening on http://{}", bind_addr);
    axum::serve(listener, app).await.context("server")?;

    Ok(())
}

// --- Notes resource ---

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
struct Note {
    id: i64,
    user_id: i64,
    title: String,
    body: String,
    // Null fields are skipped on write, so the database keeps its defaults on
    // insert and the stored values on partial update.
    archived: Option<bool>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl Model for Note {
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

#[derive(Debug, Serialize)]
struct NoteDto {
    id: i64,
    title: String,
    body: String,
    archived: bool,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl Resource for Note {
    type Dto = NoteDto;

    fn to_dto(&self) -> NoteDto {
        NoteDto {
            id: self.id,
            title: self.title.clone(),
            body: self.body.clone(),
            archived: self.archived.unwrap_or(false),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct NoteDraft {
    title: String,
    #[serde(default)]
    body: String,
}

fn note_from_create(user: &CurrentUser, body: Value) -> Result<Note, ApiError> {
    let draft: NoteDraft =
        serde_json::from_value(body).map_err(|e| ApiError::bad_request(e.to_string()))?;

    Ok(Note {
        id: 0,
        user_id: user.id(),
        title: draft.title,
        body: draft.body,
        archived: Some(false),
        created_at: None,
        updated_at: None,
    })
}

fn note_from_update(user: &CurrentUser, body: Value) -> Result<Note, ApiError> {
    let draft: NoteDraft =
        serde_json::from_value(body).map_err(|e| ApiError::bad_request(e.to_string()))?;

    Ok(Note {
        id: 0,
        user_id: user.id(),
        title: draft.title,
        body: draft.body,
        archived: None,
        created_at: None,
        updated_at: None,
    })
}

/// POST /notes/:id/archive - flag the loaded note as archived
async fn archive_note(
    State(state): State<Arc<ControllerState<Note>>>,
    Extension(Loaded(note)): Extension<Loaded<Note>>,
) -> Result<Json<NoteDto>, ApiError> {
    let item_id = note.id;
    let mut update = note;
    update.archived = Some(true);

    let archived = state.service().update_one(item_id, update).await?;
    Ok(Json(archived.to_dto()))
}

// --- Users ---

#[derive(Debug, Clone, FromRow)]
struct UserRow {
    id: i64,
    username: String,
    password_digest: String,
    is_admin: bool,
}

#[derive(Debug)]
struct AppUser {
    id: i64,
    is_admin: bool,
}

impl User for AppUser {
    fn id(&self) -> i64 {
        self.id
    }

    fn is_admin(&self) -> bool {
        self.is_admin
    }
}

/// User lookups over the `users` table.
struct PgUserStore {
    store: Arc<Store>,
}

impl PgUserStore {
    fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, user_id: i64) -> Result<Arc<dyn User>, StoreError> {
        let row: UserRow = self
            .store
            .find_one("users", &[], &[], "\"users\".\"id\" = $1", &[json!(user_id)])
            .await?;

        Ok(Arc::new(AppUser {
            id: row.id,
            is_admin: row.is_admin,
        }))
    }

    async fn find_by_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Arc<dyn User>, StoreError> {
        let row: UserRow = self
            .store
            .find_one(
                "users",
                &[],
                &[],
                "\"users\".\"username\" = $1",
                &[json!(username)],
            )
            .await?;

        // A digest mismatch reads the same as an unknown username.
        if sha256_hex(password) != row.password_digest {
            tracing::warn!(username = %row.username, "credential check failed");
            return Err(StoreError::NotFound);
        }

        Ok(Arc::new(AppUser {
            id: row.id,
            is_admin: row.is_admin,
        }))
    }
}

fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

// --- Health ---

fn health_routes(store: Arc<Store>) -> Router {
    Router::new().route("/health", get(health)).with_state(store)
}

async fn health(State(store): State<Arc<Store>>) -> impl IntoResponse {
    let now = Utc::now();

    match store.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "timestamp": now, "database": "ok" })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "timestamp": now, "database_error": e.to_string() })),
        ),
    }
}
