use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
    routing::post,
    Json, Router,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ApiError;
use crate::model::{User, UserStore};
use crate::store::StoreError;

pub const TOKEN_TTL_HOURS: i64 = 24;

/// Signed, time-bounded identity assertion carried as a bearer token.
/// All timestamps are unix seconds; `sub` is the decimal-encoded user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    pub nbf: i64,
    pub aud: String,
    pub iss: String,
}

impl Claims {
    pub fn new(user_id: i64, audience: impl Into<String>, issuer: impl Into<String>) -> Self {
        let now = Utc::now();
        let exp = now + Duration::hours(TOKEN_TTL_HOURS);

        Self {
            sub: user_id.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            aud: audience.into(),
            iss: issuer.into(),
        }
    }

    /// Parse the subject back into a user id.
    pub fn subject_id(&self) -> Result<i64, AuthError> {
        self.sub
            .parse()
            .map_err(|_| AuthError::InvalidToken(format!("bad subject: {}", self.sub)))
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token signing failed")]
    Signing(#[source] jsonwebtoken::errors::Error),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("user lookup failed")]
    UserLookup(#[source] StoreError),
}

/// The authenticated principal for the current request, written once by the
/// authentication middleware and read by handlers downstream.
#[derive(Clone)]
pub struct CurrentUser(pub Arc<dyn User>);

impl CurrentUser {
    pub fn id(&self) -> i64 {
        self.0.id()
    }
}

/// Issues and validates identity tokens and resolves the caller for each
/// request. The signing secret is fixed at construction and read-only
/// afterwards, so the service is shared freely across requests.
pub struct AuthService {
    signing_secret: String,
    audience: String,
    issuer: String,
    users: Arc<dyn UserStore>,
}

impl AuthService {
    pub fn new(
        signing_secret: impl Into<String>,
        audience: impl Into<String>,
        issuer: impl Into<String>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        Self {
            signing_secret: signing_secret.into(),
            audience: audience.into(),
            issuer: issuer.into(),
            users,
        }
    }

    /// Sign a 24h token for the given user.
    pub fn issue_token(&self, user: &dyn User) -> Result<String, AuthError> {
        let claims = Claims::new(user.id(), self.audience.as_str(), self.issuer.as_str());

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.signing_secret.as_bytes()),
        )
        .map_err(AuthError::Signing)
    }

    /// Verify signature and time bounds. Only HS256 is accepted; a token
    /// signed with any other algorithm fails validation outright.
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_nbf = true;
        validation.set_audience(&[self.audience.as_str()]);
        validation.set_issuer(&[self.issuer.as_str()]);

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.signing_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        Ok(token_data.claims)
    }

    /// Resolve credentials through the user store and issue a token.
    pub async fn login(&self, username: &str, password: &str) -> Result<String, AuthError> {
        let user = self
            .users
            .find_by_credentials(username, password)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => AuthError::InvalidCredentials,
                other => AuthError::UserLookup(other),
            })?;

        self.issue_token(user.as_ref())
    }

    async fn resolve_bearer(&self, headers: &HeaderMap) -> Result<CurrentUser, AuthError> {
        let token = bearer_token(headers)?;
        let claims = self.validate_token(&token)?;
        let user_id = claims.subject_id()?;

        let user = self.users.find_by_id(user_id).await.map_err(|e| match e {
            StoreError::NotFound => AuthError::InvalidToken(format!("unknown subject: {}", user_id)),
            other => AuthError::UserLookup(other),
        })?;

        Ok(CurrentUser(user))
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<String, AuthError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| AuthError::InvalidToken("missing Authorization header".to_string()))?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| AuthError::InvalidToken("invalid Authorization header".to_string()))?;

    match auth_str.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.to_string()),
        _ => Err(AuthError::InvalidToken(
            "Authorization header must use Bearer token format".to_string(),
        )),
    }
}

/// Middleware requiring a valid bearer token. Attaches the resolved
/// `CurrentUser` to the request; the wrapped handler never runs on failure.
pub async fn require_auth(
    State(auth): State<Arc<AuthService>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = auth.resolve_bearer(&headers).await.map_err(|e| {
        tracing::warn!("Authentication failed: {}", e);
        ApiError::from(e)
    })?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Middleware requiring an already-authenticated admin user. Must run inside
/// `require_auth`.
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let user = request
        .extensions()
        .get::<CurrentUser>()
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    if !user.0.is_admin() {
        return Err(ApiError::unauthorized("User is not an admin"));
    }

    Ok(next.run(request).await)
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    token: String,
}

async fn login_handler(
    State(auth): State<Arc<AuthService>>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let token = auth.login(&body.username, &body.password).await?;
    Ok(Json(LoginResponse { token }))
}

/// Token acquisition routes: `POST /login`.
pub fn routes(auth: Arc<AuthService>) -> Router {
    Router::new().route("/login", post(login_handler)).with_state(auth)
}
