pub mod channels;
pub mod chat;
pub mod client;
pub mod db;
pub mod events;
pub mod media;
pub mod presence;
pub mod session;

use axum::{extract::FromRef, http::StatusCode, response::{IntoResponse, Response}, Json, Router};
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, SessionManagerLayer};

use crate::{channels::Channels, media::DynMediaStore, presence::Presence};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub presence: Presence,
    pub channels: Channels,
    pub media: DynMediaStore,
}

/// Full application router, shared by the server binary and the
/// integration tests.
pub fn app(state: AppState) -> Router {
    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::hours(12)));

    Router::new()
        .merge(session::router())
        .nest("/api/messages", chat::router())
        .with_state(state)
        .layer(session_layer)
        .layer(CorsLayer::permissive())
}

pub type AppResult<T> = Result<T, AppError>;
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("{}\n\n{}", self.0, self.0.backtrace()),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

/// Domain rejection (auth, validation). Infrastructure failures go
/// through `AppError` instead.
pub fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
