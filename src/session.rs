//! Session identity. Verification itself belongs to the external identity
//! provider; these endpoints only bind a verified user id to the session
//! cookie, which is what every chat operation reads.

use axum::{debug_handler, http::StatusCode, response::{IntoResponse, Response}, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;

use crate::{reject, AppResult, AppState};

pub const USER_ID: &str = "user_id";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
}

#[derive(Serialize, Deserialize)]
pub struct LoginBody {
    pub user_id: String,
}

#[debug_handler]
async fn login(session: Session, Json(LoginBody { user_id }): Json<LoginBody>) -> AppResult<Response> {
    if user_id.is_empty() {
        return Ok(reject(StatusCode::UNPROCESSABLE_ENTITY, "empty user_id"));
    }

    session.insert(USER_ID, user_id.clone()).await?;
    tracing::info!(%user_id, "session established");
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[debug_handler]
async fn logout(session: Session) -> AppResult<Response> {
    session.clear().await;
    Ok(StatusCode::NO_CONTENT.into_response())
}
