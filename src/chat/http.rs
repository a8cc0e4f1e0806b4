use axum::{debug_handler, extract::{Multipart, State}, http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::chat::store::{self, Message, MessageType};
use crate::media::DynMediaStore;
use crate::session::USER_ID;
use crate::{reject, AppResult};

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryBody {
    pub to_user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendResponse {
    pub message: Message,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn history(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(HistoryBody { to_user_id }): Json<HistoryBody>,
) -> AppResult<Response> {
    let Some(user_id) = session.get::<String>(USER_ID).await? else {
        return Ok(reject(StatusCode::UNAUTHORIZED, "not signed in"));
    };

    let messages = store::list_between(&db_pool, &user_id, &to_user_id).await?;
    Ok(Json(HistoryResponse { messages }).into_response())
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn send(
    State(db_pool): State<SqlitePool>,
    State(media): State<DynMediaStore>,
    session: Session,
    mut multipart: Multipart,
) -> AppResult<Response> {
    let Some(user_id) = session.get::<String>(USER_ID).await? else {
        return Ok(reject(StatusCode::UNAUTHORIZED, "not signed in"));
    };

    let mut to_user_id = None;
    let mut from_user_id = None;
    let mut text: Option<String> = None;
    let mut message_type = None;
    let mut image: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("to_user_id") => to_user_id = Some(field.text().await?),
            Some("from_user_id") => from_user_id = Some(field.text().await?),
            Some("text") => text = Some(field.text().await?),
            Some("message_type") => message_type = Some(field.text().await?),
            Some("image") => {
                let name = field.file_name().unwrap_or("upload").to_owned();
                image = Some((name, field.bytes().await?.to_vec()));
            }
            _ => {}
        }
    }

    // The sender is whoever the session says it is; a body claiming
    // someone else is rejected outright.
    if let Some(claimed) = from_user_id {
        if claimed != user_id {
            return Ok(reject(StatusCode::FORBIDDEN, "sender does not match session"));
        }
    }

    let Some(to_user_id) = to_user_id.filter(|to| !to.is_empty()) else {
        return Ok(reject(StatusCode::UNPROCESSABLE_ENTITY, "missing to_user_id"));
    };
    let Some(message_type) = message_type else {
        return Ok(reject(StatusCode::UNPROCESSABLE_ENTITY, "missing message_type"));
    };
    let Ok(message_type) = MessageType::parse(&message_type) else {
        return Ok(reject(StatusCode::UNPROCESSABLE_ENTITY, "unknown message_type"));
    };

    let media_url = match message_type {
        MessageType::Text => {
            if text.as_deref().is_none_or(str::is_empty) {
                return Ok(reject(StatusCode::UNPROCESSABLE_ENTITY, "text message without text"));
            }
            None
        }
        MessageType::Image => {
            let Some((name, bytes)) = image else {
                return Ok(reject(StatusCode::UNPROCESSABLE_ENTITY, "image message without image"));
            };
            Some(media.put(&name, bytes).await?)
        }
    };

    let message = store::create(&db_pool, &user_id, &to_user_id, text, media_url, message_type).await?;
    tracing::debug!(id = %message.id, from = %message.from_user, to = %message.to_user, "message stored");

    Ok(Json(SendResponse { message }).into_response())
}
