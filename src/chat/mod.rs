mod http;
mod seen;
pub mod store;
mod ws;

pub use http::{HistoryBody, HistoryResponse, SendResponse};
pub use seen::acknowledge;

use axum::{routing::{get, post}, Router};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/get", post(http::history))
        .route("/send", post(http::send))
        .route("/ws", get(ws::chat_ws))
}
