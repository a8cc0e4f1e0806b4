use axum::{debug_handler, extract::{ws::WebSocket, State, WebSocketUpgrade}, http::StatusCode, response::Response};
use futures_util::{SinkExt, StreamExt};
use sqlx::SqlitePool;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tower_sessions::Session;
use uuid::Uuid;

use crate::channels::Channels;
use crate::chat::seen;
use crate::events::{ClientEvent, ServerEvent};
use crate::presence::Presence;
use crate::session::USER_ID;
use crate::{reject, AppResult};

#[debug_handler(state = crate::AppState)]
pub(crate) async fn chat_ws(
    State(db_pool): State<SqlitePool>,
    State(presence): State<Presence>,
    State(channels): State<Channels>,
    session: Session,

    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let Some(user_id) = session.get::<String>(USER_ID).await? else {
        return Ok(reject(StatusCode::UNAUTHORIZED, "not signed in"));
    };

    Ok(ws.on_upgrade(move |stream| handle_socket(stream, user_id, db_pool, presence, channels)))
}

async fn handle_socket(
    stream: WebSocket,
    user_id: String,
    db_pool: SqlitePool,
    presence: Presence,
    channels: Channels,
) {
    let conn_id = Uuid::now_v7();
    let (mut sender, mut receiver) = stream.split();

    // Single writer pump; presence broadcasts and the user's own channel
    // both feed it.
    let (out_tx, mut out_rx) = mpsc::channel::<ServerEvent>(64);
    let send_task = tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            let Ok(frame) = serde_json::to_string(&event) else {
                continue;
            };
            if sender.send(frame.into()).await.is_err() {
                break;
            }
        }
    });

    let mut forward_tasks: Vec<JoinHandle<()>> = Vec::new();
    let mut joined = false;

    while let Some(Ok(frame)) = receiver.next().await {
        let Ok(event) = serde_json::from_slice::<ClientEvent>(&frame.into_data()) else {
            continue;
        };

        match event {
            ClientEvent::Join { user_id: joining } => {
                if joining != user_id {
                    tracing::warn!(%user_id, claimed = %joining, "join for another identity dropped");
                    continue;
                }
                // Idempotent: a second join on the same connection is a no-op.
                if joined {
                    continue;
                }
                joined = true;

                forward_tasks.push(forward(channels.subscribe(&user_id), out_tx.clone()));
                forward_tasks.push(forward(presence.subscribe(), out_tx.clone()));
                presence.join(&user_id, conn_id);
                tracing::debug!(%user_id, %conn_id, "joined");
            }
            ClientEvent::SendMessage(message) => {
                if message.from_user.is_empty() || message.to_user.is_empty() {
                    tracing::warn!("sendMessage without identities dropped");
                    continue;
                }
                if message.from_user != user_id {
                    tracing::warn!(%user_id, claimed = %message.from_user, "sendMessage for another identity dropped");
                    continue;
                }
                // Both participants converge on the same event; the
                // sender's other sessions need it too.
                channels.publish(&message.to_user, ServerEvent::ReceiveMessage(message.clone()));
                channels.publish(&message.from_user.clone(), ServerEvent::ReceiveMessage(message));
            }
            ClientEvent::MarkSeen { from_user_id, to_user_id } => {
                if to_user_id != user_id {
                    tracing::warn!(%user_id, claimed = %to_user_id, "markSeen for another identity dropped");
                    continue;
                }
                if let Err(err) = seen::acknowledge(&db_pool, &channels, &from_user_id, &to_user_id).await {
                    tracing::warn!(%err, "markSeen failed");
                }
            }
        }
    }

    // Teardown runs on every exit path: disconnect, protocol error, or
    // the writer dying first.
    if presence.leave(conn_id).is_some() {
        tracing::debug!(%user_id, %conn_id, "left");
    }
    for task in forward_tasks {
        task.abort();
    }
    send_task.abort();
}

fn forward(
    mut rx: broadcast::Receiver<ServerEvent>,
    out_tx: mpsc::Sender<ServerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if out_tx.send(event).await.is_err() {
                        break;
                    }
                }
                // This connection fell behind; skip to the live edge.
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "slow chat connection dropped events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
