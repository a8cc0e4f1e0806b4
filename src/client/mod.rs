//! Embeddable wire client: HTTP for durable operations, the socket for
//! live delivery, one [`ChatSession`] for the open conversation view.

pub mod session;

pub use session::{ChatSession, SessionCommand, SessionPhase};

use std::sync::Arc;

use anyhow::{anyhow, Context};
use futures_util::{SinkExt, StreamExt};
use reqwest::cookie::{CookieStore, Jar};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::chat::store::Message;
use crate::chat::{HistoryBody, HistoryResponse, SendResponse};
use crate::events::{ClientEvent, ServerEvent};
use crate::session::LoginBody;

const UPDATE_CAPACITY: usize = 256;

/// Pushed to the embedding UI whenever client-visible state changes.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// Snapshot of the open conversation after a merge.
    Conversation(Vec<Message>),
    OnlineUsers(Vec<String>),
    Error(String),
}

struct ClientInner {
    session: Option<ChatSession>,
    ws_tx: Option<mpsc::Sender<ClientEvent>>,
    online: Vec<String>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
    user_id: String,
    updates: broadcast::Sender<SessionUpdate>,
    inner: Mutex<ClientInner>,
}

impl ChatClient {
    /// Signs in, opens the socket, and joins the caller's own delivery
    /// channel. The returned client is ready for `open_conversation`.
    pub async fn connect(base_url: &str, user_id: &str) -> anyhow::Result<Arc<Self>> {
        let jar = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .build()?;

        http.post(format!("{base_url}/login"))
            .json(&LoginBody { user_id: user_id.to_owned() })
            .send()
            .await?
            .error_for_status()
            .context("login failed")?;

        let client = Arc::new(Self {
            http,
            base_url: base_url.to_owned(),
            user_id: user_id.to_owned(),
            updates: broadcast::channel(UPDATE_CAPACITY).0,
            inner: Mutex::new(ClientInner {
                session: None,
                ws_tx: None,
                online: Vec::new(),
                tasks: Vec::new(),
            }),
        });
        client.open_socket(&jar).await?;
        Ok(client)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    pub async fn online_users(&self) -> Vec<String> {
        self.inner.lock().await.online.clone()
    }

    async fn open_socket(self: &Arc<Self>, jar: &Jar) -> anyhow::Result<()> {
        let ws_url = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}/api/messages/ws")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}/api/messages/ws")
        } else {
            return Err(anyhow!("base_url must start with http:// or https://"));
        };

        // The socket handshake has to carry the session cookie the login
        // response set.
        let mut request = ws_url.into_client_request()?;
        let cookie = jar
            .cookies(&self.base_url.parse()?)
            .ok_or_else(|| anyhow!("login left no session cookie"))?;
        request
            .headers_mut()
            .insert(COOKIE, HeaderValue::from_str(cookie.to_str()?)?);

        let (ws_stream, _) = connect_async(request)
            .await
            .context("failed to connect chat socket")?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (ws_tx, mut ws_rx) = mpsc::channel::<ClientEvent>(64);
        let writer_task = tokio::spawn(async move {
            while let Some(event) = ws_rx.recv().await {
                let Ok(frame) = serde_json::to_string(&event) else {
                    continue;
                };
                if ws_writer.send(WsMessage::text(frame)).await.is_err() {
                    break;
                }
            }
        });

        let reader = Arc::clone(self);
        let reader_task = tokio::spawn(async move {
            while let Some(frame) = ws_reader.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => reader.handle_event(event).await,
                        Err(err) => {
                            tracing::warn!(%err, "malformed server event dropped");
                        }
                    },
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        let _ = reader
                            .updates
                            .send(SessionUpdate::Error(format!("socket receive failed: {err}")));
                        break;
                    }
                }
            }
        });

        ws_tx
            .send(ClientEvent::Join { user_id: self.user_id.clone() })
            .await
            .map_err(|_| anyhow!("socket writer closed before join"))?;

        let mut inner = self.inner.lock().await;
        inner.ws_tx = Some(ws_tx);
        inner.tasks.push(writer_task);
        inner.tasks.push(reader_task);
        Ok(())
    }

    async fn handle_event(self: &Arc<Self>, event: ServerEvent) {
        let mut inner = self.inner.lock().await;
        if let ServerEvent::OnlineUsers(users) = &event {
            inner.online = users.clone();
            let _ = self.updates.send(SessionUpdate::OnlineUsers(users.clone()));
            return;
        }

        let Some(session) = inner.session.as_mut() else {
            return;
        };
        let command = session.apply_event(&event);
        let snapshot = session.messages().to_vec();
        drop(inner);

        let _ = self.updates.send(SessionUpdate::Conversation(snapshot));
        self.run_command(command).await;
    }

    async fn run_command(self: &Arc<Self>, command: Option<SessionCommand>) {
        let Some(SessionCommand::MarkSeen { from_user, to_user }) = command else {
            return;
        };
        let ws_tx = self.inner.lock().await.ws_tx.clone();
        if let Some(ws_tx) = ws_tx {
            let _ = ws_tx
                .send(ClientEvent::MarkSeen {
                    from_user_id: from_user,
                    to_user_id: to_user,
                })
                .await;
        }
    }

    /// Enter a conversation view. The history fetch runs in the
    /// background; live events merge into the same session as they land.
    pub async fn open_conversation(self: &Arc<Self>, partner_id: &str) -> anyhow::Result<()> {
        {
            let mut inner = self.inner.lock().await;
            if let Some(old) = inner.session.as_mut() {
                old.close();
            }
            inner.session = Some(ChatSession::new(&self.user_id, partner_id));
        }

        let client = Arc::clone(self);
        let partner = partner_id.to_owned();
        let fetch = tokio::spawn(async move {
            let history = client.fetch_history(&partner).await;
            let mut inner = client.inner.lock().await;
            // The view may have moved on while the fetch was in flight.
            let Some(session) = inner
                .session
                .as_mut()
                .filter(|s| s.partner_id() == partner && s.phase() != SessionPhase::Closed)
            else {
                return;
            };
            match history {
                Ok(messages) => {
                    let command = session.apply_history(messages);
                    session.mark_live();
                    let snapshot = session.messages().to_vec();
                    drop(inner);
                    let _ = client.updates.send(SessionUpdate::Conversation(snapshot));
                    client.run_command(command).await;
                }
                Err(err) => {
                    drop(inner);
                    let _ = client
                        .updates
                        .send(SessionUpdate::Error(format!("history fetch failed: {err}")));
                }
            }
        });

        self.inner.lock().await.tasks.push(fetch);
        Ok(())
    }

    async fn fetch_history(&self, partner_id: &str) -> anyhow::Result<Vec<Message>> {
        let response: HistoryResponse = self
            .http
            .post(format!("{}/api/messages/get", self.base_url))
            .json(&HistoryBody { to_user_id: partner_id.to_owned() })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.messages)
    }

    pub async fn send_text(self: &Arc<Self>, to_user_id: &str, text: &str) -> anyhow::Result<Message> {
        let form = reqwest::multipart::Form::new()
            .text("to_user_id", to_user_id.to_owned())
            .text("message_type", "text")
            .text("text", text.to_owned());
        self.send_form(form).await
    }

    pub async fn send_image(
        self: &Arc<Self>,
        to_user_id: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> anyhow::Result<Message> {
        let form = reqwest::multipart::Form::new()
            .text("to_user_id", to_user_id.to_owned())
            .text("message_type", "image")
            .part(
                "image",
                reqwest::multipart::Part::bytes(bytes).file_name(filename.to_owned()),
            );
        self.send_form(form).await
    }

    /// Durable write over HTTP, then the fan-out emit; a failure is
    /// reported once to the caller, who may resubmit.
    async fn send_form(self: &Arc<Self>, form: reqwest::multipart::Form) -> anyhow::Result<Message> {
        let response: SendResponse = self
            .http
            .post(format!("{}/api/messages/send", self.base_url))
            .multipart(form)
            .send()
            .await?
            .error_for_status()
            .context("failed to send")?
            .json()
            .await?;
        let message = response.message;

        let mut inner = self.inner.lock().await;
        if let Some(session) = inner.session.as_mut() {
            // Local echo; the fan-out copy dedups against it.
            session.apply_event(&ServerEvent::ReceiveMessage(message.clone()));
            let snapshot = session.messages().to_vec();
            let _ = self.updates.send(SessionUpdate::Conversation(snapshot));
        }
        let ws_tx = inner.ws_tx.clone();
        drop(inner);

        if let Some(ws_tx) = ws_tx {
            let _ = ws_tx.send(ClientEvent::SendMessage(message.clone())).await;
        }
        Ok(message)
    }

    /// Leave the conversation view. Late fetch results are discarded by
    /// the closed session, not applied.
    pub async fn close_conversation(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(session) = inner.session.as_mut() {
            session.close();
        }
        inner.session = None;
    }

    /// Tear down the socket and every background task.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(session) = inner.session.as_mut() {
            session.close();
        }
        inner.session = None;
        inner.ws_tx = None;
        for task in inner.tasks.drain(..) {
            task.abort();
        }
    }
}
