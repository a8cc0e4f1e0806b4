use std::fmt;

use anyhow::bail;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<MessageType> {
        match s {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            other => bail!("unknown message_type {other:?}"),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A direct message between two users. Immutable once stored, except for
/// `seen`, which flips false -> true exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub from_user: String,
    pub to_user: String,
    pub text: Option<String>,
    pub media_url: Option<String>,
    pub message_type: MessageType,
    pub seen: bool,
    /// Unix milliseconds, assigned server-side at creation.
    pub created_at: i64,
}

type MessageRow = (String, String, String, Option<String>, Option<String>, String, bool, i64);

fn row_to_message(
    (id, from_user, to_user, text, media_url, message_type, seen, created_at): MessageRow,
) -> anyhow::Result<Message> {
    Ok(Message {
        id: Uuid::parse_str(&id)?,
        from_user,
        to_user,
        text,
        media_url,
        message_type: MessageType::parse(&message_type)?,
        seen,
        created_at,
    })
}

pub async fn create(
    db_pool: &SqlitePool,
    from_user: &str,
    to_user: &str,
    text: Option<String>,
    media_url: Option<String>,
    message_type: MessageType,
) -> anyhow::Result<Message> {
    let id = Uuid::now_v7();
    let created_at = Utc::now().timestamp_millis();

    sqlx::query(
        "INSERT INTO messages (id,from_user,to_user,text,media_url,message_type,seen,created_at) \
         VALUES (?,?,?,?,?,?,0,?)",
    )
    .bind(id.to_string())
    .bind(from_user)
    .bind(to_user)
    .bind(&text)
    .bind(&media_url)
    .bind(message_type.as_str())
    .bind(created_at)
    .execute(db_pool)
    .await?;

    Ok(Message {
        id,
        from_user: from_user.to_owned(),
        to_user: to_user.to_owned(),
        text,
        media_url,
        message_type,
        seen: false,
        created_at,
    })
}

/// Both directions of the conversation between `a` and `b`, oldest first,
/// ties broken by id. Safe to re-request; no cursor is kept server-side.
pub async fn list_between(db_pool: &SqlitePool, a: &str, b: &str) -> anyhow::Result<Vec<Message>> {
    let rows: Vec<MessageRow> = sqlx::query_as(
        "SELECT id,from_user,to_user,text,media_url,message_type,seen,created_at FROM messages \
         WHERE (from_user=? AND to_user=?) OR (from_user=? AND to_user=?) \
         ORDER BY created_at ASC, id ASC",
    )
    .bind(a)
    .bind(b)
    .bind(b)
    .bind(a)
    .fetch_all(db_pool)
    .await?;

    rows.into_iter().map(row_to_message).collect()
}

/// Flip every unseen message from `from_user` to `to_user` to seen and
/// return the affected ids. One UPDATE statement, so two overlapping
/// acknowledgements can never both claim the same id.
pub async fn mark_seen(
    db_pool: &SqlitePool,
    from_user: &str,
    to_user: &str,
) -> anyhow::Result<Vec<Uuid>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "UPDATE messages SET seen=1 WHERE from_user=? AND to_user=? AND seen=0 RETURNING id",
    )
    .bind(from_user)
    .bind(to_user)
    .fetch_all(db_pool)
    .await?;

    rows.into_iter()
        .map(|(id,)| Ok(Uuid::parse_str(&id)?))
        .collect()
}
