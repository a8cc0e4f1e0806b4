use sqlx::SqlitePool;
use uuid::Uuid;

use crate::channels::Channels;
use crate::chat::store;
use crate::events::ServerEvent;

/// Flip everything unseen from `from_user` to `to_user`, then tell the
/// original sender which ids changed so their UI can update without a
/// refetch. Idempotent: an already-acknowledged set publishes nothing.
pub async fn acknowledge(
    db_pool: &SqlitePool,
    channels: &Channels,
    from_user: &str,
    to_user: &str,
) -> anyhow::Result<Vec<Uuid>> {
    let message_ids = store::mark_seen(db_pool, from_user, to_user).await?;

    if !message_ids.is_empty() {
        channels.publish(
            from_user,
            ServerEvent::UpdateSeen {
                message_ids: message_ids.clone(),
            },
        );
    }

    Ok(message_ids)
}
