//! Per-user delivery channels. One logical channel per user identity;
//! delivery is fire-and-forget, durability lives in the message store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use crate::events::ServerEvent;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Default)]
pub struct Channels {
    inner: Arc<Mutex<HashMap<String, broadcast::Sender<ServerEvent>>>>,
}

impl Channels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, user_id: &str) -> broadcast::Receiver<ServerEvent> {
        self.inner
            .lock()
            .unwrap()
            .entry(user_id.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Delivers `event` to every connection subscribed to `user_id`'s
    /// channel. No subscribers means the event is dropped, not queued.
    pub fn publish(&self, user_id: &str, event: ServerEvent) {
        let mut inner = self.inner.lock().unwrap();
        let Some(tx) = inner.get(user_id) else {
            return;
        };
        if tx.send(event).is_err() {
            // Nobody listening anymore; prune the channel.
            inner.remove(user_id);
        }
    }
}
