//! Online-user registry. Process-local and ephemeral: empty on restart,
//! rebuilt as connections join and leave.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::events::ServerEvent;

const BROADCAST_CAPACITY: usize = 64;

/// One slot per user: a second join for the same user replaces the first,
/// so the stale connection's later leave is a no-op.
#[derive(Clone)]
pub struct Presence {
    online: Arc<Mutex<HashMap<String, Uuid>>>,
    tx: broadcast::Sender<ServerEvent>,
}

impl Presence {
    pub fn new() -> Self {
        Self {
            online: Arc::new(Mutex::new(HashMap::new())),
            tx: broadcast::channel(BROADCAST_CAPACITY).0,
        }
    }

    /// Every connection subscribes here to get `onlineUsers` updates.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    pub fn join(&self, user_id: &str, conn_id: Uuid) {
        self.online
            .lock()
            .unwrap()
            .insert(user_id.to_owned(), conn_id);
        self.announce();
    }

    /// Removes the entry owned by `conn_id`, if any, and returns the user
    /// that went offline.
    pub fn leave(&self, conn_id: Uuid) -> Option<String> {
        let departed = {
            let mut online = self.online.lock().unwrap();
            let user_id = online
                .iter()
                .find_map(|(user_id, id)| (*id == conn_id).then(|| user_id.clone()))?;
            online.remove(&user_id);
            user_id
        };
        self.announce();
        Some(departed)
    }

    pub fn list_online(&self) -> Vec<String> {
        self.online.lock().unwrap().keys().cloned().collect()
    }

    fn announce(&self) {
        let _ = self.tx.send(ServerEvent::OnlineUsers(self.list_online()));
    }
}

impl Default for Presence {
    fn default() -> Self {
        Self::new()
    }
}
