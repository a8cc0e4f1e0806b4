//! Conversation-view state. History fetches and live pushed events are
//! both producers into one id-deduplicated, `(created_at, id)`-sorted
//! sink, so arrival order never matters.

use uuid::Uuid;

use crate::chat::store::Message;
use crate::events::ServerEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Initializing,
    Loaded,
    Live,
    Closed,
}

/// What the wire layer should emit on behalf of this view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    MarkSeen { from_user: String, to_user: String },
}

pub struct ChatSession {
    self_id: String,
    partner_id: String,
    phase: SessionPhase,
    messages: Vec<Message>,
}

impl ChatSession {
    pub fn new(self_id: impl Into<String>, partner_id: impl Into<String>) -> Self {
        Self {
            self_id: self_id.into(),
            partner_id: partner_id.into(),
            phase: SessionPhase::Initializing,
            messages: Vec::new(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn partner_id(&self) -> &str {
        &self.partner_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Merge a resolved history fetch. A fetch that resolves after the
    /// view closed is discarded, not applied.
    pub fn apply_history(&mut self, history: Vec<Message>) -> Option<SessionCommand> {
        if self.phase == SessionPhase::Closed {
            return None;
        }
        for message in history {
            self.insert(message);
        }
        if self.phase == SessionPhase::Initializing {
            self.phase = SessionPhase::Loaded;
        }
        self.ack_unseen()
    }

    /// The live subscription is up; history and push are now converging
    /// on this session.
    pub fn mark_live(&mut self) {
        if self.phase == SessionPhase::Loaded {
            self.phase = SessionPhase::Live;
        }
    }

    pub fn apply_event(&mut self, event: &ServerEvent) -> Option<SessionCommand> {
        if self.phase == SessionPhase::Closed {
            return None;
        }
        match event {
            ServerEvent::ReceiveMessage(message) => {
                if !self.in_conversation(message) {
                    return None;
                }
                self.insert(message.clone());
                self.ack_unseen()
            }
            ServerEvent::UpdateSeen { message_ids } => {
                self.apply_seen(message_ids);
                None
            }
            ServerEvent::OnlineUsers(_) => None,
        }
    }

    /// Terminal. Everything held for the view is dropped; late fetch
    /// results and stray events become no-ops.
    pub fn close(&mut self) {
        self.phase = SessionPhase::Closed;
        self.messages.clear();
    }

    fn in_conversation(&self, message: &Message) -> bool {
        (message.from_user == self.self_id && message.to_user == self.partner_id)
            || (message.from_user == self.partner_id && message.to_user == self.self_id)
    }

    fn insert(&mut self, message: Message) {
        if let Some(existing) = self.messages.iter_mut().find(|m| m.id == message.id) {
            // Duplicate across the fetch/push race. Seen is monotonic, so
            // the flag can only be upgraded by the second copy.
            if message.seen {
                existing.seen = true;
            }
            return;
        }
        self.messages.push(message);
        self.messages
            .sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
    }

    fn apply_seen(&mut self, message_ids: &[Uuid]) {
        for message in &mut self.messages {
            if message_ids.contains(&message.id) {
                message.seen = true;
            }
        }
    }

    /// Unseen partner-authored messages get acknowledged: flipped locally
    /// and reported upstream once. Already-acknowledged ids never re-emit.
    fn ack_unseen(&mut self) -> Option<SessionCommand> {
        let mut any = false;
        for message in &mut self.messages {
            if message.from_user == self.partner_id && !message.seen {
                message.seen = true;
                any = true;
            }
        }
        any.then(|| SessionCommand::MarkSeen {
            from_user: self.partner_id.clone(),
            to_user: self.self_id.clone(),
        })
    }
}
