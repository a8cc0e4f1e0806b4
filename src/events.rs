//! Socket wire protocol. Tags match the event names the frontend already
//! speaks: `join` / `sendMessage` / `markSeen` inbound, `receiveMessage` /
//! `updateSeen` / `onlineUsers` outbound.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat::store::Message;

/// Server -> subscribed connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "receiveMessage")]
    ReceiveMessage(Message),
    #[serde(rename = "updateSeen")]
    UpdateSeen {
        #[serde(rename = "messageIds")]
        message_ids: Vec<Uuid>,
    },
    #[serde(rename = "onlineUsers")]
    OnlineUsers(Vec<String>),
}

/// Client -> server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "join")]
    Join { user_id: String },
    /// Fan-out only; the message was already persisted over HTTP.
    #[serde(rename = "sendMessage")]
    SendMessage(Message),
    #[serde(rename = "markSeen")]
    MarkSeen {
        from_user_id: String,
        to_user_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_stay_compatible_with_the_frontend() {
        let json = serde_json::to_value(ClientEvent::Join { user_id: "alice".into() }).unwrap();
        assert_eq!(json["event"], "join");
        assert_eq!(json["data"]["user_id"], "alice");

        let json = serde_json::to_value(ServerEvent::UpdateSeen {
            message_ids: vec![],
        })
        .unwrap();
        assert_eq!(json["event"], "updateSeen");
        assert!(json["data"]["messageIds"].is_array());

        let json = serde_json::to_value(ServerEvent::OnlineUsers(vec!["bob".into()])).unwrap();
        assert_eq!(json["event"], "onlineUsers");
    }
}
