use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{MessageId, RoomId, User, UserId};

pub const SYSTEM_SENDER: &str = "System";

/// Kind of a routed chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Join,
    Leave,
    System,
    Private,
}

/// A routed chat message. Immutable once constructed; room-kind messages
/// are appended to the target room's history exactly once at broadcast time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<UserId>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn build(kind: MessageKind, content: String, sender: String, sender_id: Option<UserId>) -> Self {
        Self {
            id: MessageId::generate(),
            kind,
            content,
            sender,
            sender_id,
            room: None,
            recipient: None,
            timestamp: Utc::now(),
        }
    }

    /// System notice addressed to a single client (welcome, room list)
    pub fn system(content: impl Into<String>) -> Self {
        Self::build(MessageKind::System, content.into(), SYSTEM_SENDER.to_string(), None)
    }

    /// Join/leave notice broadcast to a room on behalf of the system
    pub fn room_event(kind: MessageKind, content: impl Into<String>, room: RoomId) -> Self {
        let mut message =
            Self::build(kind, content.into(), SYSTEM_SENDER.to_string(), None);
        message.room = Some(room);
        message
    }

    /// Chat text addressed to a room
    pub fn text(sender: &User, content: impl Into<String>, room: RoomId) -> Self {
        let mut message = Self::build(
            MessageKind::Text,
            content.into(),
            sender.username.clone(),
            Some(sender.id.clone()),
        );
        message.room = Some(room);
        message
    }

    /// Direct message addressed to a single user, bypassing rooms
    pub fn private(sender: &User, content: impl Into<String>, recipient: UserId) -> Self {
        let mut message = Self::build(
            MessageKind::Private,
            content.into(),
            sender.username.clone(),
            Some(sender.id.clone()),
        );
        message.recipient = Some(recipient);
        message
    }
}

/// Requests sent from client to server over the chat connection
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientRequest {
    /// Chat text: broadcast to a room, or direct when `recipient` is set
    #[serde(rename = "text")]
    Text {
        content: String,
        #[serde(default)]
        room: Option<String>,
        #[serde(default)]
        recipient: Option<String>,
    },

    /// Join a room, leaving the current one first
    #[serde(rename = "join_room")]
    JoinRoom { room: String },

    /// Leave a room (the current one when `room` is absent)
    #[serde(rename = "leave_room")]
    LeaveRoom {
        #[serde(default)]
        room: Option<String>,
    },
}

/// Room directory entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: RoomId,
    pub name: String,
    pub user_count: usize,
}

/// Connected-user directory entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomId>,
}
