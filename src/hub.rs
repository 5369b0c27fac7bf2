//! Room-aware chat routing actor and its WebSocket transport

mod actor;
mod client;
mod messages;
mod server;
mod types;

pub use actor::HubHandle;
pub use client::{Client, WsClient};
pub use messages::{ClientRequest, Message, MessageKind, RoomInfo, UserInfo};
pub use server::{ChatServer, DEFAULT_CHAT_PORT};
pub use types::{ChatError, MessageId, OutboundMessage, Room, RoomId, User, UserId};
