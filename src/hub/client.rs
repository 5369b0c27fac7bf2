use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::messages::Message;
use super::types::{OutboundMessage, RoomId, User};

/// Capability the hub requires from a connected peer's transport binding.
///
/// The hub is the only writer of the room pointer.
pub trait Client: Send + Sync {
    /// Enqueue a message for delivery to this peer. Never blocks; when the
    /// peer cannot accept more data the message is dropped.
    fn send(&self, message: &Message);

    /// The user bound to this connection
    fn user(&self) -> &User;

    fn current_room(&self) -> Option<RoomId>;

    fn set_current_room(&self, room: Option<RoomId>);
}

/// Production client wrapping a live connection's bounded outbound queue
pub struct WsClient {
    user: User,
    room: Mutex<Option<RoomId>>,
    tx: mpsc::Sender<OutboundMessage>,
}

impl WsClient {
    pub fn new(user: User, tx: mpsc::Sender<OutboundMessage>) -> Self {
        Self {
            user,
            room: Mutex::new(None),
            tx,
        }
    }
}

impl Client for WsClient {
    fn send(&self, message: &Message) {
        let json = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to encode message {}: {}", message.id, e);
                return;
            }
        };

        match self.tx.try_send(OutboundMessage::from(json)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("outbound queue full, dropping message for {}", self.user.id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("connection closing, dropping message for {}", self.user.id);
            }
        }
    }

    fn user(&self) -> &User {
        &self.user
    }

    fn current_room(&self) -> Option<RoomId> {
        self.room.lock().expect("room pointer lock poisoned").clone()
    }

    fn set_current_room(&self, room: Option<RoomId>) {
        *self.room.lock().expect("room pointer lock poisoned") = room;
    }
}
