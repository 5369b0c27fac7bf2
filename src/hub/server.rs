use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::{Bytes, Message as WsMessage};
use tracing::{debug, error, info, warn};

use super::actor::HubHandle;
use super::client::{Client, WsClient};
use super::messages::{ClientRequest, Message};
use super::types::{ChatError, OutboundMessage, RoomId, User, UserId};

pub const DEFAULT_CHAT_PORT: u16 = 8080;
const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(10);
const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// WebSocket front end for the chat hub
pub struct ChatServer {
    handle: HubHandle,
}

impl Default for ChatServer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatServer {
    /// Spawn the hub actor and wrap it in a server
    pub fn new() -> Self {
        Self {
            handle: HubHandle::new(),
        }
    }

    /// Handle for non-transport consumers (room directory, tests)
    pub fn handle(&self) -> HubHandle {
        self.handle.clone()
    }

    pub async fn run(&self, addr: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("Chat server listening on {}", addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            let handle = self.handle.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, handle).await {
                    error!("Connection error from {}: {}", addr, e);
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handle: HubHandle,
) -> Result<(), ChatError> {
    // display name comes from the handshake URI, e.g. /ws?username=alice
    let mut username = String::from("anonymous");
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        if let Some(name) = query_param(req.uri().query(), "username") {
            username = name;
        }
        Ok::<Response, ErrorResponse>(resp)
    })
    .await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    info!("Chat connection from {} as {}", addr, username);

    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(OUTBOUND_QUEUE_CAPACITY);
    let (ctrl_tx, mut ctrl_rx) = mpsc::unbounded_channel::<WsMessage>();

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    let mut waiting_for_pong = false;
    let mut pong_deadline: Option<tokio::time::Instant> = None;

    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(msg) = rx.recv() => {
                    let ws_msg = WsMessage::Text(msg.into_inner());
                    if ws_tx.send(ws_msg).await.is_err() {
                        break;
                    }
                }
                Some(ctrl_msg) = ctrl_rx.recv() => {
                    if ws_tx.send(ctrl_msg).await.is_err() {
                        break;
                    }
                }
                else => break,
            }
        }
    });

    let client: Arc<dyn Client> = Arc::new(WsClient::new(User::new(username), tx));
    handle.register(Arc::clone(&client));

    loop {
        let pong_timeout = async {
            match pong_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = ping_interval.tick() => {
                if waiting_for_pong {
                    warn!("No Pong received, disconnecting {}", addr);
                    break;
                }
                if ctrl_tx.send(WsMessage::Ping(Bytes::new())).is_err() {
                    break;
                }
                waiting_for_pong = true;
                pong_deadline = Some(tokio::time::Instant::now() + PONG_TIMEOUT);
                debug!("Ping sent to {}", addr);
            }

            _ = pong_timeout => {
                warn!("Pong timeout, disconnecting {}", addr);
                break;
            }

            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    WsMessage::Text(text) => {
                        // malformed requests are logged and skipped;
                        // the connection stays open
                        if let Err(e) = handle_text_message(&text, &client, &handle) {
                            warn!("Message handling error from {}: {}", addr, e);
                        }
                    }
                    WsMessage::Pong(_) => {
                        waiting_for_pong = false;
                        pong_deadline = None;
                        debug!("Pong received from {}", addr);
                    }
                    WsMessage::Close(_) => {
                        info!("Close received from {}", addr);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    handle.unregister(Arc::clone(&client));
    send_task.abort();
    info!("Chat disconnected: {}", addr);

    Ok(())
}

fn handle_text_message(
    text: &str,
    client: &Arc<dyn Client>,
    handle: &HubHandle,
) -> Result<(), ChatError> {
    let request: ClientRequest = serde_json::from_str(text)?;

    match request {
        ClientRequest::Text {
            content,
            room,
            recipient,
        } => {
            if let Some(recipient) = recipient {
                let recipient = UserId::from(recipient.as_str());
                let message = Message::private(client.user(), content, recipient.clone());
                handle.send_private(recipient, message);
            } else if let Some(room) = room
                .map(|r| RoomId::from(r.as_str()))
                .or_else(|| client.current_room())
            {
                handle.broadcast_room(Message::text(client.user(), content, room));
            } else {
                warn!(
                    "text message from {} outside any room dropped",
                    client.user().id
                );
            }
        }

        ClientRequest::JoinRoom { room } => {
            handle.join_room(Arc::clone(client), RoomId::from(room.as_str()));
        }

        ClientRequest::LeaveRoom { room } => {
            if let Some(room) = room
                .map(|r| RoomId::from(r.as_str()))
                .or_else(|| client.current_room())
            {
                handle.leave_room(Arc::clone(client), room);
            }
        }
    }

    Ok(())
}

fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    query?.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key && !v.is_empty()).then(|| v.to_string())
    })
}
