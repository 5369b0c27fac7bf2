use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{Bytes, Message as WsMessage};
use tracing::{debug, error, info, warn};

use crate::hub::OutboundMessage;

use super::actor::{RelayCommand, RelayHandle, relay_actor};
use super::messages::SignalEnvelope;
use super::types::{PeerId, RelayError};

pub const DEFAULT_SIGNALING_PORT: u16 = 9090;
const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(10);
const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// WebSocket front end for the call-setup relay
pub struct SignalingServer {
    handle: RelayHandle,
}

impl Default for SignalingServer {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalingServer {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<RelayCommand>();
        tokio::spawn(relay_actor(rx));

        Self {
            handle: RelayHandle { tx },
        }
    }

    pub fn handle(&self) -> RelayHandle {
        self.handle.clone()
    }

    pub async fn run(&self, addr: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("Signaling server listening on {}", addr);

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
    handle: RelayHandle,
) -> Result<(), RelayError> {
    // identity comes from the handshake URI, e.g. /ws?id=caller-1;
    // connections without one are rejected during the handshake
    let mut peer_id: Option<PeerId> = None;
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        match query_param(req.uri().query(), "id") {
            Some(id) => {
                peer_id = Some(PeerId::from(id.as_str()));
                Ok(resp)
            }
            None => {
                let mut reject = ErrorResponse::new(Some("missing id query parameter".to_string()));
                *reject.status_mut() = StatusCode::BAD_REQUEST;
                Err(reject)
            }
        }
    })
    .await?;
    let Some(peer_id) = peer_id else {
        return Ok(());
    };
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    info!("Signaling connection from {} as {}", addr, peer_id);

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

    handle.register(peer_id.clone(), tx);

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
                        // malformed envelopes are logged and skipped;
                        // the connection stays open
                        match parse_envelope(&text) {
                            Ok(envelope) => handle.forward(envelope),
                            Err(e) => warn!("Signal handling error from {}: {}", addr, e),
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

    handle.unregister(peer_id);
    send_task.abort();
    info!("Signaling disconnected: {}", addr);

    Ok(())
}

fn parse_envelope(text: &str) -> Result<SignalEnvelope, RelayError> {
    Ok(serde_json::from_str(text)?)
}

fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    query?.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key && !v.is_empty()).then(|| v.to_string())
    })
}
