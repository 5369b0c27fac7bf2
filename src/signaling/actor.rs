use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::hub::OutboundMessage;

use super::messages::SignalEnvelope;
use super::types::{PeerId, PeerState};

/// Commands sent to the relay actor
pub(crate) enum RelayCommand {
    Register {
        id: PeerId,
        tx: mpsc::Sender<OutboundMessage>,
    },
    Unregister {
        id: PeerId,
    },
    Forward {
        envelope: SignalEnvelope,
    },
}

/// Peer table owned by the relay actor. No rooms, no history: a signal
/// either reaches its target's queue at forward time or it is gone.
pub(crate) struct RelayState {
    peers: HashMap<PeerId, PeerState>,
}

impl RelayState {
    pub(crate) fn new() -> Self {
        Self {
            peers: HashMap::new(),
        }
    }

    pub(crate) fn apply(&mut self, cmd: RelayCommand) {
        match cmd {
            RelayCommand::Register { id, tx } => self.register(id, tx),
            RelayCommand::Unregister { id } => self.unregister(&id),
            RelayCommand::Forward { envelope } => self.forward(envelope),
        }
    }

    fn register(&mut self, id: PeerId, tx: mpsc::Sender<OutboundMessage>) {
        // Last-register-wins, as for the chat hub
        if self.peers.insert(id.clone(), PeerState { tx }).is_some() {
            debug!("replaced existing registration for peer {}", id);
        }
        info!("peer {} registered", id);
    }

    fn unregister(&mut self, id: &PeerId) {
        if self.peers.remove(id).is_some() {
            info!("peer {} unregistered", id);
        }
    }

    fn forward(&self, envelope: SignalEnvelope) {
        let Some(peer) = self.peers.get(&envelope.to) else {
            debug!("signal to unregistered peer {} dropped", envelope.to);
            return;
        };

        let json = match serde_json::to_string(&envelope) {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to encode signal envelope: {}", e);
                return;
            }
        };

        debug!(
            "forwarding signal: from={} to={} type={}",
            envelope.from, envelope.to, envelope.kind
        );
        if peer.tx.try_send(OutboundMessage::from(json)).is_err() {
            warn!("outbound queue full, dropping signal for {}", envelope.to);
        }
    }

    #[cfg(test)]
    fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

pub(crate) async fn relay_actor(mut rx: mpsc::UnboundedReceiver<RelayCommand>) {
    let mut state = RelayState::new();
    while let Some(cmd) = rx.recv().await {
        state.apply(cmd);
    }
}

/// Handle to communicate with the relay actor
#[derive(Clone)]
pub struct RelayHandle {
    pub(crate) tx: mpsc::UnboundedSender<RelayCommand>,
}

impl RelayHandle {
    pub fn register(&self, id: PeerId, tx: mpsc::Sender<OutboundMessage>) {
        let _ = self.tx.send(RelayCommand::Register { id, tx });
    }

    pub fn unregister(&self, id: PeerId) {
        let _ = self.tx.send(RelayCommand::Unregister { id });
    }

    pub fn forward(&self, envelope: SignalEnvelope) {
        let _ = self.tx.send(RelayCommand::Forward { envelope });
    }
}
