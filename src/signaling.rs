//! Point-to-point WebSocket relay for call-setup signaling

mod actor;
mod messages;
mod server;
mod types;

pub use actor::RelayHandle;
pub use messages::{SignalEnvelope, SignalKind};
pub use server::{DEFAULT_SIGNALING_PORT, SignalingServer};
pub use types::{PeerId, RelayError};
