//! Real-time chat message routing with a point-to-point call-setup relay

pub mod hub;
pub mod signaling;
