use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::PeerId;

/// Call-setup message vocabulary. Anything outside the known set is
/// carried through verbatim; the relay never interprets payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Offer,
    Answer,
    Ice,
    Reject,
    EndCall,
    #[serde(untagged)]
    Other(String),
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::Ice => "ice",
            SignalKind::Reject => "reject",
            SignalKind::EndCall => "end_call",
            SignalKind::Other(s) => s,
        };
        f.write_str(s)
    }
}

/// A signaling message forwarded between exactly two peers. The envelope
/// (including `from` and `type`) is delivered whole; `data` is opaque.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalEnvelope {
    pub from: PeerId,
    pub to: PeerId,
    #[serde(rename = "type")]
    pub kind: SignalKind,
    #[serde(default)]
    pub data: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_offer() {
        let json = r#"{"from": "p1", "to": "p2", "type": "offer", "data": {"sdp": "v=0"}}"#;
        let env: SignalEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(env.from, PeerId::from("p1"));
        assert_eq!(env.to, PeerId::from("p2"));
        assert_eq!(env.kind, SignalKind::Offer);
        assert_eq!(env.data["sdp"], "v=0");
    }

    #[test]
    fn parse_end_call() {
        let json = r#"{"from": "p1", "to": "p2", "type": "end_call", "data": null}"#;
        let env: SignalEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(env.kind, SignalKind::EndCall);
    }

    #[test]
    fn unknown_kind_passes_through() {
        let json = r#"{"from": "p1", "to": "p2", "type": "renegotiate", "data": {}}"#;
        let env: SignalEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(env.kind, SignalKind::Other("renegotiate".to_string()));

        let out = serde_json::to_string(&env).unwrap();
        assert!(out.contains("\"type\":\"renegotiate\""));
    }

    #[test]
    fn missing_data_defaults_to_null() {
        let json = r#"{"from": "p1", "to": "p2", "type": "reject"}"#;
        let env: SignalEnvelope = serde_json::from_str(json).unwrap();
        assert!(env.data.is_null());
    }

    #[test]
    fn serialize_preserves_envelope_shape() {
        let env = SignalEnvelope {
            from: PeerId::from("p1"),
            to: PeerId::from("p2"),
            kind: SignalKind::Ice,
            data: serde_json::json!({"candidate": "udp 1 2"}),
        };
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("\"from\":\"p1\""));
        assert!(json.contains("\"to\":\"p2\""));
        assert!(json.contains("\"type\":\"ice\""));
        assert!(json.contains("candidate"));
    }
}
