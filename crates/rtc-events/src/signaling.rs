use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};

use crate::error::SignalingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Offer or answer payload, `{type, sdp}` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE payload in the browser `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// Handshake message exchanged over the signaling transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "lowercase")]
pub enum SignalingMessage {
    Offer(SessionDescription),
    Answer(SessionDescription),
    Ice(IceCandidate),
}

impl SignalingMessage {
    pub fn action(&self) -> &'static str {
        match self {
            SignalingMessage::Offer(_) => "offer",
            SignalingMessage::Answer(_) => "answer",
            SignalingMessage::Ice(_) => "ice",
        }
    }

    pub fn to_json(&self) -> Result<String, SignalingError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, SignalingError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Out-of-band duplex transport for handshake messages.
///
/// Implementations must deliver messages reliably and in order. `recv`
/// returning `None` means the stream ended.
#[async_trait]
pub trait Signaler: Send + Sync + 'static {
    async fn send(&self, message: SignalingMessage) -> Result<(), SignalingError>;
    async fn recv(&self) -> Option<SignalingMessage>;
}

/// In-memory signaling pair for tests and in-process peers.
#[derive(Clone)]
pub struct LocalSignaler {
    tx: mpsc::UnboundedSender<SignalingMessage>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<SignalingMessage>>>,
}

impl LocalSignaler {
    pub fn pair() -> (Self, Self) {
        let (tx1, rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();

        let left = Self {
            tx: tx2,
            rx: Arc::new(Mutex::new(rx1)),
        };
        let right = Self {
            tx: tx1,
            rx: Arc::new(Mutex::new(rx2)),
        };
        (left, right)
    }
}

#[async_trait]
impl Signaler for LocalSignaler {
    async fn send(&self, message: SignalingMessage) -> Result<(), SignalingError> {
        self.tx.send(message).map_err(|_| SignalingError::Closed)
    }

    async fn recv(&self) -> Option<SignalingMessage> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn offer_wire_shape() {
        let message = SignalingMessage::Offer(SessionDescription::offer("v=0"));
        let value: serde_json::Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"action": "offer", "data": {"type": "offer", "sdp": "v=0"}})
        );
    }

    #[test]
    fn ice_uses_browser_field_names() {
        let text = r#"{"action":"ice","data":{"candidate":"candidate:1 1 udp 1 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}}"#;
        let message = SignalingMessage::from_json(text).unwrap();
        let SignalingMessage::Ice(candidate) = message else {
            panic!("expected ice message");
        };
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_mline_index, Some(0));
        assert_eq!(candidate.username_fragment, None);
    }

    #[test]
    fn rejects_unknown_actions() {
        let err = SignalingMessage::from_json(r#"{"action":"bye","data":null}"#).unwrap_err();
        assert!(matches!(err, SignalingError::Json(_)));
    }

    #[tokio::test]
    async fn local_pair_is_crossed() {
        let (left, right) = LocalSignaler::pair();
        left.send(SignalingMessage::Ice(IceCandidate::new("a")))
            .await
            .unwrap();
        right
            .send(SignalingMessage::Answer(SessionDescription::answer("b")))
            .await
            .unwrap();
        assert_eq!(
            right.recv().await,
            Some(SignalingMessage::Ice(IceCandidate::new("a")))
        );
        assert_eq!(
            left.recv().await.map(|m| m.action()),
            Some("answer")
        );
    }

    #[tokio::test]
    async fn send_after_peer_dropped_fails() {
        let (left, right) = LocalSignaler::pair();
        drop(right);
        let result = left.send(SignalingMessage::Ice(IceCandidate::new("a"))).await;
        assert!(matches!(result, Err(SignalingError::Closed)));
        assert_eq!(left.recv().await, None);
    }
}
