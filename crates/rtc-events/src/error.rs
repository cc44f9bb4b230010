use thiserror::Error;

/// Fatal setup failures, reported once through the handshake future.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("invalid connection config: {0}")]
    Config(String),
    #[error("peer engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("Could not add ICE candidate: {0}")]
    IceCandidate(String),
    #[error("Failed to establish RTC connection")]
    ConnectionFailed,
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("data channel {0} closed before the connection was ready")]
    ChannelClosed(String),
    #[error("signaling error: {0}")]
    Signaling(#[from] SignalingError),
    #[error("connection closed before it was ready")]
    Closed,
}

/// Failures raised by a [`PeerEngine`](crate::engine::PeerEngine) or one of
/// its channels.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine setup failed: {0}")]
    Setup(String),
    #[error("session description rejected: {0}")]
    Description(String),
    #[error("ice candidate rejected: {0}")]
    Ice(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("engine closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("failed to encode frame: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode frame: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("signaling channel closed")]
    Closed,
    #[error("invalid signaling message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("signaling transport error: {0}")]
    Transport(String),
}
