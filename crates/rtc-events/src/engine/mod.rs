//! Peer-connection engine seam.
//!
//! The connection drives the handshake and the data channels exclusively
//! through these traits. [`WebRtcEngine`] is the production implementation;
//! [`MockEngine`] is an in-memory pairable engine for tests.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::channel::ChannelConfig;
use crate::error::EngineError;
use crate::signaling::{IceCandidate, SessionDescription};

pub mod mock;
pub mod webrtc;

pub use self::mock::{MockChannel, MockEngine};
pub use self::webrtc::WebRtcEngine;

pub type OpenHandler = Box<dyn Fn() + Send + Sync>;
pub type CloseHandler = Box<dyn Fn() + Send + Sync>;
pub type MessageHandler = Box<dyn Fn(Bytes) + Send + Sync>;
pub type CandidateHandler = Box<dyn Fn(IceCandidate) + Send + Sync>;
pub type StateHandler = Box<dyn Fn(PeerState) + Send + Sync>;

/// Aggregate connection state reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[async_trait]
pub trait PeerEngine: Send + Sync {
    /// Creates a pre-negotiated channel; the remote side creates the same id.
    async fn create_data_channel(
        &self,
        label: &str,
        config: &ChannelConfig,
    ) -> Result<Arc<dyn EngineChannel>, EngineError>;

    async fn create_offer(&self) -> Result<SessionDescription, EngineError>;

    async fn create_answer(&self) -> Result<SessionDescription, EngineError>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), EngineError>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), EngineError>;

    async fn local_description(&self) -> Option<SessionDescription>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError>;

    /// Locally discovered candidates, in discovery order.
    fn on_ice_candidate(&self, handler: CandidateHandler);

    fn on_state_change(&self, handler: StateHandler);

    async fn close(&self) -> Result<(), EngineError>;
}

#[async_trait]
pub trait EngineChannel: Send + Sync {
    fn label(&self) -> &str;

    fn is_open(&self) -> bool;

    fn on_open(&self, handler: OpenHandler);

    fn on_close(&self, handler: CloseHandler);

    fn on_message(&self, handler: MessageHandler);

    async fn send(&self, data: Bytes) -> Result<(), EngineError>;
}
