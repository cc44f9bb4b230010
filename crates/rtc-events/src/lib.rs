//! Typed, multiplexed event streams between two peers over WebRTC data
//! channels.
//!
//! [`Connection::call`] and [`Connection::recv`] drive the offer/answer/ICE
//! handshake through a [`Signaler`] and resolve once every configured channel
//! is open. The connection then carries named events, framed as MessagePack
//! and optionally zstd-compressed, on any of its channels.

pub mod channel;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod event;
pub mod frame;
pub mod handshake;
pub mod signaling;

mod barrier;
mod completion;
mod disconnect;
mod link;
mod registry;

pub use channel::{ChannelConfig, ChannelMap};
pub use config::{ConnectionConfig, ConnectionConfigBuilder, IceServer};
pub use connection::{Connection, ConnectionState, DropReason, EmitStatus};
pub use disconnect::DisconnectHandlerId;
pub use engine::{EngineChannel, MockEngine, PeerEngine, PeerState, WebRtcEngine};
pub use error::{ConnectError, EngineError, FrameError, SignalingError};
pub use event::{Channel, ChannelEvent, Event};
pub use frame::{Codec, Compression};
pub use handshake::Role;
pub use registry::ListenerId;
pub use signaling::{
    IceCandidate, LocalSignaler, SdpType, SessionDescription, Signaler, SignalingMessage,
};
