use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use super::{
    CandidateHandler, CloseHandler, EngineChannel, MessageHandler, OpenHandler, PeerEngine,
    PeerState, StateHandler,
};
use crate::channel::ChannelConfig;
use crate::config::IceServer;
use crate::error::EngineError;
use crate::signaling::{IceCandidate, SdpType, SessionDescription};

fn build_api(setting: SettingEngine) -> Result<API, EngineError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(to_setup_error)?;

    let mut registry = Registry::new();
    registry =
        register_default_interceptors(registry, &mut media_engine).map_err(to_setup_error)?;

    Ok(APIBuilder::new()
        .with_setting_engine(setting)
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

fn to_setup_error<E: std::fmt::Display>(err: E) -> EngineError {
    EngineError::Setup(err.to_string())
}

fn to_description_error<E: std::fmt::Display>(err: E) -> EngineError {
    EngineError::Description(err.to_string())
}

fn rtc_ice_server(server: &IceServer) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone(),
        credential: server.credential.clone(),
        ..Default::default()
    }
}

fn description_from_rtc(desc: &RTCSessionDescription) -> Result<SessionDescription, EngineError> {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => {
            return Err(EngineError::Description("unspecified sdp type".into()));
        }
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: desc.sdp.clone(),
    })
}

fn description_to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, EngineError> {
    match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp).map_err(to_description_error),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp).map_err(to_description_error),
        SdpType::Pranswer => {
            RTCSessionDescription::pranswer(desc.sdp).map_err(to_description_error)
        }
        SdpType::Rollback => Err(EngineError::Description(
            "rollback descriptions are not supported".into(),
        )),
    }
}

fn peer_state(state: RTCPeerConnectionState) -> PeerState {
    match state {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => PeerState::New,
        RTCPeerConnectionState::Connecting => PeerState::Connecting,
        RTCPeerConnectionState::Connected => PeerState::Connected,
        RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
        RTCPeerConnectionState::Failed => PeerState::Failed,
        RTCPeerConnectionState::Closed => PeerState::Closed,
    }
}

impl From<&ChannelConfig> for RTCDataChannelInit {
    fn from(config: &ChannelConfig) -> Self {
        RTCDataChannelInit {
            ordered: Some(config.ordered),
            max_retransmits: config.max_retransmits(),
            negotiated: Some(config.id),
            ..Default::default()
        }
    }
}

/// [`PeerEngine`] backed by a webrtc-rs peer connection.
pub struct WebRtcEngine {
    pc: Arc<RTCPeerConnection>,
}

impl WebRtcEngine {
    pub async fn new(ice_servers: &[IceServer]) -> Result<Self, EngineError> {
        Self::with_setting_engine(ice_servers, SettingEngine::default()).await
    }

    /// Builds the peer connection from a caller-tuned setting engine, e.g. one
    /// bound to a virtual network or with shorter ICE timeouts.
    pub async fn with_setting_engine(
        ice_servers: &[IceServer],
        setting: SettingEngine,
    ) -> Result<Self, EngineError> {
        let api = build_api(setting)?;
        let config = RTCConfiguration {
            ice_servers: ice_servers.iter().map(rtc_ice_server).collect(),
            ..Default::default()
        };
        let pc = api
            .new_peer_connection(config)
            .await
            .map_err(to_setup_error)?;
        Ok(Self { pc: Arc::new(pc) })
    }

    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }
}

#[async_trait]
impl PeerEngine for WebRtcEngine {
    async fn create_data_channel(
        &self,
        label: &str,
        config: &ChannelConfig,
    ) -> Result<Arc<dyn EngineChannel>, EngineError> {
        let dc = self
            .pc
            .create_data_channel(label, Some(RTCDataChannelInit::from(config)))
            .await
            .map_err(to_setup_error)?;
        tracing::debug!(
            target = "webrtc",
            channel = %label,
            id = config.id,
            ordered = config.ordered,
            reliable = config.reliable,
            "created negotiated data channel"
        );
        Ok(Arc::new(WebRtcChannel {
            label: label.to_string(),
            dc,
        }))
    }

    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(to_description_error)?;
        description_from_rtc(&offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(to_description_error)?;
        description_from_rtc(&answer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), EngineError> {
        let description = description_to_rtc(description)?;
        self.pc
            .set_local_description(description)
            .await
            .map_err(to_description_error)
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), EngineError> {
        let description = description_to_rtc(description)?;
        self.pc
            .set_remote_description(description)
            .await
            .map_err(to_description_error)
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let desc = self.pc.local_description().await?;
        description_from_rtc(&desc).ok()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|err| EngineError::Ice(err.to_string()))
    }

    fn on_ice_candidate(&self, handler: CandidateHandler) {
        let handler: Arc<dyn Fn(IceCandidate) + Send + Sync> = Arc::from(handler);
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                if let Some(candidate) = candidate {
                    match candidate.to_json() {
                        Ok(init) => handler(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }),
                        Err(err) => tracing::warn!(
                            target = "webrtc",
                            error = %err,
                            "failed to serialize local ice candidate"
                        ),
                    }
                } else {
                    tracing::trace!(target = "webrtc", "ice gathering complete");
                }
                Box::pin(async {})
            }));
    }

    fn on_state_change(&self, handler: StateHandler) {
        let handler: Arc<dyn Fn(PeerState) + Send + Sync> = Arc::from(handler);
        self.pc
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                tracing::debug!(target = "webrtc", state = ?state, "peer connection state changed");
                handler(peer_state(state));
                Box::pin(async {})
            }));
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.pc.close().await.map_err(to_setup_error)
    }
}

struct WebRtcChannel {
    label: String,
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl EngineChannel for WebRtcChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    fn on_open(&self, handler: OpenHandler) {
        self.dc.on_open(Box::new(move || {
            handler();
            Box::pin(async {})
        }));
    }

    fn on_close(&self, handler: CloseHandler) {
        self.dc.on_close(Box::new(move || {
            handler();
            Box::pin(async {})
        }));
    }

    fn on_message(&self, handler: MessageHandler) {
        self.dc.on_message(Box::new(move |msg: DataChannelMessage| {
            handler(msg.data);
            Box::pin(async {})
        }));
        let label = self.label.clone();
        self.dc.on_error(Box::new(move |err| {
            tracing::warn!(target = "webrtc", channel = %label, error = %err, "data channel error");
            Box::pin(async {})
        }));
    }

    async fn send(&self, data: Bytes) -> Result<(), EngineError> {
        self.dc
            .send(&data)
            .await
            .map(|_| ())
            .map_err(|err| EngineError::Send(err.to_string()))
    }
}
