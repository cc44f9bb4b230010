//! In-memory engine for tests and in-process peers.
//!
//! Two engines built with [`MockEngine::pair`] behave like a connected pair:
//! once both sides hold a local and a remote description, the pair reports
//! `Connected` and every channel label present on both sides opens. Frames
//! sent on an open channel arrive at the peer's channel with the same label.
//! Hooks let tests drive the same transitions by hand.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use super::{
    CandidateHandler, CloseHandler, EngineChannel, MessageHandler, OpenHandler, PeerEngine,
    PeerState, StateHandler,
};
use crate::channel::ChannelConfig;
use crate::error::EngineError;
use crate::signaling::{IceCandidate, SdpType, SessionDescription};

type Slot<F> = RwLock<Option<Arc<F>>>;
type CandidateSlot = Slot<dyn Fn(IceCandidate) + Send + Sync>;
type StateSlot = Slot<dyn Fn(PeerState) + Send + Sync>;
type NotifySlot = Slot<dyn Fn() + Send + Sync>;
type MessageSlot = Slot<dyn Fn(Bytes) + Send + Sync>;

pub struct MockEngine {
    this: Weak<MockEngine>,
    peer: RwLock<Weak<MockEngine>>,
    name: String,
    state: Mutex<EngineState>,
    fail_ice: AtomicBool,
    candidate_handler: CandidateSlot,
    state_handler: StateSlot,
}

struct EngineState {
    channels: Vec<Arc<MockChannel>>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    applied: Vec<IceCandidate>,
    peer_state: PeerState,
    next_candidate: u32,
    closed: bool,
}

impl MockEngine {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            peer: RwLock::new(Weak::new()),
            name,
            state: Mutex::new(EngineState {
                channels: Vec::new(),
                local: None,
                remote: None,
                applied: Vec::new(),
                peer_state: PeerState::New,
                next_candidate: 0,
                closed: false,
            }),
            fail_ice: AtomicBool::new(false),
            candidate_handler: RwLock::new(None),
            state_handler: RwLock::new(None),
        })
    }

    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        let left = Self::new("left");
        let right = Self::new("right");
        *left.peer.write() = Arc::downgrade(&right);
        *right.peer.write() = Arc::downgrade(&left);
        (left, right)
    }

    fn peer(&self) -> Option<Arc<MockEngine>> {
        self.peer.read().upgrade()
    }

    pub fn channel(&self, label: &str) -> Option<Arc<MockChannel>> {
        self.state
            .lock()
            .channels
            .iter()
            .find(|channel| channel.label == label)
            .cloned()
    }

    /// Fires the channel's open notification (once).
    pub fn open_channel(&self, label: &str) {
        if let Some(channel) = self.channel(label) {
            channel.mark_open();
        }
    }

    /// Fires the channel's close notification; the channel stops carrying
    /// frames.
    pub fn close_channel(&self, label: &str) {
        if let Some(channel) = self.channel(label) {
            channel.mark_closed();
        }
    }

    /// Moves the channel into the closing state: it stops reporting open but
    /// its close notification has not fired yet.
    pub fn begin_closing(&self, label: &str) {
        if let Some(channel) = self.channel(label) {
            channel.open.store(false, Ordering::SeqCst);
        }
    }

    /// Injects an inbound payload as if the peer had sent it.
    pub fn deliver(&self, label: &str, payload: Bytes) {
        if let Some(channel) = self.channel(label) {
            channel.receive(payload);
        }
    }

    /// Reports an aggregate state change to the registered listener.
    pub fn set_state(&self, state: PeerState) {
        self.state.lock().peer_state = state;
        let handler = self.state_handler.read().clone();
        if let Some(handler) = handler {
            handler(state);
        }
    }

    /// Reports a locally discovered candidate to the registered listener.
    pub fn discover_candidate(&self, candidate: IceCandidate) {
        let handler = self.candidate_handler.read().clone();
        if let Some(handler) = handler {
            handler(candidate);
        }
    }

    /// Makes every following `add_ice_candidate` fail.
    pub fn set_fail_ice(&self, fail: bool) {
        self.fail_ice.store(fail, Ordering::SeqCst);
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().applied.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().remote.clone()
    }

    pub fn peer_state(&self) -> PeerState {
        self.state.lock().peer_state
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn negotiated(&self) -> bool {
        let state = self.state.lock();
        state.local.is_some() && state.remote.is_some()
    }

    fn next_candidate(&self) -> IceCandidate {
        let mut state = self.state.lock();
        state.next_candidate += 1;
        IceCandidate {
            candidate: format!(
                "candidate:{} 1 udp 2130706431 127.0.0.1 {} typ host",
                state.next_candidate,
                50000 + state.next_candidate
            ),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: Some(self.name.clone()),
        }
    }

    /// Connects the pair once both sides are fully negotiated.
    fn try_connect(&self) {
        let Some(peer) = self.peer() else {
            return;
        };
        if !self.negotiated() || !peer.negotiated() {
            return;
        }
        if self.peer_state() == PeerState::Connected {
            return;
        }
        self.set_state(PeerState::Connected);
        peer.set_state(PeerState::Connected);

        let channels = self.state.lock().channels.clone();
        for channel in channels {
            if let Some(remote) = peer.channel(&channel.label) {
                channel.mark_open();
                remote.mark_open();
            }
        }
    }
}

#[async_trait]
impl PeerEngine for MockEngine {
    async fn create_data_channel(
        &self,
        label: &str,
        config: &ChannelConfig,
    ) -> Result<Arc<dyn EngineChannel>, EngineError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(EngineError::Closed);
        }
        if state.channels.iter().any(|channel| channel.id == config.id) {
            return Err(EngineError::Setup(format!(
                "data channel id {} already in use",
                config.id
            )));
        }
        let channel = Arc::new(MockChannel::new(label, config.id, self.this.clone()));
        state.channels.push(channel.clone());
        Ok(channel)
    }

    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        let labels: Vec<String> = self
            .state
            .lock()
            .channels
            .iter()
            .map(|channel| format!("{}:{}", channel.id, channel.label))
            .collect();
        Ok(SessionDescription::offer(format!(
            "mock-offer {} {}",
            self.name,
            labels.join(",")
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        match self.state.lock().remote.as_ref() {
            Some(remote) if remote.sdp_type == SdpType::Offer => Ok(SessionDescription::answer(
                format!("mock-answer {}", self.name),
            )),
            _ => Err(EngineError::Description(
                "cannot answer without a remote offer".into(),
            )),
        }
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), EngineError> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(EngineError::Closed);
            }
            state.local = Some(description);
        }
        let candidate = self.next_candidate();
        self.discover_candidate(candidate);
        self.try_connect();
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), EngineError> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(EngineError::Closed);
            }
            state.remote = Some(description);
        }
        self.try_connect();
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        if self.fail_ice.load(Ordering::SeqCst) {
            return Err(EngineError::Ice(format!(
                "rejected candidate {}",
                candidate.candidate
            )));
        }
        let mut state = self.state.lock();
        if state.remote.is_none() {
            return Err(EngineError::Ice("remote description not set".into()));
        }
        state.applied.push(candidate);
        Ok(())
    }

    fn on_ice_candidate(&self, handler: CandidateHandler) {
        *self.candidate_handler.write() = Some(Arc::from(handler));
    }

    fn on_state_change(&self, handler: StateHandler) {
        *self.state_handler.write() = Some(Arc::from(handler));
    }

    async fn close(&self) -> Result<(), EngineError> {
        let channels = {
            let mut state = self.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state.channels.clone()
        };
        for channel in &channels {
            channel.mark_closed();
            if let Some(remote) = self.peer().and_then(|peer| peer.channel(&channel.label)) {
                remote.mark_closed();
            }
        }
        self.set_state(PeerState::Closed);
        Ok(())
    }
}

/// Data channel of a [`MockEngine`].
pub struct MockChannel {
    label: String,
    id: u16,
    engine: Weak<MockEngine>,
    open: AtomicBool,
    closed: AtomicBool,
    on_open: NotifySlot,
    on_close: NotifySlot,
    on_message: MessageSlot,
    sent: Mutex<Vec<Bytes>>,
}

impl MockChannel {
    fn new(label: &str, id: u16, engine: Weak<MockEngine>) -> Self {
        Self {
            label: label.to_string(),
            id,
            engine,
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            on_open: RwLock::new(None),
            on_close: RwLock::new(None),
            on_message: RwLock::new(None),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    /// Payloads successfully sent on this channel, oldest first.
    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    fn mark_open(&self) {
        if self.closed.load(Ordering::SeqCst) || self.open.swap(true, Ordering::SeqCst) {
            return;
        }
        let handler = self.on_open.read().clone();
        if let Some(handler) = handler {
            handler();
        }
    }

    fn mark_closed(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.open.store(false, Ordering::SeqCst);
        let handler = self.on_close.read().clone();
        if let Some(handler) = handler {
            handler();
        }
    }

    fn receive(&self, payload: Bytes) {
        let handler = self.on_message.read().clone();
        if let Some(handler) = handler {
            handler(payload);
        }
    }
}

#[async_trait]
impl EngineChannel for MockChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn on_open(&self, handler: OpenHandler) {
        *self.on_open.write() = Some(Arc::from(handler));
    }

    fn on_close(&self, handler: CloseHandler) {
        *self.on_close.write() = Some(Arc::from(handler));
    }

    fn on_message(&self, handler: MessageHandler) {
        *self.on_message.write() = Some(Arc::from(handler));
    }

    async fn send(&self, data: Bytes) -> Result<(), EngineError> {
        if !self.is_open() {
            return Err(EngineError::Send(format!("channel {} is not open", self.label)));
        }
        self.sent.lock().push(data.clone());
        let remote = self
            .engine
            .upgrade()
            .and_then(|engine| engine.peer())
            .and_then(|peer| peer.channel(&self.label));
        if let Some(remote) = remote {
            if remote.is_open() {
                remote.receive(data);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn pair_opens_matching_channels_after_negotiation() {
        let (left, right) = MockEngine::pair();
        let left_channel = left
            .create_data_channel("control", &ChannelConfig::reliable(0))
            .await
            .unwrap();
        let right_channel = right
            .create_data_channel("control", &ChannelConfig::reliable(0))
            .await
            .unwrap();
        let opened = Arc::new(AtomicUsize::new(0));
        for channel in [&left_channel, &right_channel] {
            let opened = opened.clone();
            channel.on_open(Box::new(move || {
                opened.fetch_add(1, Ordering::SeqCst);
            }));
        }

        let offer = left.create_offer().await.unwrap();
        left.set_local_description(offer.clone()).await.unwrap();
        right.set_remote_description(offer).await.unwrap();
        let answer = right.create_answer().await.unwrap();
        right.set_local_description(answer.clone()).await.unwrap();
        assert_eq!(opened.load(Ordering::SeqCst), 0);
        left.set_remote_description(answer).await.unwrap();

        assert_eq!(opened.load(Ordering::SeqCst), 2);
        assert!(left_channel.is_open());
        assert_eq!(left.peer_state(), PeerState::Connected);
        assert_eq!(right.peer_state(), PeerState::Connected);
    }

    #[tokio::test]
    async fn send_reaches_peer_channel() {
        let (left, right) = MockEngine::pair();
        let sender = left
            .create_data_channel("data", &ChannelConfig::unreliable(1))
            .await
            .unwrap();
        let receiver = right
            .create_data_channel("data", &ChannelConfig::unreliable(1))
            .await
            .unwrap();
        let inbox = Arc::new(Mutex::new(Vec::new()));
        {
            let inbox = inbox.clone();
            receiver.on_message(Box::new(move |data| inbox.lock().push(data)));
        }
        assert!(sender.send(Bytes::from_static(b"early")).await.is_err());

        left.open_channel("data");
        right.open_channel("data");
        sender.send(Bytes::from_static(b"ping")).await.unwrap();
        assert_eq!(*inbox.lock(), vec![Bytes::from_static(b"ping")]);
        assert_eq!(left.channel("data").unwrap().sent().len(), 1);
    }

    #[tokio::test]
    async fn ice_needs_remote_description() {
        let engine = MockEngine::new("solo");
        let candidate = IceCandidate::new("candidate:1 1 udp 1 127.0.0.1 1 typ host");
        assert!(engine.add_ice_candidate(candidate.clone()).await.is_err());
        engine
            .set_remote_description(SessionDescription::offer("mock"))
            .await
            .unwrap();
        engine.add_ice_candidate(candidate.clone()).await.unwrap();
        engine.set_fail_ice(true);
        assert!(engine.add_ice_candidate(candidate).await.is_err());
        assert_eq!(engine.applied_candidates().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_channel_ids_are_rejected() {
        let engine = MockEngine::new("solo");
        engine
            .create_data_channel("a", &ChannelConfig::reliable(4))
            .await
            .unwrap();
        let err = engine
            .create_data_channel("b", &ChannelConfig::reliable(4))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Setup(_)));
    }

    #[tokio::test]
    async fn close_reports_channel_and_state() {
        let engine = MockEngine::new("solo");
        let channel = engine
            .create_data_channel("control", &ChannelConfig::reliable(0))
            .await
            .unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        {
            let events = events.clone();
            channel.on_close(Box::new(move || events.lock().push("channel closed".to_string())));
        }
        {
            let events = events.clone();
            engine.on_state_change(Box::new(move |state| events.lock().push(format!("{state:?}"))));
        }
        engine.open_channel("control");
        engine.close().await.unwrap();
        engine.close().await.unwrap();
        assert_eq!(
            *events.lock(),
            vec!["channel closed".to_string(), "Closed".to_string()]
        );
        assert!(!channel.is_open());
        assert!(engine.is_closed());
    }
}
