//! Offer/answer/ICE exchange for both connection roles.
//!
//! The responder opens the exchange with an offer; the initiator answers it.
//! Both trickle their local candidates through the same ordered outbox and
//! buffer remote candidates until a remote description is in place.

use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::config::ConnectionConfig;
use crate::connection::{Connection, ConnectionInner};
use crate::engine::{PeerEngine, WebRtcEngine};
use crate::error::{ConnectError, EngineError};
use crate::signaling::{IceCandidate, SessionDescription, SignalingMessage, Signaler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Waits for an offer and answers it (`Connection::call`).
    Initiator,
    /// Sends the offer (`Connection::recv`).
    Responder,
}

impl Connection {
    /// Connects as the answering side over a webrtc-rs engine.
    pub async fn call<S: Signaler>(signaler: S, config: ConnectionConfig) -> Result<Self, ConnectError> {
        config.validate()?;
        let engine = WebRtcEngine::new(&config.ice_servers).await?;
        Self::call_with_engine(signaler, config, Arc::new(engine)).await
    }

    /// Connects as the offering side over a webrtc-rs engine.
    pub async fn recv<S: Signaler>(signaler: S, config: ConnectionConfig) -> Result<Self, ConnectError> {
        config.validate()?;
        let engine = WebRtcEngine::new(&config.ice_servers).await?;
        Self::recv_with_engine(signaler, config, Arc::new(engine)).await
    }

    pub async fn call_with_engine<S: Signaler>(
        signaler: S,
        config: ConnectionConfig,
        engine: Arc<dyn PeerEngine>,
    ) -> Result<Self, ConnectError> {
        establish(Role::Initiator, Arc::new(signaler), config, engine).await
    }

    pub async fn recv_with_engine<S: Signaler>(
        signaler: S,
        config: ConnectionConfig,
        engine: Arc<dyn PeerEngine>,
    ) -> Result<Self, ConnectError> {
        establish(Role::Responder, Arc::new(signaler), config, engine).await
    }
}

async fn establish(
    role: Role,
    signaler: Arc<dyn Signaler>,
    config: ConnectionConfig,
    engine: Arc<dyn PeerEngine>,
) -> Result<Connection, ConnectError> {
    debug!(
        target = "rtc_events",
        role = ?role,
        channels = config.channels.len(),
        compression = ?config.compression,
        "starting handshake"
    );
    let guard = EngineGuard::new(&engine, role);
    let (inner, ready) = match ConnectionInner::build(Arc::clone(&engine), &config, role).await {
        Ok(built) => built,
        Err(err) => {
            guard.close().await;
            return Err(err);
        }
    };

    let outbox = Outbox::spawn(Arc::clone(&signaler), Arc::downgrade(&inner));
    {
        let outbox = outbox.clone();
        engine.on_ice_candidate(Box::new(move |candidate| {
            trace!(target = "rtc_events", role = ?role, candidate = %candidate.candidate, "local ice candidate");
            outbox.push(SignalingMessage::Ice(candidate));
        }));
    }
    tokio::spawn(run_signaling(
        role,
        signaler,
        Arc::downgrade(&inner),
        outbox.clone(),
        inner.closed_signal(),
    ));

    if role == Role::Responder {
        if let Err(err) = send_offer(engine.as_ref(), &outbox).await {
            inner.fail(err);
        }
    }

    let outcome = match ready.await {
        Ok(outcome) => outcome,
        Err(_) => Err(ConnectError::Closed),
    };
    match outcome {
        Ok(()) => {
            guard.disarm();
            debug!(target = "rtc_events", role = ?role, "handshake complete");
            Ok(Connection::from_inner(inner))
        }
        Err(err) => {
            inner.release();
            guard.close().await;
            Err(err)
        }
    }
}

async fn close_engine(engine: &Arc<dyn PeerEngine>, role: Role) {
    if let Err(err) = engine.close().await {
        debug!(target = "rtc_events", role = ?role, error = %err, "engine close failed");
    }
}

/// Owns the engine until the handshake hands it to a `Connection`.
///
/// Dropped while still armed (the handshake future was cancelled), it
/// schedules an engine close on the current runtime.
struct EngineGuard {
    engine: Option<Arc<dyn PeerEngine>>,
    role: Role,
}

impl EngineGuard {
    fn new(engine: &Arc<dyn PeerEngine>, role: Role) -> Self {
        Self {
            engine: Some(Arc::clone(engine)),
            role,
        }
    }

    fn disarm(mut self) {
        self.engine.take();
    }

    async fn close(mut self) {
        if let Some(engine) = self.engine.take() {
            close_engine(&engine, self.role).await;
        }
    }
}

impl Drop for EngineGuard {
    fn drop(&mut self) {
        let Some(engine) = self.engine.take() else {
            return;
        };
        let role = self.role;
        debug!(target = "rtc_events", role = ?role, "handshake abandoned; closing engine");
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                close_engine(&engine, role).await;
            });
        }
    }
}

fn to_negotiation_error(err: EngineError) -> ConnectError {
    ConnectError::Negotiation(err.to_string())
}

async fn send_offer(engine: &dyn PeerEngine, outbox: &Outbox) -> Result<(), ConnectError> {
    let offer = engine.create_offer().await.map_err(to_negotiation_error)?;
    engine
        .set_local_description(offer.clone())
        .await
        .map_err(to_negotiation_error)?;
    let offer = engine.local_description().await.unwrap_or(offer);
    debug!(target = "rtc_events", role = ?Role::Responder, "sending offer");
    outbox.push(SignalingMessage::Offer(offer));
    Ok(())
}

async fn create_local_answer(engine: &dyn PeerEngine) -> Result<SessionDescription, ConnectError> {
    let answer = engine.create_answer().await.map_err(to_negotiation_error)?;
    engine
        .set_local_description(answer.clone())
        .await
        .map_err(to_negotiation_error)?;
    Ok(engine.local_description().await.unwrap_or(answer))
}

async fn apply_candidate(inner: &ConnectionInner, candidate: IceCandidate) {
    if let Err(err) = inner.engine.add_ice_candidate(candidate).await {
        inner.ice_failed(err);
    }
}

/// Remote candidates seen before the remote description, in arrival order.
#[derive(Default)]
struct CandidateBuffer {
    remote_applied: bool,
    pending: Vec<IceCandidate>,
}

impl CandidateBuffer {
    async fn accept(&mut self, inner: &ConnectionInner, candidate: IceCandidate) {
        if self.remote_applied {
            apply_candidate(inner, candidate).await;
        } else {
            trace!(target = "rtc_events", role = ?inner.role, "buffering early ice candidate");
            self.pending.push(candidate);
        }
    }

    async fn mark_remote_applied(&mut self, inner: &ConnectionInner) {
        self.remote_applied = true;
        if !self.pending.is_empty() {
            debug!(
                target = "rtc_events",
                role = ?inner.role,
                count = self.pending.len(),
                "applying buffered ice candidates"
            );
        }
        for candidate in std::mem::take(&mut self.pending) {
            apply_candidate(inner, candidate).await;
        }
    }
}

async fn run_signaling(
    role: Role,
    signaler: Arc<dyn Signaler>,
    connection: Weak<ConnectionInner>,
    outbox: Outbox,
    mut closed: watch::Receiver<bool>,
) {
    let mut candidates = CandidateBuffer::default();
    loop {
        let message = tokio::select! {
            message = signaler.recv() => message,
            _ = closed.changed() => break,
        };
        let Some(message) = message else {
            debug!(target = "rtc_events", role = ?role, "signaling stream ended");
            break;
        };
        let Some(inner) = connection.upgrade() else {
            break;
        };
        trace!(target = "rtc_events", role = ?role, action = message.action(), "signaling message");

        match (role, message) {
            (Role::Initiator, SignalingMessage::Offer(offer)) => {
                if candidates.remote_applied {
                    warn!(target = "rtc_events", role = ?role, "ignoring offer after negotiation");
                    continue;
                }
                if let Err(err) = inner.engine.set_remote_description(offer).await {
                    inner.fail(to_negotiation_error(err));
                    continue;
                }
                candidates.mark_remote_applied(&inner).await;
                match create_local_answer(inner.engine.as_ref()).await {
                    Ok(answer) => {
                        debug!(target = "rtc_events", role = ?role, "sending answer");
                        outbox.push(SignalingMessage::Answer(answer));
                    }
                    Err(err) => inner.fail(err),
                }
            }
            (Role::Responder, SignalingMessage::Answer(answer)) => {
                if candidates.remote_applied {
                    warn!(target = "rtc_events", role = ?role, "ignoring answer after negotiation");
                    continue;
                }
                match inner.engine.set_remote_description(answer).await {
                    Ok(()) => candidates.mark_remote_applied(&inner).await,
                    Err(err) => inner.fail(to_negotiation_error(err)),
                }
            }
            (_, SignalingMessage::Ice(candidate)) => candidates.accept(&inner, candidate).await,
            (role, other) => {
                debug!(
                    target = "rtc_events",
                    role = ?role,
                    action = other.action(),
                    "ignoring unexpected signaling message"
                );
            }
        }
    }
}

/// Sends handshake messages one at a time, in the order they were pushed.
#[derive(Clone)]
struct Outbox {
    tx: mpsc::UnboundedSender<SignalingMessage>,
}

impl Outbox {
    fn spawn(signaler: Arc<dyn Signaler>, inner: Weak<ConnectionInner>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<SignalingMessage>();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let action = message.action();
                if let Err(err) = signaler.send(message).await {
                    match inner.upgrade() {
                        Some(inner) => inner.signaling_failed(err),
                        None => debug!(target = "rtc_events", action, error = %err, "signaling send failed"),
                    }
                    break;
                }
                trace!(target = "rtc_events", action, "signaling message sent");
            }
        });
        Self { tx }
    }

    fn push(&self, message: SignalingMessage) {
        if self.tx.send(message).is_err() {
            trace!(target = "rtc_events", "signaling outbox closed");
        }
    }
}
