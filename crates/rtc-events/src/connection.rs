use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, trace, warn};

use crate::barrier::ReadinessBarrier;
use crate::channel::ChannelConfig;
use crate::completion::{Completion, CompletionState};
use crate::config::ConnectionConfig;
use crate::disconnect::{DisconnectHandlerId, DisconnectHandlers};
use crate::engine::{PeerEngine, PeerState};
use crate::error::{ConnectError, EngineError, SignalingError};
use crate::event::{Channel, ChannelEvent, Event};
use crate::frame::{self, Codec};
use crate::handshake::Role;
use crate::link::{ChannelLink, FrameListener};
use crate::registry::{ListenerId, ListenerRegistry, Registration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for every configured channel to open.
    Pending,
    Ready,
    /// The engine reported a channel close or a lost connection.
    Disconnected,
    /// Closed locally.
    Closed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Closed)
    }
}

/// Outcome of [`Connection::emit`]. Purely informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitStatus {
    Queued,
    Dropped(DropReason),
}

impl EmitStatus {
    pub fn is_queued(&self) -> bool {
        matches!(self, EmitStatus::Queued)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    UnknownChannel,
    ChannelNotOpen,
    ConnectionClosed,
    Encode,
}

/// An established peer connection carrying typed events over named data
/// channels.
///
/// Produced by [`Connection::call`] or [`Connection::recv`] once every
/// configured channel is open. Dropping it closes the underlying engine.
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

pub(crate) struct ConnectionInner {
    pub(crate) role: Role,
    pub(crate) engine: Arc<dyn PeerEngine>,
    links: BTreeMap<String, Arc<ChannelLink>>,
    codec: Codec,
    registry: Mutex<ListenerRegistry>,
    disconnect: DisconnectHandlers,
    barrier: ReadinessBarrier,
    state: Mutex<ConnectionState>,
    completion: Completion<(), ConnectError>,
    closed: watch::Sender<bool>,
}

pub(crate) type ReadySignal = oneshot::Receiver<Result<(), ConnectError>>;

impl ConnectionInner {
    /// Creates every configured channel and wires its notifications.
    pub(crate) async fn build(
        engine: Arc<dyn PeerEngine>,
        config: &ConnectionConfig,
        role: Role,
    ) -> Result<(Arc<Self>, ReadySignal), ConnectError> {
        config.validate()?;
        let codec = Codec::new(config.compression);
        let mut links = BTreeMap::new();
        for (label, channel) in &config.channels {
            let handle = engine.create_data_channel(label, channel).await?;
            links.insert(label.clone(), ChannelLink::new(label, *channel, handle, codec));
        }

        let (completion, ready) = Completion::new();
        let (closed, _) = watch::channel(false);
        let inner = Arc::new(Self {
            role,
            engine,
            barrier: ReadinessBarrier::new(links.keys().cloned()),
            links,
            codec,
            registry: Mutex::new(ListenerRegistry::default()),
            disconnect: DisconnectHandlers::default(),
            state: Mutex::new(ConnectionState::Pending),
            completion,
            closed,
        });
        inner.wire();
        Ok((inner, ready))
    }

    fn wire(self: &Arc<Self>) {
        for link in self.links.values() {
            let label = link.label().to_string();

            let weak = Arc::downgrade(self);
            let opened = label.clone();
            link.handle().on_open(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.channel_opened(&opened);
                }
            }));

            let weak = Arc::downgrade(self);
            let closed = label;
            link.handle().on_close(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.channel_closed(&closed);
                }
            }));

            let weak_link = Arc::downgrade(link);
            link.handle().on_message(Box::new(move |payload| {
                if let Some(link) = weak_link.upgrade() {
                    link.dispatch(payload);
                }
            }));
        }

        let weak = Arc::downgrade(self);
        self.engine.on_state_change(Box::new(move |state| {
            if let Some(inner) = weak.upgrade() {
                inner.state_changed(state);
            }
        }));

        // Channels may already be open if the engine raced the wiring.
        for link in self.links.values() {
            if link.is_open() {
                self.channel_opened(link.label());
            }
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub(crate) fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    fn was_ready(&self) -> bool {
        self.completion.state() == CompletionState::Resolved
    }

    fn channel_opened(&self, label: &str) {
        debug!(target = "rtc_events", role = ?self.role, channel = %label, "data channel open");
        if !self.barrier.mark_open(label) {
            return;
        }
        let mut state = self.state.lock();
        if *state == ConnectionState::Pending && self.completion.resolve(()) {
            *state = ConnectionState::Ready;
            info!(
                target = "rtc_events",
                role = ?self.role,
                channels = self.links.len(),
                "connection ready"
            );
        }
    }

    fn channel_closed(&self, label: &str) {
        info!(target = "rtc_events", role = ?self.role, channel = %label, "data channel closed");
        if self.completion.is_pending() {
            self.fail(ConnectError::ChannelClosed(label.to_string()));
        } else if self.was_ready() {
            self.disconnected("channel closed");
        }
    }

    fn state_changed(&self, state: PeerState) {
        trace!(target = "rtc_events", role = ?self.role, state = ?state, "peer state changed");
        match state {
            PeerState::Failed | PeerState::Closed | PeerState::Disconnected if self.was_ready() => {
                self.disconnected(match state {
                    PeerState::Failed => "peer connection failed",
                    PeerState::Closed => "peer connection closed",
                    _ => "peer connection disconnected",
                });
            }
            PeerState::Failed => self.fail(ConnectError::ConnectionFailed),
            PeerState::Closed => self.fail(ConnectError::Closed),
            PeerState::Disconnected => {
                debug!(target = "rtc_events", role = ?self.role, "peer disconnected before ready")
            }
            PeerState::New | PeerState::Connecting | PeerState::Connected => {}
        }
    }

    fn disconnected(&self, cause: &'static str) {
        {
            let mut state = self.state.lock();
            if *state == ConnectionState::Ready {
                *state = ConnectionState::Disconnected;
            }
        }
        info!(
            target = "rtc_events",
            role = ?self.role,
            cause,
            handlers = self.disconnect.len(),
            "connection disconnected"
        );
        self.disconnect.fire();
    }

    /// Rejects the handshake if it is still pending.
    pub(crate) fn fail(&self, err: ConnectError) {
        let message = err.to_string();
        if self.completion.reject(err) {
            warn!(
                target = "rtc_events",
                role = ?self.role,
                error = %message,
                pending = ?self.barrier.pending(),
                "connection setup failed"
            );
        } else {
            debug!(
                target = "rtc_events",
                role = ?self.role,
                error = %message,
                "ignoring failure after handshake settled"
            );
        }
    }

    pub(crate) fn ice_failed(&self, err: EngineError) {
        if self.completion.is_pending() {
            self.fail(ConnectError::IceCandidate(err.to_string()));
        } else {
            warn!(
                target = "rtc_events",
                role = ?self.role,
                error = %err,
                "failed to add remote ice candidate"
            );
        }
    }

    pub(crate) fn signaling_failed(&self, err: SignalingError) {
        if self.completion.is_pending() {
            self.fail(ConnectError::Signaling(err));
        } else {
            warn!(target = "rtc_events", role = ?self.role, error = %err, "signaling send failed");
        }
    }

    /// Moves to `Closed`; returns `false` if already closed.
    fn mark_closed(&self) -> bool {
        let mut state = self.state.lock();
        if *state == ConnectionState::Closed {
            return false;
        }
        *state = ConnectionState::Closed;
        true
    }

    /// Drops every listener, stops the pumps and ends the signaling loop.
    pub(crate) fn release(&self) {
        let registrations = self.registry.lock().drain();
        for registration in registrations {
            registration.dispose();
        }
        for link in self.links.values() {
            link.shutdown();
        }
        self.closed.send_replace(true);
    }

    fn emit_frame<A: Serialize + ?Sized>(&self, channel: &str, event: &str, args: &A) -> EmitStatus {
        if self.state().is_terminal() {
            return EmitStatus::Dropped(DropReason::ConnectionClosed);
        }
        let Some(link) = self.links.get(channel) else {
            return EmitStatus::Dropped(DropReason::UnknownChannel);
        };
        if !link.is_open() {
            trace!(target = "rtc_events", channel, event, "channel not open; dropping event");
            return EmitStatus::Dropped(DropReason::ChannelNotOpen);
        }
        let frame = match self.codec.encode(event, args) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(target = "rtc_events", channel, event, error = %err, "failed to encode event");
                return EmitStatus::Dropped(DropReason::Encode);
            }
        };
        match link.enqueue(frame) {
            Ok(()) => EmitStatus::Queued,
            Err(reason) => EmitStatus::Dropped(reason),
        }
    }

    fn subscribe<A, F>(&self, channel: &str, event: &str, handler: F) -> Option<ListenerId>
    where
        A: DeserializeOwned + 'static,
        F: Fn(A) + Send + Sync + 'static,
    {
        let link = self.links.get(channel)?;
        let event_name = event.to_string();
        let label = channel.to_string();
        let listener: FrameListener = Arc::new(move |frame: &[u8]| {
            match frame::decode_args::<A>(frame, &event_name) {
                Ok(Some(args)) => handler(args),
                Ok(None) => {}
                Err(err) => warn!(
                    target = "rtc_events",
                    channel = %label,
                    event = %event_name,
                    error = %err,
                    "dropping malformed payload"
                ),
            }
        });
        let key = link.attach(listener);
        let weak_link = Arc::downgrade(link);
        let id = self.registry.lock().insert(channel, event, move || {
            if let Some(link) = weak_link.upgrade() {
                link.detach(key);
            }
        });
        Some(id)
    }

    fn unsubscribe_where(&self, predicate: impl FnMut(&Registration) -> bool) -> usize {
        let removed = self.registry.lock().remove_where(predicate);
        let count = removed.len();
        for registration in removed {
            registration.dispose();
        }
        count
    }
}

impl Connection {
    pub(crate) fn from_inner(inner: Arc<ConnectionInner>) -> Self {
        Self { inner }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn channel_labels(&self) -> Vec<String> {
        self.inner.links.keys().cloned().collect()
    }

    pub fn channel_config(&self, label: &str) -> Option<ChannelConfig> {
        self.inner.links.get(label).map(|link| link.config())
    }

    pub fn is_channel_open(&self, label: &str) -> bool {
        self.inner.links.get(label).is_some_and(|link| link.is_open())
    }

    /// Number of active `on` registrations across all channels.
    pub fn listener_count(&self) -> usize {
        self.inner.registry.lock().len()
    }

    pub fn channel_listener_count(&self, label: &str) -> usize {
        self.inner.registry.lock().count_on(label)
    }

    /// Queues `E` with `args` on channel `C`.
    ///
    /// Never fails: an unknown or unopened channel, a closed connection, or an
    /// encoding error drops the event and reports why.
    pub fn emit<C, E>(&self, args: E::Args) -> EmitStatus
    where
        C: Channel,
        E: ChannelEvent<C>,
    {
        self.inner.emit_frame(C::LABEL, E::NAME, &args)
    }

    pub fn emit_by_label<A: Serialize + ?Sized>(
        &self,
        channel: &str,
        event: &str,
        args: &A,
    ) -> EmitStatus {
        self.inner.emit_frame(channel, event, args)
    }

    /// Invokes `handler` for every `E` arriving on `C`.
    ///
    /// Returns `None` when `C` is not part of this connection's channel map.
    pub fn on<C, E, F>(&self, handler: F) -> Option<ListenerId>
    where
        C: Channel,
        E: ChannelEvent<C>,
        F: Fn(E::Args) + Send + Sync + 'static,
    {
        self.inner.subscribe::<E::Args, F>(C::LABEL, E::NAME, handler)
    }

    pub fn on_by_label<A, F>(&self, channel: &str, event: &str, handler: F) -> Option<ListenerId>
    where
        A: DeserializeOwned + 'static,
        F: Fn(A) + Send + Sync + 'static,
    {
        self.inner.subscribe(channel, event, handler)
    }

    /// Registers `handler` for `E` on every configured channel.
    pub fn on_all<E, F>(&self, handler: F) -> Vec<ListenerId>
    where
        E: Event,
        F: Fn(E::Args) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        self.inner
            .links
            .keys()
            .filter_map(|label| {
                let handler = Arc::clone(&handler);
                self.inner
                    .subscribe::<E::Args, _>(label, E::NAME, move |args| handler(args))
            })
            .collect()
    }

    /// Removes exactly one listener. Stale or repeated ids are ignored.
    pub fn off(&self, id: ListenerId) -> bool {
        let removed = self.inner.registry.lock().remove(id);
        match removed {
            Some(registration) => {
                registration.dispose();
                true
            }
            None => false,
        }
    }

    pub fn off_event<C, E>(&self) -> usize
    where
        C: Channel,
        E: ChannelEvent<C>,
    {
        self.off_event_by_label(C::LABEL, E::NAME)
    }

    pub fn off_event_by_label(&self, channel: &str, event: &str) -> usize {
        self.inner
            .unsubscribe_where(|entry| entry.channel == channel && entry.event == event)
    }

    pub fn off_channel<C: Channel>(&self) -> usize {
        self.off_channel_by_label(C::LABEL)
    }

    pub fn off_channel_by_label(&self, channel: &str) -> usize {
        self.inner.unsubscribe_where(|entry| entry.channel == channel)
    }

    pub fn off_all(&self) -> usize {
        self.inner.unsubscribe_where(|_| true)
    }

    /// Handlers run in registration order, synchronously, once per
    /// disconnect notification from the engine.
    pub fn add_disconnect_handler(
        &self,
        handler: impl Fn() + Send + Sync + 'static,
    ) -> DisconnectHandlerId {
        self.inner.disconnect.add(handler)
    }

    pub fn remove_disconnect_handler(&self, id: DisconnectHandlerId) -> bool {
        self.inner.disconnect.remove(id)
    }

    pub fn clear_disconnect_handlers(&self) {
        self.inner.disconnect.clear();
    }

    /// Closes the engine. Listeners are dropped and later emits are no-ops;
    /// disconnect handlers only run if the engine reports the close.
    pub async fn close(&self) -> Result<(), EngineError> {
        if !self.inner.mark_closed() {
            return Ok(());
        }
        info!(target = "rtc_events", role = ?self.inner.role, "closing connection");
        self.inner.release();
        self.inner.engine.close().await
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.inner.mark_closed() {
            return;
        }
        self.inner.release();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let engine = Arc::clone(&self.inner.engine);
            let role = self.inner.role;
            runtime.spawn(async move {
                if let Err(err) = engine.close().await {
                    debug!(target = "rtc_events", role = ?role, error = %err, "engine close on drop failed");
                }
            });
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.inner.role)
            .field("state", &self.inner.state())
            .field("channels", &self.channel_labels())
            .finish()
    }
}
