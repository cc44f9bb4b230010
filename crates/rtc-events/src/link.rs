use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use slab::Slab;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::channel::ChannelConfig;
use crate::connection::DropReason;
use crate::engine::EngineChannel;
use crate::frame::Codec;

/// Receives each inbound frame after decompression.
pub(crate) type FrameListener = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// One configured channel: the engine handle, the low-level listeners
/// attached to it, and the outbound pump that serializes sends.
pub(crate) struct ChannelLink {
    label: String,
    config: ChannelConfig,
    handle: Arc<dyn EngineChannel>,
    codec: Codec,
    listeners: RwLock<Slab<FrameListener>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
}

impl ChannelLink {
    /// Must be called inside a tokio runtime; spawns the outbound pump.
    pub(crate) fn new(
        label: &str,
        config: ChannelConfig,
        handle: Arc<dyn EngineChannel>,
        codec: Codec,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        spawn_pump(label.to_string(), Arc::clone(&handle), rx);
        Arc::new(Self {
            label: label.to_string(),
            config,
            handle,
            codec,
            listeners: RwLock::new(Slab::new()),
            outbound: Mutex::new(Some(tx)),
        })
    }

    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn config(&self) -> ChannelConfig {
        self.config
    }

    pub(crate) fn handle(&self) -> &Arc<dyn EngineChannel> {
        &self.handle
    }

    pub(crate) fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    pub(crate) fn enqueue(&self, frame: Bytes) -> Result<(), DropReason> {
        let outbound = self.outbound.lock();
        let Some(tx) = outbound.as_ref() else {
            return Err(DropReason::ConnectionClosed);
        };
        tx.send(frame).map_err(|_| DropReason::ConnectionClosed)
    }

    pub(crate) fn attach(&self, listener: FrameListener) -> usize {
        self.listeners.write().insert(listener)
    }

    pub(crate) fn detach(&self, key: usize) -> bool {
        self.listeners.write().try_remove(key).is_some()
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Fans one inbound payload out to every attached listener.
    pub(crate) fn dispatch(&self, payload: Bytes) {
        let frame = match self.codec.open(&payload) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(
                    target = "rtc_events",
                    channel = %self.label,
                    bytes = payload.len(),
                    error = %err,
                    "dropping undecodable payload"
                );
                return;
            }
        };
        let listeners: Vec<FrameListener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        trace!(
            target = "rtc_events",
            channel = %self.label,
            bytes = payload.len(),
            listeners = listeners.len(),
            "dispatching frame"
        );
        for listener in listeners {
            listener(&frame);
        }
    }

    /// Stops the outbound pump and detaches every listener.
    pub(crate) fn shutdown(&self) {
        self.outbound.lock().take();
        self.listeners.write().clear();
    }
}

fn spawn_pump(label: String, handle: Arc<dyn EngineChannel>, mut rx: mpsc::UnboundedReceiver<Bytes>) {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let len = frame.len();
            match handle.send(frame).await {
                Ok(()) => trace!(target = "rtc_events", channel = %label, bytes = len, "frame sent"),
                Err(err) => warn!(
                    target = "rtc_events",
                    channel = %label,
                    bytes = len,
                    error = %err,
                    "failed to send frame"
                ),
            }
        }
        trace!(target = "rtc_events", channel = %label, "outbound pump stopped");
    });
}
