#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rtc_events::{
    Channel, ChannelConfig, ChannelEvent, Connection, ConnectionConfig, Event, LocalSignaler,
    MockEngine, Signaler, SignalingMessage,
};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing_subscriber::{EnvFilter, fmt::SubscriberBuilder};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = SubscriberBuilder::default()
        .with_test_writer()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

pub struct Control;
impl Channel for Control {
    const LABEL: &'static str = "control";
}

pub struct Data;
impl Channel for Data {
    const LABEL: &'static str = "data";
}

/// Not part of any test config.
pub struct Bulk;
impl Channel for Bulk {
    const LABEL: &'static str = "bulk";
}

pub struct Chat;
impl Event for Chat {
    const NAME: &'static str = "chat";
    type Args = (String,);
}
impl ChannelEvent<Control> for Chat {}
impl ChannelEvent<Data> for Chat {}
impl ChannelEvent<Bulk> for Chat {}

pub struct Move;
impl Event for Move {
    const NAME: &'static str = "move";
    type Args = (i32, i32);
}
impl ChannelEvent<Data> for Move {}

pub struct Ping;
impl Event for Ping {
    const NAME: &'static str = "ping";
    type Args = ();
}
impl ChannelEvent<Control> for Ping {}

/// `control` is ordered and reliable, `data` unordered and unreliable.
pub fn two_channel_config() -> ConnectionConfig {
    ConnectionConfig::builder()
        .channel(Control::LABEL, ChannelConfig::reliable(0))
        .channel(Data::LABEL, ChannelConfig::unreliable(1))
        .without_ice_servers()
        .build()
        .expect("valid config")
}

pub struct Pair {
    pub caller: Connection,
    pub receiver: Connection,
    pub caller_engine: Arc<MockEngine>,
    pub receiver_engine: Arc<MockEngine>,
    /// Sends to the receiver's signaling loop.
    pub caller_signaler: LocalSignaler,
}

/// Runs both handshake roles against a connected mock engine pair.
pub async fn connect(config: ConnectionConfig) -> Pair {
    init_tracing();
    let (caller_signaler, receiver_signaler) = LocalSignaler::pair();
    let (caller_engine, receiver_engine) = MockEngine::pair();

    let call = Connection::call_with_engine(
        caller_signaler.clone(),
        config.clone(),
        caller_engine.clone(),
    );
    let recv = Connection::recv_with_engine(receiver_signaler, config, receiver_engine.clone());
    let (caller, receiver) = timeout(TIMEOUT, async { tokio::join!(call, recv) })
        .await
        .expect("handshake timed out");

    Pair {
        caller: caller.expect("caller connects"),
        receiver: receiver.expect("receiver connects"),
        caller_engine,
        receiver_engine,
        caller_signaler,
    }
}

/// Forwards every handler invocation into a channel the test can await.
pub fn collector<T: Send + 'static>() -> (impl Fn(T) + Send + Sync + 'static, mpsc::UnboundedReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        move |value| {
            let _ = tx.send(value);
        },
        rx,
    )
}

pub async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Gives in-flight pumps a chance to run, then asserts nothing arrived.
pub async fn assert_quiet<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>) {
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err(), "unexpected event");
}

/// Reads the next message the connection under test sent to its peer.
pub async fn next_signal(signaler: &LocalSignaler) -> SignalingMessage {
    timeout(TIMEOUT, signaler.recv())
        .await
        .expect("timed out waiting for signaling message")
        .expect("signaling closed")
}

/// Skips trickled candidates until a description arrives.
pub async fn next_description(signaler: &LocalSignaler) -> SignalingMessage {
    loop {
        let message = next_signal(signaler).await;
        if !matches!(message, SignalingMessage::Ice(_)) {
            return message;
        }
    }
}
