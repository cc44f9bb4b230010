mod common;

use std::time::Duration;

use common::*;
use rtc_events::{
    ChannelMap, ConnectError, Connection, ConnectionConfig, ConnectionState, IceCandidate,
    LocalSignaler, MockEngine, PeerEngine, PeerState, Role, SdpType, SessionDescription, Signaler,
    SignalingMessage,
};
use tokio::time::{sleep, timeout};

fn candidate(n: u32) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 udp 2130706431 10.0.0.{n} 4000 typ host"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

#[tokio::test]
async fn mock_pair_reaches_ready() {
    let pair = connect(two_channel_config()).await;

    assert_eq!(pair.caller.state(), ConnectionState::Ready);
    assert_eq!(pair.receiver.state(), ConnectionState::Ready);
    assert_eq!(pair.caller.role(), Role::Initiator);
    assert_eq!(pair.receiver.role(), Role::Responder);
    assert_eq!(
        pair.caller.channel_labels(),
        vec!["control".to_string(), "data".to_string()]
    );
    assert!(pair.caller.is_channel_open("control"));
    assert!(pair.receiver.is_channel_open("data"));
    assert!(!pair.receiver.is_channel_open("bulk"));

    // Each side trickled one candidate ahead of its description; the
    // receiver may still be flushing when readiness fires.
    timeout(TIMEOUT, async {
        while pair.caller_engine.applied_candidates().len() < 1
            || pair.receiver_engine.applied_candidates().len() < 1
        {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("buffered candidates applied");
    assert_eq!(pair.caller_engine.applied_candidates().len(), 1);
    assert_eq!(pair.receiver_engine.applied_candidates().len(), 1);
    assert_eq!(
        pair.receiver_engine
            .remote_description()
            .map(|description| description.sdp_type),
        Some(SdpType::Answer)
    );
}

#[tokio::test]
async fn early_candidates_wait_for_the_offer() {
    init_tracing();
    let (local, remote) = LocalSignaler::pair();
    let engine = MockEngine::new("caller");
    let task = tokio::spawn(Connection::call_with_engine(
        local,
        two_channel_config(),
        engine.clone(),
    ));

    remote.send(SignalingMessage::Ice(candidate(1))).await.unwrap();
    remote.send(SignalingMessage::Ice(candidate(2))).await.unwrap();
    remote
        .send(SignalingMessage::Offer(SessionDescription::offer("remote offer")))
        .await
        .unwrap();

    // Local candidate first, then the answer.
    assert!(matches!(next_signal(&remote).await, SignalingMessage::Ice(_)));
    let SignalingMessage::Answer(answer) = next_signal(&remote).await else {
        panic!("expected answer");
    };
    assert_eq!(answer.sdp_type, SdpType::Answer);
    assert_eq!(engine.applied_candidates(), vec![candidate(1), candidate(2)]);

    remote.send(SignalingMessage::Ice(candidate(3))).await.unwrap();
    engine.open_channel("control");
    engine.open_channel("data");
    let connection = timeout(TIMEOUT, task).await.unwrap().unwrap().unwrap();
    assert_eq!(connection.state(), ConnectionState::Ready);

    timeout(TIMEOUT, async {
        while engine.applied_candidates().len() < 3 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("late candidate applied");
}

#[tokio::test]
async fn responder_opens_with_an_offer() {
    init_tracing();
    let (local, remote) = LocalSignaler::pair();
    let engine = MockEngine::new("receiver");
    let task = tokio::spawn(Connection::recv_with_engine(
        local,
        two_channel_config(),
        engine.clone(),
    ));

    let SignalingMessage::Offer(offer) = next_description(&remote).await else {
        panic!("expected offer");
    };
    assert!(offer.sdp.starts_with("mock-offer"));
    assert!(offer.sdp.contains("0:control"));

    remote.send(SignalingMessage::Ice(candidate(7))).await.unwrap();
    remote
        .send(SignalingMessage::Answer(SessionDescription::answer("remote answer")))
        .await
        .unwrap();
    timeout(TIMEOUT, async {
        while engine.applied_candidates().is_empty() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("buffered candidate applied");

    engine.open_channel("data");
    engine.open_channel("control");
    let connection = timeout(TIMEOUT, task).await.unwrap().unwrap().unwrap();
    assert_eq!(connection.role(), Role::Responder);
}

#[tokio::test]
async fn readiness_waits_for_every_channel() {
    init_tracing();
    let (local, remote) = LocalSignaler::pair();
    let engine = MockEngine::new("caller");
    let task = tokio::spawn(Connection::call_with_engine(
        local,
        two_channel_config(),
        engine.clone(),
    ));
    remote
        .send(SignalingMessage::Offer(SessionDescription::offer("remote offer")))
        .await
        .unwrap();
    next_description(&remote).await;

    engine.open_channel("data");
    engine.open_channel("data");
    sleep(Duration::from_millis(50)).await;
    assert!(!task.is_finished());

    engine.open_channel("control");
    let connection = timeout(TIMEOUT, task).await.unwrap().unwrap().unwrap();
    assert_eq!(connection.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn unexpected_actions_are_ignored() {
    init_tracing();
    let (local, remote) = LocalSignaler::pair();
    let engine = MockEngine::new("caller");
    let task = tokio::spawn(Connection::call_with_engine(
        local,
        two_channel_config(),
        engine.clone(),
    ));

    remote
        .send(SignalingMessage::Answer(SessionDescription::answer("stray")))
        .await
        .unwrap();
    remote
        .send(SignalingMessage::Offer(SessionDescription::offer("remote offer")))
        .await
        .unwrap();
    assert!(matches!(
        next_description(&remote).await,
        SignalingMessage::Answer(_)
    ));
    engine.open_channel("control");
    engine.open_channel("data");
    assert!(timeout(TIMEOUT, task).await.unwrap().unwrap().is_ok());
}

#[tokio::test]
async fn ice_failure_before_ready_rejects() {
    init_tracing();
    let (local, remote) = LocalSignaler::pair();
    let engine = MockEngine::new("caller");
    engine.set_fail_ice(true);
    let task = tokio::spawn(Connection::call_with_engine(
        local,
        two_channel_config(),
        engine.clone(),
    ));

    remote
        .send(SignalingMessage::Offer(SessionDescription::offer("remote offer")))
        .await
        .unwrap();
    remote.send(SignalingMessage::Ice(candidate(1))).await.unwrap();

    let err = timeout(TIMEOUT, task).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, ConnectError::IceCandidate(_)));
    assert!(err.to_string().starts_with("Could not add ICE candidate"));
    assert!(engine.is_closed());
}

#[tokio::test]
async fn failed_state_before_ready_rejects() {
    init_tracing();
    let (local, remote) = LocalSignaler::pair();
    let engine = MockEngine::new("caller");
    let task = tokio::spawn(Connection::call_with_engine(
        local,
        two_channel_config(),
        engine.clone(),
    ));
    remote
        .send(SignalingMessage::Offer(SessionDescription::offer("remote offer")))
        .await
        .unwrap();
    next_description(&remote).await;

    engine.set_state(PeerState::Failed);
    // A second fatal condition must not produce a second outcome.
    engine.set_state(PeerState::Closed);
    engine.open_channel("control");
    engine.open_channel("data");

    let err = timeout(TIMEOUT, task).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, ConnectError::ConnectionFailed));
    assert_eq!(err.to_string(), "Failed to establish RTC connection");
}

#[tokio::test]
async fn engine_close_before_ready_rejects() {
    init_tracing();
    let (local, _remote) = LocalSignaler::pair();
    let engine = MockEngine::new("receiver");
    let task = tokio::spawn(Connection::recv_with_engine(
        local,
        two_channel_config(),
        engine.clone(),
    ));
    timeout(TIMEOUT, async {
        while engine.local_description().await.is_none() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("offer created");

    engine.set_state(PeerState::Closed);
    let err = timeout(TIMEOUT, task).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, ConnectError::Closed));
}

#[tokio::test]
async fn channel_close_before_ready_rejects() {
    init_tracing();
    let (local, remote) = LocalSignaler::pair();
    let engine = MockEngine::new("caller");
    let task = tokio::spawn(Connection::call_with_engine(
        local,
        two_channel_config(),
        engine.clone(),
    ));
    remote
        .send(SignalingMessage::Offer(SessionDescription::offer("remote offer")))
        .await
        .unwrap();
    next_description(&remote).await;

    engine.open_channel("control");
    engine.close_channel("data");
    let err = timeout(TIMEOUT, task).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, ConnectError::ChannelClosed(label) if label == "data"));
}

#[tokio::test]
async fn aborted_handshake_closes_engine() {
    init_tracing();
    let (local, _remote) = LocalSignaler::pair();
    let engine = MockEngine::new("receiver");
    let task = tokio::spawn(Connection::recv_with_engine(
        local,
        two_channel_config(),
        engine.clone(),
    ));
    timeout(TIMEOUT, async {
        while engine.local_description().await.is_none() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("offer created");
    assert!(!engine.is_closed());

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());
    timeout(TIMEOUT, async {
        while !engine.is_closed() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("engine closed after abort");
}

#[tokio::test]
async fn dropped_handshake_future_closes_engine() {
    init_tracing();
    let (local, _remote) = LocalSignaler::pair();
    let engine = MockEngine::new("caller");
    let pending = timeout(
        Duration::from_millis(50),
        Connection::call_with_engine(local, two_channel_config(), engine.clone()),
    )
    .await;
    assert!(pending.is_err());

    timeout(TIMEOUT, async {
        while !engine.is_closed() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("engine closed after drop");
}

#[tokio::test]
async fn invalid_config_fails_before_negotiation() {
    init_tracing();
    let (local, remote) = LocalSignaler::pair();
    let engine = MockEngine::new("caller");
    let config = ConnectionConfig::localhost(ChannelMap::new());

    let err = Connection::recv_with_engine(local, config, engine.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectError::Config(_)));
    assert!(engine.channel("control").is_none());
    assert!(engine.is_closed());
    // Nothing was offered and the signaler was released.
    assert!(remote.recv().await.is_none());
}
