mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::RngCore;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio::time::sleep;

use transport_peer::transport::mock::{MockCall, MockConnector, MockTrack};
use transport_peer::{
    CONTROL_CHANNEL_LABEL, Channel, ChannelMessage, ConnectionState, IceCandidate, MediaKind, Peer,
    PeerError, PeerState, SendEncoding, SignalMessage, TransceiverDirection, TransceiverInit,
    TransceiverRequest,
};

use common::{answer, counter, eventually, init_tracing, mock_builder_with, mock_peer, offer};

fn candidate(name: &str) -> SignalMessage {
    SignalMessage::Candidate(IceCandidate::new(name))
}

fn video_init() -> Vec<TransceiverInit> {
    vec![TransceiverInit {
        direction: TransceiverDirection::Sendonly,
        send_encodings: vec![SendEncoding {
            rid: "hi".into(),
            ssrc: 1234,
            payload_type: 96,
        }],
    }]
}

#[test_timeout::tokio_timeout_test]
async fn buffered_candidates_apply_once_in_arrival_order() {
    init_tracing();
    let connector = MockConnector::new();
    let (peer, mut log) = mock_peer(&connector, "answerer");

    for name in ["candidate:a", "candidate:b", "candidate:c"] {
        peer.signal(candidate(name)).await.expect("buffer candidate");
    }
    let transport = connector.latest().expect("transport created lazily");
    assert_eq!(peer.pending_candidate_count(), 3);
    assert!(transport.applied_candidates().is_empty());
    assert!(!peer.is_initiator());

    peer.signal(offer("remote-offer")).await.expect("apply offer");

    let applied: Vec<_> = transport
        .applied_candidates()
        .into_iter()
        .map(|c| c.candidate)
        .collect();
    assert_eq!(applied, vec!["candidate:a", "candidate:b", "candidate:c"]);
    assert_eq!(peer.pending_candidate_count(), 0);
    assert!(matches!(log.next().await, SignalMessage::Answer { .. }));

    // with a remote description in place candidates go straight through
    peer.signal(candidate("candidate:d")).await.unwrap();
    assert_eq!(transport.applied_candidates().len(), 4);
    assert_eq!(peer.pending_candidate_count(), 0);
}

#[test_timeout::tokio_timeout_test]
async fn non_initiator_never_creates_offers() {
    init_tracing();
    let connector = MockConnector::new();
    let (peer, mut log) = mock_peer(&connector, "answerer");

    peer.signal(offer("remote-offer")).await.unwrap();
    assert!(matches!(log.next().await, SignalMessage::Answer { .. }));

    peer.signal(SignalMessage::Renegotiate).await.unwrap();
    assert_eq!(log.next().await, SignalMessage::Renegotiate);

    peer.add_track(MockTrack::new("mic")).await.unwrap();
    assert_eq!(log.next().await, SignalMessage::Renegotiate);

    let transport = connector.latest().unwrap();
    assert_eq!(transport.count_calls(|call| *call == MockCall::CreateOffer), 0);
    assert_eq!(transport.count_calls(|call| matches!(call, MockCall::AddTrack(_))), 1);
}

#[test_timeout::tokio_timeout_test]
async fn initiator_offers_on_renegotiate() {
    init_tracing();
    let connector = MockConnector::new();
    let (peer, mut log) = mock_peer(&connector, "offerer");

    peer.init().await.unwrap();
    assert!(peer.is_initiator());
    assert!(matches!(log.next().await, SignalMessage::Offer { .. }));

    peer.signal(SignalMessage::Renegotiate).await.unwrap();
    assert!(matches!(log.next().await, SignalMessage::Offer { .. }));

    let transport = connector.latest().unwrap();
    assert_eq!(transport.count_calls(|call| *call == MockCall::CreateOffer), 2);
}

#[test_timeout::tokio_timeout_test]
async fn non_initiator_transceiver_request_echoes_kind_and_init() {
    init_tracing();
    let connector = MockConnector::new();
    let (peer, mut log) = mock_peer(&connector, "answerer");
    peer.signal(offer("remote-offer")).await.unwrap();
    log.next().await;

    let result = peer
        .add_transceiver_from_kind(MediaKind::Video, video_init())
        .await
        .unwrap();
    assert!(result.is_none());

    let transport = connector.latest().unwrap();
    assert_eq!(
        transport.count_calls(|call| matches!(call, MockCall::AddTransceiver { .. })),
        0
    );
    assert_eq!(
        log.next().await,
        SignalMessage::TransceiverRequest(TransceiverRequest {
            kind: MediaKind::Video,
            init: video_init(),
        })
    );
    assert!(log.drain().is_empty());
}

#[test_timeout::tokio_timeout_test]
async fn missing_type_is_rejected_without_side_effects() {
    init_tracing();
    let connector = MockConnector::new();
    let (peer, mut log) = mock_peer(&connector, "answerer");

    let err = peer
        .signal_value(&json!({"sdp": "v=0"}))
        .await
        .unwrap_err();
    assert!(matches!(err, PeerError::InvalidSignalMessageType));
    assert_eq!(connector.connect_count(), 0);
    assert_eq!(peer.state(), PeerState::Uninitialized);
    assert!(log.drain().is_empty());

    // malformed payload under a known tag is also rejected up front
    let err = peer
        .signal_json(r#"{"type":"candidate","candidate":42}"#)
        .await
        .unwrap_err();
    assert!(matches!(err, PeerError::InvalidSignalMessage(_)));
    assert_eq!(connector.connect_count(), 0);
}

#[test_timeout::tokio_timeout_test]
async fn transceiver_request_requires_initiator() {
    init_tracing();
    let connector = MockConnector::new();
    let (peer, _log) = mock_peer(&connector, "answerer");

    let request = json!({
        "type": "transceiverRequest",
        "transceiverRequest": {"kind": "audio", "init": []}
    });
    let err = peer.signal_value(&request).await.unwrap_err();
    assert!(matches!(err, PeerError::InvalidSignalState(_)));
    assert_eq!(connector.connect_count(), 0);

    peer.signal(offer("remote-offer")).await.unwrap();
    let err = peer.signal_value(&request).await.unwrap_err();
    assert!(matches!(err, PeerError::InvalidSignalState(_)));
    let transport = connector.latest().unwrap();
    assert_eq!(
        transport.count_calls(|call| matches!(call, MockCall::AddTransceiver { .. })),
        0
    );
}

#[test_timeout::tokio_timeout_test]
async fn initiator_honours_transceiver_request() {
    init_tracing();
    let connector = MockConnector::new();
    let (peer, mut log) = mock_peer(&connector, "offerer");
    let added = Arc::new(Mutex::new(Vec::new()));
    {
        let added = Arc::clone(&added);
        peer.on_transceiver(move |transceiver| added.lock().push(transceiver));
    }

    peer.init().await.unwrap();
    log.next().await;
    peer.signal(answer("remote-answer")).await.unwrap();

    peer.signal(SignalMessage::TransceiverRequest(TransceiverRequest {
        kind: MediaKind::Video,
        init: video_init(),
    }))
    .await
    .unwrap();

    let transport = connector.latest().unwrap();
    assert!(transport.calls().contains(&MockCall::AddTransceiver {
        kind: MediaKind::Video,
        init: video_init(),
    }));
    assert!(matches!(log.next().await, SignalMessage::Offer { .. }));
    eventually("transceiver callback", || added.lock().len() == 1).await;
    assert_eq!(added.lock()[0].kind, MediaKind::Video);
}

#[test_timeout::tokio_timeout_test]
async fn initiator_adds_transceiver_and_renegotiates() {
    init_tracing();
    let connector = MockConnector::new();
    let (peer, mut log) = mock_peer(&connector, "offerer");
    let (fired, on_transceiver) = counter();
    peer.on_transceiver(move |_| on_transceiver());

    peer.init().await.unwrap();
    log.next().await;

    let transceiver = peer
        .add_transceiver_from_kind(MediaKind::Audio, Vec::new())
        .await
        .unwrap()
        .expect("initiator returns the transceiver");
    assert_eq!(transceiver.kind, MediaKind::Audio);
    assert!(matches!(log.next().await, SignalMessage::Offer { .. }));
    eventually("transceiver callback", || fired.load(Ordering::SeqCst) == 1).await;
}

#[test_timeout::tokio_timeout_test]
async fn close_twice_fires_callbacks_once() {
    init_tracing();
    let connector = MockConnector::new();
    let (peer, _log) = mock_peer(&connector, "offerer");
    let (closes, on_close) = counter();
    peer.on_close(on_close);

    peer.init().await.unwrap();
    peer.close().await.expect("first close");
    peer.close().await.expect("second close");

    eventually("close callback", || closes.load(Ordering::SeqCst) == 1).await;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(peer.state(), PeerState::Closed);
    assert!(peer.transport().is_none());
    assert!(peer.channel().is_none());

    let transport = connector.latest().unwrap();
    assert!(transport.is_closed());
    assert!(transport.channel("app").unwrap().is_closed());
    assert!(transport.channel(CONTROL_CHANNEL_LABEL).unwrap().is_closed());
}

#[test_timeout::tokio_timeout_test]
async fn close_failures_are_combined() {
    init_tracing();
    let connector = MockConnector::new();
    let (peer, _log) = mock_peer(&connector, "offerer");
    peer.init().await.unwrap();

    let transport = connector.latest().unwrap();
    transport.channel("app").unwrap().fail_close(true);
    transport.channel(CONTROL_CHANNEL_LABEL).unwrap().fail_close(true);

    let err = peer.close().await.unwrap_err();
    assert_eq!(err.causes().len(), 2);
    // teardown still completed
    assert!(transport.is_closed());
    assert!(peer.close().await.is_ok());
}

#[test_timeout::tokio_timeout_test]
async fn large_writes_are_chunked_in_order() {
    init_tracing();
    let connector = MockConnector::new();
    let (peer, _log) =
        mock_builder_with(&connector, "offerer", |builder| builder.max_channel_message_size(1024));
    peer.init().await.unwrap();

    let mut payload = vec![0u8; 5000];
    rand::thread_rng().fill_bytes(&mut payload);
    let sent = peer.write(&payload).await.unwrap();
    assert_eq!(sent, payload.len());

    let channel = connector.latest().unwrap().channel("app").unwrap();
    let messages = channel.sent();
    assert_eq!(messages.len(), 5);
    assert!(messages.iter().all(|m| !m.is_string && m.data.len() <= 1024));
    let joined: Vec<u8> = messages.iter().flat_map(|m| m.data.to_vec()).collect();
    assert_eq!(joined, payload);

    let text = "ü".repeat(700);
    assert_eq!(peer.write_text(&text).await.unwrap(), text.len());
    assert_eq!(channel.sent_text().concat(), text);
}

#[test_timeout::tokio_timeout_test]
async fn failed_chunk_reports_partial_count() {
    init_tracing();
    let connector = MockConnector::new();
    let (peer, _log) =
        mock_builder_with(&connector, "offerer", |builder| builder.max_channel_message_size(100));
    peer.init().await.unwrap();
    connector.latest().unwrap().channel("app").unwrap().fail_after(3);

    match peer.write(&[1u8; 1000]).await {
        Err(PeerError::Write { sent, .. }) => assert_eq!(sent, 300),
        other => panic!("expected write failure, got {other:?}"),
    }
}

#[test_timeout::tokio_timeout_test]
async fn control_channel_routing_follows_ready_flag() {
    init_tracing();
    let connector = MockConnector::new();
    let (peer, mut log) = mock_peer(&connector, "offerer");
    peer.init().await.unwrap();
    assert!(matches!(log.next().await, SignalMessage::Offer { .. }));
    peer.signal(answer("remote-answer")).await.unwrap();

    let transport = connector.latest().unwrap();
    let control = transport.channel(CONTROL_CHANNEL_LABEL).unwrap();

    let waiter = {
        let peer = peer.clone();
        tokio::spawn(async move { peer.wait_control_ready().await })
    };
    transport.open_channel(CONTROL_CHANNEL_LABEL);
    waiter.await.unwrap();
    assert!(peer.is_control_ready());

    peer.add_track(MockTrack::new("cam")).await.unwrap();
    let routed = control.sent_text();
    assert_eq!(routed.len(), 1);
    assert!(matches!(
        SignalMessage::from_json(&routed[0]).unwrap(),
        SignalMessage::Offer { .. }
    ));
    assert!(log.drain().is_empty());

    transport.close_channel(CONTROL_CHANNEL_LABEL);
    eventually("control channel closed", || !peer.is_control_ready()).await;

    peer.add_track(MockTrack::new("screen")).await.unwrap();
    assert!(matches!(log.next().await, SignalMessage::Offer { .. }));
    assert_eq!(control.sent_text().len(), 1);
}

#[test_timeout::tokio_timeout_test]
async fn offer_produces_exactly_one_answer() {
    init_tracing();
    let connector = MockConnector::new();
    let (peer, mut log) = mock_peer(&connector, "answerer");

    peer.signal(offer("first")).await.unwrap();
    assert!(matches!(log.next().await, SignalMessage::Answer { .. }));
    assert!(log.drain().is_empty());

    peer.signal(offer("second")).await.unwrap();
    assert!(matches!(log.next().await, SignalMessage::Answer { .. }));
    assert!(log.drain().is_empty());

    let transport = connector.latest().unwrap();
    assert_eq!(transport.count_calls(|call| *call == MockCall::CreateAnswer), 2);

    // answers and pranswers never trigger an answer of our own
    peer.signal(SignalMessage::Pranswer { sdp: "p".into() }).await.unwrap();
    assert_eq!(transport.count_calls(|call| *call == MockCall::CreateAnswer), 2);
}

#[test_timeout::tokio_timeout_test]
async fn drain_failures_are_all_reported() {
    init_tracing();
    let connector = MockConnector::new();
    let (peer, mut log) = mock_peer(&connector, "answerer");

    peer.signal(candidate("c1")).await.unwrap();
    let transport = connector.latest().unwrap();
    transport.reject_candidate("c1");
    transport.reject_candidate("c3");
    peer.signal(candidate("c2")).await.unwrap();
    peer.signal(candidate("c3")).await.unwrap();

    let err = peer.signal(offer("remote-offer")).await.unwrap_err();
    let causes = err.causes();
    assert_eq!(causes.len(), 2);
    assert!(causes.iter().all(|cause| matches!(cause, PeerError::Transport(_))));

    let attempted: Vec<_> = transport
        .applied_candidates()
        .into_iter()
        .map(|c| c.candidate)
        .collect();
    assert_eq!(attempted, vec!["c1", "c2", "c3"]);
    assert_eq!(peer.pending_candidate_count(), 0);
    // the answer is still produced
    assert!(matches!(log.next().await, SignalMessage::Answer { .. }));
}

#[test_timeout::tokio_timeout_test]
async fn rollback_keeps_buffered_candidates() {
    init_tracing();
    let connector = MockConnector::new();
    let (peer, mut log) = mock_peer(&connector, "answerer");

    peer.signal(candidate("c1")).await.unwrap();
    peer.signal(SignalMessage::Rollback { sdp: String::new() })
        .await
        .unwrap();
    assert_eq!(peer.pending_candidate_count(), 1);
    assert!(log.drain().is_empty());

    peer.signal(offer("remote-offer")).await.unwrap();
    assert_eq!(peer.pending_candidate_count(), 0);
    assert_eq!(connector.latest().unwrap().applied_candidates().len(), 1);
}

#[test_timeout::tokio_timeout_test]
async fn transport_failure_closes_once() {
    init_tracing();
    let connector = MockConnector::new();
    let (peer, _log) = mock_peer(&connector, "offerer");
    let (closes, on_close) = counter();
    peer.on_close(on_close);
    let mut reader = peer.reader();

    peer.init().await.unwrap();
    let transport = connector.latest().unwrap();
    transport.set_state(ConnectionState::Connected);
    eventually("connected state", || peer.state() == PeerState::Connected).await;

    transport.set_state(ConnectionState::Failed);
    transport.set_state(ConnectionState::Disconnected);
    eventually("close callback", || closes.load(Ordering::SeqCst) == 1).await;
    assert_eq!(peer.state(), PeerState::Closed);
    assert!(transport.is_closed());

    let mut rest = Vec::new();
    reader.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());

    peer.close().await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test_timeout::tokio_timeout_test]
async fn closed_peer_reinitialises_on_signal() {
    init_tracing();
    let connector = MockConnector::new();
    let (peer, mut log) = mock_peer(&connector, "answerer");

    peer.signal(offer("first")).await.unwrap();
    log.next().await;
    peer.close().await.unwrap();
    assert_eq!(peer.state(), PeerState::Closed);

    peer.signal(offer("second")).await.unwrap();
    assert!(matches!(log.next().await, SignalMessage::Answer { .. }));
    assert_eq!(connector.connect_count(), 2);
    assert_eq!(peer.state(), PeerState::Negotiating);
}

#[test_timeout::tokio_timeout_test]
async fn control_channel_signals_are_applied() {
    init_tracing();
    let connector = MockConnector::new();
    let (peer, mut log) = mock_peer(&connector, "answerer");
    peer.signal(offer("remote-offer")).await.unwrap();
    log.next().await;

    let transport = connector.latest().unwrap();
    let control = transport.offer_channel(CONTROL_CHANNEL_LABEL);
    transport.offer_channel("chat");
    transport.open_channel(CONTROL_CHANNEL_LABEL);
    eventually("control ready", || peer.is_control_ready()).await;
    assert_eq!(peer.channel().unwrap().label(), "chat");

    let remote_candidate = candidate("candidate:over-control").to_json().unwrap();
    transport.deliver(CONTROL_CHANNEL_LABEL, ChannelMessage::text(remote_candidate));
    eventually("candidate applied", || {
        transport
            .applied_candidates()
            .iter()
            .any(|c| c.candidate == "candidate:over-control")
    })
    .await;

    let renegotiation = offer("over-control").to_json().unwrap();
    transport.deliver(CONTROL_CHANNEL_LABEL, ChannelMessage::text(renegotiation));
    eventually("answer over control channel", || {
        control
            .sent_text()
            .iter()
            .any(|text| matches!(SignalMessage::from_json(text), Ok(SignalMessage::Answer { .. })))
    })
    .await;
    assert!(log.drain().is_empty());
}

#[test_timeout::tokio_timeout_test]
async fn malformed_control_message_reaches_error_handlers() {
    init_tracing();
    let connector = MockConnector::new();
    let (peer, mut log) = mock_peer(&connector, "answerer");
    let errors = Arc::new(Mutex::new(Vec::new()));
    {
        let errors = Arc::clone(&errors);
        peer.on_error(move |err| errors.lock().push(err.to_string()));
    }
    peer.signal(offer("remote-offer")).await.unwrap();
    log.next().await;

    let transport = connector.latest().unwrap();
    transport.offer_channel(CONTROL_CHANNEL_LABEL);
    transport.open_channel(CONTROL_CHANNEL_LABEL);
    transport.deliver(CONTROL_CHANNEL_LABEL, ChannelMessage::text(r#"{"type":"bye"}"#));

    eventually("error callback", || !errors.lock().is_empty()).await;
    assert_eq!(errors.lock()[0], "invalid signal message type");
    assert_eq!(peer.state(), PeerState::Negotiating);
}

#[test_timeout::tokio_timeout_test]
async fn application_channel_events_reach_callbacks_and_reader() {
    init_tracing();
    let connector = MockConnector::new();
    let (peer, _log) = mock_peer(&connector, "offerer");
    let (connects, on_connect) = counter();
    peer.on_connect(on_connect);
    let received = Arc::new(Mutex::new(Vec::new()));
    let data_id = {
        let received = Arc::clone(&received);
        peer.on_data(move |message| received.lock().push(message))
    };
    let mut reader = peer.reader();

    peer.init().await.unwrap();
    let transport = connector.latest().unwrap();
    transport.open_channel("app");
    eventually("connect callback", || connects.load(Ordering::SeqCst) == 1).await;

    transport.deliver("app", ChannelMessage::binary(Bytes::from_static(b"hello ")));
    transport.deliver("app", ChannelMessage::text("world"));

    let mut buf = [0u8; 11];
    reader.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello world");
    eventually("data callbacks", || received.lock().len() == 2).await;

    assert!(peer.off_data(data_id));
    transport.deliver("app", ChannelMessage::text("ignored"));
    let mut more = [0u8; 7];
    reader.read_exact(&mut more).await.unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(received.lock().len(), 2);

    peer.close().await.unwrap();
    let mut rest = Vec::new();
    reader.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[test_timeout::tokio_timeout_test]
async fn local_candidates_wait_for_remote_description() {
    init_tracing();
    let connector = MockConnector::new();
    let (peer, mut log) = mock_peer(&connector, "offerer");
    peer.init().await.unwrap();
    assert!(matches!(log.next().await, SignalMessage::Offer { .. }));

    let transport = connector.latest().unwrap();
    transport.gather(IceCandidate::new("candidate:local"));
    eventually("held candidate", || peer.held_local_candidate_count() == 1).await;
    assert!(log.drain().is_empty());

    peer.signal(answer("remote-answer")).await.unwrap();
    assert_eq!(log.next().await, candidate("candidate:local"));
    assert_eq!(peer.held_local_candidate_count(), 0);

    transport.gather(IceCandidate::new("candidate:late"));
    assert_eq!(log.next().await, candidate("candidate:late"));
}

#[test_timeout::tokio_timeout_test]
async fn remote_tracks_reach_track_handlers() {
    init_tracing();
    let connector = MockConnector::new();
    let (peer, mut log) = mock_peer(&connector, "answerer");
    let tracks = Arc::new(Mutex::new(Vec::new()));
    {
        let tracks = Arc::clone(&tracks);
        peer.on_track(move |track, receiver| tracks.lock().push((track.id, receiver.track_id)));
    }
    peer.signal(offer("remote-offer")).await.unwrap();
    log.next().await;

    connector.latest().unwrap().add_remote_track("video-1");
    eventually("track callback", || tracks.lock().len() == 1).await;
    assert_eq!(
        tracks.lock()[0],
        ("video-1".to_string(), "video-1".to_string())
    );
}

#[test_timeout::tokio_timeout_test]
async fn missing_or_failing_signal_handler() {
    init_tracing();
    let connector = MockConnector::new();
    let peer = Peer::builder(connector.clone()).build().unwrap();
    assert!(matches!(
        peer.init().await,
        Err(PeerError::SignalHandlerMissing)
    ));

    peer.on_signal(|_| Err("signaling server unreachable".into()));
    match peer.init().await {
        Err(PeerError::SignalHandler(source)) => {
            assert_eq!(source.to_string(), "signaling server unreachable")
        }
        other => panic!("expected handler failure, got {other:?}"),
    }
    // each init replaced the previous transport
    assert_eq!(connector.connect_count(), 2);
    assert!(connector.transports()[0].is_closed());
}

#[test_timeout::tokio_timeout_test]
async fn connector_failure_is_returned() {
    init_tracing();
    let connector = MockConnector::new();
    connector.fail_connect(true);
    let (peer, _log) = mock_peer(&connector, "offerer");

    let err = peer.init().await.unwrap_err();
    assert!(matches!(err, PeerError::Transport(_)));
    assert!(peer.transport().is_none());
    assert_eq!(peer.state(), PeerState::Closed);
}

#[test_timeout::tokio_timeout_test]
async fn failed_reinit_leaves_peer_closed() {
    init_tracing();
    let connector = MockConnector::new();
    let (peer, mut log) = mock_peer(&connector, "offerer");
    let (closes, on_close) = counter();
    peer.on_close(on_close);
    let mut reader = peer.reader();

    peer.init().await.unwrap();
    log.next().await;
    let first = connector.latest().unwrap();
    first.set_state(ConnectionState::Connected);
    eventually("connected state", || peer.state() == PeerState::Connected).await;

    connector.fail_connect(true);
    let err = peer.init().await.unwrap_err();
    assert!(matches!(err, PeerError::Transport(_)));
    assert!(first.is_closed());
    assert!(peer.transport().is_none());
    assert_eq!(peer.state(), PeerState::Closed);
    eventually("close callback", || closes.load(Ordering::SeqCst) == 1).await;

    let mut rest = Vec::new();
    reader.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());

    peer.close().await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test_timeout::tokio_timeout_test]
async fn control_channel_can_be_disabled() {
    init_tracing();
    let connector = MockConnector::new();
    let (peer, _log) =
        mock_builder_with(&connector, "offerer", |builder| builder.control_channel(false));
    peer.init().await.unwrap();

    let transport = connector.latest().unwrap();
    assert!(transport.channel("app").is_some());
    assert!(transport.channel(CONTROL_CHANNEL_LABEL).is_none());
    assert!(peer.control_channel().is_none());
}
