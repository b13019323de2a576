mod common;

use std::sync::Arc;

use common::{ALICE, BOB, Endpoint, Recorder, content, settle, transfer};
use micro_msrp::config::StackConfig;
use micro_msrp::manager::{AbortReason, AcceptHook, Session};
use micro_msrp::protocol::{FailureReport, MemoryContainer, Message, MessageState, ResponseCode};

fn pair(config: &StackConfig) -> (Endpoint, Endpoint) {
    (Endpoint::new(ALICE, BOB, config.clone()), Endpoint::new(BOB, ALICE, config.clone()))
}

#[test]
fn message_arrives_whatever_the_slicing() {
    let config = StackConfig::builder().chunk_size(1024).report_granularity(512).build();
    let body = content(5000);

    for (capacity, slice) in [(256, 1), (300, 7), (777, 64), (16 * 1024, 5), (16 * 1024, 100_000)] {
        let (mut alice, mut bob) = pair(&config);
        let message = alice.session.send_message(mime::TEXT_PLAIN, &body).unwrap();
        settle(&mut alice, &mut bob, capacity, slice);

        let received = bob.recorder.messages();
        assert_eq!(received.len(), 1, "capacity {capacity}, slice {slice}");
        let mut received = received[0].lock();
        assert_eq!(received.state(), MessageState::Complete);
        assert_eq!(received.content().unwrap(), body[..]);
        assert_eq!(received.content_type(), Some(&mime::TEXT_PLAIN));

        assert_eq!(message.lock().state(), MessageState::Complete);
        assert_eq!(alice.recorder.progress().last(), Some(&5000));
        assert!(alice.recorder.aborts().is_empty());
    }
}

#[test]
fn interleaved_messages_from_both_sides() {
    let config = StackConfig::builder().chunk_size(100).build();
    let (mut alice, mut bob) = pair(&config);
    let first = content(1000);
    let second = content(333);
    alice.session.send_message(mime::TEXT_PLAIN, &first).unwrap();
    bob.session.send_message(mime::APPLICATION_OCTET_STREAM, &second).unwrap();
    alice.session.send_message(mime::TEXT_PLAIN, b"").unwrap();

    settle(&mut alice, &mut bob, 256, 13);

    let at_bob = bob.recorder.messages();
    assert_eq!(at_bob.len(), 2);
    assert_eq!(at_bob[0].lock().content().unwrap(), first[..]);
    assert!(at_bob[1].lock().content().unwrap().is_empty());

    let at_alice = alice.recorder.messages();
    assert_eq!(at_alice.len(), 1);
    assert_eq!(at_alice[0].lock().content().unwrap(), second[..]);
}

#[test]
fn success_report_reaches_sender() {
    let config = StackConfig::builder().chunk_size(512).build();
    let (mut alice, mut bob) = pair(&config);

    let mut message = Message::outgoing(mime::TEXT_PLAIN, Box::new(MemoryContainer::from_bytes(&content(2000)[..])));
    message.set_success_report(true);
    let message_id = message.message_id().clone();
    alice.session.send(message).unwrap();

    settle(&mut alice, &mut bob, 1024, 50);

    assert_eq!(bob.recorder.messages().len(), 1);
    let reports = alice.recorder.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].message_id, message_id);
    assert_eq!(reports[0].status.as_ref().map(|status| status.code()), Some(ResponseCode::Ok));
    assert_eq!(reports[0].byte_range.map(|range| range.total), Some(Some(2000)));
    assert!(alice.session.find_message(&message_id).is_none());
}

#[test]
fn refused_message_aborts_at_sender() {
    let config = StackConfig::default();
    let mut alice = Endpoint::new(ALICE, BOB, config.clone());
    let refuse: Arc<dyn AcceptHook> = Arc::new(|_: &Session, message: &mut Message| {
        message.reject(ResponseCode::UnsupportedMediaType);
        false
    });
    let mut bob = Endpoint::build(BOB, ALICE, config, Recorder::new(), Some(refuse));

    alice.session.send_message(mime::IMAGE_PNG, b"not really a png").unwrap();
    settle(&mut alice, &mut bob, 1024, 16);

    assert!(bob.recorder.messages().is_empty());
    assert_eq!(alice.recorder.aborts(), vec![AbortReason::ErrorResponse(ResponseCode::UnsupportedMediaType)]);
}

#[test]
fn no_response_when_failure_report_is_no() {
    let config = StackConfig::default();
    let (mut alice, mut bob) = pair(&config);

    let mut message = Message::outgoing(mime::TEXT_PLAIN, Box::new(MemoryContainer::from_bytes(&b"fire and forget"[..])));
    message.set_failure_report(FailureReport::No);
    alice.session.send(message).unwrap();

    assert!(transfer(&alice, &mut bob, 1024, 4) > 0);
    assert_eq!(bob.recorder.messages().len(), 1);
    assert_eq!(transfer(&bob, &mut alice, 1024, 4), 0);
}

#[test]
fn sender_abort_ends_chunk_with_hash() {
    let config = StackConfig::builder().chunk_size(0).build();
    let (mut alice, mut bob) = pair(&config);
    let message = alice.session.send_message(mime::TEXT_PLAIN, &content(4000)).unwrap();

    let first = alice.take_output(256);
    bob.feed(&first, 256);
    alice.session.abort_message(&message).unwrap();
    settle(&mut alice, &mut bob, 256, 32);

    assert_eq!(message.lock().state(), MessageState::Aborted);
    assert!(bob.recorder.messages().is_empty());
    assert_eq!(bob.recorder.aborts(), vec![AbortReason::PeerAborted]);
}

#[test]
fn receiver_abort_sends_failure_report() {
    let config = StackConfig::builder().chunk_size(100).build();
    let (mut alice, mut bob) = pair(&config);
    let message = alice.session.send_message(mime::TEXT_PLAIN, &content(1000)).unwrap();
    let message_id = message.lock().message_id().clone();

    let first = alice.take_output(1024);
    bob.feed(&first, 1024);
    let incoming = bob.session.find_message(&message_id).unwrap();
    bob.session.abort_message(&incoming).unwrap();
    assert_eq!(incoming.lock().state(), MessageState::Aborted);

    // the REPORT overtakes the rest of the message
    transfer(&bob, &mut alice, 1024, 1024);
    settle(&mut alice, &mut bob, 1024, 1024);

    let reports = alice.recorder.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status.as_ref().map(|status| status.code()), Some(ResponseCode::StopSending));
    assert_eq!(message.lock().state(), MessageState::Aborted);
    assert!(bob.recorder.messages().is_empty());
}

#[test]
fn nickname_round_trip() {
    let config = StackConfig::default();
    let mut alice = Endpoint::new(ALICE, BOB, config.clone());
    let mut bob = Endpoint::build(BOB, ALICE, config, Recorder::answering(ResponseCode::NicknameInUse), None);

    alice.session.request_nickname("Alice the Great").unwrap();
    settle(&mut alice, &mut bob, 512, 9);

    assert_eq!(bob.recorder.nicknames(), vec!["Alice the Great".to_string()]);
    assert_eq!(alice.recorder.nickname_results(), vec![ResponseCode::NicknameInUse]);
}
