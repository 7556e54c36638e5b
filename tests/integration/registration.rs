//! Registration and task dispatch against a live manager.

use std::collections::HashMap;
use std::time::Duration;

use fleetmon::protocol::{MAX_FRAME, Message};
use fleetmon::reliable::{SendOutcome, UdpAckTransport, send_with_ack};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::helpers::*;

/// Register like an agent would and hand back the socket for follow-ups.
async fn register(manager: &TestManager, agent_id: u16, sequence: u8) -> (UdpSocket, SendOutcome) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let outcome = {
        let mut transport = UdpAckTransport::new(&socket, manager.udp_addr);
        let message = Message::Register { sequence, agent_id };
        send_with_ack(&mut transport, &message, &fast_policy()).await
    };
    (socket, outcome)
}

/// Wait for the manager's task dispatch and acknowledge it.
async fn expect_task(socket: &UdpSocket) -> Message {
    let mut buf = [0u8; MAX_FRAME];
    let (len, from) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("no task dispatched")
        .unwrap();

    let message = Message::decode(&buf[..len]).unwrap();
    let ack = Message::Ack {
        sequence: message.sequence(),
    };
    socket.send_to(&ack.encode(), from).await.unwrap();
    message
}

#[tokio::test]
async fn registration_is_acked_and_task_dispatched() {
    let tasks = HashMap::from([(7, cpu_task(Some(90.0)))]);
    let manager = TestManager::spawn(tasks).await;

    let (socket, outcome) = register(&manager, 7, 11).await;
    assert_eq!(outcome, SendOutcome::Acked);

    let message = expect_task(&socket).await;
    let Message::Task { task, .. } = message else {
        panic!("expected a task frame, got {message:?}");
    };
    assert!(task.metrics.cpu_usage);
    assert_eq!(task.threshold("cpu_usage"), Some(90.0));
}

#[tokio::test]
async fn unconfigured_agent_is_acked_but_gets_no_task() {
    let manager = TestManager::spawn(HashMap::new()).await;

    let (socket, outcome) = register(&manager, 42, 0).await;
    assert_eq!(outcome, SendOutcome::Acked);

    let mut buf = [0u8; MAX_FRAME];
    let dispatched = timeout(Duration::from_millis(300), socket.recv_from(&mut buf)).await;
    assert!(dispatched.is_err(), "no task should be dispatched");
}

#[tokio::test]
async fn duplicate_registration_is_acked_but_not_redispatched() {
    let tasks = HashMap::from([(7, cpu_task(None))]);
    let manager = TestManager::spawn(tasks).await;

    let (socket, outcome) = register(&manager, 7, 1).await;
    assert_eq!(outcome, SendOutcome::Acked);
    expect_task(&socket).await;

    // Re-register from a different socket: still ACKed, but the task is not
    // dispatched a second time, and routing stays with the first address.
    let (second_socket, outcome) = register(&manager, 7, 2).await;
    assert_eq!(outcome, SendOutcome::Acked);

    let mut buf = [0u8; MAX_FRAME];
    let redispatch = timeout(
        Duration::from_millis(300),
        second_socket.recv_from(&mut buf),
    )
    .await;
    assert!(redispatch.is_err(), "duplicate must not trigger a dispatch");
}

#[tokio::test]
async fn sequences_are_matched_not_just_any_ack() {
    // A manager always acks with the sender's sequence; every sequence value
    // must therefore complete on the first attempt.
    let manager = TestManager::spawn(HashMap::new()).await;

    for sequence in [0u8, 1, 127, 255] {
        let (_socket, outcome) = register(&manager, 1000 + sequence as u16, sequence).await;
        assert_eq!(outcome, SendOutcome::Acked, "sequence {sequence}");
    }
}
