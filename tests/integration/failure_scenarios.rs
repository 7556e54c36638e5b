//! Failure-path tests: malformed frames, silent peers, exhausted retries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fleetmon::agent::{self, AgentConfig};
use fleetmon::engine::EngineSettings;
use fleetmon::protocol::{MAX_FRAME, Message};
use fleetmon::reliable::{SendOutcome, UdpAckTransport, send_with_ack};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::helpers::*;

#[tokio::test]
async fn malformed_datagram_does_not_kill_the_dispatch_loop() {
    let manager = TestManager::spawn(HashMap::new()).await;
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    // Unknown kind, then a truncated header, then garbage.
    for junk in [&[0x09u8, 1, 2, 3][..], &[0x01][..], &[0xff; 16][..]] {
        socket.send_to(junk, manager.udp_addr).await.unwrap();
    }

    // A valid registration right after must still be processed.
    let mut transport = UdpAckTransport::new(&socket, manager.udp_addr);
    let message = Message::Register {
        sequence: 8,
        agent_id: 21,
    };
    let outcome = send_with_ack(&mut transport, &message, &fast_policy()).await;
    assert_eq!(outcome, SendOutcome::Acked);
}

#[tokio::test]
async fn registration_against_silent_manager_fails_the_agent() {
    // A bound socket that never answers.
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let silent_addr = silent.local_addr().unwrap();

    let config = AgentConfig {
        agent_id: 1,
        manager_udp: silent_addr,
        manager_tcp: "127.0.0.1:1".parse().unwrap(),
        policy: fast_policy(),
        engine: EngineSettings::default(),
    };

    let result = timeout(
        Duration::from_secs(5),
        agent::run(config, Arc::new(FixedProbes { cpu: 10.0 })),
    )
    .await
    .expect("registration should give up quickly");

    assert!(result.is_err(), "exhausted retries must surface as an error");
}

#[tokio::test]
async fn silent_manager_sees_exactly_max_attempts_registrations() {
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let silent_addr = silent.local_addr().unwrap();
    let policy = fast_policy();

    let counter = tokio::spawn(async move {
        let mut buf = [0u8; MAX_FRAME];
        let mut seen = 0u32;
        while timeout(Duration::from_secs(2), silent.recv_from(&mut buf))
            .await
            .is_ok()
        {
            seen += 1;
        }
        seen
    });

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut transport = UdpAckTransport::new(&sender, silent_addr);
    let message = Message::Register {
        sequence: 30,
        agent_id: 2,
    };
    let outcome = send_with_ack(&mut transport, &message, &policy).await;
    assert_eq!(outcome, SendOutcome::TimedOut);

    let seen = counter.await.unwrap();
    assert_eq!(seen, policy.max_attempts);
}

#[tokio::test]
async fn non_register_frames_on_the_datagram_socket_are_dropped() {
    let manager = TestManager::spawn(HashMap::new()).await;
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    // Reports belong on the stream transport; over UDP they are dropped
    // without an ACK.
    let report = Message::Report {
        sequence: 3,
        status: fleetmon::protocol::ReportStatus::Success,
        summary: "out of band".into(),
    };
    socket
        .send_to(&report.encode(), manager.udp_addr)
        .await
        .unwrap();

    let mut buf = [0u8; MAX_FRAME];
    let reply = timeout(Duration::from_millis(300), socket.recv_from(&mut buf)).await;
    assert!(reply.is_err(), "no ack for a report over the datagram socket");
}
