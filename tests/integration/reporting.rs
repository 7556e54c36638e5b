//! Report and alert delivery over the stream transport, plus full
//! agent-to-manager round trips with canned probes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fleetmon::agent::{self, AgentConfig};
use fleetmon::engine::EngineSettings;
use fleetmon::protocol::{AlertPayload, MAX_FRAME, Message, ReportStatus};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::helpers::*;

/// Deliver one frame the way the agent's delivery worker does: write,
/// half-close, read the reply to EOF.
async fn deliver(addr: std::net::SocketAddr, message: &Message) -> Option<Message> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(&message.encode()).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut reply = Vec::new();
    (&mut stream)
        .take(MAX_FRAME as u64)
        .read_to_end(&mut reply)
        .await
        .unwrap();
    if reply.is_empty() {
        None
    } else {
        Some(Message::decode(&reply).unwrap())
    }
}

#[tokio::test]
async fn report_over_tcp_is_acked_with_matching_sequence() {
    let manager = TestManager::spawn(HashMap::new()).await;

    let report = Message::Report {
        sequence: 99,
        status: ReportStatus::Success,
        summary: "round 1: cpu usage: 12.0%".into(),
    };
    let reply = deliver(manager.tcp_addr, &report).await;

    assert_eq!(reply, Some(Message::Ack { sequence: 99 }));
}

#[tokio::test]
async fn alert_over_tcp_is_acked() {
    let manager = TestManager::spawn(HashMap::new()).await;

    let alert = Message::Alert {
        sequence: 5,
        alert: AlertPayload::Breach {
            metric: "latency".into(),
            value: 80.0,
            threshold: 50.0,
        },
    };
    let reply = deliver(manager.tcp_addr, &alert).await;

    assert_eq!(reply, Some(Message::Ack { sequence: 5 }));
}

#[tokio::test]
async fn unexpected_frame_over_tcp_is_dropped_without_ack() {
    let manager = TestManager::spawn(HashMap::new()).await;

    let register = Message::Register {
        sequence: 1,
        agent_id: 7,
    };
    let reply = deliver(manager.tcp_addr, &register).await;
    assert_eq!(reply, None, "stream listener must not ack a REGISTER");

    // The listener stays alive for the next, valid frame.
    let report = Message::Report {
        sequence: 2,
        status: ReportStatus::Failed,
        summary: "round 1: ping 10.0.5.10: probe failed".into(),
    };
    let reply = deliver(manager.tcp_addr, &report).await;
    assert_eq!(reply, Some(Message::Ack { sequence: 2 }));
}

#[tokio::test]
async fn agent_runs_its_task_and_reports_success() {
    // Real manager for registration/dispatch; our own TCP listener stands in
    // as the report sink so the test can inspect the delivered frame.
    let tasks = HashMap::from([(3, cpu_task(None))]);
    let manager = TestManager::spawn(tasks).await;

    let report_sink = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = AgentConfig {
        agent_id: 3,
        manager_udp: manager.udp_addr,
        manager_tcp: report_sink.local_addr().unwrap(),
        policy: fast_policy(),
        engine: EngineSettings::default(),
    };
    let agent = tokio::spawn(agent::run(config, Arc::new(FixedProbes { cpu: 12.0 })));

    let (mut stream, _) = timeout(Duration::from_secs(5), report_sink.accept())
        .await
        .expect("agent never delivered a report")
        .unwrap();

    let mut frame = Vec::new();
    (&mut stream)
        .take(MAX_FRAME as u64)
        .read_to_end(&mut frame)
        .await
        .unwrap();
    let message = Message::decode(&frame).unwrap();

    let Message::Report {
        sequence,
        status,
        summary,
    } = message
    else {
        panic!("expected a report, got {message:?}");
    };
    assert_eq!(status, ReportStatus::Success);
    assert!(summary.contains("cpu usage"));
    assert!(summary.contains("round 3"), "all rounds should be summarised");

    let ack = Message::Ack { sequence };
    stream.write_all(&ack.encode()).await.unwrap();

    agent.abort();
}

#[tokio::test]
async fn breaching_agent_alerts_until_it_retires() {
    // cpu 99 against a threshold of 50: one alert per round, three rounds,
    // ceiling of three - the agent must retire cleanly on its own.
    let tasks = HashMap::from([(4, cpu_task(Some(50.0)))]);
    let manager = TestManager::spawn(tasks).await;

    let config = AgentConfig {
        agent_id: 4,
        manager_udp: manager.udp_addr,
        manager_tcp: manager.tcp_addr,
        policy: fast_policy(),
        engine: EngineSettings::default(),
    };

    let result = timeout(
        Duration::from_secs(10),
        agent::run(config, Arc::new(FixedProbes { cpu: 99.0 })),
    )
    .await
    .expect("agent never retired");

    assert!(result.is_ok(), "retirement is a clean exit: {result:?}");
}
