//! End-to-end tests: a real listener serving the gateway, driven by the
//! client.

#![allow(clippy::unwrap_used, clippy::panic, clippy::arithmetic_side_effects)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use beacon_client::{Backoff, BeaconClient, ClientConfig, Notice};
use beacon_core::config::AuthMode;
use beacon_core::{Broker, BrokerConfig};
use beacon_gateway::{AppState, build_router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

async fn start_broker() -> (SocketAddr, Arc<Broker>, CancellationToken) {
    let mut config = BrokerConfig::default();
    config.auth.mode = AuthMode::Open;
    let broker = Arc::new(Broker::in_memory(config));
    let state = Arc::new(AppState::new(Arc::clone(&broker)));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let stop = shutdown.clone();
    tokio::spawn(async move {
        axum::serve(
            listener,
            build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { stop.cancelled().await })
        .await
        .unwrap();
    });
    (addr, broker, shutdown)
}

/// Wait for the first frame carrying `event`.
async fn frame(notices: &mut mpsc::Receiver<Notice>, event: &str) -> serde_json::Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match notices.recv().await.unwrap() {
                Notice::Frame(frame) if frame.event == event => return frame.data,
                _ => {}
            }
        }
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn client_reports_and_receives_confirmation() {
    let (addr, broker, shutdown) = start_broker().await;
    let config = ClientConfig::new(format!("ws://{addr}/ws"));
    let (client, mut notices) = BeaconClient::spawn(config).unwrap();

    assert_eq!(notices.recv().await.unwrap(), Notice::Connected);
    let count = frame(&mut notices, "system:userCount").await;
    assert_eq!(count, 1);

    client
        .emit(
            "incident:create",
            json!({
                "title": "Suspicious bag at gate 3",
                "description": "Unattended bag near the ticket counter",
                "category": "SUSPICIOUS_ACTIVITY",
                "severity": "CRITICAL"
            }),
        )
        .await
        .unwrap();
    let created = frame(&mut notices, "incident:created").await;
    assert_eq!(created["estimatedResponseTime"], 5);
    assert_eq!(broker.incidents().count(), 1);

    client.close().await;
    shutdown.cancel();
}

#[tokio::test]
async fn client_gives_up_after_its_retry_limit() {
    // Bind then drop to get a port nothing listens on.
    let addr = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();
    let config = ClientConfig {
        backoff: Backoff::new(Duration::from_millis(5), 2, Duration::from_millis(20), Some(2)),
        ..ClientConfig::new(format!("ws://{addr}/ws"))
    };
    let (client, mut notices) = BeaconClient::spawn(config).unwrap();

    let mut disconnects = 0;
    loop {
        match notices.recv().await.unwrap() {
            Notice::Disconnected(_) => disconnects += 1,
            Notice::GaveUp => break,
            other => panic!("unexpected notice {other:?}"),
        }
    }
    assert_eq!(disconnects, 3);
    client.close().await;
}

#[tokio::test]
async fn client_reconnects_after_the_broker_drops_it() {
    let (addr, broker, shutdown) = start_broker().await;
    let config = ClientConfig {
        backoff: Backoff::new(Duration::from_millis(10), 2, Duration::from_millis(50), None),
        ..ClientConfig::new(format!("ws://{addr}/ws"))
    };
    let (client, mut notices) = BeaconClient::spawn(config).unwrap();
    assert_eq!(notices.recv().await.unwrap(), Notice::Connected);

    broker.disconnect_all(beacon_types::DisconnectReason::HeartbeatTimeout);

    let reconnected = tokio::time::timeout(Duration::from_secs(5), async {
        let mut dropped = false;
        loop {
            match notices.recv().await.unwrap() {
                Notice::Disconnected(_) => dropped = true,
                Notice::Connected if dropped => return,
                _ => {}
            }
        }
    })
    .await;
    assert!(reconnected.is_ok());

    client.close().await;
    shutdown.cancel();
}
