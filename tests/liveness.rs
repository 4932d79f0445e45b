//! Integration tests for the Upend ping watchdog.

mod common;

use common::server::ALICE;
use common::{ServerOptions, TestServer, eventually};
use std::time::Duration;
use tether::TimeBoundary;
use tether::upend::RecordState;

fn fast_ping_timeout() -> TimeBoundary {
    TimeBoundary::builder()
        .ping_interval(100)
        .pong_timeout(500)
        .reconnect_delay(100, 200)
        .ping_timeout(500)
        .session_inactivity_maximum(10_000)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_silent_channel_is_closed_as_lost() {
    let server = TestServer::spawn_with(ServerOptions {
        time_boundary: fast_ping_timeout(),
        ..Default::default()
    })
    .await
    .expect("Failed to spawn test server");

    let mut client = server.connect().await.unwrap();
    let session = client.sign_in(ALICE.0, ALICE.1).await.unwrap();

    assert!(client.closed_within(Duration::from_secs(2)).await);

    // Lost, not signed off: the session stays reusable.
    let registry = server.registry.clone();
    assert!(
        eventually(Duration::from_secs(2), || {
            registry.state_of(&session) == Some(RecordState::DisconnectedReusable)
        })
        .await
    );
}

#[tokio::test]
async fn test_pinging_channel_stays_open() {
    let server = TestServer::spawn_with(ServerOptions {
        time_boundary: fast_ping_timeout(),
        ..Default::default()
    })
    .await
    .expect("Failed to spawn test server");

    let mut client = server.connect().await.unwrap();
    client.sign_in(ALICE.0, ALICE.1).await.unwrap();

    for _ in 0..8 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.ping().await.expect("pong expected");
    }
    client.send_text("alive").await.unwrap();
    assert_eq!(client.recv_text().await.unwrap(), "alive");
}
