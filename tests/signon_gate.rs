//! Integration tests for signon enforcement on a channel.

mod common;

use common::server::{ALICE, BOB, BOB_CODE};
use common::{ServerOptions, TestServer, eventually};
use std::time::Duration;
use tether_proto::{Phase, SignonFailure};

#[tokio::test]
async fn test_descriptor_headers() {
    let server = TestServer::spawn().await.expect("Failed to spawn test server");
    let client = server.connect().await.unwrap();
    assert_eq!(client.descriptor.upend_version, "test-upend");
    assert!(client.descriptor.authentication_required);
    assert_eq!(client.descriptor.time_boundary, tether::TimeBoundary::LENIENT);
}

#[tokio::test]
async fn test_application_frames_dropped_before_signon() {
    let server = TestServer::spawn().await.expect("Failed to spawn test server");
    let mut client = server.connect().await.unwrap();

    client.send_text("too early").await.unwrap();
    client.sign_in(ALICE.0, ALICE.1).await.unwrap();
    client.send_text("on time").await.unwrap();

    // Only the second frame is echoed.
    assert_eq!(client.recv_text().await.unwrap(), "on time");
}

#[tokio::test]
async fn test_wrong_password_then_retry() {
    let server = TestServer::spawn().await.expect("Failed to spawn test server");
    let mut client = server.connect().await.unwrap();

    assert_eq!(
        client.signon(ALICE.0, "nope").await.unwrap(),
        Phase::SignonFailureNotice {
            failure: SignonFailure::InvalidCredential
        }
    );
    assert_eq!(
        client.signon("mallory", "whatever").await.unwrap(),
        Phase::SignonFailureNotice {
            failure: SignonFailure::UnknownLogin
        }
    );
    assert!(server.registry.is_empty());

    client.sign_in(ALICE.0, ALICE.1).await.unwrap();
    assert_eq!(server.registry.len(), 1);
}

#[tokio::test]
async fn test_secondary_signon() {
    let server = TestServer::spawn().await.expect("Failed to spawn test server");
    let mut client = server.connect().await.unwrap();

    let Phase::SecondarySignonNeeded { token } = client.signon(BOB.0, BOB.1).await.unwrap() else {
        panic!("bob needs a secondary code");
    };
    let Phase::SessionValid { session } = client.secondary(token.clone(), BOB_CODE).await.unwrap() else {
        panic!("secondary code should be accepted");
    };
    assert_eq!(server.registry.session_for_login(BOB.0), Some(session));

    // The token was consumed.
    client.send_phase(&Phase::Signoff).await.unwrap();
    assert!(client.closed_within(Duration::from_secs(2)).await);
    let mut other = server.connect().await.unwrap();
    assert_eq!(
        other.secondary(token, BOB_CODE).await.unwrap(),
        Phase::SignonFailureNotice {
            failure: SignonFailure::IncorrectSecondaryCode
        }
    );
}

#[tokio::test]
async fn test_wrong_secondary_code() {
    let server = TestServer::spawn().await.expect("Failed to spawn test server");
    let mut client = server.connect().await.unwrap();

    let Phase::SecondarySignonNeeded { token } = client.signon(BOB.0, BOB.1).await.unwrap() else {
        panic!("bob needs a secondary code");
    };
    assert_eq!(
        client.secondary(token, "000000").await.unwrap(),
        Phase::SignonFailureNotice {
            failure: SignonFailure::IncorrectSecondaryCode
        }
    );
    assert!(server.registry.session_for_login(BOB.0).is_none());
}

#[tokio::test]
async fn test_concurrent_signons_for_same_login() {
    let server = TestServer::spawn().await.expect("Failed to spawn test server");
    let mut first = server.connect().await.unwrap();
    let mut second = server.connect().await.unwrap();

    let (a, b) = tokio::join!(first.signon(BOB.0, BOB.1), second.signon(BOB.0, BOB.1));
    let answers = [a.unwrap(), b.unwrap()];

    let challenged = answers
        .iter()
        .filter(|p| matches!(p, Phase::SecondarySignonNeeded { .. }))
        .count();
    let refused = answers
        .iter()
        .filter(|p| {
            matches!(
                p,
                Phase::SignonFailureNotice {
                    failure: SignonFailure::SessionAlreadyExists
                }
            )
        })
        .count();
    assert_eq!((challenged, refused), (1, 1), "{answers:?}");
    assert_eq!(server.registry.len(), 1);
}

#[tokio::test]
async fn test_second_signon_while_active_is_refused() {
    let server = TestServer::spawn().await.expect("Failed to spawn test server");
    let mut first = server.connect().await.unwrap();
    first.sign_in(ALICE.0, ALICE.1).await.unwrap();

    let mut second = server.connect().await.unwrap();
    assert_eq!(
        second.signon(ALICE.0, ALICE.1).await.unwrap(),
        Phase::SignonFailureNotice {
            failure: SignonFailure::SessionAlreadyExists
        }
    );
}

#[tokio::test]
async fn test_kickout_closes_channel() {
    let server = TestServer::spawn().await.expect("Failed to spawn test server");
    let mut client = server.connect().await.unwrap();
    let session = client.sign_in(ALICE.0, ALICE.1).await.unwrap();

    assert!(server.registry.kickout(&session));
    assert!(client.closed_within(Duration::from_secs(2)).await);
    assert!(server.registry.state_of(&session).is_none());

    let registrar = server.registrar.clone();
    assert!(eventually(Duration::from_secs(2), || registrar.is_empty()).await);
}

#[tokio::test]
async fn test_registrar_routes_to_session() {
    let server = TestServer::spawn().await.expect("Failed to spawn test server");
    let mut client = server.connect().await.unwrap();
    let session = client.sign_in(ALICE.0, ALICE.1).await.unwrap();

    assert!(server.registrar.send_to(&session, "pushed"));
    assert_eq!(client.recv_text().await.unwrap(), "pushed");
}

#[tokio::test]
async fn test_open_upend_forwards_without_signon() {
    let server = TestServer::spawn_with(ServerOptions {
        authentication_required: false,
        ..Default::default()
    })
    .await
    .expect("Failed to spawn test server");
    let mut client = server.connect().await.unwrap();
    assert!(!client.descriptor.authentication_required);

    client.send_text("no login needed").await.unwrap();
    assert_eq!(client.recv_text().await.unwrap(), "no login needed");
}
