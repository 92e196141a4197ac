//! Drives a [`apns_core::Client`] against the in-process mock server over
//! [`apns_core::transport::InMemoryTransportFactory`], covering the literal scenarios
//! and the cross-component invariants.

use std::sync::Arc;
use std::time::Duration;

use apns_core::mock::{AcceptAllHandler, DeviceRegistry, ListenerAdapter, MockHandler, MockServer, Outcome, Validator};
use apns_core::pool::ProtocolConnectionFactory;
use apns_core::protocol::ProtocolTimeouts;
use apns_core::transport::InMemoryTransportFactory;
use apns_core::{ChannelPool, Client, PoolConfig, PushNotification, RejectionReason};

fn device_token() -> String {
    "ab".repeat(32)
}

/// Builds a client wired to a mock server driven by `handler`, plus the listener the
/// server records every request onto.
fn harness<H: MockHandler + Send + Sync + 'static>(handler: Arc<H>, capacity: usize) -> (Client, Arc<ListenerAdapter>) {
    let (factory, mut server_halves) = InMemoryTransportFactory::new(64 * 1024);
    let listener = Arc::new(ListenerAdapter::new());
    let server = Arc::new(MockServer::new(handler, listener.clone()));

    tokio::spawn({
        let server = server.clone();
        async move {
            while let Some(server_io) = server_halves.recv().await {
                let server = server.clone();
                tokio::spawn(async move {
                    let _ = server.serve(server_io).await;
                });
            }
        }
    });

    let client = Client::builder(factory)
        .pool_config(PoolConfig { capacity, acquire_timeout: Some(Duration::from_secs(5)) })
        .build();
    (client, listener)
}

fn validator_with_registry() -> (Arc<Validator>, Arc<DeviceRegistry>) {
    let registry = Arc::new(DeviceRegistry::new());
    let validator = Arc::new(Validator {
        registry: registry.clone(),
        token_verifier: None,
        clock: Arc::new(apns_core::clock::SystemClock),
    });
    (validator, registry)
}

#[tokio::test]
async fn s1_accept() {
    let (validator, registry) = validator_with_registry();
    registry.register_device("com.example.app", device_token());
    let (client, listener) = harness(validator, 4);

    let notification = PushNotification::new(device_token(), "com.example.app", "{\"aps\":{\"alert\":\"hi\"}}").unwrap();
    let response = client.send(notification).await.unwrap();

    assert!(response.accepted);
    assert_eq!(listener.len(), 1);
    assert_eq!(listener.notifications()[0].outcome, Outcome::Accepted);
}

#[tokio::test]
async fn s2_bad_device_token_binding() {
    let (validator, _registry) = validator_with_registry();
    let (client, _listener) = harness(validator, 4);

    let notification = PushNotification::new(device_token(), "com.example.app", "{\"aps\":{}}").unwrap();
    let response = client.send(notification).await.unwrap();

    assert!(!response.accepted);
    assert_eq!(response.rejection_reason, Some(RejectionReason::DeviceTokenNotForTopic));
}

#[tokio::test]
async fn s3_unregistered() {
    let (validator, registry) = validator_with_registry();
    registry.register_device("com.example.app", device_token());
    registry.expire_device(device_token(), 1_600_000_000);
    let (client, _listener) = harness(validator, 4);

    let notification = PushNotification::new(device_token(), "com.example.app", "{\"aps\":{}}").unwrap();
    let response = client.send(notification).await.unwrap();

    assert!(!response.accepted);
    assert_eq!(response.rejection_reason, Some(RejectionReason::Unregistered));
    assert_eq!(response.token_invalidation_timestamp, Some(1_600_000_000));
}

#[tokio::test]
async fn s4_bad_path() {
    // The client always encodes a well-formed path; bad-path is exercised directly
    // against the validator, the same way the mock server would see a malformed peer.
    let (validator, _registry) = validator_with_registry();
    let result = validator.validate(apns_core::mock::RawRequest {
        method: "POST",
        path: "/example/not-a-device-path",
        apns_id: None,
        topic: Some("com.example.app"),
        priority: None,
        collapse_id: None,
        expiration: None,
        authorization: None,
        body: b"{}",
    });
    assert_eq!(result.unwrap_err().reason, RejectionReason::BadPath);
}

#[tokio::test]
async fn s5_oversized_collapse_id() {
    let (validator, registry) = validator_with_registry();
    registry.register_device("com.example.app", device_token());

    let notification = PushNotification::new(device_token(), "com.example.app", "{\"aps\":{}}")
        .unwrap()
        .with_collapse_id("x".repeat(70));
    // `PushNotification` itself rejects an oversized collapse-id at construction time
    // (§3), before the mock server ever sees it.
    assert!(notification.is_err());

    // Exercise the mock server's own check directly for the wire-level case (a peer
    // that isn't using this crate's notification builder).
    let result = validator.validate(apns_core::mock::RawRequest {
        method: "POST",
        path: &format!("/3/device/{}", device_token()),
        apns_id: None,
        topic: Some("com.example.app"),
        priority: None,
        collapse_id: Some(&"x".repeat(70)),
        expiration: None,
        authorization: None,
        body: b"{\"aps\":{}}",
    });
    assert_eq!(result.unwrap_err().reason, RejectionReason::BadCollapseId);
}

#[tokio::test]
async fn s6_token_auth_wrong_topic() {
    use apns_core::{AuthTokenIssuer, SigningKey, TokenVerifier, VerificationKey};

    const PRIVATE_KEY: &str = include_str!("fixtures/ec_private_key.pem");
    const PUBLIC_KEY: &str = include_str!("fixtures/ec_public_key.pem");

    let signing_key = SigningKey::from_ec_pem("TEAMID1234", "KEYID1234", PRIVATE_KEY.as_bytes()).unwrap();
    let issuer = Arc::new(AuthTokenIssuer::new(signing_key, Arc::new(apns_core::clock::SystemClock)));

    // The verification key only authorises "com.other.app"; the notification below
    // targets "com.example.app", so step 9 of the validator's ordered checks rejects it
    // before the token/topic binding check ever runs.
    let mut verifier = TokenVerifier::new();
    verifier.register(
        VerificationKey::from_ec_pem("TEAMID1234", "KEYID1234", PUBLIC_KEY.as_bytes(), ["com.other.app".to_string()])
            .unwrap(),
    );

    let (_unused, registry) = validator_with_registry();
    registry.register_device("com.example.app", device_token());
    let validator = Arc::new(Validator {
        registry,
        token_verifier: Some(Arc::new(verifier)),
        clock: Arc::new(apns_core::clock::SystemClock),
    });
    let (factory, mut server_halves) = InMemoryTransportFactory::new(64 * 1024);
    let listener = Arc::new(ListenerAdapter::new());
    let server = Arc::new(MockServer::new(validator, listener));
    tokio::spawn(async move {
        while let Some(server_io) = server_halves.recv().await {
            let server = server.clone();
            tokio::spawn(async move {
                let _ = server.serve(server_io).await;
            });
        }
    });

    let client = Client::builder(factory).provider_token(issuer).build();
    let notification = PushNotification::new(device_token(), "com.example.app", "{\"aps\":{}}").unwrap();
    let response = client.send(notification).await.unwrap();

    assert!(!response.accepted);
    assert_eq!(response.rejection_reason, Some(RejectionReason::InvalidProviderToken));
}

#[tokio::test]
async fn s8_pool_capacity_one_serialises_acquisition() {
    let (factory, mut server_halves) = InMemoryTransportFactory::new(64 * 1024);
    tokio::spawn(async move {
        while let Some(server_io) = server_halves.recv().await {
            tokio::spawn(async move {
                let mut connection = h2::server::handshake(server_io).await.unwrap();
                while let Some(request) = connection.accept().await {
                    if let Ok((_, mut respond)) = request {
                        let response = http::Response::builder().status(200).body(()).unwrap();
                        let _ = respond.send_response(response, true);
                    }
                }
            });
        }
    });

    let pool_factory = ProtocolConnectionFactory::new(factory, ProtocolTimeouts::default());
    let pool = Arc::new(ChannelPool::new(
        PoolConfig { capacity: 1, acquire_timeout: None },
        pool_factory,
        Arc::new(apns_core::metrics::NullMetricsSink),
    ));

    let c1 = pool.acquire().await.unwrap();
    let first_id = c1.id();

    let pool2 = pool.clone();
    let second_acquire = tokio::spawn(async move { pool2.acquire().await.unwrap() });

    // The second acquire must not complete while c1 is checked out.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!second_acquire.is_finished());

    pool.release(c1);
    let c2 = second_acquire.await.unwrap();
    assert_eq!(c2.id(), first_id);
}

#[tokio::test]
async fn s9_closed_channel_from_idle_is_replaced() {
    let (factory, mut server_halves) = InMemoryTransportFactory::new(64 * 1024);
    tokio::spawn(async move {
        while let Some(server_io) = server_halves.recv().await {
            tokio::spawn(async move {
                let mut connection = h2::server::handshake(server_io).await.unwrap();
                while let Some(request) = connection.accept().await {
                    if let Ok((_, mut respond)) = request {
                        let response = http::Response::builder().status(200).body(()).unwrap();
                        let _ = respond.send_response(response, true);
                    }
                }
            });
        }
    });

    let pool_factory = ProtocolConnectionFactory::new(factory, ProtocolTimeouts::default());
    let pool = ChannelPool::new(
        PoolConfig { capacity: 2, acquire_timeout: None },
        pool_factory,
        Arc::new(apns_core::metrics::NullMetricsSink),
    );

    let c1 = pool.acquire().await.unwrap();
    let first_id = c1.id();
    c1.close();
    tokio::task::yield_now().await;
    assert!(!c1.is_active());
    pool.release(c1);

    let c2 = pool.acquire().await.unwrap();
    assert_ne!(c2.id(), first_id);
    assert!(c2.is_active());
}

#[tokio::test]
async fn every_send_resolves_exactly_once_under_concurrency() {
    let (validator, registry) = validator_with_registry();
    registry.register_device("com.example.app", device_token());
    let (client, listener) = harness(validator, 3);
    let client = Arc::new(client);

    let mut handles = Vec::new();
    for _ in 0..20 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let notification = PushNotification::new(device_token(), "com.example.app", "{\"aps\":{}}").unwrap();
            client.send(notification).await
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        let response = handle.await.unwrap().unwrap();
        assert!(response.accepted);
        accepted += 1;
    }
    assert_eq!(accepted, 20);
    assert_eq!(listener.len(), 20);
}

#[tokio::test]
async fn accept_all_handler_bypasses_registry_and_auth() {
    let (client, listener) = harness(Arc::new(AcceptAllHandler), 2);
    let notification = PushNotification::new(device_token(), "com.example.app", "{\"aps\":{\"alert\":\"hi\"}}").unwrap();
    let response = client.send(notification).await.unwrap();
    assert!(response.accepted);
    assert_eq!(listener.len(), 1);
}
