//! Integration tests for pushhub-cluster
//!
//! Two hub instances share one in-memory broker, the way several nodes share
//! one Redis server in production.
//!
//! Run with: cargo test --test hub_integration

use futures::StreamExt;
use pushhub_cluster::broker::{Broker, MemoryBroker};
use pushhub_cluster::sync::{ConnectionRequest, PushHub, Subscriber};
use pushhub_cluster::transport::{ChannelTransport, EnvelopeReceiver};
use pushhub_core::models::{
    Envelope, ExerciseId, Module, Operation, PresenceUpdate, PushPayload, SessionId, TeamId,
    UnitId, UserId,
};
use pushhub_core::Config;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct ScoreChanged {
    score: u32,
}

impl PushPayload for ScoreChanged {
    const KIND: &'static str = "ScoreChanged";
}

fn config() -> Config {
    let mut config = Config::default();
    config.broker.enabled = true;
    config.broker.key_prefix = "it:".to_string();
    config
}

/// Two started hubs on one broker
async fn cluster() -> (Arc<MemoryBroker>, PushHub, PushHub) {
    let broker = Arc::new(MemoryBroker::new());
    let a = PushHub::with_defaults(&config(), broker.clone());
    let b = PushHub::with_defaults(&config(), broker.clone());
    a.start().await.expect("hub a should start");
    b.start().await.expect("hub b should start");
    (broker, a, b)
}

async fn connect(hub: &PushHub, request: ConnectionRequest) -> (Arc<Subscriber>, EnvelopeReceiver) {
    let (transport, mut rx) = ChannelTransport::new();
    let sub = hub
        .register(request, Arc::new(transport))
        .await
        .expect("registration should succeed");
    let ack = rx.recv().await.expect("CONNECTED acknowledgement");
    assert!(ack.operation.is_connected());
    (sub, rx)
}

fn request(module: Module, team: i64, user: i64, session: i64) -> ConnectionRequest {
    ConnectionRequest::new(
        module,
        TeamId(team),
        UserId(user),
        ExerciseId(1),
        SessionId(session),
    )
}

async fn next(rx: &mut EnvelopeReceiver) -> Envelope {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("envelope should arrive")
        .expect("stream should stay open")
}

async fn assert_silent(rx: &mut EnvelopeReceiver) {
    let received = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(received.is_err(), "unexpected envelope: {received:?}");
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition should hold in time");
}

#[tokio::test]
async fn test_delivery_reaches_connections_on_both_instances_once() {
    let (_broker, a, b) = cluster().await;
    let (_on_a, mut rx_a) = connect(&a, request(Module::Team, 7, 3, 1)).await;
    let (_on_b, mut rx_b) = connect(&b, request(Module::Team, 7, 4, 2)).await;
    let (_other, mut rx_other) = connect(&b, request(Module::Team, 8, 5, 3)).await;

    a.dispatcher()
        .to_team(Module::Team, Operation::update(), TeamId(7), &ScoreChanged { score: 10 })
        .await;

    let local = next(&mut rx_a).await;
    let remote = next(&mut rx_b).await;
    assert_eq!(local, remote);
    assert_eq!(
        remote.decode::<ScoreChanged>().unwrap(),
        Some(ScoreChanged { score: 10 })
    );

    // No echo back to the origin, no re-publish by the receiver
    assert_silent(&mut rx_a).await;
    assert_silent(&mut rx_b).await;
    assert_silent(&mut rx_other).await;

    a.shutdown();
    b.shutdown();
}

#[tokio::test]
async fn test_publish_disabled_hub_still_receives_sibling_deliveries() {
    let broker = Arc::new(MemoryBroker::new());
    let mut quiet_config = config();
    quiet_config.broker.enabled = false;
    let publishing = PushHub::with_defaults(&config(), broker.clone());
    let quiet = PushHub::with_defaults(&quiet_config, broker.clone());
    publishing.start().await.unwrap();
    quiet.start().await.unwrap();
    let (_sub, mut rx) = connect(&quiet, request(Module::Team, 7, 3, 1)).await;
    let (_sender, mut rx_sender) = connect(&publishing, request(Module::Team, 7, 4, 2)).await;

    publishing
        .dispatcher()
        .to_team(Module::Team, Operation::update(), TeamId(7), &ScoreChanged { score: 3 })
        .await;

    let envelope = next(&mut rx).await;
    assert_eq!(
        envelope.decode::<ScoreChanged>().unwrap(),
        Some(ScoreChanged { score: 3 })
    );
    assert_eq!(
        next(&mut rx_sender).await.decode::<ScoreChanged>().unwrap(),
        Some(ScoreChanged { score: 3 })
    );

    // Nothing published by the quiet hub reaches its sibling
    quiet
        .dispatcher()
        .to_team(Module::Team, Operation::update(), TeamId(7), &ScoreChanged { score: 4 })
        .await;
    assert_eq!(
        next(&mut rx).await.decode::<ScoreChanged>().unwrap(),
        Some(ScoreChanged { score: 4 })
    );
    assert_silent(&mut rx_sender).await;

    publishing.shutdown();
    quiet.shutdown();
}

#[tokio::test]
async fn test_unit_list_payload_replicates() {
    let (_broker, a, b) = cluster().await;
    let (_sub, mut rx) = connect(&b, request(Module::Unit, 1, 1, 1).with_unit(UnitId(4))).await;

    a.dispatcher()
        .to_units(
            Module::Unit,
            Operation::new("REFRESH"),
            &[UnitId(4), UnitId(5)],
            &vec![ScoreChanged { score: 1 }, ScoreChanged { score: 2 }],
        )
        .await;

    let envelope = next(&mut rx).await;
    assert_eq!(envelope.operation, Operation::new("REFRESH"));
    assert_eq!(envelope.payload_type.as_deref(), Some("ScoreChanged"));
    let scores: Vec<ScoreChanged> = serde_json::from_str(envelope.data.as_deref().unwrap()).unwrap();
    assert_eq!(scores.len(), 2);

    a.shutdown();
    b.shutdown();
}

#[tokio::test]
async fn test_registration_announces_connected_record() {
    let (broker, a, b) = cluster().await;
    let mut records = broker.subscribe("it:module:CHAT").await.unwrap();

    let (_sub, _rx) = connect(&a, request(Module::Chat, 7, 3, 1)).await;

    let raw = tokio::time::timeout(Duration::from_secs(1), records.next())
        .await
        .unwrap()
        .unwrap();
    let record: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(record["kind"], "CONNECTED");
    assert_eq!(record["module"], "CHAT");
    assert_eq!(record["instance"], a.instance_id().to_string());
    assert!(b.subscribers().is_empty());

    a.shutdown();
    b.shutdown();
}

#[tokio::test]
async fn test_session_close_spans_instances() {
    let (_broker, a, b) = cluster().await;
    let (tab_a, _rx1) = connect(&a, request(Module::Team, 7, 3, 42)).await;
    let (tab_b, _rx2) = connect(&b, request(Module::Exercise, 7, 3, 42)).await;
    let (keep, _rx3) = connect(&b, request(Module::Team, 7, 3, 43)).await;

    a.close_session(SessionId(42)).await.unwrap();

    wait_until(|| a.subscribers().is_empty() && b.subscribers().len() == 1).await;
    assert!(tab_a.is_closed());
    assert!(tab_b.is_closed());
    assert!(!keep.is_closed());

    a.shutdown();
    b.shutdown();
}

#[tokio::test]
async fn test_chat_disconnect_presence_reaches_other_instance() {
    let (_broker, a, b) = cluster().await;
    let (_leaving, rx_leaving) = connect(&a, request(Module::Chat, 7, 3, 1)).await;
    let (_peer, mut rx_peer) = connect(&b, request(Module::Chat, 7, 4, 2)).await;

    // Client goes away: completion signal
    drop(rx_leaving);

    let update = next(&mut rx_peer).await;
    assert_eq!(update.module, Module::Chat);
    assert_eq!(update.operation, Operation::update());
    let presence: PresenceUpdate = update.decode().unwrap().unwrap();
    assert!(!presence.connected);
    assert_eq!(presence.user_id, UserId(3));
    assert_eq!(presence.team_id, TeamId(7));
    assert_silent(&mut rx_peer).await;

    wait_until(|| a.metrics().total_disconnected == 1).await;
    assert_eq!(b.metrics().active_connections, 1);

    a.shutdown();
    b.shutdown();
}
