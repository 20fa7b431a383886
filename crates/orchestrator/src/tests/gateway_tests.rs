use std::{sync::Arc, time::Duration};

use serde_json::json;

use engine::{AuthEngine, SimulatedEngine, SimulatedEngineConfig};
use shared::{
    domain::{AuthLevel, AuthenticatorType},
    error::CommandError,
    protocol::{EventEnvelope, EventName, SyncResponse},
};

use crate::{
    gateway::{expect_event, CommandGateway},
    registry::EventRegistry,
};

fn sim() -> Arc<SimulatedEngine> {
    Arc::new(SimulatedEngine::new(SimulatedEngineConfig::default()))
}

#[tokio::test]
async fn success_ack_resolves_with_the_response() {
    let gateway = CommandGateway::new(sim());
    let ack = gateway.log_off().await.unwrap();
    assert!(ack.is_ok());
}

#[tokio::test]
async fn failure_ack_rejects_with_the_identical_response() {
    let engine = sim();
    let scripted = SyncResponse::failure(-3, 7, "session not established");
    engine.fail_next_command(scripted.clone());

    let gateway = CommandGateway::new(engine);
    match gateway.submit_user_id("jane").await {
        Err(CommandError::Engine(resp)) => assert_eq!(resp, scripted),
        other => panic!("expected engine rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn invalid_signing_pair_is_rejected_before_the_engine_is_called() {
    let engine = sim();
    let mut events = engine.subscribe_events();
    let gateway = CommandGateway::new(Arc::clone(&engine));

    let result = gateway
        .authenticate_and_sign_data(
            "{\"amount\":120}",
            AuthLevel::Level4,
            AuthenticatorType::None,
            "payment approval",
        )
        .await;
    assert!(matches!(
        result,
        Err(CommandError::UnsupportedSigningPair { .. })
    ));
    // The engine never saw the command, so no sign-data event was emitted.
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn valid_signing_pairs_reach_the_engine() {
    let engine = sim();
    let mut events = engine.subscribe_events();
    let gateway = CommandGateway::new(Arc::clone(&engine));

    for (level, authenticator) in [
        (AuthLevel::None, AuthenticatorType::None),
        (AuthLevel::Level1, AuthenticatorType::None),
        (AuthLevel::Level4, AuthenticatorType::IdvServerBiometric),
    ] {
        let ack = gateway
            .authenticate_and_sign_data("{}", level, authenticator, "test")
            .await
            .unwrap();
        assert!(ack.is_ok());
        assert_eq!(
            events.try_recv().unwrap().name,
            EventName::OnAuthenticateUserAndSignData
        );
    }
}

#[tokio::test]
async fn initialize_reads_the_profile_file_first() {
    let dir = std::env::temp_dir().join(format!("authgate-gw-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("authgate.toml");
    std::fs::write(&path, "host = \"auth.example.net\"\nport = 9443\n").unwrap();

    let gateway = CommandGateway::with_profile_path(sim(), &path);
    let ack = gateway.initialize().await.unwrap();
    assert!(ack.is_ok());

    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn expect_event_times_out_when_the_engine_stays_silent() {
    let registry = EventRegistry::detached();
    let result = expect_event(&registry, EventName::OnInitialized, Duration::from_millis(20)).await;
    match result {
        Err(CommandError::EventTimeout { event, .. }) => {
            assert_eq!(event, EventName::OnInitialized);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn expect_event_resolves_and_does_not_consume_the_event() {
    let registry = EventRegistry::detached();
    let seen = Arc::new(std::sync::Mutex::new(0u32));
    let sink = Arc::clone(&seen);
    let _guard = registry.subscribe(EventName::OnInitialized, move |_name, _payload| {
        *sink.lock().unwrap() += 1;
        crate::registry::Dispatch::Handled
    });

    let waiter = expect_event(
        &registry,
        EventName::OnInitialized,
        Duration::from_millis(500),
    );
    tokio::pin!(waiter);

    // Drive the waiter long enough to install its observer, then inject.
    tokio::select! {
        biased;
        _ = &mut waiter => panic!("resolved before any event"),
        _ = tokio::time::sleep(Duration::from_millis(10)) => {}
    }
    registry.inject(EventEnvelope::new(EventName::OnInitialized, json!({"ok": true})));

    let payload = waiter.await.unwrap();
    assert_eq!(payload, json!({"ok": true}));
    assert_eq!(*seen.lock().unwrap(), 1);
}
