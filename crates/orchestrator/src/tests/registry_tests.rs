use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use shared::protocol::{EventEnvelope, EventName};

use crate::registry::{normalize_payload, Dispatch, EventRegistry, PayloadShapeError};

fn recorded() -> (Arc<Mutex<Vec<Value>>>, impl FnMut(EventName, &Value) -> Dispatch) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler = move |_name: EventName, payload: &Value| {
        sink.lock().unwrap().push(payload.clone());
        Dispatch::Handled
    };
    (seen, handler)
}

#[test]
fn handler_sees_one_parsed_payload_per_wire_shape() {
    let registry = EventRegistry::detached();
    let (seen, handler) = recorded();
    let _guard = registry.subscribe(EventName::GetUser, handler);

    let payload = json!({"userID": "jane", "attemptsLeft": 3});
    registry.inject(EventEnvelope::new(EventName::GetUser, payload.clone()));
    registry.inject(EventEnvelope::new(
        EventName::GetUser,
        Value::String(payload.to_string()),
    ));
    registry.inject(EventEnvelope::new(
        EventName::GetUser,
        Value::Array(vec![payload.clone()]),
    ));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|value| *value == payload));
}

#[test]
fn array_wrapped_json_string_is_unwrapped_then_parsed() {
    let registry = EventRegistry::detached();
    let (seen, handler) = recorded();
    let _guard = registry.subscribe(EventName::GetPassword, handler);

    let payload = json!({"challengeMode": 3});
    registry.inject(EventEnvelope::new(
        EventName::GetPassword,
        Value::Array(vec![Value::String(payload.to_string())]),
    ));

    assert_eq!(seen.lock().unwrap().as_slice(), &[payload]);
}

#[test]
fn malformed_payloads_never_reach_a_handler() {
    let registry = EventRegistry::detached();
    let (seen, handler) = recorded();
    let _guard = registry.subscribe(EventName::GetUser, handler);

    registry.inject(EventEnvelope::new(EventName::GetUser, json!(true)));
    registry.inject(EventEnvelope::new(EventName::GetUser, json!(42)));
    registry.inject(EventEnvelope::new(
        EventName::GetUser,
        Value::String("{\"broken".into()),
    ));
    registry.inject(EventEnvelope::new(
        EventName::GetUser,
        json!([{"a": 1}, {"b": 2}]),
    ));
    registry.inject(EventEnvelope::new(EventName::GetUser, json!([[{"a": 1}]])));

    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(registry.dropped_events(), 5);
}

#[test]
fn bare_string_payload_is_kept_raw() {
    // One native platform hands over plain strings for simple progress
    // events; those pass through unparsed rather than being dropped.
    assert_eq!(
        normalize_payload(Value::String("ready".into())),
        Ok(Value::String("ready".into()))
    );
    assert!(matches!(
        normalize_payload(Value::String("{not json".into())),
        Err(PayloadShapeError::MalformedJson(_))
    ));
}

#[test]
fn events_without_a_handler_are_counted_as_dropped() {
    let registry = EventRegistry::detached();
    registry.inject(EventEnvelope::new(EventName::OnInitialized, json!({})));
    assert_eq!(registry.dropped_events(), 1);
}

#[test]
fn newest_registration_wins_and_next_falls_through() {
    let registry = EventRegistry::detached();
    let base_seen = Arc::new(Mutex::new(Vec::new()));
    let scoped_seen = Arc::new(Mutex::new(Vec::new()));

    let base_sink = Arc::clone(&base_seen);
    let _base = registry.subscribe(EventName::GetPassword, move |_name, payload| {
        base_sink.lock().unwrap().push(payload.clone());
        Dispatch::Handled
    });

    let scoped_sink = Arc::clone(&scoped_seen);
    let scoped = registry.subscribe(EventName::GetPassword, move |_name, payload| {
        if payload.get("challengeMode") == Some(&json!(3)) {
            scoped_sink.lock().unwrap().push(payload.clone());
            Dispatch::Handled
        } else {
            Dispatch::Next
        }
    });

    let ordinary = json!({"challengeMode": 1});
    let step_up = json!({"challengeMode": 3});

    registry.inject(EventEnvelope::new(EventName::GetPassword, ordinary.clone()));
    assert_eq!(base_seen.lock().unwrap().as_slice(), &[ordinary.clone()]);
    assert!(scoped_seen.lock().unwrap().is_empty());

    registry.inject(EventEnvelope::new(EventName::GetPassword, step_up.clone()));
    assert_eq!(base_seen.lock().unwrap().len(), 1);
    assert_eq!(scoped_seen.lock().unwrap().as_slice(), &[step_up.clone()]);

    // Dropping the scoped guard restores the original chain exactly.
    drop(scoped);
    registry.inject(EventEnvelope::new(EventName::GetPassword, step_up.clone()));
    assert_eq!(base_seen.lock().unwrap().len(), 2);
    assert_eq!(scoped_seen.lock().unwrap().len(), 1);
}

#[test]
fn removing_a_handler_that_owns_another_guard_does_not_block() {
    let registry = EventRegistry::detached();
    let inner = registry.subscribe(EventName::OnInitialized, |_name, _payload| Dispatch::Handled);
    let outer = registry.subscribe(EventName::GetUser, move |_name, _payload| {
        let _ = inner.event();
        Dispatch::Handled
    });

    // Dropping the outer guard drops its closure, which drops the inner
    // guard and re-enters the registration table.
    drop(outer);
    registry.inject(EventEnvelope::new(EventName::OnInitialized, json!({})));
    assert_eq!(registry.dropped_events(), 1);
}

#[test]
fn panicking_handler_does_not_poison_the_registry() {
    let registry = EventRegistry::detached();
    let _bomb = registry.subscribe(EventName::GetUser, |_name, _payload| -> Dispatch {
        panic!("handler bug");
    });

    registry.inject(EventEnvelope::new(EventName::GetUser, json!({})));
    // A second dispatch still works; the panic stayed inside the registry.
    registry.inject(EventEnvelope::new(EventName::GetUser, json!({})));

    let (seen, handler) = recorded();
    let _guard = registry.subscribe(EventName::OnInitialized, handler);
    registry.inject(EventEnvelope::new(EventName::OnInitialized, json!({})));
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn cleanup_clears_handlers_and_later_subscribes_are_inert() {
    let registry = EventRegistry::detached();
    let (seen, handler) = recorded();
    let _guard = registry.subscribe(EventName::GetUser, handler);

    registry.cleanup();
    registry.cleanup(); // idempotent

    let (late_seen, late_handler) = recorded();
    let _late = registry.subscribe(EventName::GetUser, late_handler);
    registry.inject(EventEnvelope::new(EventName::GetUser, json!({})));

    assert!(seen.lock().unwrap().is_empty());
    assert!(late_seen.lock().unwrap().is_empty());
}
