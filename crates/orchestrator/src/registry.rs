//! Single subscription point for engine events.
//!
//! Exactly one pump task reads the engine's broadcast channel. Each event
//! name carries a stack of registrations; dispatch walks the stack newest
//! first and stops at the first handler that reports [`Dispatch::Handled`].
//! Registrations are generation-counted and removed by the [`HandlerGuard`]
//! returned from `subscribe`, so a scoped consumer cannot leave a dangling
//! handler behind.

use std::{
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, Weak,
    },
};

use serde_json::Value;
use thiserror::Error;
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tracing::{debug, error, warn};

use engine::AuthEngine;
use shared::protocol::{EventEnvelope, EventName};

/// What a handler did with an event. `Next` falls through to the next older
/// registration for the same event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Handled,
    Next,
}

type EventHandler = Box<dyn FnMut(EventName, &Value) -> Dispatch + Send>;

struct Registration {
    generation: u64,
    handler: Arc<Mutex<EventHandler>>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PayloadShapeError {
    #[error("payload looked like JSON but failed to parse: {0}")]
    MalformedJson(String),
    #[error("array-wrapped payload wraps another array")]
    NestedArray,
    #[error("unsupported payload shape: {0}")]
    Unsupported(&'static str),
}

/// Brings a raw engine payload to one canonical value. The two native
/// platforms behind the engine serialize differently: one hands over a JSON
/// string, the other a parsed value, and either may wrap the payload in a
/// one-element array.
pub fn normalize_payload(raw: Value) -> Result<Value, PayloadShapeError> {
    match raw {
        Value::Array(mut items) if items.len() == 1 => match items.pop() {
            Some(Value::Array(_)) => Err(PayloadShapeError::NestedArray),
            Some(inner) => normalize_leaf(inner),
            None => Err(PayloadShapeError::Unsupported("empty array")),
        },
        Value::Array(_) => Err(PayloadShapeError::Unsupported(
            "array with more than one element",
        )),
        other => normalize_leaf(other),
    }
}

fn normalize_leaf(value: Value) -> Result<Value, PayloadShapeError> {
    match value {
        Value::Object(_) | Value::Null => Ok(value),
        Value::String(s) => {
            let trimmed = s.trim_start();
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                match serde_json::from_str::<Value>(&s) {
                    Ok(Value::Array(mut items)) if items.len() == 1 => match items.pop() {
                        Some(Value::Array(_)) => Err(PayloadShapeError::NestedArray),
                        Some(inner) => Ok(inner),
                        None => Err(PayloadShapeError::Unsupported("empty array")),
                    },
                    Ok(Value::Array(_)) => Err(PayloadShapeError::Unsupported(
                        "array with more than one element",
                    )),
                    Ok(parsed) => Ok(parsed),
                    Err(err) => Err(PayloadShapeError::MalformedJson(err.to_string())),
                }
            } else {
                // A bare string the platform never encoded as JSON; keep raw.
                Ok(Value::String(s))
            }
        }
        Value::Bool(_) | Value::Number(_) => Err(PayloadShapeError::Unsupported("scalar")),
        Value::Array(_) => Err(PayloadShapeError::Unsupported("array")),
    }
}

struct RegistryInner {
    slots: Mutex<HashMap<EventName, Vec<Registration>>>,
    next_generation: AtomicU64,
    active: AtomicBool,
    dropped_events: AtomicU64,
}

impl RegistryInner {
    fn lock_slots(&self) -> MutexGuard<'_, HashMap<EventName, Vec<Registration>>> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove(&self, event: EventName, generation: u64) {
        // The registration must drop outside the lock: its closure may own
        // guards or handles that re-enter this table on drop.
        let removed = {
            let mut slots = self.lock_slots();
            match slots.get_mut(&event) {
                Some(regs) => {
                    let removed = regs
                        .iter()
                        .position(|r| r.generation == generation)
                        .map(|idx| regs.remove(idx));
                    if regs.is_empty() {
                        slots.remove(&event);
                    }
                    removed
                }
                None => None,
            }
        };
        drop(removed);
    }

    fn dispatch_envelope(&self, envelope: EventEnvelope) {
        let name = envelope.name;
        match normalize_payload(envelope.payload) {
            Ok(payload) => {
                if !self.dispatch(name, &payload) {
                    debug!(event = %name, "event dropped: no handler registered");
                    self.dropped_events.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(err) => {
                // Non-crashing by contract: a bad payload must never take
                // down the pump. The counter keeps the drop observable.
                warn!(event = %name, %err, "event dropped: unparseable payload");
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn dispatch(&self, name: EventName, payload: &Value) -> bool {
        // Snapshot outside the handler calls so a handler may subscribe or
        // unsubscribe without deadlocking the table.
        let snapshot: Vec<(u64, Arc<Mutex<EventHandler>>)> = {
            let slots = self.lock_slots();
            match slots.get(&name) {
                Some(regs) => regs
                    .iter()
                    .rev()
                    .map(|r| (r.generation, Arc::clone(&r.handler)))
                    .collect(),
                None => Vec::new(),
            }
        };

        if snapshot.is_empty() {
            return false;
        }

        for (generation, handler) in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                let mut handler = handler
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                handler(name, payload)
            }));
            match outcome {
                Ok(Dispatch::Handled) => return true,
                Ok(Dispatch::Next) => continue,
                Err(_) => {
                    // The chain stops here: re-delivering to an older handler
                    // after a partial run risks double handling.
                    error!(event = %name, generation, "event handler panicked; dispatch aborted");
                    return true;
                }
            }
        }
        false
    }
}

/// Removes its registration when dropped. Holding the guard is what keeps
/// the handler installed.
#[must_use = "dropping the guard unsubscribes the handler"]
pub struct HandlerGuard {
    inner: Weak<RegistryInner>,
    event: EventName,
    generation: u64,
}

impl HandlerGuard {
    pub fn event(&self) -> EventName {
        self.event
    }

    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.remove(self.event, self.generation);
        }
    }
}

pub struct EventRegistry {
    inner: Arc<RegistryInner>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl EventRegistry {
    /// Subscribes to the engine exactly once and starts the pump task.
    pub fn new(engine: &dyn AuthEngine) -> Self {
        let registry = Self::detached();
        let mut rx = engine.subscribe_events();
        let inner = Arc::clone(&registry.inner);
        let pump = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => inner.dispatch_envelope(envelope),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "event pump lagged behind the engine");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        *registry
            .pump
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(pump);
        registry
    }

    /// Registry with no engine attached; events enter through [`inject`].
    ///
    /// [`inject`]: EventRegistry::inject
    pub fn detached() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                slots: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                active: AtomicBool::new(true),
                dropped_events: AtomicU64::new(0),
            }),
            pump: Mutex::new(None),
        }
    }

    /// Pushes a handler onto the event's chain. Newest registrations are
    /// consulted first; after cleanup the returned guard is inert.
    pub fn subscribe<F>(&self, event: EventName, handler: F) -> HandlerGuard
    where
        F: FnMut(EventName, &Value) -> Dispatch + Send + 'static,
    {
        if !self.inner.active.load(Ordering::Acquire) {
            return HandlerGuard {
                inner: Weak::new(),
                event,
                generation: 0,
            };
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let registration = Registration {
            generation,
            handler: Arc::new(Mutex::new(Box::new(handler))),
        };
        self.inner
            .lock_slots()
            .entry(event)
            .or_default()
            .push(registration);
        HandlerGuard {
            inner: Arc::downgrade(&self.inner),
            event,
            generation,
        }
    }

    /// Synchronous local dispatch, also used by tests to stage exact
    /// envelopes without a live engine.
    pub fn inject(&self, envelope: EventEnvelope) {
        if !self.inner.active.load(Ordering::Acquire) {
            return;
        }
        self.inner.dispatch_envelope(envelope);
    }

    /// Count of events dropped for lack of a handler or an unusable payload.
    pub fn dropped_events(&self) -> u64 {
        self.inner.dropped_events.load(Ordering::Relaxed)
    }

    /// Stops the pump and clears every handler slot. Idempotent; subscribing
    /// afterwards yields an inert guard rather than an error.
    pub fn cleanup(&self) {
        self.inner.active.store(false, Ordering::Release);
        if let Some(pump) = self
            .pump
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            pump.abort();
        }
        // Handlers drop outside the lock: the orchestrator's closures own
        // the Arc whose drop releases its guards back into this registry.
        let old = std::mem::take(&mut *self.inner.lock_slots());
        drop(old);
    }
}

impl Drop for EventRegistry {
    fn drop(&mut self) {
        self.cleanup();
    }
}
