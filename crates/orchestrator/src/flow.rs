//! Flow state machine and the default consumer of engine events.
//!
//! Every event runs through the pure [`reduce`] function: it returns the
//! next [`FlowState`], an optional navigation directive, and an optional
//! alert. The [`FlowOrchestrator`] applies those in a fixed order, with
//! alerts delivered before navigation so a critical alert is on screen
//! before the engine's forced-logout event lands.

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use shared::{
    domain::{
        ChallengeMode, IdvWorkflowId, StatusDisposition, STATUS_ATTEMPTS_EXHAUSTED,
        STATUS_CREDENTIAL_EXPIRED,
    },
    protocol::{ChallengeData, EventName},
};

use crate::{
    navigation::{transition, NavDirective, NavEntry, NavStack},
    registry::{Dispatch, EventRegistry, HandlerGuard},
    Screen,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowPhase {
    Idle,
    Initializing,
    AwaitingUserId,
    AwaitingActivationCode,
    AwaitingLdaConsent,
    AwaitingPassword,
    Authenticated,
    IdvDocumentScan,
    IdvDocumentDetails,
    IdvSelfie,
    IdvBiometricOptIn,
    SigningChallenge,
    SessionExpiring,
    CriticalAlert,
    LoggedOut,
    Terminated,
}

/// Data the flow has learned from events so far. Carried forward so a
/// re-entrant challenge keeps its surrounding context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowContext {
    pub user_id: Option<String>,
    pub challenge_mode: Option<ChallengeMode>,
    pub attempts_left: Option<u32>,
    pub idv_workflow: Option<IdvWorkflowId>,
    pub credentials_update_available: bool,
}

impl FlowContext {
    fn absorb(&mut self, data: &ChallengeData) {
        if !data.user_id.is_empty() {
            self.user_id = Some(data.user_id.clone());
        }
        if data.challenge_mode.is_some() {
            self.challenge_mode = data.challenge_mode;
        }
        if data.attempts_left.is_some() {
            self.attempts_left = data.attempts_left;
        }
        if data.idv_workflow_id.is_some() {
            self.idv_workflow = data.idv_workflow_id;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlowState {
    pub phase: FlowPhase,
    pub context: FlowContext,
}

impl Default for FlowState {
    fn default() -> Self {
        Self {
            phase: FlowPhase::Idle,
            context: FlowContext::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub title: String,
    pub message: String,
    pub blocking: bool,
}

impl Alert {
    fn blocking(title: &str, message: impl Into<String>) -> Self {
        Self {
            title: title.to_string(),
            message: message.into(),
            blocking: true,
        }
    }

    fn advisory(title: &str, message: impl Into<String>) -> Self {
        Self {
            title: title.to_string(),
            message: message.into(),
            blocking: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlowOutcome {
    pub next: FlowState,
    pub directive: Option<NavDirective>,
    pub alert: Option<Alert>,
}

fn critical_alert(status_code: i32) -> Alert {
    match status_code {
        STATUS_CREDENTIAL_EXPIRED => Alert::blocking(
            "Credential Expired",
            "Your credential has expired. You will be signed out.",
        ),
        STATUS_ATTEMPTS_EXHAUSTED => Alert::blocking(
            "Maximum Attempts Reached",
            "Too many failed attempts. You will be signed out.",
        ),
        other => Alert::blocking("Authentication Failed", format!("Status code {other}.")),
    }
}

fn advisory_alert(event: EventName, payload: &Value) -> Option<Alert> {
    match event {
        EventName::OnInitializeError => {
            let message = payload
                .get("error")
                .and_then(|e| e.get("errorString"))
                .and_then(Value::as_str)
                .unwrap_or("The engine failed to initialize.");
            Some(Alert::blocking("Initialization Failed", message))
        }
        EventName::OnUserConsentThreats => Some(Alert::advisory(
            "Security Warning",
            "Threats were detected on this device. Review before continuing.",
        )),
        EventName::OnTerminateWithThreats => Some(Alert::blocking(
            "Security Threat Detected",
            "A critical threat was detected. The session has been terminated.",
        )),
        _ => None,
    }
}

/// Phase implied by an event, or `None` when the event leaves the phase
/// untouched (notification refreshes, advisory events).
fn phase_for(event: EventName) -> Option<FlowPhase> {
    match event {
        EventName::OnInitializeProgress => Some(FlowPhase::Initializing),
        EventName::OnInitialized | EventName::OnInitializeError => Some(FlowPhase::Idle),
        EventName::GetUser => Some(FlowPhase::AwaitingUserId),
        EventName::GetActivationCode | EventName::AddNewDeviceOptions => {
            Some(FlowPhase::AwaitingActivationCode)
        }
        EventName::GetUserConsentForLda => Some(FlowPhase::AwaitingLdaConsent),
        EventName::GetPassword => Some(FlowPhase::AwaitingPassword),
        EventName::OnUserLoggedIn | EventName::OnSessionExtensionResponse => {
            Some(FlowPhase::Authenticated)
        }
        EventName::OnUserLoggedOff | EventName::OnSessionTimeout => Some(FlowPhase::LoggedOut),
        EventName::OnSessionTimeoutNotification => Some(FlowPhase::SessionExpiring),
        EventName::GetIdvDocumentScanStartConfirmation => Some(FlowPhase::IdvDocumentScan),
        EventName::GetIdvDocumentDetailsConfirmation => Some(FlowPhase::IdvDocumentDetails),
        EventName::GetIdvSelfieStartConfirmation => Some(FlowPhase::IdvSelfie),
        EventName::GetIdvBiometricOptInConsent => Some(FlowPhase::IdvBiometricOptIn),
        EventName::OnAuthenticateUserAndSignData => Some(FlowPhase::SigningChallenge),
        EventName::OnTerminateWithThreats => Some(FlowPhase::Terminated),
        EventName::OnUserConsentThreats
        | EventName::OnCredentialsAvailableForUpdate
        | EventName::OnGetNotifications
        | EventName::OnUpdateNotification => None,
    }
}

/// Pure reducer: what happened -> what the flow is now. Navigation and
/// alerts are derived outputs, applied by the orchestrator.
pub fn reduce(state: &FlowState, event: EventName, payload: &Value) -> FlowOutcome {
    let data = ChallengeData::from_payload(payload);
    let mut context = state.context.clone();
    context.absorb(&data);

    match data.disposition() {
        StatusDisposition::CriticalThenLogout => {
            // No navigation here: the alert must be visible before the
            // engine's forced-logout event drives the screen change.
            FlowOutcome {
                next: FlowState {
                    phase: FlowPhase::CriticalAlert,
                    context,
                },
                directive: None,
                alert: Some(critical_alert(data.status_code().unwrap_or_default())),
            }
        }
        StatusDisposition::LocalAuthCancelled => FlowOutcome {
            next: FlowState {
                phase: state.phase,
                context,
            },
            directive: None,
            alert: Some(Alert::advisory(
                "Authentication Cancelled",
                "Local authentication was cancelled. You can try again.",
            )),
        },
        StatusDisposition::Proceed | StatusDisposition::RetryInline => {
            if event == EventName::OnCredentialsAvailableForUpdate {
                context.credentials_update_available = true;
            }
            FlowOutcome {
                next: FlowState {
                    phase: phase_for(event).unwrap_or(state.phase),
                    context,
                },
                directive: transition(event, payload),
                alert: advisory_alert(event, payload),
            }
        }
    }
}

/// Owns the default event handling for the whole app: one registration per
/// event name, a reducer-driven state value, and the navigation stack.
pub struct FlowOrchestrator {
    state: Mutex<FlowState>,
    nav: Mutex<NavStack>,
    transitions: broadcast::Sender<NavDirective>,
    alerts: broadcast::Sender<Alert>,
    guards: Mutex<Vec<HandlerGuard>>,
}

impl FlowOrchestrator {
    /// Registers the orchestrator for every event name. Install it before
    /// any screen-scoped interceptor so interceptors sit above it in each
    /// chain.
    pub fn install(registry: &EventRegistry) -> Arc<Self> {
        let (transitions, _) = broadcast::channel(64);
        let (alerts, _) = broadcast::channel(16);
        let orchestrator = Arc::new(Self {
            state: Mutex::new(FlowState::default()),
            nav: Mutex::new(NavStack::default()),
            transitions,
            alerts,
            guards: Mutex::new(Vec::new()),
        });

        let mut guards = Vec::with_capacity(EventName::ALL.len());
        for &event in EventName::ALL {
            let me = Arc::clone(&orchestrator);
            guards.push(registry.subscribe(event, move |name, payload| {
                me.handle(name, payload);
                Dispatch::Handled
            }));
        }
        *orchestrator
            .guards
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = guards;
        orchestrator
    }

    fn handle(&self, event: EventName, payload: &Value) {
        let outcome = {
            let state = self.lock_state();
            reduce(&state, event, payload)
        };

        // Alerts first: a blocking alert must beat any follow-up navigation.
        if let Some(alert) = &outcome.alert {
            warn!(event = %event, title = %alert.title, blocking = alert.blocking, "flow alert");
            let _ = self.alerts.send(alert.clone());
        }
        if let Some(directive) = &outcome.directive {
            let applied = self.lock_nav().apply(directive);
            debug!(event = %event, screen = ?directive.screen, ?applied, "navigation applied");
            let _ = self.transitions.send(directive.clone());
        }
        *self.lock_state() = outcome.next;
    }

    fn lock_state(&self) -> MutexGuard<'_, FlowState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_nav(&self) -> MutexGuard<'_, NavStack> {
        self.nav
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> FlowState {
        self.lock_state().clone()
    }

    pub fn phase(&self) -> FlowPhase {
        self.lock_state().phase
    }

    pub fn current_screen(&self) -> Option<Screen> {
        self.lock_nav().current().map(|entry| entry.screen)
    }

    pub fn current_nav(&self) -> Option<NavEntry> {
        self.lock_nav().current().cloned()
    }

    pub fn nav_depth(&self) -> usize {
        self.lock_nav().depth()
    }

    pub fn subscribe_transitions(&self) -> broadcast::Receiver<NavDirective> {
        self.transitions.subscribe()
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<Alert> {
        self.alerts.subscribe()
    }
}

/// Screen-scoped interceptor for step-up password challenges.
///
/// The engine reuses one `getPassword` event for semantically different
/// prompts, disambiguated only by `challengeMode`. A screen that owns the
/// step-up case subscribes above the orchestrator and passes every other
/// mode through untouched; dropping the returned guard restores the default
/// chain exactly.
pub fn install_step_up_interceptor<F>(registry: &EventRegistry, mut on_step_up: F) -> HandlerGuard
where
    F: FnMut(ChallengeData) + Send + 'static,
{
    registry.subscribe(EventName::GetPassword, move |_name, payload| {
        let data = ChallengeData::from_payload(payload);
        if data.challenge_mode == Some(ChallengeMode::StepUp) {
            on_step_up(data);
            Dispatch::Handled
        } else {
            Dispatch::Next
        }
    })
}
