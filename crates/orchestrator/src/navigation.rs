//! Default event -> screen mapping and the navigate-or-update stack.
//!
//! Screens are pure functions of their parameters: the full normalized event
//! payload rides along as `event_data`, so a destination never reaches back
//! into the orchestrator for state.

use serde_json::Value;

use shared::{
    domain::StatusDisposition,
    protocol::{ChallengeData, EventName},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Screen {
    InitializationProgress,
    UserIdEntry,
    ActivationCode,
    DeviceOptions,
    LdaConsent,
    Password,
    Home,
    Login,
    Notifications,
    IdvDocumentScan,
    IdvDocumentDetails,
    IdvSelfie,
    IdvBiometricOptIn,
    Signing,
    SessionExpiry,
}

/// Parameters handed to the destination screen.
#[derive(Debug, Clone, PartialEq)]
pub struct NavParams {
    /// Full normalized event payload.
    pub event_data: Value,
    pub attempts_left: Option<u32>,
    /// Inline field-level error for retryable credential failures.
    pub inline_error: Option<String>,
    /// IDV guidance copy selected by the workflow identifier.
    pub guidance: Option<&'static str>,
}

impl NavParams {
    pub fn from_event(payload: &Value, data: &ChallengeData) -> Self {
        let inline_error = match data.disposition() {
            StatusDisposition::RetryInline => {
                let message = data
                    .challenge_response
                    .as_ref()
                    .and_then(|r| r.status.as_ref())
                    .map(|s| s.status_message.clone())
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "Credential rejected, try again.".to_string());
                Some(message)
            }
            _ => None,
        };
        Self {
            event_data: payload.clone(),
            attempts_left: data.attempts_left,
            inline_error,
            guidance: data.idv_workflow_id.map(|w| w.guidance()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavDirective {
    pub screen: Screen,
    pub params: NavParams,
    /// Clear the stack before showing the screen (logout, termination).
    pub reset: bool,
}

/// Pure default mapping from an event to a navigation directive. Events with
/// no screen of their own (progress milestones, threat advisories) map to
/// `None`; the flow layer handles them through state and alerts.
pub fn transition(event: EventName, payload: &Value) -> Option<NavDirective> {
    let data = ChallengeData::from_payload(payload);
    let params = NavParams::from_event(payload, &data);

    let (screen, reset) = match event {
        EventName::OnInitializeProgress => (Screen::InitializationProgress, false),
        EventName::GetUser => (Screen::UserIdEntry, false),
        EventName::GetActivationCode => (Screen::ActivationCode, false),
        EventName::AddNewDeviceOptions => (Screen::DeviceOptions, false),
        EventName::GetUserConsentForLda => (Screen::LdaConsent, false),
        EventName::GetPassword => (Screen::Password, false),
        EventName::OnUserLoggedIn => (Screen::Home, true),
        EventName::OnUserLoggedOff | EventName::OnSessionTimeout => (Screen::Login, true),
        EventName::OnTerminateWithThreats => (Screen::Login, true),
        EventName::OnSessionTimeoutNotification => (Screen::SessionExpiry, false),
        EventName::OnGetNotifications | EventName::OnUpdateNotification => {
            (Screen::Notifications, false)
        }
        EventName::GetIdvDocumentScanStartConfirmation => (Screen::IdvDocumentScan, false),
        EventName::GetIdvDocumentDetailsConfirmation => (Screen::IdvDocumentDetails, false),
        EventName::GetIdvSelfieStartConfirmation => (Screen::IdvSelfie, false),
        EventName::GetIdvBiometricOptInConsent => (Screen::IdvBiometricOptIn, false),
        EventName::OnAuthenticateUserAndSignData => (Screen::Signing, false),
        EventName::OnSessionExtensionResponse => (Screen::Home, false),
        EventName::OnInitialized
        | EventName::OnInitializeError
        | EventName::OnUserConsentThreats
        | EventName::OnCredentialsAvailableForUpdate => return None,
    };

    Some(NavDirective {
        screen,
        params,
        reset,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavEntry {
    pub screen: Screen,
    pub params: NavParams,
    /// Bumped each time an in-place update replaces the params.
    pub revision: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Pushed,
    Updated,
    Reset,
}

/// Screen stack with navigate-or-update semantics: a directive for the
/// screen already on top updates that instance instead of stacking a twin.
#[derive(Debug, Default)]
pub struct NavStack {
    stack: Vec<NavEntry>,
}

impl NavStack {
    pub fn apply(&mut self, directive: &NavDirective) -> Applied {
        if directive.reset {
            self.stack.clear();
            self.stack.push(NavEntry {
                screen: directive.screen,
                params: directive.params.clone(),
                revision: 0,
            });
            return Applied::Reset;
        }

        if let Some(top) = self.stack.last_mut() {
            if top.screen == directive.screen {
                top.params = directive.params.clone();
                top.revision += 1;
                return Applied::Updated;
            }
        }

        self.stack.push(NavEntry {
            screen: directive.screen,
            params: directive.params.clone(),
            revision: 0,
        });
        Applied::Pushed
    }

    pub fn current(&self) -> Option<&NavEntry> {
        self.stack.last()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}
