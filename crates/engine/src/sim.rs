//! Scripted in-process engine used by the demo binary and tests.
//!
//! It honors only the envelope contract: every command returns a sync ack,
//! and successful acks are followed by the asynchronous events a real engine
//! would emit. Payload encodings rotate between a JSON string, a parsed
//! object, and an array-wrapped object so consumers exercise all three wire
//! shapes. No biometric, OCR, or cryptographic behavior is simulated.

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use shared::{
    domain::{
        AuthLevel, AuthenticatorType, ChallengeMode, ConnectionProfile, IdvWorkflowId,
        STATUS_ATTEMPTS_EXHAUSTED, STATUS_PROCEED,
    },
    protocol::{EventEnvelope, EventName, Notification, SyncResponse},
};

use crate::AuthEngine;

/// Ordinary retryable credential failure used by the simulator.
const STATUS_WRONG_CREDENTIAL: i32 = 101;

#[derive(Debug, Clone)]
pub struct SimulatedEngineConfig {
    pub expected_activation_code: String,
    pub expected_password: String,
    pub activation_attempts: u32,
    pub password_attempts: u32,
}

impl Default for SimulatedEngineConfig {
    fn default() -> Self {
        Self {
            expected_activation_code: "123456".into(),
            expected_password: "hunter2".into(),
            activation_attempts: 3,
            password_attempts: 3,
        }
    }
}

struct SimState {
    fail_next: Option<SyncResponse>,
    user_id: Option<String>,
    activation_attempts_left: u32,
    password_attempts_left: u32,
    pending_step_up: Option<Uuid>,
    idv_config: String,
    encoding_cursor: usize,
}

pub struct SimulatedEngine {
    config: SimulatedEngineConfig,
    events: broadcast::Sender<EventEnvelope>,
    state: Mutex<SimState>,
}

impl SimulatedEngine {
    pub fn new(config: SimulatedEngineConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        let state = SimState {
            fail_next: None,
            user_id: None,
            activation_attempts_left: config.activation_attempts,
            password_attempts_left: config.password_attempts,
            pending_step_up: None,
            idv_config: "{}".into(),
            encoding_cursor: 0,
        };
        Self {
            config,
            events,
            state: Mutex::new(state),
        }
    }

    /// The next command returns this acknowledgement instead of success.
    pub fn fail_next_command(&self, response: SyncResponse) {
        self.lock().fail_next = Some(response);
    }

    /// Emits an envelope exactly as given, bypassing the script and the
    /// encoding rotation. Lets callers stage edge-case payloads.
    pub fn emit_raw(&self, envelope: EventEnvelope) {
        let _ = self.events.send(envelope);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_fail(&self) -> Option<SyncResponse> {
        self.lock().fail_next.take()
    }

    /// Rotates the wire shape per emission: object, JSON string, one-element
    /// array.
    fn emit(&self, name: EventName, payload: Value) {
        let encoded = {
            let mut state = self.lock();
            let cursor = state.encoding_cursor;
            state.encoding_cursor = (cursor + 1) % 3;
            match cursor {
                0 => payload,
                1 => Value::String(payload.to_string()),
                _ => Value::Array(vec![payload]),
            }
        };
        debug!(event = %name, "simulated engine emitting event");
        let _ = self.events.send(EventEnvelope::new(name, encoded));
    }

    fn challenge_payload(user_id: &str, mode: Option<ChallengeMode>, status: i32, attempts: Option<u32>) -> Value {
        let mut payload = json!({
            "userID": user_id,
            "challengeResponse": {
                "status": {"statusCode": status, "statusMessage": status_message(status)}
            }
        });
        if let Some(mode) = mode {
            payload["challengeMode"] = json!(mode.as_raw());
        }
        if let Some(attempts) = attempts {
            payload["attemptsLeft"] = json!(attempts);
        }
        payload
    }

    fn user_id(&self) -> String {
        self.lock().user_id.clone().unwrap_or_default()
    }
}

fn status_message(status: i32) -> &'static str {
    match status {
        STATUS_PROCEED => "",
        STATUS_ATTEMPTS_EXHAUSTED => "attempts exhausted",
        STATUS_WRONG_CREDENTIAL => "credential rejected",
        _ => "challenge failed",
    }
}

#[async_trait]
impl AuthEngine for SimulatedEngine {
    async fn initialize(&self, profile: &ConnectionProfile) -> Result<SyncResponse> {
        if let Some(ack) = self.take_fail() {
            return Ok(ack);
        }
        debug!(host = %profile.host, port = profile.port, app_id = %profile.app_id, "initializing simulated engine");
        self.emit(EventName::OnInitializeProgress, json!({"progress": 50}));
        self.emit(EventName::OnInitialized, json!({}));
        self.emit(
            EventName::GetUser,
            Self::challenge_payload("", None, STATUS_PROCEED, None),
        );
        Ok(SyncResponse::ok())
    }

    async fn submit_user_id(&self, user_id: &str) -> Result<SyncResponse> {
        if let Some(ack) = self.take_fail() {
            return Ok(ack);
        }
        let attempts = {
            let mut state = self.lock();
            state.user_id = Some(user_id.to_string());
            state.activation_attempts_left = self.config.activation_attempts;
            state.activation_attempts_left
        };
        self.emit(
            EventName::GetActivationCode,
            Self::challenge_payload(user_id, None, STATUS_PROCEED, Some(attempts)),
        );
        Ok(SyncResponse::ok())
    }

    async fn submit_activation_code(&self, code: &str) -> Result<SyncResponse> {
        if let Some(ack) = self.take_fail() {
            return Ok(ack);
        }
        let user = self.user_id();
        if code == self.config.expected_activation_code {
            self.emit(
                EventName::GetUserConsentForLda,
                Self::challenge_payload(&user, None, STATUS_PROCEED, None),
            );
            return Ok(SyncResponse::ok());
        }

        let left = {
            let mut state = self.lock();
            state.activation_attempts_left = state.activation_attempts_left.saturating_sub(1);
            state.activation_attempts_left
        };
        if left == 0 {
            self.emit(
                EventName::GetActivationCode,
                Self::challenge_payload(&user, None, STATUS_ATTEMPTS_EXHAUSTED, Some(0)),
            );
            self.emit(EventName::OnUserLoggedOff, json!({"userID": user}));
        } else {
            self.emit(
                EventName::GetActivationCode,
                Self::challenge_payload(&user, None, STATUS_WRONG_CREDENTIAL, Some(left)),
            );
        }
        Ok(SyncResponse::ok())
    }

    async fn resend_activation_code(&self) -> Result<SyncResponse> {
        if let Some(ack) = self.take_fail() {
            return Ok(ack);
        }
        let user = self.user_id();
        let attempts = {
            let mut state = self.lock();
            state.activation_attempts_left = self.config.activation_attempts;
            state.activation_attempts_left
        };
        self.emit(
            EventName::GetActivationCode,
            Self::challenge_payload(&user, None, STATUS_PROCEED, Some(attempts)),
        );
        Ok(SyncResponse::ok())
    }

    async fn submit_password(&self, password: &str, mode: ChallengeMode) -> Result<SyncResponse> {
        if let Some(ack) = self.take_fail() {
            return Ok(ack);
        }
        let user = self.user_id();
        if password == self.config.expected_password {
            self.lock().password_attempts_left = self.config.password_attempts;
            let pending = if mode == ChallengeMode::StepUp {
                self.lock().pending_step_up.take()
            } else {
                None
            };
            match pending {
                Some(id) => self.emit(
                    EventName::OnUpdateNotification,
                    json!({
                        "notificationId": id,
                        "challengeResponse": {
                            "status": {"statusCode": STATUS_PROCEED, "statusMessage": ""}
                        }
                    }),
                ),
                None => self.emit(EventName::OnUserLoggedIn, json!({"userID": user})),
            }
            return Ok(SyncResponse::ok());
        }

        let left = {
            let mut state = self.lock();
            state.password_attempts_left = state.password_attempts_left.saturating_sub(1);
            state.password_attempts_left
        };
        if left == 0 {
            self.emit(
                EventName::GetPassword,
                Self::challenge_payload(&user, Some(mode), STATUS_ATTEMPTS_EXHAUSTED, Some(0)),
            );
            self.emit(EventName::OnUserLoggedOff, json!({"userID": user}));
        } else {
            self.emit(
                EventName::GetPassword,
                Self::challenge_payload(&user, Some(mode), STATUS_WRONG_CREDENTIAL, Some(left)),
            );
        }
        Ok(SyncResponse::ok())
    }

    async fn submit_lda_consent(&self, _consent: bool) -> Result<SyncResponse> {
        if let Some(ack) = self.take_fail() {
            return Ok(ack);
        }
        // Declined consent falls back to password authentication either way.
        let user = self.user_id();
        let attempts = self.lock().password_attempts_left;
        self.emit(
            EventName::GetPassword,
            Self::challenge_payload(
                &user,
                Some(ChallengeMode::InitialLogin),
                STATUS_PROCEED,
                Some(attempts),
            ),
        );
        Ok(SyncResponse::ok())
    }

    async fn log_off(&self) -> Result<SyncResponse> {
        if let Some(ack) = self.take_fail() {
            return Ok(ack);
        }
        let user = self.user_id();
        self.emit(EventName::OnUserLoggedOff, json!({"userID": user}));
        Ok(SyncResponse::ok())
    }

    async fn reset_auth_state(&self) -> Result<SyncResponse> {
        if let Some(ack) = self.take_fail() {
            return Ok(ack);
        }
        let mut state = self.lock();
        state.user_id = None;
        state.pending_step_up = None;
        state.activation_attempts_left = self.config.activation_attempts;
        state.password_attempts_left = self.config.password_attempts;
        Ok(SyncResponse::ok())
    }

    async fn set_idv_document_scan_confirmation(
        &self,
        confirmed: bool,
        workflow: IdvWorkflowId,
    ) -> Result<SyncResponse> {
        if let Some(ack) = self.take_fail() {
            return Ok(ack);
        }
        if confirmed {
            self.emit(
                EventName::GetIdvDocumentDetailsConfirmation,
                json!({"idvWorkflowId": workflow.0}),
            );
        }
        Ok(SyncResponse::ok())
    }

    async fn set_idv_document_details_confirmation(
        &self,
        confirmed: bool,
        workflow: IdvWorkflowId,
    ) -> Result<SyncResponse> {
        if let Some(ack) = self.take_fail() {
            return Ok(ack);
        }
        if confirmed {
            self.emit(
                EventName::GetIdvSelfieStartConfirmation,
                json!({"idvWorkflowId": workflow.0}),
            );
        }
        Ok(SyncResponse::ok())
    }

    async fn set_idv_selfie_confirmation(
        &self,
        confirmed: bool,
        workflow: IdvWorkflowId,
    ) -> Result<SyncResponse> {
        if let Some(ack) = self.take_fail() {
            return Ok(ack);
        }
        if confirmed {
            self.emit(
                EventName::GetIdvBiometricOptInConsent,
                json!({"idvWorkflowId": workflow.0}),
            );
        }
        Ok(SyncResponse::ok())
    }

    async fn set_idv_biometric_opt_in(&self, _consent: bool) -> Result<SyncResponse> {
        if let Some(ack) = self.take_fail() {
            return Ok(ack);
        }
        Ok(SyncResponse::ok())
    }

    async fn set_idv_config(&self, config_json: &str) -> Result<SyncResponse> {
        if let Some(ack) = self.take_fail() {
            return Ok(ack);
        }
        if serde_json::from_str::<Value>(config_json).is_err() {
            return Ok(SyncResponse::failure(-2, 1, "invalid IDV config JSON"));
        }
        self.lock().idv_config = config_json.to_string();
        Ok(SyncResponse::ok())
    }

    async fn get_idv_config(&self) -> Result<String> {
        Ok(self.lock().idv_config.clone())
    }

    async fn extend_session(&self) -> Result<SyncResponse> {
        if let Some(ack) = self.take_fail() {
            return Ok(ack);
        }
        self.emit(
            EventName::OnSessionExtensionResponse,
            json!({"challengeResponse": {"status": {"statusCode": STATUS_PROCEED, "statusMessage": ""}}}),
        );
        Ok(SyncResponse::ok())
    }

    async fn get_notifications(&self) -> Result<SyncResponse> {
        if let Some(ack) = self.take_fail() {
            return Ok(ack);
        }
        let notification = Notification {
            id: Uuid::new_v4(),
            title: "Payment approval".into(),
            body: "Approve transfer of 120.00 to Acme Corp".into(),
            actions: vec!["approve".into(), "deny".into()],
            received_at: Utc::now(),
        };
        self.emit(
            EventName::OnGetNotifications,
            json!({"notifications": [notification]}),
        );
        Ok(SyncResponse::ok())
    }

    async fn update_notification(&self, id: Uuid, action: &str) -> Result<SyncResponse> {
        if let Some(ack) = self.take_fail() {
            return Ok(ack);
        }
        // Acting on a notification requires step-up authorization first.
        let user = self.user_id();
        self.lock().pending_step_up = Some(id);
        debug!(notification = %id, action, "step-up required for notification action");
        self.emit(
            EventName::GetPassword,
            Self::challenge_payload(&user, Some(ChallengeMode::StepUp), STATUS_PROCEED, None),
        );
        Ok(SyncResponse::ok())
    }

    async fn perform_verify_auth(&self) -> Result<SyncResponse> {
        if let Some(ack) = self.take_fail() {
            return Ok(ack);
        }
        self.emit(
            EventName::GetIdvDocumentScanStartConfirmation,
            json!({"idvWorkflowId": 8}),
        );
        Ok(SyncResponse::ok())
    }

    async fn fallback_device_activation(&self) -> Result<SyncResponse> {
        if let Some(ack) = self.take_fail() {
            return Ok(ack);
        }
        self.emit(
            EventName::AddNewDeviceOptions,
            json!({"options": ["qrCode", "activationCode"]}),
        );
        Ok(SyncResponse::ok())
    }

    async fn forgot_password(&self, user_id: Option<&str>) -> Result<SyncResponse> {
        if let Some(ack) = self.take_fail() {
            return Ok(ack);
        }
        let user = user_id.map(str::to_string).unwrap_or_else(|| self.user_id());
        self.emit(
            EventName::GetPassword,
            Self::challenge_payload(&user, Some(ChallengeMode::ForgotPassword), STATUS_PROCEED, None),
        );
        Ok(SyncResponse::ok())
    }

    async fn authenticate_and_sign_data(
        &self,
        payload: &str,
        _level: AuthLevel,
        _authenticator: AuthenticatorType,
        reason: &str,
    ) -> Result<SyncResponse> {
        if let Some(ack) = self.take_fail() {
            return Ok(ack);
        }
        self.emit(
            EventName::OnAuthenticateUserAndSignData,
            json!({
                "signedPayload": payload,
                "reason": reason,
                "challengeResponse": {
                    "status": {"statusCode": STATUS_PROCEED, "statusMessage": ""}
                }
            }),
        );
        Ok(SyncResponse::ok())
    }

    async fn reset_sign_data_state(&self) -> Result<SyncResponse> {
        if let Some(ack) = self.take_fail() {
            return Ok(ack);
        }
        Ok(SyncResponse::ok())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.events.subscribe()
    }
}
