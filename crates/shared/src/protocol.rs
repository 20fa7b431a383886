use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::{
    domain::{ChallengeMode, IdvWorkflowId, StatusDisposition, ENGINE_ERROR_LOCAL_AUTH_CANCELLED},
    error::CommandError,
};

/// Error block of a synchronous acknowledgement. `longErrorCode == 0` is the
/// only success value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncError {
    pub long_error_code: i64,
    pub short_error_code: i64,
    #[serde(default)]
    pub error_string: String,
}

/// Immediate synchronous acknowledgement returned by every engine command.
/// Consumed on the spot by the gateway; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub error: SyncError,
}

impl SyncResponse {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failure(long: i64, short: i64, message: impl Into<String>) -> Self {
        Self {
            error: SyncError {
                long_error_code: long,
                short_error_code: short,
                error_string: message.into(),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.long_error_code == 0
    }

    /// Success keeps the ack; failure moves the *whole* response into the
    /// error so callers can pattern-match on the engine's code fields.
    pub fn into_result(self) -> Result<SyncResponse, CommandError> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(CommandError::Engine(self))
        }
    }
}

macro_rules! event_names {
    ($($variant:ident => $wire:literal),+ $(,)?) => {
        /// Every named event the engine can emit.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum EventName {
            $($variant,)+
        }

        impl EventName {
            pub const ALL: &'static [EventName] = &[$(EventName::$variant,)+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $(EventName::$variant => $wire,)+
                }
            }
        }

        impl FromStr for EventName {
            type Err = UnknownEventName;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok(EventName::$variant),)+
                    other => Err(UnknownEventName(other.to_string())),
                }
            }
        }
    };
}

event_names! {
    OnInitializeProgress => "onInitializeProgress",
    OnInitializeError => "onInitializeError",
    OnInitialized => "onInitialized",
    OnUserConsentThreats => "onUserConsentThreats",
    OnTerminateWithThreats => "onTerminateWithThreats",
    GetUser => "getUser",
    GetActivationCode => "getActivationCode",
    GetUserConsentForLda => "getUserConsentForLDA",
    GetPassword => "getPassword",
    OnUserLoggedIn => "onUserLoggedIn",
    OnUserLoggedOff => "onUserLoggedOff",
    OnCredentialsAvailableForUpdate => "onCredentialsAvailableForUpdate",
    AddNewDeviceOptions => "addNewDeviceOptions",
    OnSessionTimeout => "onSessionTimeout",
    OnSessionTimeoutNotification => "onSessionTimeOutNotification",
    OnSessionExtensionResponse => "onSessionExtensionResponse",
    OnGetNotifications => "onGetNotifications",
    OnUpdateNotification => "onUpdateNotification",
    GetIdvDocumentScanStartConfirmation => "getIDVDocumentScanProcessStartConfirmation",
    GetIdvSelfieStartConfirmation => "getIDVSelfieProcessStartConfirmation",
    GetIdvDocumentDetailsConfirmation => "getIDVDocumentDetailsConfirmation",
    GetIdvBiometricOptInConsent => "getIDVBiometricOptInConsent",
    OnAuthenticateUserAndSignData => "onAuthenticateUserAndSignData",
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown engine event name: {0}")]
pub struct UnknownEventName(pub String);

/// One event as received from the engine. The payload is whatever the native
/// side handed over: a JSON string, a parsed value, or a one-element array
/// wrapping either. Normalization happens at the registry boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub name: EventName,
    pub payload: Value,
}

impl EventEnvelope {
    pub fn new(name: EventName, payload: Value) -> Self {
        Self { name, payload }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeStatus {
    #[serde(default)]
    pub status_code: i32,
    #[serde(default)]
    pub status_message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChallengeResponse {
    pub status: Option<ChallengeStatus>,
    pub error: Option<SyncError>,
}

/// Common shape of challenge-bearing event payloads. Every field is optional
/// on the wire; shapes vary per event and the engine omits what it does not
/// need.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChallengeData {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub challenge_mode: Option<ChallengeMode>,
    pub attempts_left: Option<u32>,
    pub challenge_response: Option<ChallengeResponse>,
    pub idv_workflow_id: Option<IdvWorkflowId>,
    pub error: Option<SyncError>,
}

impl ChallengeData {
    /// Typed view of a payload. When full typed deserialization fails, the
    /// payload degrades to field-by-field extraction instead of being
    /// discarded: the status and error codes steer logout decisions and must
    /// survive an unrelated mistyped field.
    pub fn from_payload(payload: &Value) -> Self {
        match serde_json::from_value(payload.clone()) {
            Ok(data) => data,
            Err(err) => {
                warn!(%err, "challenge payload failed typed parse; extracting fields individually");
                Self::from_fields(payload)
            }
        }
    }

    fn from_fields(payload: &Value) -> Self {
        Self {
            user_id: payload
                .get("userID")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            challenge_mode: payload
                .get("challengeMode")
                .and_then(Value::as_i64)
                .map(|raw| ChallengeMode::from_raw(raw as i32)),
            attempts_left: payload
                .get("attemptsLeft")
                .and_then(Value::as_u64)
                .and_then(|raw| u32::try_from(raw).ok()),
            challenge_response: payload
                .get("challengeResponse")
                .map(challenge_response_fields),
            idv_workflow_id: payload
                .get("idvWorkflowId")
                .and_then(Value::as_u64)
                .and_then(|raw| u8::try_from(raw).ok())
                .and_then(IdvWorkflowId::new),
            error: payload.get("error").map(sync_error_fields),
        }
    }

    pub fn status_code(&self) -> Option<i32> {
        self.challenge_response
            .as_ref()
            .and_then(|r| r.status.as_ref())
            .map(|s| s.status_code)
    }

    /// Classifies the payload for the flow layer. An engine-level long error
    /// code of 131 (local-auth cancelled) takes precedence over the nested
    /// challenge status; an absent status counts as proceed.
    pub fn disposition(&self) -> StatusDisposition {
        let engine_error = self
            .error
            .as_ref()
            .map(|e| e.long_error_code)
            .or_else(|| {
                self.challenge_response
                    .as_ref()
                    .and_then(|r| r.error.as_ref())
                    .map(|e| e.long_error_code)
            })
            .unwrap_or(0);
        if engine_error == ENGINE_ERROR_LOCAL_AUTH_CANCELLED {
            return StatusDisposition::LocalAuthCancelled;
        }
        match self.status_code() {
            Some(code) => StatusDisposition::from_status_code(code),
            None => StatusDisposition::Proceed,
        }
    }
}

fn sync_error_fields(value: &Value) -> SyncError {
    serde_json::from_value(value.clone()).unwrap_or_else(|_| SyncError {
        long_error_code: value
            .get("longErrorCode")
            .and_then(Value::as_i64)
            .unwrap_or_default(),
        short_error_code: value
            .get("shortErrorCode")
            .and_then(Value::as_i64)
            .unwrap_or_default(),
        error_string: value
            .get("errorString")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

fn challenge_response_fields(value: &Value) -> ChallengeResponse {
    serde_json::from_value(value.clone()).unwrap_or_else(|_| ChallengeResponse {
        status: value.get("status").map(|status| ChallengeStatus {
            status_code: status
                .get("statusCode")
                .and_then(Value::as_i64)
                .unwrap_or_default() as i32,
            status_message: status
                .get("statusMessage")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        error: value.get("error").map(sync_error_fields),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub actions: Vec<String>,
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_names_round_trip() {
        for name in EventName::ALL {
            assert_eq!(name.as_str().parse::<EventName>().unwrap(), *name);
        }
        assert!("getUnknownThing".parse::<EventName>().is_err());
    }

    #[test]
    fn sync_response_result_identity() {
        let ok = SyncResponse::ok();
        assert_eq!(ok.clone().into_result().unwrap(), ok);

        let failed = SyncResponse::failure(-5, 2, "bad state");
        match failed.clone().into_result() {
            Err(CommandError::Engine(inner)) => assert_eq!(inner, failed),
            other => panic!("expected engine error, got {other:?}"),
        }
    }

    #[test]
    fn challenge_data_reads_camel_case_wire_shape() {
        let payload = json!({
            "userID": "jane",
            "challengeMode": 3,
            "attemptsLeft": 2,
            "challengeResponse": {
                "status": {"statusCode": 153, "statusMessage": "attempts exhausted"}
            }
        });
        let data = ChallengeData::from_payload(&payload);
        assert_eq!(data.user_id, "jane");
        assert_eq!(data.challenge_mode, Some(ChallengeMode::StepUp));
        assert_eq!(data.attempts_left, Some(2));
        assert_eq!(data.status_code(), Some(153));
        assert_eq!(data.disposition(), StatusDisposition::CriticalThenLogout);
    }

    #[test]
    fn engine_error_131_outranks_challenge_status() {
        let payload = json!({
            "error": {"longErrorCode": 131, "shortErrorCode": 1, "errorString": "cancelled"},
            "challengeResponse": {"status": {"statusCode": 100, "statusMessage": ""}}
        });
        let data = ChallengeData::from_payload(&payload);
        assert_eq!(data.disposition(), StatusDisposition::LocalAuthCancelled);
    }

    #[test]
    fn mistyped_sibling_field_does_not_erase_a_critical_status() {
        let payload = json!({
            "userID": "jane",
            "attemptsLeft": "zero",
            "challengeResponse": {
                "status": {"statusCode": 153, "statusMessage": "attempts exhausted"}
            }
        });
        let data = ChallengeData::from_payload(&payload);
        assert_eq!(data.user_id, "jane");
        assert_eq!(data.attempts_left, None);
        assert_eq!(data.status_code(), Some(153));
        assert_eq!(data.disposition(), StatusDisposition::CriticalThenLogout);
    }

    #[test]
    fn mistyped_sibling_field_does_not_erase_the_engine_error_code() {
        let payload = json!({
            "error": {"longErrorCode": 131, "shortErrorCode": "one", "errorString": "cancelled"}
        });
        let data = ChallengeData::from_payload(&payload);
        assert_eq!(data.disposition(), StatusDisposition::LocalAuthCancelled);
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let payload = json!({"somethingNew": true, "userID": "x"});
        let data = ChallengeData::from_payload(&payload);
        assert_eq!(data.user_id, "x");
        assert_eq!(data.disposition(), StatusDisposition::Proceed);
    }
}
