use serde::{Deserialize, Serialize};

use crate::error::CommandError;

/// Engine status code carried inside `challengeResponse.status.statusCode`.
/// 100 is the only "proceed" value; everything else is some flavor of failure.
pub const STATUS_PROCEED: i32 = 100;
pub const STATUS_CREDENTIAL_EXPIRED: i32 = 110;
pub const STATUS_LOCAL_AUTH_CANCELLED: i32 = 131;
pub const STATUS_ATTEMPTS_EXHAUSTED: i32 = 153;

/// Long error code the engine uses when the user cancels a local-auth prompt.
pub const ENGINE_ERROR_LOCAL_AUTH_CANCELLED: i64 = 131;

/// Why the engine is prompting for a credential. The wire value is a bare
/// integer; unknown values are preserved rather than rejected so a newer
/// engine does not break older clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeMode {
    InitialLogin,
    ForgotPassword,
    StepUp,
    Other(i32),
}

impl ChallengeMode {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            1 => ChallengeMode::InitialLogin,
            2 => ChallengeMode::ForgotPassword,
            3 => ChallengeMode::StepUp,
            other => ChallengeMode::Other(other),
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            ChallengeMode::InitialLogin => 1,
            ChallengeMode::ForgotPassword => 2,
            ChallengeMode::StepUp => 3,
            ChallengeMode::Other(other) => other,
        }
    }
}

impl Serialize for ChallengeMode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.as_raw())
    }
}

impl<'de> Deserialize<'de> for ChallengeMode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(ChallengeMode::from_raw(i32::deserialize(deserializer)?))
    }
}

/// How a challenge status should be handled by the flow layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusDisposition {
    /// statusCode 100: the challenge advances.
    Proceed,
    /// Ordinary failure (wrong credential); re-render with attempts left.
    RetryInline,
    /// statusCode 110/153: blocking alert, then let the forced logout land.
    CriticalThenLogout,
    /// Local-auth prompt cancelled; retry in place, no logout.
    LocalAuthCancelled,
}

impl StatusDisposition {
    pub fn from_status_code(code: i32) -> Self {
        match code {
            STATUS_PROCEED => StatusDisposition::Proceed,
            STATUS_CREDENTIAL_EXPIRED | STATUS_ATTEMPTS_EXHAUSTED => {
                StatusDisposition::CriticalThenLogout
            }
            STATUS_LOCAL_AUTH_CANCELLED => StatusDisposition::LocalAuthCancelled,
            _ => StatusDisposition::RetryInline,
        }
    }
}

/// Identity-verification workflow selector, 0..=15 on the wire. Selects
/// guidance copy and the post-confirmation transition variant; it is not a
/// state machine of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct IdvWorkflowId(pub u8);

impl IdvWorkflowId {
    pub const MAX: u8 = 15;

    pub fn new(raw: u8) -> Option<Self> {
        (raw <= Self::MAX).then_some(Self(raw))
    }

    pub fn guidance(self) -> &'static str {
        match self.0 {
            0 => "Scan the front and back of your identity document.",
            1 => "Re-scan your identity document to refresh your enrollment.",
            2 => "Take a selfie so we can match it against your document.",
            3 => "Retake your selfie in good lighting.",
            4..=7 => "Confirm the details we read from your document.",
            8..=11 => "Verify your identity to continue with this action.",
            _ => "Follow the on-screen instructions to verify your identity.",
        }
    }
}

impl TryFrom<u8> for IdvWorkflowId {
    type Error = String;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        Self::new(raw).ok_or_else(|| format!("IDV workflow id {raw} is out of range 0..={}", Self::MAX))
    }
}

impl From<IdvWorkflowId> for u8 {
    fn from(id: IdvWorkflowId) -> u8 {
        id.0
    }
}

/// Assurance level requested for a data-signing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthLevel {
    None,
    Level1,
    Level4,
}

/// Authenticator backing a data-signing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthenticatorType {
    None,
    IdvServerBiometric,
}

/// The engine hard-errors on any pairing other than these three, so the
/// client rejects bad pairs before a command is ever issued.
pub fn validate_signing_pair(
    level: AuthLevel,
    authenticator: AuthenticatorType,
) -> Result<(), CommandError> {
    match (level, authenticator) {
        (AuthLevel::None, AuthenticatorType::None)
        | (AuthLevel::Level1, AuthenticatorType::None)
        | (AuthLevel::Level4, AuthenticatorType::IdvServerBiometric) => Ok(()),
        _ => Err(CommandError::UnsupportedSigningPair {
            level,
            authenticator,
        }),
    }
}

/// Connection profile consumed by `initialize`. Loaded by the orchestrator's
/// config layer; the engine only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    pub host: String,
    pub port: u16,
    pub app_id: String,
}

impl Default for ConnectionProfile {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8443,
            app_id: "authgate-demo".into(),
        }
    }
}
