use std::time::Duration;

use thiserror::Error;

use crate::{
    domain::{AuthLevel, AuthenticatorType},
    protocol::{EventName, SyncResponse},
};

/// Failure modes of the command path. Engine rejections carry the full
/// synchronous acknowledgement so callers can branch on the engine's own
/// error codes instead of strings.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(
        "engine rejected command (long={}, short={}): {}",
        .0.error.long_error_code,
        .0.error.short_error_code,
        .0.error.error_string
    )]
    Engine(SyncResponse),

    #[error("unsupported signing pair: {level:?} with {authenticator:?}")]
    UnsupportedSigningPair {
        level: AuthLevel,
        authenticator: AuthenticatorType,
    },

    #[error("connection profile error: {0}")]
    Profile(String),

    #[error("no {event} event arrived within {waited:?}")]
    EventTimeout { event: EventName, waited: Duration },

    #[error("engine transport failure: {0}")]
    Transport(anyhow::Error),
}

impl CommandError {
    /// The engine acknowledgement carried by an `Engine` rejection, if any.
    pub fn sync_response(&self) -> Option<&SyncResponse> {
        match self {
            CommandError::Engine(resp) => Some(resp),
            _ => None,
        }
    }
}
