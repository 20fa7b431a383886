//! Promise-like wrapper over the engine's fire-and-ack command surface.
//!
//! Every call resolves with the engine's synchronous acknowledgement when
//! `longErrorCode == 0` and fails with the *same* acknowledgement otherwise;
//! callers branch on the engine's error codes, never on message text. The
//! gateway never retries: explicit commands (resend activation code, forgot
//! password) are the retry surface.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use engine::AuthEngine;
use shared::{
    domain::{validate_signing_pair, AuthLevel, AuthenticatorType, ChallengeMode, IdvWorkflowId},
    error::CommandError,
    protocol::{EventName, SyncResponse},
};

use crate::{
    config,
    registry::{Dispatch, EventRegistry},
};

pub type CommandResult = Result<SyncResponse, CommandError>;

fn complete(ack: anyhow::Result<SyncResponse>) -> CommandResult {
    ack.map_err(CommandError::Transport)?.into_result()
}

pub struct CommandGateway<E> {
    engine: Arc<E>,
    profile_path: Option<PathBuf>,
}

impl<E: AuthEngine> CommandGateway<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self {
            engine,
            profile_path: None,
        }
    }

    /// Reads the connection profile from this path instead of the default
    /// location.
    pub fn with_profile_path(engine: Arc<E>, path: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            profile_path: Some(path.into()),
        }
    }

    /// Loads the connection profile, then issues the engine init command.
    /// The only gateway call with a collaborator before the engine.
    pub async fn initialize(&self) -> CommandResult {
        let profile = config::load_profile(self.profile_path.as_deref())?;
        debug!(host = %profile.host, port = profile.port, "initializing engine");
        complete(self.engine.initialize(&profile).await)
    }

    pub async fn submit_user_id(&self, user_id: &str) -> CommandResult {
        complete(self.engine.submit_user_id(user_id).await)
    }

    pub async fn submit_activation_code(&self, code: &str) -> CommandResult {
        complete(self.engine.submit_activation_code(code).await)
    }

    pub async fn resend_activation_code(&self) -> CommandResult {
        complete(self.engine.resend_activation_code().await)
    }

    pub async fn submit_password(&self, password: &str, mode: ChallengeMode) -> CommandResult {
        complete(self.engine.submit_password(password, mode).await)
    }

    pub async fn submit_lda_consent(&self, consent: bool) -> CommandResult {
        complete(self.engine.submit_lda_consent(consent).await)
    }

    pub async fn log_off(&self) -> CommandResult {
        complete(self.engine.log_off().await)
    }

    pub async fn reset_auth_state(&self) -> CommandResult {
        complete(self.engine.reset_auth_state().await)
    }

    pub async fn confirm_idv_document_scan(
        &self,
        confirmed: bool,
        workflow: IdvWorkflowId,
    ) -> CommandResult {
        complete(
            self.engine
                .set_idv_document_scan_confirmation(confirmed, workflow)
                .await,
        )
    }

    pub async fn confirm_idv_selfie(
        &self,
        confirmed: bool,
        workflow: IdvWorkflowId,
    ) -> CommandResult {
        complete(
            self.engine
                .set_idv_selfie_confirmation(confirmed, workflow)
                .await,
        )
    }

    pub async fn confirm_idv_document_details(
        &self,
        confirmed: bool,
        workflow: IdvWorkflowId,
    ) -> CommandResult {
        complete(
            self.engine
                .set_idv_document_details_confirmation(confirmed, workflow)
                .await,
        )
    }

    pub async fn set_idv_biometric_opt_in(&self, consent: bool) -> CommandResult {
        complete(self.engine.set_idv_biometric_opt_in(consent).await)
    }

    pub async fn set_idv_config(&self, config_json: &str) -> CommandResult {
        complete(self.engine.set_idv_config(config_json).await)
    }

    pub async fn get_idv_config(&self) -> Result<String, CommandError> {
        self.engine
            .get_idv_config()
            .await
            .map_err(CommandError::Transport)
    }

    pub async fn extend_session(&self) -> CommandResult {
        complete(self.engine.extend_session().await)
    }

    pub async fn get_notifications(&self) -> CommandResult {
        complete(self.engine.get_notifications().await)
    }

    pub async fn update_notification(&self, id: Uuid, action: &str) -> CommandResult {
        complete(self.engine.update_notification(id, action).await)
    }

    pub async fn perform_verify_auth(&self) -> CommandResult {
        complete(self.engine.perform_verify_auth().await)
    }

    pub async fn fallback_device_activation(&self) -> CommandResult {
        complete(self.engine.fallback_device_activation().await)
    }

    pub async fn forgot_password(&self, user_id: Option<&str>) -> CommandResult {
        complete(self.engine.forgot_password(user_id).await)
    }

    /// Rejects undocumented (level, authenticator) pairs locally; the engine
    /// hard-errors on them instead of degrading.
    pub async fn authenticate_and_sign_data(
        &self,
        payload: &str,
        level: AuthLevel,
        authenticator: AuthenticatorType,
        reason: &str,
    ) -> CommandResult {
        validate_signing_pair(level, authenticator)?;
        complete(
            self.engine
                .authenticate_and_sign_data(payload, level, authenticator, reason)
                .await,
        )
    }

    pub async fn reset_sign_data_state(&self) -> CommandResult {
        complete(self.engine.reset_sign_data_state().await)
    }

    pub fn profile_path(&self) -> Option<&Path> {
        self.profile_path.as_deref()
    }
}

/// Waits for the next occurrence of `event`, observing without consuming:
/// the watchdog handler always passes the event down the chain. A successful
/// sync ack carries no guarantee that the follow-up event ever arrives, so
/// callers that need one put a deadline on it instead of hanging forever.
pub async fn expect_event(
    registry: &EventRegistry,
    event: EventName,
    wait: Duration,
) -> Result<Value, CommandError> {
    let (tx, rx) = oneshot::channel::<Value>();
    let mut slot = Some(tx);
    let guard = registry.subscribe(event, move |_name, payload| {
        if let Some(tx) = slot.take() {
            let _ = tx.send(payload.clone());
        }
        Dispatch::Next
    });

    let result = tokio::time::timeout(wait, rx).await;
    guard.unsubscribe();
    match result {
        Ok(Ok(payload)) => Ok(payload),
        _ => Err(CommandError::EventTimeout {
            event,
            waited: wait,
        }),
    }
}
