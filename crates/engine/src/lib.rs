//! Boundary to the opaque native auth engine.
//!
//! The engine performs all cryptographic, biometric, and network work.
//! Commands are fire-and-ack: each call returns an immediate [`SyncResponse`]
//! and, on success, the engine usually (not always) emits an asynchronous
//! named event later on the subscription channel.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use shared::{
    domain::{AuthLevel, AuthenticatorType, ChallengeMode, ConnectionProfile, IdvWorkflowId},
    protocol::{EventEnvelope, SyncResponse},
};

mod sim;

pub use sim::{SimulatedEngine, SimulatedEngineConfig};

/// Command surface of the native engine plus its event-emission boundary.
///
/// Every command returns the engine's immediate synchronous acknowledgement;
/// transport-level faults (engine unreachable) are `Err`. The gateway layer
/// owns the "long error code zero means success" interpretation.
#[async_trait]
pub trait AuthEngine: Send + Sync {
    async fn initialize(&self, profile: &ConnectionProfile) -> Result<SyncResponse>;
    async fn submit_user_id(&self, user_id: &str) -> Result<SyncResponse>;
    async fn submit_activation_code(&self, code: &str) -> Result<SyncResponse>;
    async fn resend_activation_code(&self) -> Result<SyncResponse>;
    async fn submit_password(&self, password: &str, mode: ChallengeMode) -> Result<SyncResponse>;
    async fn submit_lda_consent(&self, consent: bool) -> Result<SyncResponse>;
    async fn log_off(&self) -> Result<SyncResponse>;
    async fn reset_auth_state(&self) -> Result<SyncResponse>;

    async fn set_idv_document_scan_confirmation(
        &self,
        confirmed: bool,
        workflow: IdvWorkflowId,
    ) -> Result<SyncResponse>;
    async fn set_idv_selfie_confirmation(
        &self,
        confirmed: bool,
        workflow: IdvWorkflowId,
    ) -> Result<SyncResponse>;
    async fn set_idv_document_details_confirmation(
        &self,
        confirmed: bool,
        workflow: IdvWorkflowId,
    ) -> Result<SyncResponse>;
    async fn set_idv_biometric_opt_in(&self, consent: bool) -> Result<SyncResponse>;
    async fn set_idv_config(&self, config_json: &str) -> Result<SyncResponse>;
    async fn get_idv_config(&self) -> Result<String>;

    async fn extend_session(&self) -> Result<SyncResponse>;
    async fn get_notifications(&self) -> Result<SyncResponse>;
    async fn update_notification(&self, id: Uuid, action: &str) -> Result<SyncResponse>;
    async fn perform_verify_auth(&self) -> Result<SyncResponse>;
    async fn fallback_device_activation(&self) -> Result<SyncResponse>;
    async fn forgot_password(&self, user_id: Option<&str>) -> Result<SyncResponse>;

    async fn authenticate_and_sign_data(
        &self,
        payload: &str,
        level: AuthLevel,
        authenticator: AuthenticatorType,
        reason: &str,
    ) -> Result<SyncResponse>;
    async fn reset_sign_data_state(&self) -> Result<SyncResponse>;

    /// Engine -> core event boundary. Each subscriber gets every event
    /// emitted after the point of subscription.
    fn subscribe_events(&self) -> broadcast::Receiver<EventEnvelope>;
}

/// Null engine for wiring code paths before a real engine is attached.
pub struct MissingAuthEngine;

fn unavailable() -> anyhow::Error {
    anyhow!("auth engine is unavailable")
}

#[async_trait]
impl AuthEngine for MissingAuthEngine {
    async fn initialize(&self, _profile: &ConnectionProfile) -> Result<SyncResponse> {
        Err(unavailable())
    }

    async fn submit_user_id(&self, _user_id: &str) -> Result<SyncResponse> {
        Err(unavailable())
    }

    async fn submit_activation_code(&self, _code: &str) -> Result<SyncResponse> {
        Err(unavailable())
    }

    async fn resend_activation_code(&self) -> Result<SyncResponse> {
        Err(unavailable())
    }

    async fn submit_password(&self, _password: &str, _mode: ChallengeMode) -> Result<SyncResponse> {
        Err(unavailable())
    }

    async fn submit_lda_consent(&self, _consent: bool) -> Result<SyncResponse> {
        Err(unavailable())
    }

    async fn log_off(&self) -> Result<SyncResponse> {
        Err(unavailable())
    }

    async fn reset_auth_state(&self) -> Result<SyncResponse> {
        Err(unavailable())
    }

    async fn set_idv_document_scan_confirmation(
        &self,
        _confirmed: bool,
        _workflow: IdvWorkflowId,
    ) -> Result<SyncResponse> {
        Err(unavailable())
    }

    async fn set_idv_selfie_confirmation(
        &self,
        _confirmed: bool,
        _workflow: IdvWorkflowId,
    ) -> Result<SyncResponse> {
        Err(unavailable())
    }

    async fn set_idv_document_details_confirmation(
        &self,
        _confirmed: bool,
        _workflow: IdvWorkflowId,
    ) -> Result<SyncResponse> {
        Err(unavailable())
    }

    async fn set_idv_biometric_opt_in(&self, _consent: bool) -> Result<SyncResponse> {
        Err(unavailable())
    }

    async fn set_idv_config(&self, _config_json: &str) -> Result<SyncResponse> {
        Err(unavailable())
    }

    async fn get_idv_config(&self) -> Result<String> {
        Err(unavailable())
    }

    async fn extend_session(&self) -> Result<SyncResponse> {
        Err(unavailable())
    }

    async fn get_notifications(&self) -> Result<SyncResponse> {
        Err(unavailable())
    }

    async fn update_notification(&self, _id: Uuid, _action: &str) -> Result<SyncResponse> {
        Err(unavailable())
    }

    async fn perform_verify_auth(&self) -> Result<SyncResponse> {
        Err(unavailable())
    }

    async fn fallback_device_activation(&self) -> Result<SyncResponse> {
        Err(unavailable())
    }

    async fn forgot_password(&self, _user_id: Option<&str>) -> Result<SyncResponse> {
        Err(unavailable())
    }

    async fn authenticate_and_sign_data(
        &self,
        _payload: &str,
        _level: AuthLevel,
        _authenticator: AuthenticatorType,
        _reason: &str,
    ) -> Result<SyncResponse> {
        Err(unavailable())
    }

    async fn reset_sign_data_state(&self) -> Result<SyncResponse> {
        Err(unavailable())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<EventEnvelope> {
        // Sender dropped immediately; the receiver observes a closed channel.
        let (tx, rx) = broadcast::channel(1);
        drop(tx);
        rx
    }
}
