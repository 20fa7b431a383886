//! Headless walkthrough of the authentication flow against the simulated
//! engine: enrollment, login, a step-up notification approval, identity
//! verification, and data signing. Navigation transitions and alerts are
//! printed as the orchestrator derives them.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use clap::Parser;
use tokio::sync::broadcast;

use engine::{AuthEngine, SimulatedEngine, SimulatedEngineConfig};
use orchestrator::{
    install_step_up_interceptor, registry::normalize_payload, CommandGateway, EventRegistry,
    FlowOrchestrator,
};
use shared::{
    domain::{AuthLevel, AuthenticatorType, ChallengeMode, IdvWorkflowId},
    protocol::{EventEnvelope, EventName, Notification},
};

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "jane")]
    user: String,
    #[arg(long, default_value = "hunter2")]
    password: String,
    /// Connection profile TOML; defaults to ./authgate.toml if present.
    #[arg(long)]
    profile: Option<PathBuf>,
}

const STEP: Duration = Duration::from_secs(2);

/// Scans the raw engine stream until `name` shows up, returning its
/// normalized payload.
async fn await_event(
    rx: &mut broadcast::Receiver<EventEnvelope>,
    name: EventName,
    wait: Duration,
) -> Result<serde_json::Value> {
    let envelope = tokio::time::timeout(wait, async {
        loop {
            let envelope = rx.recv().await?;
            if envelope.name == name {
                return anyhow::Ok(envelope);
            }
        }
    })
    .await
    .map_err(|_| anyhow!("no {name} event within {wait:?}"))??;
    normalize_payload(envelope.payload).map_err(|err| anyhow!("bad {name} payload: {err}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let engine = Arc::new(SimulatedEngine::new(SimulatedEngineConfig {
        expected_password: args.password.clone(),
        ..SimulatedEngineConfig::default()
    }));
    let mut raw_events = engine.subscribe_events();
    let registry = EventRegistry::new(engine.as_ref());
    let orchestrator = FlowOrchestrator::install(&registry);
    let gateway = match &args.profile {
        Some(path) => CommandGateway::with_profile_path(Arc::clone(&engine), path),
        None => CommandGateway::new(Arc::clone(&engine)),
    };

    let mut transitions = orchestrator.subscribe_transitions();
    let mut alerts = orchestrator.subscribe_alerts();
    let printer = tokio::spawn(async move {
        loop {
            tokio::select! {
                directive = transitions.recv() => match directive {
                    Ok(directive) => {
                        let reset = if directive.reset { " (stack reset)" } else { "" };
                        println!("-> {:?}{reset}", directive.screen);
                    }
                    Err(_) => break,
                },
                alert = alerts.recv() => if let Ok(alert) = alert {
                    let blocking = if alert.blocking { " [blocking]" } else { "" };
                    println!("!! {}{blocking}: {}", alert.title, alert.message);
                },
            }
        }
    });

    println!("== enrollment and login ==");
    gateway.initialize().await?;
    await_event(&mut raw_events, EventName::GetUser, STEP).await?;

    gateway.submit_user_id(&args.user).await?;
    await_event(&mut raw_events, EventName::GetActivationCode, STEP).await?;

    gateway.submit_activation_code("123456").await?;
    await_event(&mut raw_events, EventName::GetUserConsentForLda, STEP).await?;

    gateway.submit_lda_consent(true).await?;
    await_event(&mut raw_events, EventName::GetPassword, STEP).await?;

    gateway
        .submit_password(&args.password, ChallengeMode::InitialLogin)
        .await?;
    await_event(&mut raw_events, EventName::OnUserLoggedIn, STEP).await?;

    println!("== notification with step-up approval ==");
    gateway.get_notifications().await?;
    let payload = await_event(&mut raw_events, EventName::OnGetNotifications, STEP).await?;
    let notifications: Vec<Notification> =
        serde_json::from_value(payload.get("notifications").cloned().unwrap_or_default())?;

    if let Some(notification) = notifications.first() {
        println!(".. approving '{}'", notification.title);
        let step_up_guard = install_step_up_interceptor(&registry, |data| {
            println!(".. step-up authorization requested for {}", data.user_id);
        });

        gateway.update_notification(notification.id, "approve").await?;
        await_event(&mut raw_events, EventName::GetPassword, STEP).await?;

        gateway
            .submit_password(&args.password, ChallengeMode::StepUp)
            .await?;
        await_event(&mut raw_events, EventName::OnUpdateNotification, STEP).await?;
        drop(step_up_guard);
    }

    println!("== identity verification ==");
    gateway.perform_verify_auth().await?;
    let payload = await_event(
        &mut raw_events,
        EventName::GetIdvDocumentScanStartConfirmation,
        STEP,
    )
    .await?;
    let workflow = payload
        .get("idvWorkflowId")
        .and_then(serde_json::Value::as_u64)
        .and_then(|raw| IdvWorkflowId::new(raw as u8))
        .unwrap_or(IdvWorkflowId(8));
    println!(".. {}", workflow.guidance());

    gateway.confirm_idv_document_scan(true, workflow).await?;
    await_event(
        &mut raw_events,
        EventName::GetIdvDocumentDetailsConfirmation,
        STEP,
    )
    .await?;
    gateway.confirm_idv_document_details(true, workflow).await?;
    await_event(&mut raw_events, EventName::GetIdvSelfieStartConfirmation, STEP).await?;
    gateway.confirm_idv_selfie(true, workflow).await?;
    await_event(&mut raw_events, EventName::GetIdvBiometricOptInConsent, STEP).await?;
    gateway.set_idv_biometric_opt_in(true).await?;

    println!("== data signing ==");
    if let Err(err) = gateway
        .authenticate_and_sign_data(
            "{\"amount\":120}",
            AuthLevel::Level4,
            AuthenticatorType::None,
            "payment approval",
        )
        .await
    {
        println!(".. rejected locally: {err}");
    }
    gateway
        .authenticate_and_sign_data(
            "{\"amount\":120}",
            AuthLevel::Level4,
            AuthenticatorType::IdvServerBiometric,
            "payment approval",
        )
        .await?;
    await_event(&mut raw_events, EventName::OnAuthenticateUserAndSignData, STEP).await?;

    println!("== log off ==");
    gateway.log_off().await?;
    await_event(&mut raw_events, EventName::OnUserLoggedOff, STEP).await?;

    // Let the pump finish delivering before the final snapshot.
    tokio::time::sleep(Duration::from_millis(200)).await;
    println!(
        "final phase: {:?}, screen: {:?}",
        orchestrator.phase(),
        orchestrator.current_screen()
    );

    registry.cleanup();
    printer.abort();
    Ok(())
}
