use serde_json::json;

use shared::protocol::EventName;

use crate::navigation::{transition, Applied, NavStack, Screen};

#[test]
fn challenge_events_map_to_their_screens() {
    let cases = [
        (EventName::GetUser, Screen::UserIdEntry),
        (EventName::GetActivationCode, Screen::ActivationCode),
        (EventName::GetUserConsentForLda, Screen::LdaConsent),
        (EventName::GetPassword, Screen::Password),
        (EventName::OnGetNotifications, Screen::Notifications),
        (
            EventName::GetIdvSelfieStartConfirmation,
            Screen::IdvSelfie,
        ),
        (EventName::OnAuthenticateUserAndSignData, Screen::Signing),
    ];
    for (event, screen) in cases {
        let directive = transition(event, &json!({})).unwrap();
        assert_eq!(directive.screen, screen, "{event}");
        assert!(!directive.reset);
    }
}

#[test]
fn lifecycle_events_reset_the_stack() {
    for event in [
        EventName::OnUserLoggedIn,
        EventName::OnUserLoggedOff,
        EventName::OnSessionTimeout,
    ] {
        let directive = transition(event, &json!({})).unwrap();
        assert!(directive.reset, "{event}");
    }
}

#[test]
fn advisory_events_have_no_screen() {
    for event in [
        EventName::OnInitialized,
        EventName::OnInitializeError,
        EventName::OnUserConsentThreats,
        EventName::OnCredentialsAvailableForUpdate,
    ] {
        assert!(transition(event, &json!({})).is_none(), "{event}");
    }
}

#[test]
fn params_carry_payload_attempts_and_guidance() {
    let payload = json!({
        "userID": "jane",
        "attemptsLeft": 2,
        "idvWorkflowId": 4,
        "challengeResponse": {"status": {"statusCode": 101, "statusMessage": "wrong code"}}
    });
    let directive = transition(EventName::GetActivationCode, &payload).unwrap();
    assert_eq!(directive.params.event_data, payload);
    assert_eq!(directive.params.attempts_left, Some(2));
    assert_eq!(directive.params.inline_error.as_deref(), Some("wrong code"));
    assert!(directive.params.guidance.is_some());
}

#[test]
fn proceed_status_has_no_inline_error() {
    let payload = json!({
        "challengeResponse": {"status": {"statusCode": 100, "statusMessage": ""}}
    });
    let directive = transition(EventName::GetPassword, &payload).unwrap();
    assert!(directive.params.inline_error.is_none());
}

#[test]
fn stack_pushes_updates_and_resets() {
    let mut stack = NavStack::default();

    let first = transition(EventName::GetUser, &json!({"userID": ""})).unwrap();
    assert_eq!(stack.apply(&first), Applied::Pushed);
    assert_eq!(stack.depth(), 1);

    // Same screen again: update in place, never a twin on the stack.
    let again = transition(EventName::GetUser, &json!({"userID": "jane"})).unwrap();
    assert_eq!(stack.apply(&again), Applied::Updated);
    assert_eq!(stack.depth(), 1);
    let top = stack.current().unwrap();
    assert_eq!(top.revision, 1);
    assert_eq!(top.params.event_data, json!({"userID": "jane"}));

    let password = transition(EventName::GetPassword, &json!({})).unwrap();
    assert_eq!(stack.apply(&password), Applied::Pushed);
    assert_eq!(stack.depth(), 2);

    let login = transition(EventName::OnUserLoggedOff, &json!({})).unwrap();
    assert_eq!(stack.apply(&login), Applied::Reset);
    assert_eq!(stack.depth(), 1);
    assert_eq!(stack.current().unwrap().screen, Screen::Login);
}
