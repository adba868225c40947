//! Integration tests for session lifecycle and message routing.
//!
//! These tests exercise `ServerCore` end-to-end: admission, the router's
//! permission table, messaging, and system-wide state changes.

mod common;

use std::sync::Arc;

use serde_json::json;

use common::{core, join, send, TestTransport};
use deskcast_core::protocol::ErrorKind;
use deskcast_core::{Permissions, Profile, ScreenConfiguration, ServerMessage, SessionId};
use deskcast_server::application::{RegistryError, SessionTransport};
use deskcast_server::infrastructure::desktop_driver::DriverCall;

fn only_error(messages: &[ServerMessage]) -> (Option<String>, ErrorKind) {
    match messages {
        [ServerMessage::Error(e)] => (e.event.clone(), e.kind),
        other => panic!("expected a single system/error, got {other:?}"),
    }
}

// ── Lifecycle ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_join_sends_init_to_joiner_and_joined_to_others() {
    // Arrange
    let (core, _) = core();
    let (_alice, alice_t) = join(&core, "alice", Permissions::participant());

    // Act
    let (_bob, bob_t) = join(&core, "bob", Permissions::viewer());

    // Assert
    assert_eq!(alice_t.events(), vec!["system/init", "session/joined"]);
    let bob_messages = bob_t.messages();
    assert_eq!(bob_messages.len(), 1, "the joiner is not told about itself");
    let ServerMessage::SystemInit(init) = &bob_messages[0] else {
        panic!("expected system/init, got {:?}", bob_messages[0]);
    };
    assert_eq!(init.session_id, SessionId::from("bob"));
    let ids: Vec<&str> = init.sessions.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["alice", "bob"]);
    assert_eq!(init.control.holder, None);
    assert_eq!(init.screen, ScreenConfiguration::new(1280, 720, 30));
}

#[tokio::test]
async fn test_duplicate_session_is_rejected_and_original_kept() {
    let (core, _) = core();
    let (_alice, alice_t) = join(&core, "alice", Permissions::participant());
    let impostor = Arc::new(TestTransport::default());

    let result = core.admit(
        "alice".into(),
        Profile::new("alice", Permissions::participant()),
        impostor.clone() as Arc<dyn SessionTransport>,
    );

    assert!(matches!(result, Err(RegistryError::DuplicateSession(_))));
    assert!(!alice_t.is_closed());
    assert!(impostor.messages().is_empty());
    assert_eq!(core.registry().len(), 1);
}

#[tokio::test]
async fn test_disconnect_announces_departure_and_closes_transport() {
    let (core, _) = core();
    let (alice, alice_t) = join(&core, "alice", Permissions::participant());
    let (_bob, bob_t) = join(&core, "bob", Permissions::participant());
    bob_t.clear();

    assert!(core.disconnect(alice.id()));
    assert!(!core.disconnect(alice.id()), "second disconnect is a no-op");

    assert_eq!(
        bob_t.messages(),
        vec![ServerMessage::SessionLeft { id: "alice".into() }]
    );
    assert!(alice_t.is_closed());
    assert!(core.registry().get(alice.id()).is_none());
}

// ── Messaging ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unicast_reaches_only_the_receiver() {
    // Arrange
    let (core, _) = core();
    let (alice, alice_t) = join(&core, "alice", Permissions::participant());
    let (_bob, bob_t) = join(&core, "bob", Permissions::participant());
    let (_carol, carol_t) = join(&core, "carol", Permissions::participant());
    for t in [&alice_t, &bob_t, &carol_t] {
        t.clear();
    }

    // Act
    send(
        &core,
        &alice,
        json!({"event": "send/unicast", "payload": {"receiver": "bob", "subject": "hi", "body": {"n": 1}}}),
    );

    // Assert
    assert_eq!(
        bob_t.messages(),
        vec![ServerMessage::SendUnicast {
            sender: "alice".into(),
            receiver: "bob".into(),
            subject: "hi".into(),
            body: json!({"n": 1}),
        }]
    );
    assert!(alice_t.messages().is_empty());
    assert!(carol_t.messages().is_empty());
}

#[tokio::test]
async fn test_unicast_to_absent_session_is_silently_dropped() {
    let (core, _) = core();
    let (alice, alice_t) = join(&core, "alice", Permissions::participant());
    alice_t.clear();

    send(
        &core,
        &alice,
        json!({"event": "send/unicast", "payload": {"receiver": "ghost", "subject": "hi", "body": null}}),
    );

    assert!(alice_t.messages().is_empty(), "no error reply for an absent receiver");
}

#[tokio::test]
async fn test_broadcast_reaches_everyone_but_the_sender() {
    let (core, _) = core();
    let (alice, alice_t) = join(&core, "alice", Permissions::participant());
    let (_bob, bob_t) = join(&core, "bob", Permissions::participant());
    let (_viewer, viewer_t) = join(&core, "viewer", Permissions::viewer());
    for t in [&alice_t, &bob_t, &viewer_t] {
        t.clear();
    }

    send(
        &core,
        &alice,
        json!({"event": "send/broadcast", "payload": {"subject": "chat", "body": "hello"}}),
    );

    let expected = vec![ServerMessage::SendBroadcast {
        sender: "alice".into(),
        subject: "chat".into(),
        body: json!("hello"),
    }];
    assert_eq!(bob_t.messages(), expected);
    assert_eq!(viewer_t.messages(), expected);
    assert!(alice_t.messages().is_empty());
}

#[tokio::test]
async fn test_viewer_cannot_send_messages() {
    let (core, _) = core();
    let (viewer, viewer_t) = join(&core, "viewer", Permissions::viewer());
    let (_alice, alice_t) = join(&core, "alice", Permissions::participant());
    viewer_t.clear();
    alice_t.clear();

    send(
        &core,
        &viewer,
        json!({"event": "send/broadcast", "payload": {"subject": "chat", "body": "spam"}}),
    );

    assert_eq!(
        only_error(&viewer_t.messages()),
        (Some("send/broadcast".into()), ErrorKind::PermissionDenied)
    );
    assert!(alice_t.messages().is_empty());
}

#[tokio::test]
async fn test_malformed_frame_is_reported_to_sender_only() {
    let (core, _) = core();
    let (alice, alice_t) = join(&core, "alice", Permissions::participant());
    let (_bob, bob_t) = join(&core, "bob", Permissions::participant());
    alice_t.clear();
    bob_t.clear();

    core.handle_message(&alice, "{not json");
    core.handle_message(&alice, r#"{"event":"control/move","payload":{"x":"left"}}"#);

    let kinds: Vec<(Option<String>, ErrorKind)> = alice_t
        .messages()
        .into_iter()
        .map(|m| only_error(&[m]))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (None, ErrorKind::MalformedMessage),
            (Some("control/move".into()), ErrorKind::MalformedMessage),
        ]
    );
    assert!(bob_t.messages().is_empty());
}

// ── Screen ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_screen_change_reaches_every_session() {
    // Arrange
    let (core, driver) = core();
    let (root, root_t) = join(&core, "root", Permissions::admin());
    let (_alice, alice_t) = join(&core, "alice", Permissions::participant());
    let (_viewer, viewer_t) = join(&core, "viewer", Permissions::viewer());
    for t in [&root_t, &alice_t, &viewer_t] {
        t.clear();
    }

    // Act
    send(
        &core,
        &root,
        json!({"event": "screen/size_change", "payload": {"width": 1920, "height": 1080, "rate": 60}}),
    );

    // Assert
    let target = ScreenConfiguration::new(1920, 1080, 60);
    for t in [&root_t, &alice_t, &viewer_t] {
        assert_eq!(t.messages(), vec![ServerMessage::ScreenSizeChange(target)]);
    }
    assert_eq!(core.desktop().get_screen_size(), target);
    assert_eq!(
        core.snapshot_for(&SessionId::from("late")).screen,
        target,
        "later joiners see the new mode"
    );
    assert_eq!(driver.calls(), vec![DriverCall::ChangeScreen(target)]);
}

#[tokio::test]
async fn test_unsupported_screen_mode_is_rejected() {
    let (core, _) = core();
    let (root, root_t) = join(&core, "root", Permissions::admin());
    let (_alice, alice_t) = join(&core, "alice", Permissions::participant());
    root_t.clear();
    alice_t.clear();

    send(
        &core,
        &root,
        json!({"event": "screen/size_change", "payload": {"width": 1234, "height": 567, "rate": 60}}),
    );

    assert_eq!(
        only_error(&root_t.messages()),
        (Some("screen/size_change".into()), ErrorKind::DisplayChangeFailed)
    );
    assert!(alice_t.messages().is_empty());
    assert_eq!(core.desktop().get_screen_size(), ScreenConfiguration::new(1280, 720, 30));
}

#[tokio::test]
async fn test_non_admin_screen_change_is_permission_denied() {
    let (core, _) = core();
    let (alice, alice_t) = join(&core, "alice", Permissions::participant());
    alice_t.clear();

    send(
        &core,
        &alice,
        json!({"event": "screen/size_change", "payload": {"width": 1920, "height": 1080, "rate": 60}}),
    );

    assert_eq!(
        only_error(&alice_t.messages()),
        (Some("screen/size_change".into()), ErrorKind::PermissionDenied)
    );
}
