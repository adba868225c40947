//! MessageRouter: decodes one inbound frame and hands it to exactly one
//! component.
//!
//! # Routing table
//!
//! | Events                                   | Permission                  | Handler          |
//! |------------------------------------------|-----------------------------|------------------|
//! | `send/unicast`                           | `can_send_unicast`          | registry         |
//! | `send/broadcast`                         | `can_send_broadcast`        | registry         |
//! | `control/request`, `control/release`     | `can_host`                  | arbiter          |
//! | `control/give`, `control/lock`           | `is_admin`                  | arbiter          |
//! | `control/move` … `control/reset`         | `can_host` or unrestricted  | arbiter (input)  |
//! | `keyboard/layout`, `keyboard/modifiers`  | `can_host` or unrestricted  | arbiter (input)  |
//! | `screen/size_change`                     | `is_admin`                  | desktop facade   |
//! | `signal/request`, `signal/close`         | `can_watch`                 | media bridge     |
//!
//! The router holds no state of its own and never mutates shared state
//! directly; every change goes through the component that owns it.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use deskcast_core::protocol::messages::ErrorKind;
use deskcast_core::{decode_client_message, ClientMessage, Permissions, ProtocolError, ServerMessage};

use crate::application::control_arbiter::{ArbiterError, ControlArbiter, InputAction};
use crate::application::desktop_facade::{DesktopError, DesktopFacade};
use crate::application::media_bridge::{MediaError, PeerMediaBridge};
use crate::application::session_registry::{Session, SessionRegistry};

/// Error type for routing one inbound message.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The sender lacks the permission this event requires.
    #[error("permission denied for {event}")]
    PermissionDenied { event: &'static str },

    #[error(transparent)]
    Control(#[from] ArbiterError),

    #[error(transparent)]
    Desktop(#[from] DesktopError),

    #[error(transparent)]
    Media(#[from] MediaError),
}

impl RouterError {
    /// The `system/error` category reported back to the sender.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RouterError::Protocol(_) => ErrorKind::MalformedMessage,
            RouterError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            RouterError::Control(ArbiterError::ControlDenied(_)) => ErrorKind::ControlDenied,
            RouterError::Control(ArbiterError::Desktop(e)) | RouterError::Desktop(e) => match e {
                DesktopError::DisplayChangeFailed(_) => ErrorKind::DisplayChangeFailed,
                DesktopError::InputInjectionFailed(_) => ErrorKind::InputInjectionFailed,
            },
            RouterError::Media(_) => ErrorKind::MediaUnavailable,
        }
    }
}

/// Whether `permissions` allow sending `message`.
fn permitted(permissions: &Permissions, message: &ClientMessage) -> bool {
    match message {
        ClientMessage::SendUnicast { .. } => permissions.can_send_unicast,
        ClientMessage::SendBroadcast { .. } => permissions.can_send_broadcast,
        ClientMessage::ControlRequest | ClientMessage::ControlRelease => permissions.can_host,
        ClientMessage::ControlGive { .. }
        | ClientMessage::ControlLock { .. }
        | ClientMessage::ScreenSizeChange(_) => permissions.is_admin,
        ClientMessage::Move { .. }
        | ClientMessage::Scroll { .. }
        | ClientMessage::ButtonDown { .. }
        | ClientMessage::ButtonUp { .. }
        | ClientMessage::KeyDown { .. }
        | ClientMessage::KeyUp { .. }
        | ClientMessage::ResetKeys
        | ClientMessage::KeyboardLayout { .. }
        | ClientMessage::KeyboardModifiers(_) => {
            permissions.can_host || permissions.unrestricted_input
        }
        ClientMessage::SignalRequest | ClientMessage::SignalClose => permissions.can_watch,
    }
}

/// Stateless dispatcher from decoded client messages to components.
pub struct MessageRouter {
    registry: Arc<SessionRegistry>,
    arbiter: Arc<ControlArbiter>,
    desktop: Arc<DesktopFacade>,
    bridge: Arc<PeerMediaBridge>,
}

impl MessageRouter {
    pub fn new(
        registry: Arc<SessionRegistry>,
        arbiter: Arc<ControlArbiter>,
        desktop: Arc<DesktopFacade>,
        bridge: Arc<PeerMediaBridge>,
    ) -> Self {
        Self {
            registry,
            arbiter,
            desktop,
            bridge,
        }
    }

    /// Decodes `raw`, checks the sender's permission, and routes it.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError`] describing why the message was rejected.  The
    /// caller decides whether to report it; see [`handle`](Self::handle).
    pub fn dispatch(&self, sender: &Arc<Session>, raw: &str) -> Result<(), RouterError> {
        let message = decode_client_message(raw)?;
        self.route(sender, message)
    }

    /// Routes an already decoded message.
    pub fn route(&self, sender: &Arc<Session>, message: ClientMessage) -> Result<(), RouterError> {
        // Frames still in flight from a removed session are no-ops.
        if !sender.is_active() {
            debug!(session_id = %sender.id(), event = message.event(), "message from inactive session ignored");
            return Ok(());
        }

        if !permitted(sender.permissions(), &message) {
            return Err(RouterError::PermissionDenied {
                event: message.event(),
            });
        }

        match message {
            ClientMessage::SendUnicast {
                receiver,
                subject,
                body,
            } => {
                let Some(target) = self.registry.get(&receiver).filter(|s| s.is_active()) else {
                    debug!(session_id = %sender.id(), receiver = %receiver, "unicast to absent session ignored");
                    return Ok(());
                };
                if let Err(e) = target.send(ServerMessage::SendUnicast {
                    sender: sender.id().clone(),
                    receiver,
                    subject,
                    body,
                }) {
                    debug!(session_id = %sender.id(), receiver = %target.id(), "unicast not delivered: {e}");
                }
            }
            ClientMessage::SendBroadcast { subject, body } => {
                self.registry.broadcast(
                    &ServerMessage::SendBroadcast {
                        sender: sender.id().clone(),
                        subject,
                        body,
                    },
                    std::slice::from_ref(sender.id()),
                );
            }

            ClientMessage::ControlRequest => self.arbiter.request(sender)?,
            ClientMessage::ControlRelease => self.arbiter.release(sender)?,
            ClientMessage::ControlGive { target } => {
                let target = self.registry.get(&target).ok_or_else(|| {
                    ArbiterError::ControlDenied(format!("{target} is not connected"))
                })?;
                self.arbiter.give(sender, &target)?;
            }
            ClientMessage::ControlLock { enabled } => {
                self.arbiter.set_host_override(sender, enabled)?;
            }

            ClientMessage::Move { x, y } => self.input(sender, InputAction::Move { x, y })?,
            ClientMessage::Scroll { delta_x, delta_y } => {
                self.input(sender, InputAction::Scroll { delta_x, delta_y })?;
            }
            ClientMessage::ButtonDown { code } => self.input(sender, InputAction::ButtonDown(code))?,
            ClientMessage::ButtonUp { code } => self.input(sender, InputAction::ButtonUp(code))?,
            ClientMessage::KeyDown { code } => self.input(sender, InputAction::KeyDown(code))?,
            ClientMessage::KeyUp { code } => self.input(sender, InputAction::KeyUp(code))?,
            ClientMessage::ResetKeys => self.input(sender, InputAction::ResetKeys)?,
            ClientMessage::KeyboardLayout { layout } => {
                self.input(sender, InputAction::SetKeyboardLayout(layout))?;
            }
            ClientMessage::KeyboardModifiers(modifiers) => {
                self.input(sender, InputAction::SetKeyboardModifiers(modifiers))?;
            }

            ClientMessage::ScreenSizeChange(config) => {
                self.desktop
                    .change_screen_size(config.width, config.height, config.rate)?;
            }

            ClientMessage::SignalRequest => {
                let media = sender
                    .transport()
                    .media_channel()
                    .ok_or(MediaError::Unavailable)?;
                sender.set_media_transport(Some(Arc::clone(&media)));
                self.bridge.attach_peer(sender.id().clone(), media);
                // A removal that raced the attach has already run the
                // bridge's listener, so undo the attach here.
                if !sender.is_active() {
                    self.bridge.detach_peer(sender.id());
                    sender.set_media_transport(None);
                }
            }
            ClientMessage::SignalClose => {
                self.bridge.detach_peer(sender.id());
                sender.set_media_transport(None);
            }
        }
        Ok(())
    }

    fn input(&self, sender: &Session, action: InputAction) -> Result<(), RouterError> {
        self.arbiter.input(sender, action)?;
        Ok(())
    }

    /// Dispatches `raw` and reports any failure to the sender alone.
    pub fn handle(&self, sender: &Arc<Session>, raw: &str) {
        let (tag, result) = match decode_client_message(raw) {
            Ok(message) => (Some(message.event().to_string()), self.route(sender, message)),
            Err(e) => (e.event().map(str::to_string), Err(e.into())),
        };
        let Err(err) = result else {
            return;
        };

        let kind = err.kind();
        match kind {
            ErrorKind::DisplayChangeFailed | ErrorKind::InputInjectionFailed => {
                warn!(session_id = %sender.id(), event = ?tag, "request failed: {err}");
            }
            _ => debug!(session_id = %sender.id(), event = ?tag, "request rejected: {err}"),
        }

        let reply = ServerMessage::error(tag.as_deref(), kind, err.to_string());
        if let Err(e) = sender.send(reply) {
            debug!(session_id = %sender.id(), "error reply not delivered: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::desktop_facade::DesktopDriver;
    use crate::application::event_bus::tests::RecordingPublisher;
    use crate::application::event_bus::EventPublisher;
    use crate::application::session_registry::tests::RecordingTransport;
    use crate::infrastructure::desktop_driver::RecordingDesktopDriver;
    use deskcast_core::protocol::messages::ErrorPayload;
    use deskcast_core::{Profile, SessionId};
    use serde_json::json;

    struct Fixture {
        registry: Arc<SessionRegistry>,
        arbiter: Arc<ControlArbiter>,
        router: MessageRouter,
    }

    impl Fixture {
        fn new() -> Self {
            let events: Arc<dyn EventPublisher> = Arc::new(RecordingPublisher::default());
            let driver: Arc<dyn DesktopDriver> = Arc::new(RecordingDesktopDriver::new());
            let desktop = Arc::new(DesktopFacade::new(driver, Arc::clone(&events)));
            let arbiter = Arc::new(ControlArbiter::new(Arc::clone(&desktop), events));
            let registry = Arc::new(SessionRegistry::new());
            let bridge = Arc::new(PeerMediaBridge::new(4));
            let router = MessageRouter::new(
                Arc::clone(&registry),
                Arc::clone(&arbiter),
                desktop,
                bridge,
            );
            Self {
                registry,
                arbiter,
                router,
            }
        }

        fn join(&self, id: &str, permissions: Permissions) -> (Arc<Session>, Arc<RecordingTransport>) {
            let transport = Arc::new(RecordingTransport::default());
            let session = self
                .registry
                .add(
                    id.into(),
                    Profile::new(id, permissions),
                    Arc::clone(&transport) as Arc<dyn crate::application::session_registry::SessionTransport>,
                )
                .unwrap();
            self.registry.activate(session.id()).unwrap();
            (session, transport)
        }
    }

    fn error_kinds(transport: &RecordingTransport) -> Vec<ErrorKind> {
        transport
            .messages()
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::Error(ErrorPayload { kind, .. }) => Some(kind),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_unicast_reaches_only_receiver() {
        let f = Fixture::new();
        let (alice, ta) = f.join("alice", Permissions::participant());
        let (_bob, tb) = f.join("bob", Permissions::participant());
        let (_carol, tc) = f.join("carol", Permissions::participant());

        f.router
            .dispatch(
                &alice,
                r#"{"event":"send/unicast","payload":{"receiver":"bob","subject":"chat","body":"hi"}}"#,
            )
            .unwrap();

        assert_eq!(
            tb.messages(),
            vec![ServerMessage::SendUnicast {
                sender: "alice".into(),
                receiver: "bob".into(),
                subject: "chat".into(),
                body: json!("hi"),
            }]
        );
        assert!(ta.messages().is_empty());
        assert!(tc.messages().is_empty());
    }

    #[test]
    fn test_unicast_to_absent_receiver_is_silent_success() {
        let f = Fixture::new();
        let (alice, ta) = f.join("alice", Permissions::participant());

        let result = f.router.dispatch(
            &alice,
            r#"{"event":"send/unicast","payload":{"receiver":"ghost","subject":"x","body":null}}"#,
        );

        assert!(result.is_ok());
        assert!(ta.messages().is_empty());
    }

    #[test]
    fn test_broadcast_skips_sender() {
        let f = Fixture::new();
        let (alice, ta) = f.join("alice", Permissions::participant());
        let (_bob, tb) = f.join("bob", Permissions::participant());

        f.router
            .dispatch(
                &alice,
                r#"{"event":"send/broadcast","payload":{"subject":"chat","body":{"text":"hello"}}}"#,
            )
            .unwrap();

        assert!(ta.messages().is_empty());
        assert_eq!(tb.messages().len(), 1);
    }

    #[test]
    fn test_viewer_cannot_chat() {
        let f = Fixture::new();
        let (viewer, _) = f.join("viewer", Permissions::viewer());

        let err = f
            .router
            .dispatch(&viewer, r#"{"event":"send/broadcast","payload":{"subject":"x","body":1}}"#)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_screen_change_requires_admin() {
        let f = Fixture::new();
        let (alice, ta) = f.join("alice", Permissions::participant());

        f.router.handle(
            &alice,
            r#"{"event":"screen/size_change","payload":{"width":1920,"height":1080,"rate":60}}"#,
        );

        assert_eq!(error_kinds(&ta), vec![ErrorKind::PermissionDenied]);
    }

    #[test]
    fn test_control_request_routes_to_arbiter() {
        let f = Fixture::new();
        let (alice, _) = f.join("alice", Permissions::participant());

        f.router
            .dispatch(&alice, r#"{"event":"control/request"}"#)
            .unwrap();

        assert_eq!(f.arbiter.holder(), Some(SessionId::from("alice")));
    }

    #[test]
    fn test_denied_request_replies_to_sender_only() {
        let f = Fixture::new();
        let (alice, ta) = f.join("alice", Permissions::participant());
        let (bob, tb) = f.join("bob", Permissions::participant());
        f.router.handle(&alice, r#"{"event":"control/request"}"#);

        f.router.handle(&bob, r#"{"event":"control/request"}"#);

        assert_eq!(error_kinds(&tb), vec![ErrorKind::ControlDenied]);
        assert!(error_kinds(&ta).is_empty());
        assert_eq!(f.arbiter.holder(), Some(alice.id().clone()));
    }

    #[test]
    fn test_give_to_unknown_session_is_control_denied() {
        let f = Fixture::new();
        let (root, _) = f.join("root", Permissions::admin());

        let err = f
            .router
            .dispatch(&root, r#"{"event":"control/give","payload":{"target":"ghost"}}"#)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ControlDenied);
    }

    #[test]
    fn test_malformed_frame_gets_error_reply_with_tag() {
        let f = Fixture::new();
        let (alice, ta) = f.join("alice", Permissions::participant());

        f.router
            .handle(&alice, r#"{"event":"control/move","payload":{"x":"far"}}"#);

        match ta.messages().as_slice() {
            [ServerMessage::Error(payload)] => {
                assert_eq!(payload.kind, ErrorKind::MalformedMessage);
                assert_eq!(payload.event.as_deref(), Some("control/move"));
            }
            other => panic!("unexpected replies: {other:?}"),
        }
    }

    #[test]
    fn test_signal_request_without_media_channel_is_unavailable() {
        let f = Fixture::new();
        let (alice, _) = f.join("alice", Permissions::participant());

        let err = f
            .router
            .dispatch(&alice, r#"{"event":"signal/request"}"#)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MediaUnavailable);
    }

    #[test]
    fn test_input_from_non_holder_is_not_an_error() {
        let f = Fixture::new();
        let (alice, ta) = f.join("alice", Permissions::participant());

        f.router
            .handle(&alice, r#"{"event":"control/move","payload":{"x":1,"y":2}}"#);

        assert!(ta.messages().is_empty());
    }
}
