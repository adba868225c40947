//! JSON message types for the browser-facing WebSocket protocol.
//!
//! # Message flow
//!
//! ```text
//! Browser → Server:  JSON text frame  →  ClientMessage
//! Server  → Browser: ServerMessage    →  JSON text frame
//! ```
//!
//! # JSON discriminant
//!
//! Every message is a JSON object with an `"event"` field naming the variant
//! and, when the variant carries data, a `"payload"` object:
//!
//! ```json
//! {"event":"control/move","payload":{"x":100,"y":200}}
//! {"event":"control/request"}
//! ```
//!
//! Two distinct enums make it a compile-time error to send a server-only
//! notification from the browser side, and vice versa.  A few tags
//! (`send/unicast`, `screen/size_change`, `keyboard/*`) exist in both
//! directions: the browser uses them as requests and the server re-emits them
//! once the change has been applied.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::screen::{KeyboardModifiers, ScreenConfiguration};
use crate::domain::session::{Profile, SessionId};
use crate::protocol::event;

// ── Browser → Server ──────────────────────────────────────────────────────────

/// Every message a browser session may send.
///
/// The sender is never part of the payload: the server stamps it from the
/// connection the message arrived on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum ClientMessage {
    /// Relay an application message to one other session.
    #[serde(rename = "send/unicast")]
    SendUnicast {
        receiver: SessionId,
        subject: String,
        body: Value,
    },

    /// Relay an application message to every other session.
    #[serde(rename = "send/broadcast")]
    SendBroadcast { subject: String, body: Value },

    #[serde(rename = "control/request")]
    ControlRequest,

    #[serde(rename = "control/release")]
    ControlRelease,

    /// Force control onto `target` (admin only).
    #[serde(rename = "control/give")]
    ControlGive { target: SessionId },

    /// Reserve control for admins (admin only).
    #[serde(rename = "control/lock")]
    ControlLock { enabled: bool },

    /// Absolute pointer position in desktop pixels.
    #[serde(rename = "control/move")]
    Move { x: i32, y: i32 },

    #[serde(rename = "control/scroll")]
    Scroll { delta_x: i32, delta_y: i32 },

    #[serde(rename = "control/buttondown")]
    ButtonDown { code: u32 },

    #[serde(rename = "control/buttonup")]
    ButtonUp { code: u32 },

    /// Key press; `code` is an X11 keysym.
    #[serde(rename = "control/keydown")]
    KeyDown { code: u64 },

    #[serde(rename = "control/keyup")]
    KeyUp { code: u64 },

    /// Release every key and button currently held on the desktop.
    #[serde(rename = "control/reset")]
    ResetKeys,

    #[serde(rename = "keyboard/layout")]
    KeyboardLayout { layout: String },

    #[serde(rename = "keyboard/modifiers")]
    KeyboardModifiers(KeyboardModifiers),

    #[serde(rename = "screen/size_change")]
    ScreenSizeChange(ScreenConfiguration),

    /// Ask for the media stream on this connection.
    #[serde(rename = "signal/request")]
    SignalRequest,

    /// Stop receiving the media stream.
    #[serde(rename = "signal/close")]
    SignalClose,
}

impl ClientMessage {
    /// Returns the `"event"` tag of this message.
    pub fn event(&self) -> &'static str {
        match self {
            ClientMessage::SendUnicast { .. } => event::SEND_UNICAST,
            ClientMessage::SendBroadcast { .. } => event::SEND_BROADCAST,
            ClientMessage::ControlRequest => event::CONTROL_REQUEST,
            ClientMessage::ControlRelease => event::CONTROL_RELEASE,
            ClientMessage::ControlGive { .. } => event::CONTROL_GIVE,
            ClientMessage::ControlLock { .. } => event::CONTROL_LOCK,
            ClientMessage::Move { .. } => event::CONTROL_MOVE,
            ClientMessage::Scroll { .. } => event::CONTROL_SCROLL,
            ClientMessage::ButtonDown { .. } => event::CONTROL_BUTTON_DOWN,
            ClientMessage::ButtonUp { .. } => event::CONTROL_BUTTON_UP,
            ClientMessage::KeyDown { .. } => event::CONTROL_KEY_DOWN,
            ClientMessage::KeyUp { .. } => event::CONTROL_KEY_UP,
            ClientMessage::ResetKeys => event::CONTROL_RESET,
            ClientMessage::KeyboardLayout { .. } => event::KEYBOARD_LAYOUT,
            ClientMessage::KeyboardModifiers(_) => event::KEYBOARD_MODIFIERS,
            ClientMessage::ScreenSizeChange(_) => event::SCREEN_SIZE_CHANGE,
            ClientMessage::SignalRequest => event::SIGNAL_REQUEST,
            ClientMessage::SignalClose => event::SIGNAL_CLOSE,
        }
    }
}

// ── Server → Browser ──────────────────────────────────────────────────────────

/// A session as other sessions see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub profile: Profile,
}

/// Current state of the control lock.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ControlState {
    /// Session currently driving the desktop, if any.
    pub holder: Option<SessionId>,
    /// `true` while control is reserved for admins.
    pub host_override: bool,
}

/// Snapshot sent to a session right after it joins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInit {
    /// The receiving session's own ID.
    pub session_id: SessionId,
    /// Every active session, including the receiver.
    pub sessions: Vec<SessionSummary>,
    pub control: ControlState,
    pub screen: ScreenConfiguration,
    pub configurations: Vec<ScreenConfiguration>,
    pub keyboard_layout: String,
    pub keyboard_modifiers: KeyboardModifiers,
}

/// Category of a rejected request, reported back to its sender only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedMessage,
    PermissionDenied,
    ControlDenied,
    DisplayChangeFailed,
    InputInjectionFailed,
    MediaUnavailable,
    DuplicateSession,
}

/// Payload of `system/error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Tag of the request that failed, when it could be decoded.
    pub event: Option<String>,
    pub kind: ErrorKind,
    /// Human-readable detail for logging; not meant for end users.
    pub message: String,
}

/// Every message the server sends to a browser session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum ServerMessage {
    #[serde(rename = "system/init")]
    SystemInit(SystemInit),

    #[serde(rename = "system/error")]
    Error(ErrorPayload),

    #[serde(rename = "session/joined")]
    SessionJoined(SessionSummary),

    #[serde(rename = "session/left")]
    SessionLeft { id: SessionId },

    #[serde(rename = "send/unicast")]
    SendUnicast {
        sender: SessionId,
        receiver: SessionId,
        subject: String,
        body: Value,
    },

    #[serde(rename = "send/broadcast")]
    SendBroadcast {
        sender: SessionId,
        subject: String,
        body: Value,
    },

    /// `holder` now drives the desktop.  `forced_by` is set when an admin
    /// assigned control.
    #[serde(rename = "control/locked")]
    ControlLocked {
        holder: SessionId,
        forced_by: Option<SessionId>,
    },

    /// Nobody drives the desktop any more.
    #[serde(rename = "control/released")]
    ControlReleased { previous: SessionId },

    /// Sent only to a holder that lost control involuntarily.
    #[serde(rename = "control/revoked")]
    ControlRevoked {
        by: SessionId,
        new_holder: SessionId,
    },

    #[serde(rename = "control/override")]
    ControlOverride { enabled: bool, by: SessionId },

    #[serde(rename = "screen/size_change")]
    ScreenSizeChange(ScreenConfiguration),

    #[serde(rename = "keyboard/layout")]
    KeyboardLayout { layout: String },

    #[serde(rename = "keyboard/modifiers")]
    KeyboardModifiers(KeyboardModifiers),
}

impl ServerMessage {
    /// Returns the `"event"` tag of this message.
    pub fn event(&self) -> &'static str {
        match self {
            ServerMessage::SystemInit(_) => event::SYSTEM_INIT,
            ServerMessage::Error(_) => event::SYSTEM_ERROR,
            ServerMessage::SessionJoined(_) => event::SESSION_JOINED,
            ServerMessage::SessionLeft { .. } => event::SESSION_LEFT,
            ServerMessage::SendUnicast { .. } => event::SEND_UNICAST,
            ServerMessage::SendBroadcast { .. } => event::SEND_BROADCAST,
            ServerMessage::ControlLocked { .. } => event::CONTROL_LOCKED,
            ServerMessage::ControlReleased { .. } => event::CONTROL_RELEASED,
            ServerMessage::ControlRevoked { .. } => event::CONTROL_REVOKED,
            ServerMessage::ControlOverride { .. } => event::CONTROL_OVERRIDE,
            ServerMessage::ScreenSizeChange(_) => event::SCREEN_SIZE_CHANGE,
            ServerMessage::KeyboardLayout { .. } => event::KEYBOARD_LAYOUT,
            ServerMessage::KeyboardModifiers(_) => event::KEYBOARD_MODIFIERS,
        }
    }

    /// Builds a `system/error` reply.
    pub fn error(event: Option<&str>, kind: ErrorKind, message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorPayload {
            event: event.map(str::to_string),
            kind,
            message: message.into(),
        })
    }
}
