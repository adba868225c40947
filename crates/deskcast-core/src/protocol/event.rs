//! Event-kind tags carried in the `"event"` field of every wire message.
//!
//! Tags are grouped by prefix: `send/` for chat-style relays, `control/` for
//! arbitration and input, `screen/` and `keyboard/` for desktop
//! configuration, `signal/` for media attachment, and `session/` / `system/`
//! for server-originated notifications.

pub const SEND_UNICAST: &str = "send/unicast";
pub const SEND_BROADCAST: &str = "send/broadcast";

pub const CONTROL_REQUEST: &str = "control/request";
pub const CONTROL_RELEASE: &str = "control/release";
pub const CONTROL_GIVE: &str = "control/give";
pub const CONTROL_LOCK: &str = "control/lock";
pub const CONTROL_MOVE: &str = "control/move";
pub const CONTROL_SCROLL: &str = "control/scroll";
pub const CONTROL_BUTTON_DOWN: &str = "control/buttondown";
pub const CONTROL_BUTTON_UP: &str = "control/buttonup";
pub const CONTROL_KEY_DOWN: &str = "control/keydown";
pub const CONTROL_KEY_UP: &str = "control/keyup";
pub const CONTROL_RESET: &str = "control/reset";

pub const CONTROL_LOCKED: &str = "control/locked";
pub const CONTROL_RELEASED: &str = "control/released";
pub const CONTROL_REVOKED: &str = "control/revoked";
pub const CONTROL_OVERRIDE: &str = "control/override";

pub const SCREEN_SIZE_CHANGE: &str = "screen/size_change";
pub const KEYBOARD_LAYOUT: &str = "keyboard/layout";
pub const KEYBOARD_MODIFIERS: &str = "keyboard/modifiers";

pub const SIGNAL_REQUEST: &str = "signal/request";
pub const SIGNAL_CLOSE: &str = "signal/close";

pub const SESSION_JOINED: &str = "session/joined";
pub const SESSION_LEFT: &str = "session/left";

pub const SYSTEM_INIT: &str = "system/init";
pub const SYSTEM_ERROR: &str = "system/error";

/// Every tag a browser is allowed to send.
pub const CLIENT_EVENTS: &[&str] = &[
    SEND_UNICAST,
    SEND_BROADCAST,
    CONTROL_REQUEST,
    CONTROL_RELEASE,
    CONTROL_GIVE,
    CONTROL_LOCK,
    CONTROL_MOVE,
    CONTROL_SCROLL,
    CONTROL_BUTTON_DOWN,
    CONTROL_BUTTON_UP,
    CONTROL_KEY_DOWN,
    CONTROL_KEY_UP,
    CONTROL_RESET,
    KEYBOARD_LAYOUT,
    KEYBOARD_MODIFIERS,
    SCREEN_SIZE_CHANGE,
    SIGNAL_REQUEST,
    SIGNAL_CLOSE,
];
