//! Session identity, profile, and permission set.
//!
//! The identity collaborator (the member directory) hands the server a stable
//! [`SessionId`] and a [`Profile`] when a browser is admitted.  The core trusts
//! both and performs no authentication of its own.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque, stable identifier of a connected session.
///
/// Serialises as a bare JSON string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps an identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// What a session is allowed to do.
///
/// Fields absent from a config file or JSON payload default to `false`,
/// except `can_watch`, which defaults to `true`: a member that can do nothing
/// else can still see the desktop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    /// May force-assign control (`control/give`), lock control to admins,
    /// and change the screen configuration.
    #[serde(default)]
    pub is_admin: bool,
    /// May request control and send input while holding it.
    #[serde(default)]
    pub can_host: bool,
    /// May attach a media transport and receive the video stream.
    #[serde(default = "default_true")]
    pub can_watch: bool,
    /// May send a message to one other session.
    #[serde(default)]
    pub can_send_unicast: bool,
    /// May send a message to every other session.
    #[serde(default)]
    pub can_send_broadcast: bool,
    /// Input from this session bypasses the control lock.
    #[serde(default)]
    pub unrestricted_input: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            is_admin: false,
            can_host: false,
            can_watch: true,
            can_send_unicast: false,
            can_send_broadcast: false,
            unrestricted_input: false,
        }
    }
}

impl Permissions {
    /// Permission set of an ordinary participant: may watch, host, and chat.
    pub fn participant() -> Self {
        Self {
            can_host: true,
            can_send_unicast: true,
            can_send_broadcast: true,
            ..Self::default()
        }
    }

    /// Permission set of an administrator: everything a participant may do,
    /// plus host override and screen changes.
    pub fn admin() -> Self {
        Self {
            is_admin: true,
            ..Self::participant()
        }
    }

    /// Permission set of a passive viewer.
    pub fn viewer() -> Self {
        Self::default()
    }
}

/// Display name and permissions of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Human-readable name shown to other sessions.
    pub name: String,
    /// Permissions granted at admission.
    pub permissions: Permissions,
}

impl Profile {
    pub fn new(name: impl Into<String>, permissions: Permissions) -> Self {
        Self {
            name: name.into(),
            permissions,
        }
    }
}

/// Lifecycle state of a session.
///
/// ```text
/// Connecting ──► Active ──► Disconnected
///      │                        ▲
///      └────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Admitted, initial state not yet delivered; excluded from broadcasts.
    Connecting,
    /// Fully joined; receives broadcasts and may hold control.
    Active,
    /// Removed from the registry.  Terminal.
    Disconnected,
}
