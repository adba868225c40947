//! ControlArbiter: decides which single session may drive the desktop.
//!
//! # State machine
//!
//! ```text
//!                request(X)                      give(admin, Y)
//!   ┌──────┐ ─────────────────► ┌─────────┐ ──────────────────► ┌─────────┐
//!   │ Free │                    │ Held(X) │                     │ Held(Y) │
//!   └──────┘ ◄───────────────── └─────────┘                     └─────────┘
//!            release(X) / X removed from the registry
//! ```
//!
//! A request while someone else holds control is denied on the spot; there is
//! no waiting list.  The only way to move control from one session to another
//! without it passing through `Free` is an admin's `give`, and that replaces
//! the holder in a single critical section.
//!
//! # Serialisation
//!
//! All arbiter state lives behind one `Mutex`.  Accepted transitions are
//! published on the event bus *before* the mutex is released, so every session
//! observes control changes in commit order.  Input events are applied to the
//! desktop under the same mutex, so no input from a previous holder can land
//! after control has moved on.
//!
//! Whenever the holder changes, every held key and button is released on the
//! desktop so nothing stays pressed across holders.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use deskcast_core::protocol::messages::ControlState;
use deskcast_core::{KeyboardModifiers, SessionId, SessionState};

use crate::application::desktop_facade::{DesktopError, DesktopFacade};
use crate::application::event_bus::{BusEvent, EventPublisher};
use crate::application::session_registry::{Session, SessionListener};

/// Error type for arbiter operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArbiterError {
    /// The control transition is not allowed right now.
    #[error("control denied: {0}")]
    ControlDenied(String),

    /// The desktop rejected an input event from the holder.
    #[error(transparent)]
    Desktop(#[from] DesktopError),
}

/// Why control went back to `Free`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    Explicit,
    Disconnected,
}

/// An accepted change of the control lock, as published on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlTransition {
    /// `Free -> Held(holder)`.
    Acquired { holder: SessionId },
    /// `Held(previous) -> Free`.
    Released {
        previous: SessionId,
        reason: ReleaseReason,
    },
    /// Control assigned by an admin, replacing `previous` if there was one.
    Forced {
        holder: SessionId,
        previous: Option<SessionId>,
        by: SessionId,
    },
}

/// The control lock itself.
#[derive(Debug, Default)]
pub struct ControlLock {
    pub holder: Option<SessionId>,
    /// When the current holder acquired control.
    pub acquired_at: Option<Instant>,
    /// While set, only admins may request control.
    pub host_override: bool,
}

impl ControlLock {
    fn assign(&mut self, holder: SessionId) -> Option<SessionId> {
        self.acquired_at = Some(Instant::now());
        self.holder.replace(holder)
    }

    fn clear(&mut self) -> Option<SessionId> {
        self.acquired_at = None;
        self.holder.take()
    }
}

/// An input event bound for the desktop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputAction {
    Move { x: i32, y: i32 },
    Scroll { delta_x: i32, delta_y: i32 },
    ButtonDown(u32),
    ButtonUp(u32),
    KeyDown(u64),
    KeyUp(u64),
    ResetKeys,
    SetKeyboardLayout(String),
    SetKeyboardModifiers(KeyboardModifiers),
}

/// Result of an input event that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputOutcome {
    /// The event reached the desktop.
    Applied,
    /// The sender is not allowed to drive the desktop; the event was discarded.
    Dropped,
}

/// Serialises every control transition and every input event.
pub struct ControlArbiter {
    lock: Mutex<ControlLock>,
    desktop: Arc<DesktopFacade>,
    events: Arc<dyn EventPublisher>,
}

impl ControlArbiter {
    pub fn new(desktop: Arc<DesktopFacade>, events: Arc<dyn EventPublisher>) -> Self {
        Self {
            lock: Mutex::new(ControlLock::default()),
            desktop,
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlLock> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reset_keys(&self) {
        if let Err(e) = self.desktop.reset_keys() {
            warn!("could not release held keys on control change: {e}");
        }
    }

    /// Session currently driving the desktop.
    pub fn holder(&self) -> Option<SessionId> {
        self.lock().holder.clone()
    }

    pub fn state(&self) -> ControlState {
        let lock = self.lock();
        ControlState {
            holder: lock.holder.clone(),
            host_override: lock.host_override,
        }
    }

    /// `Free -> Held(session)`.
    ///
    /// Requesting control you already hold succeeds without an event.
    ///
    /// # Errors
    ///
    /// [`ArbiterError::ControlDenied`] if the session may not host, is not
    /// active, someone else holds control, or host override is on and the
    /// session is not an admin.
    pub fn request(&self, session: &Session) -> Result<(), ArbiterError> {
        let id = session.id();
        let permissions = session.permissions();
        if !permissions.can_host {
            return Err(ArbiterError::ControlDenied("session may not host".into()));
        }

        let mut lock = self.lock();
        if !session.is_active() {
            return Err(ArbiterError::ControlDenied("session is not active".into()));
        }
        match &lock.holder {
            Some(holder) if holder == id => return Ok(()),
            Some(holder) => {
                debug!(session_id = %id, holder = %holder, "control request denied: held");
                return Err(ArbiterError::ControlDenied(format!("control is held by {holder}")));
            }
            None => {}
        }
        if lock.host_override && !permissions.is_admin {
            debug!(session_id = %id, "control request denied: host override");
            return Err(ArbiterError::ControlDenied("control is reserved for admins".into()));
        }

        lock.assign(id.clone());
        self.reset_keys();
        info!(session_id = %id, "control acquired");
        self.events
            .publish(BusEvent::ControlChanged(ControlTransition::Acquired {
                holder: id.clone(),
            }));
        Ok(())
    }

    /// `Held(session) -> Free`.
    ///
    /// # Errors
    ///
    /// [`ArbiterError::ControlDenied`] if the session is not the holder.
    pub fn release(&self, session: &Session) -> Result<(), ArbiterError> {
        let mut lock = self.lock();
        if lock.holder.as_ref() != Some(session.id()) {
            return Err(ArbiterError::ControlDenied("session does not hold control".into()));
        }
        self.free(&mut lock, ReleaseReason::Explicit);
        Ok(())
    }

    /// Releases control if `id` holds it.  Used when a session leaves.
    ///
    /// Returns `true` if control was released.
    pub fn release_session(&self, id: &SessionId) -> bool {
        let mut lock = self.lock();
        if lock.holder.as_ref() != Some(id) {
            return false;
        }
        self.free(&mut lock, ReleaseReason::Disconnected);
        true
    }

    fn free(&self, lock: &mut ControlLock, reason: ReleaseReason) {
        let held_secs = lock.acquired_at.map_or(0, |t| t.elapsed().as_secs());
        if let Some(previous) = lock.clear() {
            self.reset_keys();
            info!(previous = %previous, ?reason, held_secs, "control released");
            self.events
                .publish(BusEvent::ControlChanged(ControlTransition::Released {
                    previous,
                    reason,
                }));
        }
    }

    /// Forces control onto `target`, replacing any current holder atomically.
    ///
    /// Giving control to the session that already holds it succeeds without
    /// an event.
    ///
    /// # Errors
    ///
    /// [`ArbiterError::ControlDenied`] if `by` is not an admin, or `target`
    /// is not active or may not host.
    pub fn give(&self, by: &Session, target: &Session) -> Result<(), ArbiterError> {
        if !by.permissions().is_admin {
            return Err(ArbiterError::ControlDenied("only admins may give control".into()));
        }
        if !target.permissions().can_host {
            return Err(ArbiterError::ControlDenied(format!("{} may not host", target.id())));
        }

        let mut lock = self.lock();
        if target.state() != SessionState::Active {
            return Err(ArbiterError::ControlDenied(format!("{} is not active", target.id())));
        }
        if lock.holder.as_ref() == Some(target.id()) {
            return Ok(());
        }

        let previous = lock.assign(target.id().clone());
        self.reset_keys();
        info!(holder = %target.id(), previous = ?previous, by = %by.id(), "control given");
        self.events
            .publish(BusEvent::ControlChanged(ControlTransition::Forced {
                holder: target.id().clone(),
                previous,
                by: by.id().clone(),
            }));
        Ok(())
    }

    /// Turns the admin-only reservation of control on or off.
    ///
    /// The current holder, if any, keeps control.
    ///
    /// # Errors
    ///
    /// [`ArbiterError::ControlDenied`] if `by` is not an admin.
    pub fn set_host_override(&self, by: &Session, enabled: bool) -> Result<(), ArbiterError> {
        if !by.permissions().is_admin {
            return Err(ArbiterError::ControlDenied("only admins may lock control".into()));
        }
        let mut lock = self.lock();
        if lock.host_override == enabled {
            return Ok(());
        }
        lock.host_override = enabled;
        info!(enabled, by = %by.id(), "host override changed");
        self.events.publish(BusEvent::ControlOverride {
            enabled,
            by: by.id().clone(),
        });
        Ok(())
    }

    /// Applies an input event if `session` may drive the desktop.
    ///
    /// Events from anyone but the holder (or a session with unrestricted
    /// input) are dropped silently.  Keyboard layout and modifier changes are
    /// announced on the bus once applied.
    ///
    /// # Errors
    ///
    /// [`ArbiterError::Desktop`] if the driver rejected the event.
    pub fn input(&self, session: &Session, action: InputAction) -> Result<InputOutcome, ArbiterError> {
        let lock = self.lock();
        let allowed = session.is_active()
            && (lock.holder.as_ref() == Some(session.id())
                || session.permissions().unrestricted_input);
        if !allowed {
            debug!(session_id = %session.id(), ?action, "input dropped: not the holder");
            return Ok(InputOutcome::Dropped);
        }

        match action {
            InputAction::Move { x, y } => self.desktop.move_to(x, y)?,
            InputAction::Scroll { delta_x, delta_y } => self.desktop.scroll(delta_x, delta_y)?,
            InputAction::ButtonDown(code) => self.desktop.button_down(code)?,
            InputAction::ButtonUp(code) => self.desktop.button_up(code)?,
            InputAction::KeyDown(code) => self.desktop.key_down(code)?,
            InputAction::KeyUp(code) => self.desktop.key_up(code)?,
            InputAction::ResetKeys => self.desktop.reset_keys()?,
            InputAction::SetKeyboardLayout(layout) => {
                self.desktop.set_keyboard_layout(&layout)?;
                self.events.publish(BusEvent::KeyboardLayoutChanged {
                    layout,
                    by: session.id().clone(),
                });
            }
            InputAction::SetKeyboardModifiers(update) => {
                let modifiers = self.desktop.set_keyboard_modifiers(
                    update.num_lock,
                    update.caps_lock,
                    update.scroll_lock,
                )?;
                self.events.publish(BusEvent::KeyboardModifiersChanged {
                    modifiers,
                    by: session.id().clone(),
                });
            }
        }
        drop(lock);
        Ok(InputOutcome::Applied)
    }
}

impl SessionListener for ControlArbiter {
    fn on_session_removed(&self, session: &Arc<Session>, _previous: SessionState) {
        self.release_session(session.id());
    }
}
