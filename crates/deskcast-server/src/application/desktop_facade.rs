//! DesktopFacade: the one path from the server to the shared desktop.
//!
//! The facade wraps a [`DesktopDriver`] trait object (the virtual display in
//! production, a recording double in tests) and adds exactly two things on
//! top of it:
//!
//! 1. Screen configuration changes are validated against the driver's list
//!    and serialised on a single mutex, so two admins resizing at once cannot
//!    interleave.
//! 2. A successful change is published on the event bus as
//!    [`BusEvent::ScreenChanged`] while that mutex is still held, so every
//!    session sees size changes in the order they were applied.
//!
//! Everything else is a straight pass-through.  Who may call what is decided
//! by the control arbiter and the message router, never here.

use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::{error, info};

use deskcast_core::{KeyboardModifiers, ScreenConfiguration};

use crate::application::event_bus::{BusEvent, EventPublisher};

/// Error type for desktop driver operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DesktopError {
    /// The requested screen configuration is unsupported or the driver
    /// failed to apply it.
    #[error("display change failed: {0}")]
    DisplayChangeFailed(String),

    /// The driver could not inject a pointer or keyboard event.
    #[error("input injection failed: {0}")]
    InputInjectionFailed(String),
}

/// Platform-agnostic desktop driver.
///
/// Implementations must be cheap to call from any thread; none of these
/// methods may block on network I/O.
#[cfg_attr(test, mockall::automock)]
pub trait DesktopDriver: Send + Sync {
    /// Moves the pointer to an absolute position in desktop pixels.
    fn move_to(&self, x: i32, y: i32) -> Result<(), DesktopError>;

    fn scroll(&self, delta_x: i32, delta_y: i32) -> Result<(), DesktopError>;

    fn button_down(&self, code: u32) -> Result<(), DesktopError>;

    fn button_up(&self, code: u32) -> Result<(), DesktopError>;

    /// Presses a key identified by its X11 keysym.
    fn key_down(&self, code: u64) -> Result<(), DesktopError>;

    fn key_up(&self, code: u64) -> Result<(), DesktopError>;

    /// Releases every key and button the driver believes is held.
    fn reset_keys(&self) -> Result<(), DesktopError>;

    /// The configuration currently in effect.
    fn screen_size(&self) -> ScreenConfiguration;

    /// Every configuration the display can switch to.
    fn screen_configurations(&self) -> Vec<ScreenConfiguration>;

    fn change_screen_size(&self, config: ScreenConfiguration) -> Result<(), DesktopError>;

    fn keyboard_layout(&self) -> String;

    fn set_keyboard_layout(&self, layout: &str) -> Result<(), DesktopError>;

    fn keyboard_modifiers(&self) -> KeyboardModifiers;

    /// Applies the lock-key state.  `None` fields are left unchanged.
    fn set_keyboard_modifiers(&self, modifiers: KeyboardModifiers) -> Result<(), DesktopError>;
}

/// Synchronous facade over the desktop driver.
pub struct DesktopFacade {
    driver: Arc<dyn DesktopDriver>,
    display: Mutex<()>,
    events: Arc<dyn EventPublisher>,
}

impl DesktopFacade {
    pub fn new(driver: Arc<dyn DesktopDriver>, events: Arc<dyn EventPublisher>) -> Self {
        Self {
            driver,
            display: Mutex::new(()),
            events,
        }
    }

    fn log_input_error(result: Result<(), DesktopError>, action: &str) -> Result<(), DesktopError> {
        if let Err(e) = &result {
            error!(action, "desktop driver error: {e}");
        }
        result
    }

    // ── Input ─────────────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// [`DesktopError::InputInjectionFailed`] if the driver rejects the event.
    pub fn move_to(&self, x: i32, y: i32) -> Result<(), DesktopError> {
        Self::log_input_error(self.driver.move_to(x, y), "move")
    }

    pub fn scroll(&self, delta_x: i32, delta_y: i32) -> Result<(), DesktopError> {
        Self::log_input_error(self.driver.scroll(delta_x, delta_y), "scroll")
    }

    pub fn button_down(&self, code: u32) -> Result<(), DesktopError> {
        Self::log_input_error(self.driver.button_down(code), "button_down")
    }

    pub fn button_up(&self, code: u32) -> Result<(), DesktopError> {
        Self::log_input_error(self.driver.button_up(code), "button_up")
    }

    pub fn key_down(&self, code: u64) -> Result<(), DesktopError> {
        Self::log_input_error(self.driver.key_down(code), "key_down")
    }

    pub fn key_up(&self, code: u64) -> Result<(), DesktopError> {
        Self::log_input_error(self.driver.key_up(code), "key_up")
    }

    pub fn reset_keys(&self) -> Result<(), DesktopError> {
        Self::log_input_error(self.driver.reset_keys(), "reset_keys")
    }

    // ── Screen ────────────────────────────────────────────────────────────────

    pub fn get_screen_size(&self) -> ScreenConfiguration {
        self.driver.screen_size()
    }

    /// Supported configurations, sorted and without duplicates.
    pub fn list_screen_configurations(&self) -> Vec<ScreenConfiguration> {
        let mut list = self.driver.screen_configurations();
        list.sort_unstable();
        list.dedup();
        list
    }

    /// Switches the display to `width`x`height`@`rate`.
    ///
    /// Requesting the configuration already in effect still goes through the
    /// driver and is announced again.
    ///
    /// # Errors
    ///
    /// [`DesktopError::DisplayChangeFailed`] if the configuration is not in
    /// [`list_screen_configurations`](Self::list_screen_configurations) or the
    /// driver fails to apply it.  The current configuration is then unchanged.
    pub fn change_screen_size(
        &self,
        width: u32,
        height: u32,
        rate: u16,
    ) -> Result<ScreenConfiguration, DesktopError> {
        let requested = ScreenConfiguration::new(width, height, rate);
        let _guard = self.display.lock().unwrap_or_else(PoisonError::into_inner);

        if !self.driver.screen_configurations().contains(&requested) {
            return Err(DesktopError::DisplayChangeFailed(format!(
                "unsupported configuration {requested}"
            )));
        }

        if let Err(e) = self.driver.change_screen_size(requested) {
            error!(config = %requested, "display change failed: {e}");
            return Err(e);
        }

        info!(config = %requested, "screen configuration changed");
        self.events.publish(BusEvent::ScreenChanged(requested));
        Ok(requested)
    }

    // ── Keyboard ──────────────────────────────────────────────────────────────

    pub fn keyboard_layout(&self) -> String {
        self.driver.keyboard_layout()
    }

    pub fn set_keyboard_layout(&self, layout: &str) -> Result<(), DesktopError> {
        Self::log_input_error(self.driver.set_keyboard_layout(layout), "keyboard_layout")
    }

    pub fn keyboard_modifiers(&self) -> KeyboardModifiers {
        self.driver.keyboard_modifiers()
    }

    /// Applies the given lock keys and returns the full resulting state.
    pub fn set_keyboard_modifiers(
        &self,
        num_lock: Option<bool>,
        caps_lock: Option<bool>,
        scroll_lock: Option<bool>,
    ) -> Result<KeyboardModifiers, DesktopError> {
        let update = KeyboardModifiers {
            num_lock,
            caps_lock,
            scroll_lock,
        };
        Self::log_input_error(self.driver.set_keyboard_modifiers(update), "keyboard_modifiers")?;
        Ok(self.driver.keyboard_modifiers())
    }
}
