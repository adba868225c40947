//! Recording desktop driver for tests.
//!
//! `RecordingDesktopDriver` wraps a [`VirtualDisplayDriver`] for its state and
//! additionally records every successful call in order, so a test can assert
//! exactly what reached the desktop.
//!
//! # Failure injection
//!
//! [`set_fail_input`](RecordingDesktopDriver::set_fail_input) makes every input
//! method return `InputInjectionFailed`;
//! [`set_fail_display`](RecordingDesktopDriver::set_fail_display) does the same
//! for `change_screen_size` with `DisplayChangeFailed`.  Failed calls are not
//! recorded.
//!
//! ```ignore
//! let driver = Arc::new(RecordingDesktopDriver::new());
//! let core = ServerCore::new(driver.clone(), CoreSettings::default());
//! // ... drive the core ...
//! assert_eq!(driver.calls(), vec![DriverCall::Move { x: 10, y: 20 }]);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use deskcast_core::{KeyboardModifiers, ScreenConfiguration};

use crate::application::desktop_facade::{DesktopDriver, DesktopError};
use crate::infrastructure::desktop_driver::virtual_display::VirtualDisplayDriver;

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Move { x: i32, y: i32 },
    Scroll { delta_x: i32, delta_y: i32 },
    ButtonDown(u32),
    ButtonUp(u32),
    KeyDown(u64),
    KeyUp(u64),
    ResetKeys,
    ChangeScreen(ScreenConfiguration),
    SetLayout(String),
    SetModifiers(KeyboardModifiers),
}

/// A driver that records calls without touching any real display.
#[derive(Debug, Default)]
pub struct RecordingDesktopDriver {
    display: VirtualDisplayDriver,
    calls: Mutex<Vec<DriverCall>>,
    fail_input: AtomicBool,
    fail_display: AtomicBool,
}

impl RecordingDesktopDriver {
    /// Creates a driver over a default [`VirtualDisplayDriver`].
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_display(display: VirtualDisplayDriver) -> Self {
        Self {
            display,
            ..Self::default()
        }
    }

    /// The wrapped display, for state assertions.
    pub fn display(&self) -> &VirtualDisplayDriver {
        &self.display
    }

    /// Every successful call so far, oldest first.
    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn set_fail_input(&self, fail: bool) {
        self.fail_input.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_display(&self, fail: bool) {
        self.fail_display.store(fail, Ordering::SeqCst);
    }

    fn input(
        &self,
        call: DriverCall,
        apply: impl FnOnce(&VirtualDisplayDriver) -> Result<(), DesktopError>,
    ) -> Result<(), DesktopError> {
        if self.fail_input.load(Ordering::SeqCst) {
            return Err(DesktopError::InputInjectionFailed("injected failure".into()));
        }
        apply(&self.display)?;
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        Ok(())
    }
}

impl DesktopDriver for RecordingDesktopDriver {
    fn move_to(&self, x: i32, y: i32) -> Result<(), DesktopError> {
        self.input(DriverCall::Move { x, y }, |d| d.move_to(x, y))
    }

    fn scroll(&self, delta_x: i32, delta_y: i32) -> Result<(), DesktopError> {
        self.input(DriverCall::Scroll { delta_x, delta_y }, |d| {
            d.scroll(delta_x, delta_y)
        })
    }

    fn button_down(&self, code: u32) -> Result<(), DesktopError> {
        self.input(DriverCall::ButtonDown(code), |d| d.button_down(code))
    }

    fn button_up(&self, code: u32) -> Result<(), DesktopError> {
        self.input(DriverCall::ButtonUp(code), |d| d.button_up(code))
    }

    fn key_down(&self, code: u64) -> Result<(), DesktopError> {
        self.input(DriverCall::KeyDown(code), |d| d.key_down(code))
    }

    fn key_up(&self, code: u64) -> Result<(), DesktopError> {
        self.input(DriverCall::KeyUp(code), |d| d.key_up(code))
    }

    fn reset_keys(&self) -> Result<(), DesktopError> {
        self.input(DriverCall::ResetKeys, VirtualDisplayDriver::reset_keys)
    }

    fn screen_size(&self) -> ScreenConfiguration {
        self.display.screen_size()
    }

    fn screen_configurations(&self) -> Vec<ScreenConfiguration> {
        self.display.screen_configurations()
    }

    fn change_screen_size(&self, config: ScreenConfiguration) -> Result<(), DesktopError> {
        if self.fail_display.load(Ordering::SeqCst) {
            return Err(DesktopError::DisplayChangeFailed("injected failure".into()));
        }
        self.display.change_screen_size(config)?;
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(DriverCall::ChangeScreen(config));
        Ok(())
    }

    fn keyboard_layout(&self) -> String {
        self.display.keyboard_layout()
    }

    fn set_keyboard_layout(&self, layout: &str) -> Result<(), DesktopError> {
        self.input(DriverCall::SetLayout(layout.to_string()), |d| {
            d.set_keyboard_layout(layout)
        })
    }

    fn keyboard_modifiers(&self) -> KeyboardModifiers {
        self.display.keyboard_modifiers()
    }

    fn set_keyboard_modifiers(&self, modifiers: KeyboardModifiers) -> Result<(), DesktopError> {
        self.input(DriverCall::SetModifiers(modifiers), |d| {
            d.set_keyboard_modifiers(modifiers)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calls_are_recorded_in_order() {
        let d = RecordingDesktopDriver::new();
        d.key_down(0x61).unwrap();
        d.key_up(0x61).unwrap();
        assert_eq!(d.calls(), vec![DriverCall::KeyDown(0x61), DriverCall::KeyUp(0x61)]);
    }

    #[test]
    fn test_failed_calls_are_not_recorded() {
        let d = RecordingDesktopDriver::new();
        d.set_fail_input(true);
        assert!(d.move_to(1, 1).is_err());
        assert!(d.calls().is_empty());
        assert_eq!(d.display().pointer(), (0, 0));
    }

    #[test]
    fn test_display_failure_keeps_mode() {
        let d = RecordingDesktopDriver::new();
        let before = d.screen_size();
        d.set_fail_display(true);
        assert!(d
            .change_screen_size(ScreenConfiguration::new(1920, 1080, 60))
            .is_err());
        assert_eq!(d.screen_size(), before);
    }
}
