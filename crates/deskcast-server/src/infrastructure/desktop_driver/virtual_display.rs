//! In-process headless display.
//!
//! `VirtualDisplayDriver` keeps the state a real X server would keep (the
//! screen mode, pointer position, held keys and buttons, keyboard layout and
//! lock keys) without drawing anything.  It is the default runtime driver and
//! lets the whole server run on a machine with no display at all.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use deskcast_core::{KeyboardModifiers, ScreenConfiguration};

use crate::application::desktop_facade::{DesktopDriver, DesktopError};

/// Keyboard layout a fresh display starts with.
pub const DEFAULT_LAYOUT: &str = "us";

#[derive(Debug)]
struct DisplayState {
    screen: ScreenConfiguration,
    pointer: (i32, i32),
    keys: BTreeSet<u64>,
    buttons: BTreeSet<u32>,
    layout: String,
    modifiers: KeyboardModifiers,
}

/// Headless desktop that only tracks state.
#[derive(Debug)]
pub struct VirtualDisplayDriver {
    state: Mutex<DisplayState>,
    configurations: Vec<ScreenConfiguration>,
}

impl VirtualDisplayDriver {
    /// Creates a display in mode `initial`.
    ///
    /// `initial` is added to `configurations` if missing.
    pub fn new(initial: ScreenConfiguration, mut configurations: Vec<ScreenConfiguration>) -> Self {
        if !configurations.contains(&initial) {
            configurations.push(initial);
        }
        configurations.sort_unstable();
        configurations.dedup();
        Self {
            state: Mutex::new(DisplayState {
                screen: initial,
                pointer: (0, 0),
                keys: BTreeSet::new(),
                buttons: BTreeSet::new(),
                layout: DEFAULT_LAYOUT.to_string(),
                modifiers: KeyboardModifiers {
                    num_lock: Some(false),
                    caps_lock: Some(false),
                    scroll_lock: Some(false),
                },
            }),
            configurations,
        }
    }

    fn state(&self) -> MutexGuard<'_, DisplayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current pointer position.
    pub fn pointer(&self) -> (i32, i32) {
        self.state().pointer
    }

    /// Keysyms currently held down.
    pub fn pressed_keys(&self) -> Vec<u64> {
        self.state().keys.iter().copied().collect()
    }

    pub fn pressed_buttons(&self) -> Vec<u32> {
        self.state().buttons.iter().copied().collect()
    }
}

impl Default for VirtualDisplayDriver {
    fn default() -> Self {
        Self::new(
            ScreenConfiguration::new(1280, 720, 30),
            vec![
                ScreenConfiguration::new(1024, 768, 60),
                ScreenConfiguration::new(1280, 720, 30),
                ScreenConfiguration::new(1280, 720, 60),
                ScreenConfiguration::new(1920, 1080, 30),
                ScreenConfiguration::new(1920, 1080, 60),
            ],
        )
    }
}

fn clamp(value: i32, extent: u32) -> i32 {
    let max = i32::try_from(extent.saturating_sub(1)).unwrap_or(i32::MAX);
    value.clamp(0, max)
}

fn valid_layout(layout: &str) -> bool {
    !layout.is_empty()
        && layout.len() <= 32
        && layout
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ','))
}

impl DesktopDriver for VirtualDisplayDriver {
    fn move_to(&self, x: i32, y: i32) -> Result<(), DesktopError> {
        let mut state = self.state();
        state.pointer = (clamp(x, state.screen.width), clamp(y, state.screen.height));
        trace!(x = state.pointer.0, y = state.pointer.1, "pointer moved");
        Ok(())
    }

    fn scroll(&self, delta_x: i32, delta_y: i32) -> Result<(), DesktopError> {
        trace!(delta_x, delta_y, "scroll");
        Ok(())
    }

    fn button_down(&self, code: u32) -> Result<(), DesktopError> {
        self.state().buttons.insert(code);
        Ok(())
    }

    fn button_up(&self, code: u32) -> Result<(), DesktopError> {
        self.state().buttons.remove(&code);
        Ok(())
    }

    fn key_down(&self, code: u64) -> Result<(), DesktopError> {
        self.state().keys.insert(code);
        Ok(())
    }

    fn key_up(&self, code: u64) -> Result<(), DesktopError> {
        self.state().keys.remove(&code);
        Ok(())
    }

    fn reset_keys(&self) -> Result<(), DesktopError> {
        let mut state = self.state();
        if !state.keys.is_empty() || !state.buttons.is_empty() {
            debug!(keys = state.keys.len(), buttons = state.buttons.len(), "releasing held input");
        }
        state.keys.clear();
        state.buttons.clear();
        Ok(())
    }

    fn screen_size(&self) -> ScreenConfiguration {
        self.state().screen
    }

    fn screen_configurations(&self) -> Vec<ScreenConfiguration> {
        self.configurations.clone()
    }

    fn change_screen_size(&self, config: ScreenConfiguration) -> Result<(), DesktopError> {
        if !self.configurations.contains(&config) {
            return Err(DesktopError::DisplayChangeFailed(format!(
                "mode {config} not available"
            )));
        }
        let mut state = self.state();
        state.screen = config;
        state.pointer = (
            clamp(state.pointer.0, config.width),
            clamp(state.pointer.1, config.height),
        );
        Ok(())
    }

    fn keyboard_layout(&self) -> String {
        self.state().layout.clone()
    }

    fn set_keyboard_layout(&self, layout: &str) -> Result<(), DesktopError> {
        if !valid_layout(layout) {
            return Err(DesktopError::InputInjectionFailed(format!(
                "invalid keyboard layout '{layout}'"
            )));
        }
        self.state().layout = layout.to_string();
        Ok(())
    }

    fn keyboard_modifiers(&self) -> KeyboardModifiers {
        self.state().modifiers
    }

    fn set_keyboard_modifiers(&self, modifiers: KeyboardModifiers) -> Result<(), DesktopError> {
        let mut state = self.state();
        state.modifiers = state.modifiers.apply(modifiers);
        Ok(())
    }
}
