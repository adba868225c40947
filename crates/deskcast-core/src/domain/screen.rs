//! Screen modes and keyboard state of the shared desktop.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A display mode: resolution plus refresh rate.
///
/// Written as `WIDTHxHEIGHT@RATE` in configuration files, e.g. `1920x1080@60`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScreenConfiguration {
    pub width: u32,
    pub height: u32,
    /// Refresh rate in Hz.
    pub rate: u16,
}

impl ScreenConfiguration {
    pub const fn new(width: u32, height: u32, rate: u16) -> Self {
        Self {
            width,
            height,
            rate,
        }
    }
}

impl fmt::Display for ScreenConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{}", self.width, self.height, self.rate)
    }
}

/// Error returned when a `WIDTHxHEIGHT@RATE` string cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid screen configuration '{0}', expected WIDTHxHEIGHT@RATE")]
pub struct ScreenParseError(pub String);

impl FromStr for ScreenConfiguration {
    type Err = ScreenParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ScreenParseError(s.to_string());
        let (size, rate) = s.trim().split_once('@').ok_or_else(err)?;
        let (width, height) = size.split_once('x').ok_or_else(err)?;
        let config = Self {
            width: width.parse().map_err(|_| err())?,
            height: height.parse().map_err(|_| err())?,
            rate: rate.parse().map_err(|_| err())?,
        };
        if config.width == 0 || config.height == 0 || config.rate == 0 {
            return Err(err());
        }
        Ok(config)
    }
}

/// Lock-key state of the virtual keyboard.
///
/// In a change request, `None` means "leave this lock unchanged".  When read
/// back from the driver every field is `Some`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyboardModifiers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_lock: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caps_lock: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_lock: Option<bool>,
}

impl KeyboardModifiers {
    /// Returns `self` with every field that `update` sets overwritten.
    pub fn apply(self, update: KeyboardModifiers) -> Self {
        Self {
            num_lock: update.num_lock.or(self.num_lock),
            caps_lock: update.caps_lock.or(self.caps_lock),
            scroll_lock: update.scroll_lock.or(self.scroll_lock),
        }
    }

    /// Returns `true` if the request would change nothing.
    pub fn is_empty(&self) -> bool {
        self.num_lock.is_none() && self.caps_lock.is_none() && self.scroll_lock.is_none()
    }
}
