//! Desktop driver implementations.
//!
//! `virtual_display` is the headless driver the binary runs with; `mock`
//! wraps it with call recording and failure injection for tests.

pub mod mock;
pub mod virtual_display;

pub use mock::{DriverCall, RecordingDesktopDriver};
pub use virtual_display::VirtualDisplayDriver;
