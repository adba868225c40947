//! deskcast-server library crate.
//!
//! A multi-viewer, single-controller remote desktop server: many browser
//! sessions watch one shared desktop, and at most one of them drives its
//! mouse and keyboard at a time.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Browser (JSON + binary media over WebSocket)
//!         ↕
//! [deskcast-server]
//!   ├── application/      Registry, router, arbiter, desktop facade,
//!   │                     event bus, media bridge, ServerCore wiring
//!   └── infrastructure/
//!         ├── ws_server       WebSocket accept loop (tokio-tungstenite)
//!         ├── members         token → identity
//!         ├── storage/config  TOML configuration
//!         ├── desktop_driver  headless display + recording double
//!         └── capture         synthetic frame source
//! ```
//!
//! # Layer rules
//!
//! - `application` depends on `deskcast-core` and trait seams only.
//! - `infrastructure` depends on all other layers plus `tokio` and
//!   `tungstenite`.

/// Application layer: the server components.
pub mod application;

/// Infrastructure layer: sockets, configuration, drivers.
pub mod infrastructure;

pub use application::{CoreSettings, ServerCore};
