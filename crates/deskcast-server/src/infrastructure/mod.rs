//! Infrastructure layer for deskcast-server.
//!
//! The infrastructure layer handles all I/O and every concrete collaborator
//! the application layer reaches through a trait.
//!
//! # Responsibilities
//!
//! - Binding the WebSocket listener and running per-session tasks
//! - Resolving connection tokens to members
//! - Loading the TOML configuration
//! - Providing desktop drivers (headless display, recording double)
//! - Providing the synthetic frame source
//!
//! # What does NOT belong here?
//!
//! - Control arbitration, permission checks, or routing decisions (that is
//!   the application layer)
//! - Wire message definitions (that is `deskcast-core`)

pub mod capture;
pub mod desktop_driver;
pub mod members;
pub mod storage;
pub mod ws_server;

pub use capture::SyntheticCapture;
pub use members::{Admission, MemberDirectory};
pub use ws_server::{run_server, serve, ConnectionSettings};
