//! # deskcast-core
//!
//! Shared library for the deskcast streaming server containing the domain
//! entities and the browser-facing JSON wire protocol.
//!
//! It has zero dependencies on OS APIs, sockets, or async runtimes.
//!
//! # Architecture overview
//!
//! deskcast shares one virtual desktop with many browser sessions.  Every
//! session watches the same encoded video stream, but at most one session at a
//! time may drive the mouse and keyboard.
//!
//! - **`domain`** – Pure data: session identity and permissions, screen
//!   configurations, keyboard state, and encoded media frames.
//!
//! - **`protocol`** – How messages travel between browser and server.  Every
//!   message is a JSON object `{"event": "<tag>", "payload": {...}}` decoded
//!   into typed Rust enums on arrival.

pub mod domain;
pub mod protocol;

pub use domain::media::EncodedFrame;
pub use domain::screen::{KeyboardModifiers, ScreenConfiguration};
pub use domain::session::{Permissions, Profile, SessionId, SessionState};
pub use protocol::codec::{decode_client_message, encode_server_message, ProtocolError};
pub use protocol::messages::{ClientMessage, ServerMessage};
