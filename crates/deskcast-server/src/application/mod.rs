//! Application layer for deskcast-server.
//!
//! The six components that make up the server, plus the [`ServerCore`] that
//! wires them together.  Nothing in here opens a socket or talks to a real
//! display; those collaborators are reached through traits
//! ([`SessionTransport`], [`MediaTransport`], [`FrameSource`],
//! [`DesktopDriver`]) implemented in the infrastructure layer.
//!
//! # Responsibilities
//!
//! - Tracking connected sessions and their lifecycle
//! - Arbitrating the single control lock
//! - Routing inbound messages by permission
//! - Fanning state changes out to sessions
//! - Fanning encoded media out to watching peers

pub mod control_arbiter;
pub mod desktop_facade;
pub mod event_bus;
pub mod media_bridge;
pub mod message_router;
pub mod outbound;
pub mod server_core;
pub mod session_registry;

pub use control_arbiter::{ArbiterError, ControlArbiter, ControlTransition, InputAction, InputOutcome};
pub use desktop_facade::{DesktopDriver, DesktopError, DesktopFacade};
pub use event_bus::{BusEvent, EventBus, EventKind, EventPublisher, Subscriber};
pub use media_bridge::{FrameSource, MediaError, MediaTransport, PeerMediaBridge};
pub use message_router::{MessageRouter, RouterError};
pub use outbound::{OutboundQueue, OverflowPolicy, TransportError};
pub use server_core::{CoreSettings, ServerCore};
pub use session_registry::{RegistryError, Session, SessionListener, SessionRegistry, SessionTransport};
