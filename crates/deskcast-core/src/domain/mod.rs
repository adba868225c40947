//! Domain entities for deskcast.
//!
//! This module contains pure data types with no infrastructure dependencies.
//! Code in the outer layers (application, infrastructure) depends on the
//! domain, but the domain never depends on them.

/// Encoded media frames produced by the capture collaborator.
pub mod media;

/// Screen modes and keyboard state of the shared desktop.
pub mod screen;

/// Session identity, profile, and permission set.
pub mod session;
