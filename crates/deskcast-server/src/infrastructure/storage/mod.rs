//! Configuration persistence.

pub mod config;

pub use config::{ConfigError, MemberEntry, ServerConfig};
