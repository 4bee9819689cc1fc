//! Error types for the boundaries of the core that can genuinely fail.
//!
//! Most of the core's "failure" modes are not errors at all: a non-TCP
//! packet, a packet for an unknown flow, or a bad direction are ignorable
//! input (see spec §7) and are modeled as `None`/silent-drop through the
//! [`PacketAccessor`](crate::packet::PacketAccessor) trait, not `Result`.
//! `thiserror` is reserved for the one real fallibility boundary: loading a
//! configuration file.

use thiserror::Error;

/// Errors encountered while loading a [`SessionManagerConfig`](crate::config::SessionManagerConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}
