//! Runtime configuration.
//!
//! Grounded on `retina-core::config`'s serde+toml `RuntimeConfig` pattern:
//! a single struct with `#[serde(default = "...")]` fallbacks for every
//! field, loaded from a TOML file via [`load_config`]. Scoped down to the
//! handful of knobs this crate's Session Manager actually has — spec §6 is
//! explicit that the core itself takes "no configuration files, no
//! environment variables"; this module exists for the embedding application
//! to size the Flow Index, TIME_WAIT queue, and sweep timers, the same role
//! `ConnTrackConfig` plays for `retina-core`'s conntrack.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Loads a [`SessionManagerConfig`] from a TOML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SessionManagerConfig, ConfigError> {
    let text = fs::read_to_string(path)?;
    let config: SessionManagerConfig = toml::from_str(&text)?;
    Ok(config)
}

/// Returns the default configuration, matching spec §4's literal constants
/// (bucket count, TIME_WAIT capacity, handshake timeout, TIME_WAIT duration).
pub fn default_config() -> SessionManagerConfig {
    SessionManagerConfig::default()
}

/// Runtime-tunable sizing for the Session Manager and its subsystems.
///
/// ```toml
/// [flow_index]
///     bucket_count = 2_000_003
///
/// [time_wait]
///     capacity = 100_000
///     duration_secs = 60
///
/// handshake_timeout_secs = 60
/// ```
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SessionManagerConfig {
    /// Flow Index sizing (spec §4.2).
    #[serde(default)]
    pub flow_index: FlowIndexConfig,

    /// TIME_WAIT queue sizing (spec §4.3.3).
    #[serde(default)]
    pub time_wait: TimeWaitConfig,

    /// Seconds of `last_access` divergence before the handshake sweep
    /// (§4.3.4) discards a half-open flow.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u8,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        SessionManagerConfig {
            flow_index: FlowIndexConfig::default(),
            time_wait: TimeWaitConfig::default(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
        }
    }
}

fn default_handshake_timeout_secs() -> u8 {
    60
}

/// Flow Index sizing options (spec §4.2).
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct FlowIndexConfig {
    /// Fixed bucket count for the open-chained hash map. The spec's ≈2·10⁶
    /// figure (2_000_003, a prime, matching `hashtable.c`'s `ARRAY_SIZE`).
    #[serde(default = "default_bucket_count")]
    pub bucket_count: usize,
}

impl Default for FlowIndexConfig {
    fn default() -> Self {
        FlowIndexConfig {
            bucket_count: default_bucket_count(),
        }
    }
}

fn default_bucket_count() -> usize {
    2_000_003
}

/// TIME_WAIT queue sizing options (spec §4.3.3).
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimeWaitConfig {
    /// Ring capacity; `add` is rejected once full.
    #[serde(default = "default_time_wait_capacity")]
    pub capacity: usize,

    /// Seconds a flow waits in the queue before `free_expired` destroys it.
    #[serde(default = "default_time_wait_duration_secs")]
    pub duration_secs: u32,
}

impl Default for TimeWaitConfig {
    fn default() -> Self {
        TimeWaitConfig {
            capacity: default_time_wait_capacity(),
            duration_secs: default_time_wait_duration_secs(),
        }
    }
}

fn default_time_wait_capacity() -> usize {
    100_000
}

fn default_time_wait_duration_secs() -> u32 {
    60
}
