use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timer settings applied to every session in a registry.
///
/// Fixed at construction; sessions never re-read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Period of heartbeat frames while a receiver is attached.
    ///
    /// Default: 25 seconds, below the idle timeout of most proxies.
    pub heartbeat_delay_ms: u64,

    /// How long a session may sit without a receiver before it is closed.
    ///
    /// Default: 5 seconds, enough for a polling client to come back.
    pub timeout_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_delay_ms: 25_000,
            timeout_delay_ms: 5_000,
        }
    }
}

impl SessionConfig {
    pub fn heartbeat_delay(&self) -> Duration {
        Duration::from_millis(self.heartbeat_delay_ms)
    }

    pub fn timeout_delay(&self) -> Duration {
        Duration::from_millis(self.timeout_delay_ms)
    }
}
