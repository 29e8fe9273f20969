//! Service configuration.

use serde::{Deserialize, Serialize};
use socklet_session::SessionConfig;

/// Settings for one service (one URL prefix, one callback factory).
///
/// Every field has a default, so a partial document deserializes:
///
/// ```
/// # use socklet::ServiceConfig;
/// let config: ServiceConfig = serde_json::from_str(r#"{"prefix":"/echo"}"#).unwrap();
/// assert!(config.websocket_enabled);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// URL prefix the service is mounted under, e.g. `/echo`. Empty mounts
    /// it at the root.
    pub prefix: String,

    /// Whether the framed and raw WebSocket routes are registered.
    pub websocket_enabled: bool,

    /// Bytes a streaming response may carry before the client is asked to
    /// reconnect.
    pub max_response_size: usize,

    /// Advertised in `/info`. Socklet itself never sets cookies.
    pub cookie_needed: bool,

    /// Heartbeat and timeout delays for every session.
    pub session: SessionConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            websocket_enabled: true,
            max_response_size: 128 * 1024,
            cookie_needed: false,
            session: SessionConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// The prefix with a leading slash and no trailing slash, or `""` for
    /// the root.
    pub fn normalized_prefix(&self) -> String {
        let trimmed = self.prefix.trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_documented_values() {
        let config = ServiceConfig::default();
        assert!(config.websocket_enabled);
        assert_eq!(config.max_response_size, 131_072);
        assert!(!config.cookie_needed);
        assert_eq!(config.session, SessionConfig::default());
    }

    #[test]
    fn test_deserialize_nested_session_partial() {
        let config: ServiceConfig =
            serde_json::from_str(r#"{"session":{"heartbeat_delay_ms":1000}}"#).unwrap();
        assert_eq!(config.session.heartbeat_delay_ms, 1000);
        assert_eq!(config.session.timeout_delay_ms, 5000);
        assert_eq!(config.max_response_size, 131_072);
    }

    #[test]
    fn test_normalized_prefix_variants() {
        let mut config = ServiceConfig::default();
        for (raw, expected) in [("", ""), ("/", ""), ("echo", "/echo"), ("/echo/", "/echo")] {
            config.prefix = raw.to_string();
            assert_eq!(config.normalized_prefix(), expected, "prefix {raw:?}");
        }
    }
}
