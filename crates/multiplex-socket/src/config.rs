use std::time::Duration;

use multiplex_transport::DEFAULT_MAX_LENGTH;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default receive timeout: 10 seconds.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(10);
/// Default connect timeout: 0.5 seconds.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
/// Default heartbeat interval: 20 seconds.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(20);
/// Default bound on waiting for in-flight requests before rotating.
pub const DEFAULT_MAX_WAIT_CLOSE: Duration = Duration::from_secs(2);
/// Default outbound queue capacity per connection.
pub const DEFAULT_WRITE_QUEUE_CAPACITY: usize = 65535;

/// Client behaviour.
///
/// Durations are (fractional) seconds when (de)serialized, so a config file
/// reads like `{"recv_timeout": 1.5, "heartbeat": null}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Maximum frame size in bytes, prefix included. Default: 2 MiB.
    pub package_max_length: usize,
    /// How long `recv` waits for a response. Default: 10s.
    #[serde(with = "secs")]
    pub recv_timeout: Duration,
    /// How long establishing a connection may take. Default: 0.5s.
    #[serde(with = "secs")]
    pub connect_timeout: Duration,
    /// PING interval on idle connections; `None` disables heartbeats and
    /// read/write idle timeouts. Default: 20s.
    #[serde(with = "secs::option")]
    pub heartbeat: Option<Duration>,
    /// Frames written on one connection before it is rotated. `None` or 0
    /// means unlimited.
    pub max_requests: Option<u64>,
    /// Upper bound on waiting for in-flight requests to drain before a
    /// rotation closes the connection. Default: 2s.
    #[serde(rename = "max_wait_close_seconds", with = "secs")]
    pub max_wait_close: Duration,
    /// Capacity of the outbound frame queue. Default: 65535.
    pub write_queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            package_max_length: DEFAULT_MAX_LENGTH,
            recv_timeout: DEFAULT_RECV_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            heartbeat: Some(DEFAULT_HEARTBEAT),
            max_requests: None,
            max_wait_close: DEFAULT_MAX_WAIT_CLOSE,
            write_queue_capacity: DEFAULT_WRITE_QUEUE_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Parse a JSON document; missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read/write idle timeout: twice the heartbeat interval, or none when
    /// heartbeats are disabled.
    pub fn max_idle_time(&self) -> Option<Duration> {
        self.heartbeat.map(|interval| interval.saturating_mul(2))
    }

    /// Rotation threshold, if any.
    pub fn rotation_limit(&self) -> Option<u64> {
        self.max_requests.filter(|&limit| limit > 0)
    }
}

/// Server behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Maximum frame size in bytes, prefix included. Default: 2 MiB.
    pub package_max_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            package_max_length: DEFAULT_MAX_LENGTH,
        }
    }
}

impl ServerConfig {
    /// Parse a JSON document; missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

mod secs {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(D::Error::custom)
    }

    pub mod option {
        use std::time::Duration;

        use serde::{de::Error, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<f64>::deserialize(deserializer)?
                .map(|seconds| Duration::try_from_secs_f64(seconds).map_err(D::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ClientConfig::default();
        assert_eq!(config.package_max_length, 2 * 1024 * 1024);
        assert_eq!(config.recv_timeout, Duration::from_secs(10));
        assert_eq!(config.connect_timeout, Duration::from_millis(500));
        assert_eq!(config.heartbeat, Some(Duration::from_secs(20)));
        assert_eq!(config.max_requests, None);
        assert_eq!(config.max_wait_close, Duration::from_secs(2));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            ClientConfig::from_json(r#"{"heartbeat": null, "recv_timeout": 1, "max_requests": 100}"#)
                .unwrap();
        assert_eq!(config.heartbeat, None);
        assert_eq!(config.recv_timeout, Duration::from_secs(1));
        assert_eq!(config.max_requests, Some(100));
        assert_eq!(config.connect_timeout, Duration::from_millis(500));
        assert_eq!(config.package_max_length, 2 * 1024 * 1024);
    }

    #[test]
    fn fractional_seconds() {
        let config =
            ClientConfig::from_json(r#"{"max_wait_close_seconds": 0.5, "heartbeat": 1.5}"#).unwrap();
        assert_eq!(config.max_wait_close, Duration::from_millis(500));
        assert_eq!(config.heartbeat, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn negative_duration_is_rejected() {
        assert!(ClientConfig::from_json(r#"{"recv_timeout": -1}"#).is_err());
    }

    #[test]
    fn max_idle_time_is_twice_heartbeat() {
        let config = ClientConfig {
            heartbeat: Some(Duration::from_secs(12)),
            ..ClientConfig::default()
        };
        assert_eq!(config.max_idle_time(), Some(Duration::from_secs(24)));

        let config = ClientConfig {
            heartbeat: None,
            ..ClientConfig::default()
        };
        assert_eq!(config.max_idle_time(), None);
    }

    #[test]
    fn zero_max_requests_means_unlimited() {
        let config = ClientConfig {
            max_requests: Some(0),
            ..ClientConfig::default()
        };
        assert_eq!(config.rotation_limit(), None);
    }

    #[test]
    fn serialized_config_roundtrips() {
        let config = ClientConfig {
            heartbeat: None,
            recv_timeout: Duration::from_millis(250),
            ..ClientConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"max_wait_close_seconds\""));
        assert_eq!(ClientConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn server_config_from_json() {
        let config = ServerConfig::from_json(r#"{"package_max_length": 16}"#).unwrap();
        assert_eq!(config.package_max_length, 16);
        assert_eq!(ServerConfig::from_json("{}").unwrap(), ServerConfig::default());
    }
}
