//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML files. Every
//! field has a default so a minimal file only lists backends.

use serde::{Deserialize, Serialize};

/// Root configuration for the balancer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Backend addresses, in selection-id order.
    pub backends: Vec<String>,

    /// Listener configuration.
    pub listener: ListenerConfig,

    /// Dispatch settings.
    pub dispatch: DispatchConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Dispatch settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum concurrent forwards. Unbounded when unset.
    pub max_in_flight: Option<usize>,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Backend connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    /// Install the Prometheus scrape listener.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: ProxyConfig = toml::from_str(r#"backends = ["127.0.0.1:3000"]"#).unwrap();
        assert_eq!(config.backends, vec!["127.0.0.1:3000"]);
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.dispatch.max_in_flight, None);
        assert_eq!(config.timeouts.request_secs, 30);
        assert!(!config.observability.metrics_enabled);
    }

    #[test]
    fn test_full_config() {
        let config: ProxyConfig = toml::from_str(
            r#"
            backends = ["http://10.0.0.1:80", "10.0.0.2:80"]

            [listener]
            bind_address = "127.0.0.1:9000"

            [dispatch]
            max_in_flight = 64

            [timeouts]
            connect_secs = 2
            request_secs = 10

            [observability]
            log_level = "debug"
            metrics_enabled = true
            metrics_address = "127.0.0.1:9100"
            "#,
        )
        .unwrap();

        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
        assert_eq!(config.dispatch.max_in_flight, Some(64));
        assert_eq!(config.timeouts.connect_secs, 2);
        assert_eq!(config.observability.log_level, "debug");
        assert!(config.observability.metrics_enabled);
    }
}
