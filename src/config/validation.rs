//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check every backend address the way the dispatcher will
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Validation is a pure function: ProxyConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::config::schema::ProxyConfig;
use crate::load_balancer::{ConfigError, Upstream};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidSocketAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} must not exceed {max}")]
    TooLarge { field: &'static str, max: usize },

    #[error(transparent)]
    Backend(#[from] ConfigError),
}

/// Validate a configuration, collecting every error.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidSocketAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    if config.backends.is_empty() {
        errors.push(ConfigError::NoBackends.into());
    }
    for address in &config.backends {
        if let Err(e) = Upstream::parse(address) {
            errors.push(e.into());
        }
    }

    match config.dispatch.max_in_flight {
        Some(0) => errors.push(ValidationError::Zero {
            field: "dispatch.max_in_flight",
        }),
        Some(n) if n > Semaphore::MAX_PERMITS => errors.push(ValidationError::TooLarge {
            field: "dispatch.max_in_flight",
            max: Semaphore::MAX_PERMITS,
        }),
        _ => {}
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::Zero {
            field: "timeouts.connect_secs",
        });
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::Zero {
            field: "timeouts.request_secs",
        });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidSocketAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
