//! Structured logging.
//!
//! Uses `tracing` with an `EnvFilter`: `RUST_LOG` wins, otherwise the
//! configured level applies to this crate and `tower_http`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is not set.
///
/// A bare level such as `debug` is scoped to this crate and `tower_http`;
/// anything else is taken as a full directive.
pub fn default_filter(level: &str) -> String {
    match level.trim().to_ascii_lowercase().as_str() {
        lvl @ ("trace" | "debug" | "info" | "warn" | "error") => {
            format!("leastload_proxy={lvl},tower_http={lvl}")
        }
        _ => level.to_string(),
    }
}

/// Initialize the global tracing subscriber.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level).into());

    if let Err(e) = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("Logging already initialized: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_is_scoped() {
        assert_eq!(default_filter("DEBUG"), "leastload_proxy=debug,tower_http=debug");
    }

    #[test]
    fn test_directive_passes_through() {
        assert_eq!(default_filter("leastload_proxy=trace"), "leastload_proxy=trace");
    }
}
