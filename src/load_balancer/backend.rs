//! Backend abstraction.
//!
//! # Responsibilities
//! - Parse a configured address into a forwarding target
//! - Pair the target with its in-flight load counter
//! - Give each backend a stable identity for the pool's position table

use axum::http::uri::Authority;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

use crate::load_balancer::counter::LoadCounter;
use crate::load_balancer::pool::PoolError;

/// Errors raised while building backends from configured addresses.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// An address could not be turned into a forwarding target.
    #[error("invalid backend address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// No backend addresses were configured.
    #[error("at least one backend address is required")]
    NoBackends,

    /// The parsed backends could not be seeded into the pool.
    #[error("failed to seed backend pool: {0}")]
    Pool(#[from] PoolError),
}

impl ConfigError {
    fn invalid(address: &str, reason: impl fmt::Display) -> Self {
        ConfigError::InvalidAddress {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Stable identity of a backend, assigned in configuration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackendId(pub usize);

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A parsed forwarding target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    url: Url,
    authority: Authority,
}

impl Upstream {
    /// Parse a backend address.
    ///
    /// `host:port` without a scheme is read as plain HTTP.
    pub fn parse(address: &str) -> Result<Self, ConfigError> {
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::invalid(address, "address is empty"));
        }

        let url = if trimmed.contains("://") {
            Url::parse(trimmed)
        } else {
            Url::parse(&format!("http://{}", trimmed))
        }
        .map_err(|e| ConfigError::invalid(address, e))?;

        if url.scheme() != "http" {
            return Err(ConfigError::invalid(
                address,
                format!("unsupported scheme {:?}, only http is supported", url.scheme()),
            ));
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(ConfigError::invalid(address, "user info is not allowed"));
        }
        if url.fragment().is_some() {
            return Err(ConfigError::invalid(address, "fragments are not allowed"));
        }

        let host = url
            .host_str()
            .ok_or_else(|| ConfigError::invalid(address, "missing host"))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| ConfigError::invalid(address, "missing port"))?;
        let authority = Authority::from_str(&format!("{}:{}", host, port))
            .map_err(|e| ConfigError::invalid(address, e))?;

        Ok(Self { url, authority })
    }

    /// Host and port requests are forwarded to.
    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Path prefix joined in front of every forwarded path.
    pub fn base_path(&self) -> &str {
        self.url.path()
    }

    /// Query merged in front of every forwarded query.
    pub fn base_query(&self) -> Option<&str> {
        self.url.query().filter(|q| !q.is_empty())
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl FromStr for Upstream {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Upstream::parse(s)
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.authority)
    }
}

/// A single backend: a forwarding target plus its in-flight load.
///
/// Backends live for the lifetime of the dispatcher. Their position in the
/// pool is tracked by the pool itself, never by the backend.
#[derive(Debug)]
pub struct Backend {
    id: BackendId,
    upstream: Upstream,
    load: LoadCounter,
}

impl Backend {
    pub fn new(id: BackendId, upstream: Upstream) -> Self {
        Self::with_load(id, upstream, 0)
    }

    /// Create a backend starting at a given load.
    pub fn with_load(id: BackendId, upstream: Upstream, load: usize) -> Self {
        Self {
            id,
            upstream,
            load: LoadCounter::new(load),
        }
    }

    pub fn id(&self) -> BackendId {
        self.id
    }

    pub fn upstream(&self) -> &Upstream {
        &self.upstream
    }

    pub fn load_counter(&self) -> &LoadCounter {
        &self.load
    }

    /// Current number of in-flight requests.
    pub fn load(&self) -> usize {
        self.load.value()
    }
}
