//! Outbound providers
//!
//! A provider is a named source of outbounds that updates independently of
//! the rest of the router. Selector groups bind to providers and re-run their
//! membership whenever a provider reports new content.
//!
//! # Components
//!
//! - [`Provider`] / [`RemoteProvider`]: the provider contract
//! - [`ProviderAdapter`]: shared outbound bookkeeping (diffing, group
//!   notification, health checks)
//! - [`LocalProvider`]: file-backed provider reloaded on change
//! - [`ProviderRegistry`]: factories keyed by provider type name
//! - [`ProviderManager`]: the live set of providers
//! - [`SubscriptionParser`]: turns subscription content into outbound records

mod adapter;
mod local;
mod manager;
mod parser;
mod registry;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use adapter::ProviderAdapter;
pub use local::{LocalProvider, ReloadGuard, ReloadOutcome, ReloadTicket};
pub use manager::ProviderManager;
pub use parser::{JsonSubscriptionParser, SubscriptionParser};
pub use registry::ProviderRegistry;

use crate::error::{OutboundError, ProviderError};
use crate::outbound::{Outbound, OutboundManager};

/// Type name of the file-backed provider
pub const PROVIDER_TYPE_LOCAL: &str = "local";

/// Subscription usage reported by remote providers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubInfo {
    /// Uploaded bytes
    pub upload: i64,
    /// Downloaded bytes
    pub download: i64,
    /// Quota in bytes
    pub total: i64,
    /// Expiry as seconds since the epoch
    pub expire: i64,
}

/// A named, independently-updatable source of outbounds
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider type name
    fn provider_type(&self) -> &str;

    /// Unique provider tag
    fn tag(&self) -> &str;

    /// Current outbounds, in source order
    fn outbounds(&self) -> Vec<Arc<dyn Outbound>>;

    /// Look up one of the current outbounds
    fn outbound(&self, tag: &str) -> Option<Arc<dyn Outbound>>;

    /// Modification time of the content last loaded, if known
    fn updated_at(&self) -> Option<SystemTime>;

    /// Check if an update is in flight
    fn is_updating(&self) -> bool;

    /// Probe every current outbound
    ///
    /// Returns tag → latency in milliseconds. Outbounds whose probe fails
    /// are left out.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::HealthCheckUnavailable` when no latency probe
    /// is configured.
    async fn health_check(&self) -> Result<HashMap<String, u16>, ProviderError>;

    /// Begin background work (watchers, timers)
    ///
    /// # Errors
    ///
    /// Returns `ProviderError` if the provider cannot start.
    fn start(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Stop background work and release outbounds
    fn close(&self) {}

    /// Tell every selector bound to this provider to rebuild its members
    fn update_groups(&self) {}

    /// Remote capability
    fn as_remote(&self) -> Option<&dyn RemoteProvider> {
        None
    }
}

/// Providers that fetch their content from a remote subscription
#[async_trait]
pub trait RemoteProvider: Send + Sync {
    /// Usage information from the last fetch
    fn sub_info(&self) -> SubInfo;

    /// Fetch the subscription now
    ///
    /// # Errors
    ///
    /// Returns `ProviderError` if the fetch or parse fails.
    async fn update(&self) -> Result<(), ProviderError>;
}

/// Measures round-trip latency through an outbound
#[async_trait]
pub trait LatencyProbe: Send + Sync {
    /// Probe `outbound` and return the latency in milliseconds
    ///
    /// # Errors
    ///
    /// Returns `OutboundError` if the outbound cannot be probed.
    async fn probe(&self, outbound: &dyn Outbound) -> Result<u16, OutboundError>;
}

/// Collaborators handed to provider factories
#[derive(Clone)]
pub struct ProviderContext {
    /// Router-wide outbound registry
    pub outbounds: Arc<OutboundManager>,
    /// Directory relative provider paths resolve against
    pub base_dir: PathBuf,
    /// Subscription content parser
    pub parser: Arc<dyn SubscriptionParser>,
    /// Latency probe used by health checks
    pub probe: Option<Arc<dyn LatencyProbe>>,
}

impl ProviderContext {
    /// Create a context with the JSON parser, no probe, and the current
    /// directory as base
    pub fn new(outbounds: Arc<OutboundManager>) -> Self {
        Self {
            outbounds,
            base_dir: PathBuf::from("."),
            parser: Arc::new(JsonSubscriptionParser),
            probe: None,
        }
    }

    /// Set the base directory
    #[must_use]
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    /// Set the subscription parser
    #[must_use]
    pub fn with_parser(mut self, parser: Arc<dyn SubscriptionParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Set the latency probe
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn LatencyProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Resolve `path` against the base directory and make it absolute
    #[must_use]
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let joined = self.base_dir.join(path);
        if joined.is_absolute() {
            return joined;
        }
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(joined),
            Err(_) => joined,
        }
    }
}

impl std::fmt::Debug for ProviderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderContext")
            .field("base_dir", &self.base_dir)
            .field("probe", &self.probe.is_some())
            .finish_non_exhaustive()
    }
}
