//! Router assembly
//!
//! Builds the outbound registry, providers and selector groups from a
//! [`Config`] and owns their lifecycle.
//!
//! ```text
//! Config ─► OutboundManager ◄── Selector ◄── ProviderAdapter::update_groups
//!               ▲                   │                 ▲
//!               │                   ▼                 │
//!        Compatible sentinel   SelectionStore    ProviderManager
//! ```
//!
//! Selectors are registered in the outbound registry so nested groups and
//! provider notifications can find them. That registry is in turn held by
//! every selector and provider, so [`Router::close`] must run to release
//! the graph; dropping the router does it automatically.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{Config, COMPATIBLE_OUTBOUND_TAG};
use crate::connection::ConnectionManager;
use crate::error::{RouterError, SelectorError};
use crate::group::{Selector, SelectorContext};
use crate::outbound::{BlockOutbound, Outbound, OutboundManager, OutboundManagerBuilder};
use crate::provider::{LatencyProbe, ProviderContext, ProviderManager};
use crate::store::{FileSelectionStore, MemorySelectionStore, SelectionStore};

/// A configured set of outbounds, providers and selector groups
pub struct Router {
    outbounds: Arc<OutboundManager>,
    providers: Arc<ProviderManager>,
    connections: Arc<ConnectionManager>,
    store: Arc<dyn SelectionStore>,
    /// In configuration order
    selectors: Vec<Arc<Selector>>,
}

impl Router {
    /// Build a router from configuration
    ///
    /// Selections persist to `cache_file` when configured, otherwise to
    /// memory.
    ///
    /// # Errors
    ///
    /// Returns `RouterError` if validation, the selection store, a provider
    /// or a selector fails to build.
    pub fn new(config: &Config) -> Result<Self, RouterError> {
        let base_dir = base_dir(config);
        let store: Arc<dyn SelectionStore> = match &config.cache_file {
            Some(path) => Arc::new(FileSelectionStore::open(base_dir.join(path))?),
            None => Arc::new(MemorySelectionStore::new()),
        };
        Self::with_store(config, store, None)
    }

    /// Build a router with an explicit selection store and latency probe
    ///
    /// # Errors
    ///
    /// Returns `RouterError` if validation, a provider or a selector fails
    /// to build.
    pub fn with_store(
        config: &Config,
        store: Arc<dyn SelectionStore>,
        probe: Option<Arc<dyn LatencyProbe>>,
    ) -> Result<Self, RouterError> {
        config.validate()?;

        let mut builder = OutboundManagerBuilder::new();
        builder.add_all_from_config(&config.outbounds);
        let outbounds = Arc::new(builder.build());
        if !outbounds.contains(COMPATIBLE_OUTBOUND_TAG) {
            debug!("Registering built-in {} outbound", COMPATIBLE_OUTBOUND_TAG);
            outbounds.add(Arc::new(BlockOutbound::new(COMPATIBLE_OUTBOUND_TAG)));
        }

        let connections = Arc::new(ConnectionManager::new(&config.connection));

        let mut provider_ctx =
            ProviderContext::new(Arc::clone(&outbounds)).with_base_dir(base_dir(config));
        if let Some(probe) = probe {
            provider_ctx = provider_ctx.with_probe(probe);
        }

        let providers = Arc::new(ProviderManager::default());
        for provider in &config.providers {
            providers.create(
                &provider_ctx,
                &provider.tag,
                &provider.provider_type,
                provider.options_value(),
            )?;
        }

        let selector_ctx = SelectorContext {
            outbounds: Arc::clone(&outbounds),
            providers: Arc::clone(&providers),
            store: Some(Arc::clone(&store)),
            connections: Arc::clone(&connections),
        };

        let mut selectors = Vec::with_capacity(config.selectors.len());
        for selector_config in &config.selectors {
            let selector = Arc::new(Selector::new(selector_ctx.clone(), selector_config)?);
            outbounds.add(Arc::clone(&selector) as Arc<dyn Outbound>);
            selectors.push(selector);
        }

        Ok(Self {
            outbounds,
            providers,
            connections,
            store,
            selectors,
        })
    }

    /// Start providers, then selectors with dependencies first
    ///
    /// # Errors
    ///
    /// Returns `SelectorError::DependencyCycle` if selectors reference each
    /// other in a loop, or the first provider or selector start error.
    pub fn start(&self) -> Result<(), RouterError> {
        let order = start_order(&self.selectors)?;

        self.providers.start()?;
        for selector in order {
            selector.start()?;
            info!(
                "Selector {} ready: {} ({} candidates)",
                selector.tag(),
                selector.now(),
                selector.all().len()
            );
        }
        Ok(())
    }

    /// Switch `group` to `tag`
    ///
    /// Returns `false` if `tag` is not a candidate of the group.
    ///
    /// # Errors
    ///
    /// Returns `SelectorError::NotFound` if no selector has tag `group`.
    pub fn select(&self, group: &str, tag: &str) -> Result<bool, SelectorError> {
        let selector = self
            .selector(group)
            .ok_or_else(|| SelectorError::NotFound(group.to_string()))?;
        Ok(selector.select_outbound(tag))
    }

    /// Look up a selector by tag
    #[must_use]
    pub fn selector(&self, tag: &str) -> Option<Arc<Selector>> {
        self.selectors.iter().find(|s| s.tag() == tag).cloned()
    }

    /// All selectors, in configuration order
    #[must_use]
    pub fn selectors(&self) -> &[Arc<Selector>] {
        &self.selectors
    }

    /// Outbound registry
    #[must_use]
    pub fn outbounds(&self) -> &Arc<OutboundManager> {
        &self.outbounds
    }

    /// Provider manager
    #[must_use]
    pub fn providers(&self) -> &Arc<ProviderManager> {
        &self.providers
    }

    /// Connection manager shared by the selectors
    #[must_use]
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Selection store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SelectionStore> {
        &self.store
    }

    /// Log the active member of every selector, then per-outbound detail
    pub fn log_status(&self) {
        for selector in &self.selectors {
            info!(
                "Selector {}: now={} candidates={:?}",
                selector.tag(),
                selector.now(),
                selector.all()
            );
        }
        let stats = self.connections.stats_snapshot();
        debug!(
            "Connections: internal={} external={} active={} failed={} interrupted={}",
            stats.internal, stats.external, stats.active, stats.failed, stats.interrupted
        );
        self.outbounds.log_status();
    }

    /// Close providers and release the outbound registry
    pub fn close(&self) {
        self.providers.close();
        self.outbounds.clear();
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tags: Vec<&str> = self.selectors.iter().map(|s| s.tag()).collect();
        f.debug_struct("Router")
            .field("outbounds", &self.outbounds.len())
            .field("providers", &self.providers.len())
            .field("selectors", &tags)
            .finish_non_exhaustive()
    }
}

fn base_dir(config: &Config) -> PathBuf {
    config
        .base_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Order selectors so every selector starts after the selectors it lists
fn start_order(selectors: &[Arc<Selector>]) -> Result<Vec<Arc<Selector>>, SelectorError> {
    let index: HashMap<&str, usize> = selectors
        .iter()
        .enumerate()
        .map(|(i, s)| (s.tag(), i))
        .collect();

    let mut pending = vec![0usize; selectors.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); selectors.len()];
    for (i, selector) in selectors.iter().enumerate() {
        for dep in selector.dependencies() {
            if let Some(&j) = index.get(dep.as_str()) {
                pending[i] += 1;
                dependents[j].push(i);
            }
        }
    }

    let mut ready: VecDeque<usize> = (0..selectors.len()).filter(|&i| pending[i] == 0).collect();
    let mut order = Vec::with_capacity(selectors.len());
    while let Some(i) = ready.pop_front() {
        order.push(Arc::clone(&selectors[i]));
        for &k in &dependents[i] {
            pending[k] -= 1;
            if pending[k] == 0 {
                ready.push_back(k);
            }
        }
    }

    if order.len() < selectors.len() {
        let stuck = (0..selectors.len())
            .filter(|&i| pending[i] > 0)
            .map(|i| selectors[i].tag().to_string())
            .collect();
        return Err(SelectorError::DependencyCycle(stuck));
    }
    Ok(order)
}
