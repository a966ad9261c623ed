//! Provider adapter
//!
//! Bookkeeping shared by every provider type: the current outbound list,
//! reconciliation of a freshly parsed list against it, notification of the
//! selector groups bound to the provider, and latency health checks.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::LatencyProbe;
use crate::config::OutboundConfig;
use crate::error::ProviderError;
use crate::outbound::{create_outbound, Outbound, OutboundManager};

#[derive(Default)]
struct AdapterState {
    configs: Vec<OutboundConfig>,
    outbounds: Vec<Arc<dyn Outbound>>,
    by_tag: HashMap<String, Arc<dyn Outbound>>,
}

/// Outbound bookkeeping for one provider
pub struct ProviderAdapter {
    tag: String,
    provider_type: String,
    /// Router-wide registry, walked to find bound groups
    manager: Arc<OutboundManager>,
    probe: Option<Arc<dyn LatencyProbe>>,
    state: RwLock<AdapterState>,
}

impl ProviderAdapter {
    /// Create an adapter with no outbounds
    pub fn new(
        tag: impl Into<String>,
        provider_type: impl Into<String>,
        manager: Arc<OutboundManager>,
        probe: Option<Arc<dyn LatencyProbe>>,
    ) -> Self {
        Self {
            tag: tag.into(),
            provider_type: provider_type.into(),
            manager,
            probe,
            state: RwLock::new(AdapterState::default()),
        }
    }

    /// Provider tag
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Provider type name
    #[must_use]
    pub fn provider_type(&self) -> &str {
        &self.provider_type
    }

    /// Current outbounds, in source order
    #[must_use]
    pub fn outbounds(&self) -> Vec<Arc<dyn Outbound>> {
        self.state.read().outbounds.clone()
    }

    /// Look up a current outbound by tag
    #[must_use]
    pub fn outbound(&self, tag: &str) -> Option<Arc<dyn Outbound>> {
        self.state.read().by_tag.get(tag).cloned()
    }

    /// Replace the outbound list with `configs`
    ///
    /// Outbounds whose tag and configuration are unchanged keep their
    /// existing instance, so their live connections survive the reload.
    /// Everything else is created afresh.
    pub fn update_outbounds(&self, configs: Vec<OutboundConfig>) {
        let mut state = self.state.write();

        let previous: HashMap<&str, &OutboundConfig> = state
            .configs
            .iter()
            .map(|c| (c.tag.as_str(), c))
            .collect();

        let mut outbounds = Vec::with_capacity(configs.len());
        let mut by_tag = HashMap::with_capacity(configs.len());
        let mut kept = 0usize;

        for config in &configs {
            let reusable = previous
                .get(config.tag.as_str())
                .filter(|old| **old == config)
                .and_then(|_| state.by_tag.get(&config.tag))
                .cloned();

            let outbound = match reusable {
                Some(existing) => {
                    kept += 1;
                    existing
                }
                None => create_outbound(config),
            };
            by_tag.insert(config.tag.clone(), Arc::clone(&outbound));
            outbounds.push(outbound);
        }

        let removed: Vec<&str> = state
            .configs
            .iter()
            .map(|c| c.tag.as_str())
            .filter(|tag| !by_tag.contains_key(*tag))
            .collect();
        if !removed.is_empty() {
            debug!("Provider {} dropped outbounds: {:?}", self.tag, removed);
        }

        info!(
            "Provider {} updated: {} outbounds ({} kept, {} created)",
            self.tag,
            outbounds.len(),
            kept,
            outbounds.len() - kept
        );

        *state = AdapterState {
            configs,
            outbounds,
            by_tag,
        };
    }

    /// Tell every group bound to this provider to re-run its membership
    pub fn update_groups(&self) {
        for outbound in self.manager.provider_listeners(&self.tag) {
            let Some(listener) = outbound.as_provider_listener() else {
                continue;
            };
            if let Err(e) = listener.update_outbounds(&self.tag) {
                warn!(
                    "Failed to update group {} from provider {}: {}",
                    outbound.tag(),
                    self.tag,
                    e
                );
            }
        }
    }

    /// Probe every current outbound concurrently
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::HealthCheckUnavailable` when no probe is set.
    pub async fn health_check(&self) -> Result<HashMap<String, u16>, ProviderError> {
        let Some(probe) = self.probe.as_ref() else {
            return Err(ProviderError::HealthCheckUnavailable(self.tag.clone()));
        };

        let outbounds = self.outbounds();
        let results = join_all(outbounds.iter().map(|outbound| async move {
            let result = probe.probe(outbound.as_ref()).await;
            (outbound.tag().to_string(), result)
        }))
        .await;

        let mut latencies = HashMap::with_capacity(results.len());
        for (tag, result) in results {
            match result {
                Ok(delay) => {
                    latencies.insert(tag, delay);
                }
                Err(e) => debug!("Health check of {} in {} failed: {}", tag, self.tag, e),
            }
        }
        Ok(latencies)
    }

    /// Release all outbounds
    pub fn close(&self) {
        *self.state.write() = AdapterState::default();
    }
}

impl std::fmt::Debug for ProviderAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("ProviderAdapter")
            .field("tag", &self.tag)
            .field("provider_type", &self.provider_type)
            .field("outbounds", &state.configs.len())
            .finish()
    }
}
