//! Outbound Manager
//!
//! Registry of every outbound the router knows about, keyed by tag. Plain
//! outbounds from configuration, selector groups and the fallback outbound
//! all live here; provider-sourced outbounds do not.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use super::traits::Outbound;
use super::{BlockOutbound, DirectOutbound};
use crate::config::{OutboundConfig, OutboundType};

/// Build an outbound from its configuration record
#[must_use]
pub fn create_outbound(config: &OutboundConfig) -> Arc<dyn Outbound> {
    match config.outbound_type {
        OutboundType::Direct => Arc::new(DirectOutbound::new(config.clone())),
        OutboundType::Block => Arc::new(BlockOutbound::from_config(config)),
    }
}

/// Manages all registered outbounds
pub struct OutboundManager {
    outbounds: DashMap<String, Arc<dyn Outbound>>,
}

impl OutboundManager {
    /// Create a new outbound manager
    #[must_use]
    pub fn new() -> Self {
        Self {
            outbounds: DashMap::new(),
        }
    }

    /// Register an outbound, replacing any outbound with the same tag
    pub fn add(&self, outbound: Arc<dyn Outbound>) {
        let tag = outbound.tag().to_string();
        info!(
            "Adding outbound: {} (type: {})",
            tag,
            outbound.outbound_type()
        );
        self.outbounds.insert(tag, outbound);
    }

    /// Get an outbound by tag
    #[must_use]
    pub fn get(&self, tag: &str) -> Option<Arc<dyn Outbound>> {
        self.outbounds.get(tag).map(|r| Arc::clone(r.value()))
    }

    /// Remove an outbound by tag
    pub fn remove(&self, tag: &str) -> Option<Arc<dyn Outbound>> {
        info!("Removing outbound: {}", tag);
        self.outbounds.remove(tag).map(|(_, v)| v)
    }

    /// Check if an outbound exists
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.outbounds.contains_key(tag)
    }

    /// Get all outbound tags
    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        self.outbounds.iter().map(|r| r.key().clone()).collect()
    }

    /// Get the number of registered outbounds
    #[must_use]
    pub fn len(&self) -> usize {
        self.outbounds.len()
    }

    /// Check if no outbounds are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outbounds.is_empty()
    }

    /// Get all outbounds
    #[must_use]
    pub fn all(&self) -> Vec<Arc<dyn Outbound>> {
        self.outbounds.iter().map(|r| Arc::clone(r.value())).collect()
    }

    /// Outbounds whose membership follows `provider_tag`
    #[must_use]
    pub fn provider_listeners(&self, provider_tag: &str) -> Vec<Arc<dyn Outbound>> {
        self.outbounds
            .iter()
            .filter(|r| {
                r.value()
                    .as_provider_listener()
                    .is_some_and(|l| l.has_provider(provider_tag))
            })
            .map(|r| Arc::clone(r.value()))
            .collect()
    }

    /// Drop every registered outbound
    pub fn clear(&self) {
        debug!("Clearing {} outbounds", self.outbounds.len());
        self.outbounds.clear();
    }

    /// Log current status of all outbounds
    pub fn log_status(&self) {
        for entry in &self.outbounds {
            let outbound = entry.value();
            let now = outbound.as_group().map(|g| g.now());
            debug!(
                "Outbound {}: type={} health={} connections={} now={:?}",
                outbound.tag(),
                outbound.outbound_type(),
                outbound.health_status(),
                outbound.stats().connections(),
                now
            );
        }
    }
}

impl Default for OutboundManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OutboundManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundManager")
            .field("count", &self.len())
            .field("tags", &self.tags())
            .finish()
    }
}

/// Builder for creating an `OutboundManager` from configuration
pub struct OutboundManagerBuilder {
    manager: OutboundManager,
}

impl OutboundManagerBuilder {
    /// Create a new builder
    #[must_use]
    pub fn new() -> Self {
        Self {
            manager: OutboundManager::new(),
        }
    }

    /// Add an outbound from configuration
    pub fn add_from_config(&mut self, config: &OutboundConfig) -> &mut Self {
        self.manager.add(create_outbound(config));
        self
    }

    /// Add multiple outbounds from configuration
    pub fn add_all_from_config(&mut self, configs: &[OutboundConfig]) -> &mut Self {
        for config in configs {
            self.add_from_config(config);
        }
        self
    }

    /// Build the manager
    #[must_use]
    pub fn build(self) -> OutboundManager {
        self.manager
    }
}

impl Default for OutboundManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_get() {
        let manager = OutboundManager::new();

        manager.add(Arc::new(DirectOutbound::simple("direct")));
        manager.add(Arc::new(BlockOutbound::new("block")));

        assert_eq!(manager.len(), 2);
        assert!(manager.contains("direct"));
        assert!(!manager.contains("nonexistent"));

        let direct = manager.get("direct").unwrap();
        assert_eq!(direct.tag(), "direct");
        assert_eq!(direct.outbound_type(), "direct");
    }

    #[test]
    fn test_add_replaces_same_tag() {
        let manager = OutboundManager::new();
        manager.add(Arc::new(DirectOutbound::simple("out")));
        manager.add(Arc::new(BlockOutbound::new("out")));

        assert_eq!(manager.len(), 1);
        assert_eq!(manager.get("out").unwrap().outbound_type(), "block");
    }

    #[test]
    fn test_remove_and_clear() {
        let manager = OutboundManager::new();
        manager.add(Arc::new(DirectOutbound::simple("a")));
        manager.add(Arc::new(DirectOutbound::simple("b")));

        assert!(manager.remove("a").is_some());
        assert!(manager.remove("a").is_none());
        assert_eq!(manager.len(), 1);

        manager.clear();
        assert!(manager.is_empty());
    }

    #[test]
    fn test_plain_outbounds_are_not_listeners() {
        let manager = OutboundManager::new();
        manager.add(Arc::new(DirectOutbound::simple("a")));
        manager.add(Arc::new(BlockOutbound::new("b")));

        let mut tags = manager.tags();
        tags.sort();
        assert_eq!(tags, vec!["a", "b"]);
        assert!(manager.provider_listeners("sub").is_empty());
    }

    #[test]
    fn test_builder_multiple() {
        let configs = vec![
            OutboundConfig::direct("direct"),
            OutboundConfig::block("block"),
        ];

        let mut builder = OutboundManagerBuilder::new();
        builder.add_all_from_config(&configs);
        let manager = builder.build();

        assert_eq!(manager.len(), 2);
        assert_eq!(manager.get("block").unwrap().outbound_type(), "block");
        assert_eq!(manager.get("direct").unwrap().stats().connections(), 0);
    }
}
