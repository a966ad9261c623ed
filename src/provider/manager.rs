//! Provider Manager
//!
//! Holds the live providers in registration order. Providers created after
//! [`ProviderManager::start`] are started immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::{Provider, ProviderContext, ProviderRegistry};
use crate::error::ProviderError;

/// Manages all configured providers
pub struct ProviderManager {
    registry: ProviderRegistry,
    providers: RwLock<Vec<Arc<dyn Provider>>>,
    started: AtomicBool,
}

impl ProviderManager {
    /// Create a manager using `registry` for construction
    #[must_use]
    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            registry,
            providers: RwLock::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Factory registry
    #[must_use]
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// All providers, in registration order
    #[must_use]
    pub fn providers(&self) -> Vec<Arc<dyn Provider>> {
        self.providers.read().clone()
    }

    /// Look up a provider by tag
    #[must_use]
    pub fn provider(&self, tag: &str) -> Option<Arc<dyn Provider>> {
        self.providers
            .read()
            .iter()
            .find(|p| p.tag() == tag)
            .cloned()
    }

    /// Number of providers
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.read().len()
    }

    /// Check if no providers are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }

    /// Build and register a provider
    ///
    /// A provider already registered under `tag` is closed and replaced in
    /// place.
    ///
    /// # Errors
    ///
    /// Returns the construction error, or the start error when the manager
    /// is already running.
    pub fn create(
        &self,
        ctx: &ProviderContext,
        tag: &str,
        provider_type: &str,
        options: serde_json::Value,
    ) -> Result<(), ProviderError> {
        let provider = self.registry.create(ctx, tag, provider_type, options)?;
        self.add(provider)
    }

    /// Register an already-built provider
    ///
    /// When `provider` replaces one with the same tag, the old provider is
    /// closed and the selectors bound to that tag are told to rebuild from
    /// the new one.
    ///
    /// # Errors
    ///
    /// Returns the start error when the manager is already running.
    pub fn add(&self, provider: Arc<dyn Provider>) -> Result<(), ProviderError> {
        if self.started.load(Ordering::Acquire) {
            provider.start()?;
        }

        let replaced = {
            let mut providers = self.providers.write();
            match providers.iter().position(|p| p.tag() == provider.tag()) {
                Some(index) => Some(std::mem::replace(&mut providers[index], Arc::clone(&provider))),
                None => {
                    providers.push(Arc::clone(&provider));
                    None
                }
            }
        };

        info!(
            "Adding provider: {} (type: {})",
            provider.tag(),
            provider.provider_type()
        );
        if let Some(old) = replaced {
            info!("Replaced provider: {}", old.tag());
            old.close();
            provider.update_groups();
        }
        Ok(())
    }

    /// Unregister and close a provider
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::NotFound` if no provider has `tag`.
    pub fn remove(&self, tag: &str) -> Result<(), ProviderError> {
        let removed = {
            let mut providers = self.providers.write();
            let index = providers
                .iter()
                .position(|p| p.tag() == tag)
                .ok_or_else(|| ProviderError::NotFound(tag.to_string()))?;
            providers.remove(index)
        };
        info!("Removing provider: {}", tag);
        removed.close();
        Ok(())
    }

    /// Start every provider
    ///
    /// # Errors
    ///
    /// Returns the first start error.
    pub fn start(&self) -> Result<(), ProviderError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        for provider in self.providers() {
            provider.start()?;
        }
        Ok(())
    }

    /// Close and unregister every provider
    pub fn close(&self) {
        self.started.store(false, Ordering::Release);
        let providers = std::mem::take(&mut *self.providers.write());
        for provider in providers {
            provider.close();
        }
    }
}

impl Default for ProviderManager {
    fn default() -> Self {
        Self::new(ProviderRegistry::with_defaults())
    }
}

impl Drop for ProviderManager {
    fn drop(&mut self) {
        if !self.providers.get_mut().is_empty() {
            debug!("Closing providers on drop");
            self.close();
        }
    }
}

impl std::fmt::Debug for ProviderManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tags: Vec<String> = self
            .providers
            .read()
            .iter()
            .map(|p| p.tag().to_string())
            .collect();
        f.debug_struct("ProviderManager")
            .field("providers", &tags)
            .field("started", &self.started.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::OutboundManager;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ProviderContext) {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.json"), r#"[{"tag": "a1", "type": "direct"}]"#).unwrap();
        fs::write(dir.path().join("b.json"), r#"[{"tag": "b1", "type": "direct"}]"#).unwrap();
        let ctx =
            ProviderContext::new(Arc::new(OutboundManager::new())).with_base_dir(dir.path());
        (dir, ctx)
    }

    #[test]
    fn test_create_keeps_registration_order() {
        let (_dir, ctx) = setup();
        let manager = ProviderManager::default();
        manager.create(&ctx, "b", "local", json!({"path": "b.json"})).unwrap();
        manager.create(&ctx, "a", "local", json!({"path": "a.json"})).unwrap();

        let tags: Vec<_> = manager.providers().iter().map(|p| p.tag().to_string()).collect();
        assert_eq!(tags, vec!["b", "a"]);
        assert!(manager.provider("a").is_some());
        assert!(manager.provider("c").is_none());
    }

    #[test]
    fn test_create_replaces_same_tag() {
        let (_dir, ctx) = setup();
        let manager = ProviderManager::default();
        manager.create(&ctx, "sub", "local", json!({"path": "a.json"})).unwrap();
        let old = manager.provider("sub").unwrap();

        manager.create(&ctx, "sub", "local", json!({"path": "b.json"})).unwrap();
        assert_eq!(manager.len(), 1);
        assert!(manager.provider("sub").unwrap().outbound("b1").is_some());
        assert!(old.outbounds().is_empty());
    }

    #[test]
    fn test_remove_closes_provider() {
        let (_dir, ctx) = setup();
        let manager = ProviderManager::default();
        manager.create(&ctx, "a", "local", json!({"path": "a.json"})).unwrap();
        let provider = manager.provider("a").unwrap();

        manager.remove("a").unwrap();
        assert!(manager.is_empty());
        assert!(provider.outbounds().is_empty());
        assert!(matches!(manager.remove("a"), Err(ProviderError::NotFound(_))));
    }

    #[test]
    fn test_start_and_close() {
        let (_dir, ctx) = setup();
        let manager = ProviderManager::default();
        manager.create(&ctx, "a", "local", json!({"path": "a.json"})).unwrap();
        manager.start().unwrap();
        manager.create(&ctx, "b", "local", json!({"path": "b.json"})).unwrap();

        manager.close();
        assert!(manager.is_empty());
    }
}
