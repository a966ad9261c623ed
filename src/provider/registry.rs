//! Provider factories keyed by type name

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{LocalProvider, Provider, ProviderContext, PROVIDER_TYPE_LOCAL};
use crate::config::LocalProviderOptions;
use crate::error::ProviderError;

type Factory = Arc<
    dyn Fn(&ProviderContext, &str, serde_json::Value) -> Result<Arc<dyn Provider>, ProviderError>
        + Send
        + Sync,
>;

/// Registry of provider factories
pub struct ProviderRegistry {
    factories: RwLock<HashMap<String, Factory>>,
}

impl ProviderRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry with the built-in provider types
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register::<LocalProviderOptions, _>(PROVIDER_TYPE_LOCAL, |ctx, tag, options| {
            let provider: Arc<dyn Provider> = LocalProvider::new(ctx, tag, options)?;
            Ok(provider)
        });
        registry
    }

    /// Register a factory for `provider_type`
    ///
    /// Options arrive as JSON and are decoded into `O` before the factory
    /// runs. Registering an existing type replaces its factory.
    pub fn register<O, F>(&self, provider_type: &str, factory: F)
    where
        O: DeserializeOwned,
        F: Fn(&ProviderContext, &str, O) -> Result<Arc<dyn Provider>, ProviderError>
            + Send
            + Sync
            + 'static,
    {
        let type_name = provider_type.to_string();
        let wrapped: Factory = Arc::new(
            move |ctx: &ProviderContext, tag: &str, options: serde_json::Value| {
                let options: O = serde_json::from_value(options).map_err(|e| {
                    ProviderError::InvalidOptions {
                        provider_type: type_name.clone(),
                        tag: tag.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                factory(ctx, tag, options)
            },
        );
        debug!("Registered provider type: {}", provider_type);
        self.factories
            .write()
            .insert(provider_type.to_string(), wrapped);
    }

    /// Check if a type is registered
    #[must_use]
    pub fn contains(&self, provider_type: &str) -> bool {
        self.factories.read().contains_key(provider_type)
    }

    /// Registered type names, sorted
    #[must_use]
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.factories.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// Build a provider with the factory registered for `provider_type`
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::UnknownType` for unregistered types,
    /// `ProviderError::InvalidOptions` if the options do not decode, or the
    /// factory's own error.
    pub fn create(
        &self,
        ctx: &ProviderContext,
        tag: &str,
        provider_type: &str,
        options: serde_json::Value,
    ) -> Result<Arc<dyn Provider>, ProviderError> {
        let factory = self
            .factories
            .read()
            .get(provider_type)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownType(provider_type.to_string()))?;
        factory(ctx, tag, options)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("types", &self.types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::OutboundManager;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_register_local() {
        let registry = ProviderRegistry::with_defaults();
        assert!(registry.contains("local"));
        assert_eq!(registry.types(), vec!["local"]);
    }

    #[test]
    fn test_create_local() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("sub.json"), r#"[{"tag": "a", "type": "direct"}]"#)
            .unwrap();
        let ctx =
            ProviderContext::new(Arc::new(OutboundManager::new())).with_base_dir(dir.path());

        let provider = ProviderRegistry::with_defaults()
            .create(&ctx, "sub", "local", json!({"path": "sub.json"}))
            .unwrap();
        assert_eq!(provider.tag(), "sub");
        assert_eq!(provider.outbounds().len(), 1);
    }

    #[test]
    fn test_create_errors() {
        let ctx = ProviderContext::new(Arc::new(OutboundManager::new()));
        let registry = ProviderRegistry::with_defaults();

        assert!(matches!(
            registry.create(&ctx, "sub", "remote", json!({})),
            Err(ProviderError::UnknownType(t)) if t == "remote"
        ));
        assert!(matches!(
            registry.create(&ctx, "sub", "local", json!({"path": 5})),
            Err(ProviderError::InvalidOptions { .. })
        ));
        assert!(matches!(
            registry.create(&ctx, "sub", "local", json!({})),
            Err(ProviderError::MissingPath)
        ));
    }
}
