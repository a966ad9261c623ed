//! Configuration types for selector-router
//!
//! This module defines all configuration structures used by the router.
//! Configuration is loaded from JSON files and validated at startup.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tag of the sentinel outbound served by an empty selector
pub const COMPATIBLE_OUTBOUND_TAG: &str = "Compatible";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Static outbound configurations
    #[serde(default)]
    pub outbounds: Vec<OutboundConfig>,

    /// Outbound providers
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Selector groups
    #[serde(default)]
    pub selectors: Vec<SelectorConfig>,

    /// Path of the persisted selection file
    #[serde(default)]
    pub cache_file: Option<PathBuf>,

    /// Base directory for relative provider paths
    #[serde(default)]
    pub base_dir: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,

    /// Connection timeouts
    #[serde(default)]
    pub connection: ConnectionConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut outbound_tags: HashSet<&str> = HashSet::new();
        for outbound in &self.outbounds {
            outbound.validate()?;
            if !outbound_tags.insert(&outbound.tag) {
                return Err(ConfigError::validation(format!(
                    "Duplicate outbound tag: {}",
                    outbound.tag
                )));
            }
        }

        let mut provider_tags: HashSet<&str> = HashSet::new();
        for provider in &self.providers {
            provider.validate()?;
            if !provider_tags.insert(&provider.tag) {
                return Err(ConfigError::validation(format!(
                    "Duplicate provider tag: {}",
                    provider.tag
                )));
            }
        }

        for selector in &self.selectors {
            selector.validate()?;
            if !outbound_tags.insert(&selector.tag) {
                return Err(ConfigError::validation(format!(
                    "Duplicate outbound tag: {}",
                    selector.tag
                )));
            }
            if !selector.use_all_providers {
                for tag in &selector.providers {
                    if !provider_tags.contains(tag.as_str()) {
                        return Err(ConfigError::validation(format!(
                            "Selector '{}' references unknown provider: {}",
                            selector.tag, tag
                        )));
                    }
                }
            }
        }

        self.connection.validate()?;

        Ok(())
    }

    /// Create a minimal default configuration
    #[must_use]
    pub fn default_config() -> Self {
        Self {
            outbounds: vec![
                OutboundConfig::direct("direct"),
                OutboundConfig::block("block"),
            ],
            providers: Vec::new(),
            selectors: vec![SelectorConfig::new("proxy", ["direct", "block"])],
            cache_file: Some(PathBuf::from("cache.json")),
            base_dir: None,
            log: LogConfig::default(),
            connection: ConnectionConfig::default(),
        }
    }
}

/// Outbound configuration
///
/// Used both for static outbounds and for the records produced by a
/// subscription parser. Equality decides whether a provider reload can
/// keep an existing outbound instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OutboundConfig {
    /// Unique tag for this outbound
    pub tag: String,

    /// Outbound type
    #[serde(rename = "type")]
    pub outbound_type: OutboundType,

    /// Bind to specific address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<SocketAddr>,

    /// Set routing mark (SO_MARK)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_mark: Option<u32>,
}

impl OutboundConfig {
    /// Create a direct outbound configuration
    pub fn direct(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            outbound_type: OutboundType::Direct,
            bind_address: None,
            routing_mark: None,
        }
    }

    /// Create a block outbound configuration
    pub fn block(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            outbound_type: OutboundType::Block,
            bind_address: None,
            routing_mark: None,
        }
    }

    /// Validate outbound configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tag.trim().is_empty() {
            return Err(ConfigError::validation("Outbound tag cannot be empty"));
        }
        Ok(())
    }
}

/// Outbound types supported by selector-router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundType {
    /// Direct connection to destination
    Direct,

    /// Block/drop connection
    Block,
}

impl std::fmt::Display for OutboundType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Block => write!(f, "block"),
        }
    }
}

/// Provider configuration
///
/// Everything except `tag` and `type` is handed to the provider factory
/// registered for `type`, which decodes it into its own options struct.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Unique provider tag
    pub tag: String,

    /// Provider type name (e.g. "local")
    #[serde(rename = "type")]
    pub provider_type: String,

    /// Type-specific options
    #[serde(flatten)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl ProviderConfig {
    /// Create a local (file-backed) provider configuration
    pub fn local(tag: impl Into<String>, path: impl Into<String>) -> Self {
        let mut options = serde_json::Map::new();
        options.insert("path".into(), serde_json::Value::String(path.into()));
        Self {
            tag: tag.into(),
            provider_type: "local".into(),
            options,
        }
    }

    /// Validate provider configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tag.trim().is_empty() {
            return Err(ConfigError::validation("Provider tag cannot be empty"));
        }
        if self.provider_type.trim().is_empty() {
            return Err(ConfigError::validation(format!(
                "Provider '{}' has no type",
                self.tag
            )));
        }
        Ok(())
    }

    /// Options as a JSON value for the provider factory
    #[must_use]
    pub fn options_value(&self) -> serde_json::Value {
        serde_json::Value::Object(self.options.clone())
    }
}

/// Options of the local (file-backed) provider
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LocalProviderOptions {
    /// Path of the subscription file, relative to the base directory
    #[serde(default)]
    pub path: String,
}

/// Selector group configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SelectorConfig {
    /// Tag of the selector itself
    pub tag: String,

    /// Static member outbound tags, in order
    #[serde(default)]
    pub outbounds: Vec<String>,

    /// Bound provider tags, in order
    #[serde(default)]
    pub providers: Vec<String>,

    /// Bind every provider registered when the selector starts
    #[serde(default)]
    pub use_all_providers: bool,

    /// Default member when nothing is persisted
    #[serde(default)]
    pub default: Option<String>,

    /// Keep only provider outbounds whose tag matches
    #[serde(default)]
    pub include: Option<String>,

    /// Drop provider outbounds whose tag matches
    #[serde(default)]
    pub exclude: Option<String>,

    /// Also interrupt externally-initiated connections on a switch
    #[serde(default)]
    pub interrupt_exist_connections: bool,
}

impl SelectorConfig {
    /// Create a selector over static outbounds
    pub fn new<I, S>(tag: impl Into<String>, outbounds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tag: tag.into(),
            outbounds: outbounds.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Validate selector configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tag.trim().is_empty() {
            return Err(ConfigError::validation("Selector tag cannot be empty"));
        }
        if self.outbounds.is_empty() && self.providers.is_empty() && !self.use_all_providers {
            return Err(ConfigError::validation(format!(
                "Selector '{}' has no outbounds or providers",
                self.tag
            )));
        }
        if self.outbounds.iter().any(|t| t == &self.tag) {
            return Err(ConfigError::validation(format!(
                "Selector '{}' lists itself as a member",
                self.tag
            )));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include target (module path)
    #[serde(default = "default_true")]
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: true,
        }
    }
}

/// Connection timeouts
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    /// Outbound connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Idle timeout for bridged UDP sessions in seconds
    #[serde(default = "default_udp_timeout_secs")]
    pub udp_timeout_secs: u64,
}

impl ConnectionConfig {
    /// Validate connection configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::validation(
                "connect_timeout_secs must be greater than 0",
            ));
        }
        if self.udp_timeout_secs == 0 {
            return Err(ConfigError::validation(
                "udp_timeout_secs must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Get connect timeout as Duration
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get UDP idle timeout as Duration
    #[must_use]
    pub const fn udp_timeout(&self) -> Duration {
        Duration::from_secs(self.udp_timeout_secs)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            udp_timeout_secs: default_udp_timeout_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_udp_timeout_secs() -> u64 {
    60
}
