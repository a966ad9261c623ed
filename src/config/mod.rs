//! Configuration module for selector-router
//!
//! This module provides configuration types and loading utilities.
//!
//! # Example
//!
//! ```no_run
//! use selector_router::config::{load_config, Config};
//!
//! let config = load_config("/etc/selector-router/config.json").unwrap();
//! println!("Selectors: {}", config.selectors.len());
//! ```

mod loader;
mod types;

pub use loader::{create_default_config, load_config, load_config_str, load_config_with_env};
pub use types::{
    Config, ConnectionConfig, LocalProviderOptions, LogConfig, OutboundConfig, OutboundType,
    ProviderConfig, SelectorConfig, COMPATIBLE_OUTBOUND_TAG,
};
