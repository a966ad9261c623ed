//! Configuration loading and management
//!
//! This module handles loading configuration from files and environment variables.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::types::Config;
use crate::error::ConfigError;

/// Load configuration from a JSON file
///
/// A missing `base_dir` defaults to the directory containing the file,
/// so relative provider paths resolve next to the configuration.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read or parsed.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let mut config: Config = serde_json::from_str(&contents).map_err(|e| {
        ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}"))
    })?;

    if config.base_dir.is_none() {
        config.base_dir = path.parent().map(Path::to_path_buf);
    }

    config.validate()?;

    info!(
        "Configuration loaded: {} outbounds, {} providers, {} selectors",
        config.outbounds.len(),
        config.providers.len(),
        config.selectors.len()
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration with environment variable overrides
///
/// Environment variables:
/// - `SELECTOR_ROUTER_LOG_LEVEL`: Override log level
/// - `SELECTOR_ROUTER_CACHE_FILE`: Override persisted selection file
/// - `SELECTOR_ROUTER_BASE_DIR`: Override provider base directory
///
/// # Errors
///
/// Returns `ConfigError` if loading or parsing fails.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let mut config = load_config(path)?;

    if let Ok(level) = std::env::var("SELECTOR_ROUTER_LOG_LEVEL") {
        config.log.level = level;
        debug!("Log level overridden to {}", config.log.level);
    }

    if let Ok(cache_file) = std::env::var("SELECTOR_ROUTER_CACHE_FILE") {
        if cache_file.is_empty() {
            return Err(ConfigError::EnvError {
                name: "SELECTOR_ROUTER_CACHE_FILE".into(),
                reason: "path cannot be empty".into(),
            });
        }
        config.cache_file = Some(PathBuf::from(cache_file));
        debug!("Cache file overridden to {:?}", config.cache_file);
    }

    if let Ok(base_dir) = std::env::var("SELECTOR_ROUTER_BASE_DIR") {
        config.base_dir = Some(PathBuf::from(base_dir));
        debug!("Base directory overridden to {:?}", config.base_dir);
    }

    config.validate()?;

    Ok(config)
}

/// Create a default configuration file at the given path
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be written.
pub fn create_default_config(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let config = Config::default_config();
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {e}")))?;

    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        let config = Config::default_config();
        let json = serde_json::to_string_pretty(&config).unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_config() {
        let file = create_temp_config();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.selectors[0].tag, "proxy");
        assert_eq!(
            config.base_dir.as_deref(),
            file.path().parent()
        );
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config("/nonexistent/path/config.json");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_load_config_str() {
        let json = r#"{
            "outbounds": [{ "tag": "direct", "type": "direct" }],
            "providers": [{ "tag": "sub", "type": "local", "path": "sub.json" }],
            "selectors": [{
                "tag": "proxy",
                "outbounds": ["direct"],
                "providers": ["sub"],
                "include": "^US",
                "interrupt_exist_connections": true
            }]
        }"#;
        let config = load_config_str(json).unwrap();
        let selector = &config.selectors[0];
        assert_eq!(selector.providers, vec!["sub"]);
        assert_eq!(selector.include.as_deref(), Some("^US"));
        assert!(selector.interrupt_exist_connections);
        assert!(!selector.use_all_providers);
    }

    #[test]
    fn test_load_config_invalid_json() {
        let result = load_config_str("not valid json");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_create_default_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        create_default_config(&path).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.outbounds.len(), 2);
    }
}
