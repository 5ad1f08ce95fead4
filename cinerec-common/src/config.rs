//! Configuration loading for cinerec tools
//!
//! Provides two-tier configuration resolution with ENV → TOML priority.
//! Provider API keys may live in the environment (deployment) or in the
//! TOML file (development); the environment wins when both are set.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the config file location
pub const CONFIG_ENV_VAR: &str = "CINEREC_CONFIG";

/// Default config file path (working directory)
pub const DEFAULT_CONFIG_PATH: &str = "cinerec.toml";

/// Per-provider connector configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key (may instead come from CINEREC_<PROVIDER>_API_KEY)
    pub api_key: Option<String>,
    /// Token bucket refill rate; provider policy default applies when unset
    pub requests_per_second: Option<u32>,
    /// Disabled providers are skipped entirely
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Provider table from the TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub tmdb: ProviderConfig,
    #[serde(default)]
    pub omdb: ProviderConfig,
    #[serde(default)]
    pub wikidata: ProviderConfig,
}

/// TOML configuration file contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// SQLite database path (overridable on the command line)
    pub database_path: Option<PathBuf>,
    /// Deterministic tie-break order, highest priority first.
    /// "manual" and "internal" are recognized pseudo-sources.
    pub source_priority: Option<Vec<String>>,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            source_priority: None,
            providers: ProvidersConfig::default(),
        }
    }
}

impl TomlConfig {
    /// Source priority order with the built-in default applied
    pub fn source_priority(&self) -> Vec<String> {
        self.source_priority.clone().unwrap_or_else(|| {
            ["manual", "internal", "wikidata", "tmdb", "omdb"]
                .iter()
                .map(|s| s.to_string())
                .collect()
        })
    }
}

/// Load TOML configuration
///
/// Resolution order for the file location:
/// 1. Explicit path (command-line argument)
/// 2. `CINEREC_CONFIG` environment variable
/// 3. `./cinerec.toml` if present
/// 4. Built-in defaults (no file)
pub fn load_toml_config(explicit_path: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit_path {
        Some(p) => Some(p.to_path_buf()),
        None => match std::env::var(CONFIG_ENV_VAR) {
            Ok(p) => Some(PathBuf::from(p)),
            Err(_) => {
                let default = PathBuf::from(DEFAULT_CONFIG_PATH);
                default.exists().then_some(default)
            }
        },
    };

    let Some(path) = path else {
        return Ok(TomlConfig::default());
    };

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read config {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse config {} failed: {}", path.display(), e)))?;

    info!("Configuration loaded from {}", path.display());
    Ok(config)
}

/// Resolve a provider API key from 2-tier configuration
///
/// **Priority:** ENV → TOML. Warns when the key is present in multiple
/// sources (potential misconfiguration).
pub fn resolve_api_key(
    provider: &str,
    env_var: &str,
    toml_key: Option<&str>,
) -> Result<String> {
    let env_key = std::env::var(env_var).ok().filter(|k| is_valid_key(k));
    let toml_key = toml_key.filter(|k| is_valid_key(k));

    if env_key.is_some() && toml_key.is_some() {
        warn!(
            "{} API key found in both environment and TOML. Using environment (highest priority).",
            provider
        );
    }

    if let Some(key) = env_key {
        info!("{} API key loaded from environment variable", provider);
        return Ok(key);
    }

    if let Some(key) = toml_key {
        info!("{} API key loaded from TOML config", provider);
        return Ok(key.to_string());
    }

    Err(Error::Config(format!(
        "{} API key not configured. Set {} or add it to {}.",
        provider, env_var, DEFAULT_CONFIG_PATH
    )))
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_source_priority() {
        let config = TomlConfig::default();
        let priority = config.source_priority();
        assert_eq!(priority[0], "manual");
        assert_eq!(priority[1], "internal");
        assert_eq!(priority.len(), 5);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            database_path = "portal.db"
            source_priority = ["manual", "internal", "tmdb"]

            [providers.tmdb]
            api_key = "abc123"
            requests_per_second = 4

            [providers.omdb]
            enabled = false
        "#;
        let config: TomlConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.database_path.as_deref(), Some(Path::new("portal.db")));
        assert_eq!(config.source_priority().len(), 3);
        assert_eq!(config.providers.tmdb.api_key.as_deref(), Some("abc123"));
        assert_eq!(config.providers.tmdb.requests_per_second, Some(4));
        assert!(!config.providers.omdb.enabled);
        assert!(config.providers.wikidata.enabled);
    }

    #[test]
    fn test_is_valid_key() {
        assert!(is_valid_key("abc"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("   "));
    }

    #[test]
    fn test_load_explicit_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cinerec.toml");
        std::fs::write(&path, "database_path = \"portal.db\"\n").unwrap();

        let config = load_toml_config(Some(&path)).unwrap();
        assert_eq!(config.database_path.as_deref(), Some(Path::new("portal.db")));

        let missing = load_toml_config(Some(&dir.path().join("absent.toml")));
        assert!(missing.is_err());
    }
}
