//! Configuration schema for scrun
//!
//! Configuration is stored at `~/.config/scrun/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Node.js executables
    pub runtime: RuntimeConfig,

    /// npm settings
    pub npm: NpmConfig,

    /// Cache settings
    pub cache: CacheConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Node.js executables used to run scripts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Executable used when the current runtime satisfies the engine constraint
    pub node: String,

    /// Executable used to fetch and run another major version
    pub npx: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            node: "node".to_string(),
            npx: "npx".to_string(),
        }
    }
}

/// npm configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NpmConfig {
    /// npm executable
    pub program: String,

    /// Registry exported as NPM_CONFIG_REGISTRY unless the environment sets one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,

    /// Try a silent `--offline` install before allowing the network
    pub offline_first: bool,
}

impl Default for NpmConfig {
    fn default() -> Self {
        Self {
            program: "npm".to_string(),
            registry: None,
            offline_first: true,
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache root (default: platform cache dir + `scrun/script-cache`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[npm]"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.runtime.node, "node");
        assert_eq!(config.npm.program, "npm");
        assert!(config.npm.offline_first);
        assert!(config.cache.dir.is_none());
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [npm]
            registry = "https://registry.example.com/"

            [cache]
            dir = "/tmp/scrun-cache"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.npm.registry.as_deref(), Some("https://registry.example.com/"));
        assert_eq!(config.npm.program, "npm"); // default preserved
        assert_eq!(config.cache.dir, Some(PathBuf::from("/tmp/scrun-cache")));
    }
}
