// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Coordinator Configuration Types
//
// Defines the configuration schema for a Concord coordinator, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Message bus sizing and request timeouts
// - Bounded cache sizing
// - Arbitration priority and strategy tables
// - Logging settings

use crate::domain::conflict::ResolutionStrategy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "concord.dev/v1";
pub const KIND: &str = "CoordinatorConfig";

/// Priority used for agents missing from the priority table.
pub const DEFAULT_AGENT_PRIORITY: i32 = 5;

/// Top-level Kubernetes-style coordinator configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfigManifest {
    /// API version (must be "concord.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "CoordinatorConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: CoordinatorSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable coordinator name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorSpec {
    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub arbitration: ArbitrationConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Ring-buffer capacity of the message history
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Timeout used by `request_response` when the caller passes none
    #[serde(default = "default_request_timeout_ms")]
    pub default_request_timeout_ms: u64,
}

impl BusConfig {
    pub fn default_request_timeout(&self) -> Duration {
        Duration::from_millis(self.default_request_timeout_ms)
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            default_request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,

    /// Applied when `set` is called without a ttl; `None` means no expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_ttl_secs: Option<u64>,
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs.map(Duration::from_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: default_cache_max_size(),
            default_ttl_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrationConfig {
    #[serde(default = "default_priority")]
    pub default_priority: i32,

    #[serde(default)]
    pub default_strategy: ResolutionStrategy,

    /// Seed priorities (agent id -> priority)
    #[serde(default)]
    pub priorities: BTreeMap<String, i32>,

    /// Seed strategies (conflict type -> strategy)
    #[serde(default)]
    pub strategies: BTreeMap<String, ResolutionStrategy>,
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self {
            default_priority: DEFAULT_AGENT_PRIORITY,
            default_strategy: ResolutionStrategy::PriorityBased,
            priorities: BTreeMap::new(),
            strategies: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// "compact" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_max_history() -> usize {
    1000
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_cache_max_size() -> usize {
    256
}

fn default_priority() -> i32 {
    DEFAULT_AGENT_PRIORITY
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for CoordinatorConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "local-coordinator".to_string(),
                labels: None,
            },
            spec: CoordinatorSpec::default(),
        }
    }
}

impl CoordinatorConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse and validate configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Discover configuration file
    /// Precedence:
    /// 1. CONCORD_CONFIG_PATH environment variable
    /// 2. ./concord-config.yaml (working directory)
    /// 3. ~/.concord/config.yaml (user home)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("CONCORD_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
            tracing::warn!("CONCORD_CONFIG_PATH points to a missing file: {:?}", path);
        }

        let cwd = PathBuf::from("concord-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".concord").join("config.yaml");
            if home_config.exists() {
                return Some(home_config);
            }
        }

        None
    }

    /// Load configuration from an explicit path, discovery, or defaults
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from CLI path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            config.validate()?;
            return Ok(config);
        }

        let mut config = match Self::discover_config() {
            Some(path) => {
                tracing::info!("Loading configuration from discovered path: {:?}", path);
                Self::from_yaml_file(path)?
            }
            None => {
                tracing::debug!("No configuration file found in standard locations. Using defaults.");
                Self::default()
            }
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CONCORD_BUS_MAX_HISTORY") {
            match val.parse::<usize>() {
                Ok(n) => {
                    tracing::info!("Environment override: CONCORD_BUS_MAX_HISTORY={}", n);
                    self.spec.bus.max_history = n;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for CONCORD_BUS_MAX_HISTORY: '{}'. Expected an integer. Ignoring.",
                    val
                ),
            }
        }

        if let Ok(val) = std::env::var("CONCORD_CACHE_MAX_SIZE") {
            match val.parse::<usize>() {
                Ok(n) => {
                    tracing::info!("Environment override: CONCORD_CACHE_MAX_SIZE={}", n);
                    self.spec.cache.max_size = n;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for CONCORD_CACHE_MAX_SIZE: '{}'. Expected an integer. Ignoring.",
                    val
                ),
            }
        }

        if let Ok(val) = std::env::var("CONCORD_LOG_LEVEL") {
            if val.trim().is_empty() {
                tracing::warn!("Empty CONCORD_LOG_LEVEL. Ignoring.");
            } else {
                self.spec.observability.log_level = val;
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.bus.max_history == 0 {
            anyhow::bail!("spec.bus.max_history must be greater than zero");
        }

        if self.spec.bus.default_request_timeout_ms == 0 {
            anyhow::bail!("spec.bus.default_request_timeout_ms must be greater than zero");
        }

        if self.spec.cache.max_size == 0 {
            anyhow::bail!("spec.cache.max_size must be greater than zero");
        }

        match self.spec.observability.log_format.as_str() {
            "compact" | "json" => {}
            other => anyhow::bail!("Unknown log_format '{}'. Expected 'compact' or 'json'", other),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = CoordinatorConfigManifest::default();
        assert_eq!(manifest.api_version, API_VERSION);
        assert_eq!(manifest.kind, KIND);
        assert_eq!(manifest.spec.bus.max_history, 1000);
        assert_eq!(manifest.spec.arbitration.default_priority, DEFAULT_AGENT_PRIORITY);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_parse_minimal_yaml_fills_defaults() {
        let yaml = r#"
apiVersion: concord.dev/v1
kind: CoordinatorConfig
metadata:
  name: review-team
spec:
  bus:
    max_history: 50
  arbitration:
    priorities:
      planner: 8
    strategies:
      resource_contention: first_reporter
"#;
        let config = CoordinatorConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(config.metadata.name, "review-team");
        assert_eq!(config.spec.bus.max_history, 50);
        assert_eq!(config.spec.bus.default_request_timeout_ms, 5000);
        assert_eq!(config.spec.cache.max_size, 256);
        assert_eq!(config.spec.arbitration.priorities.get("planner"), Some(&8));
        assert_eq!(
            config.spec.arbitration.strategies.get("resource_contention"),
            Some(&ResolutionStrategy::FirstReporter)
        );
    }

    #[test]
    fn test_validation() {
        let mut manifest = CoordinatorConfigManifest::default();

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.kind = "NodeConfig".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = KIND.to_string();

        manifest.spec.bus.max_history = 0;
        assert!(manifest.validate().is_err());
        manifest.spec.bus.max_history = 10;

        manifest.spec.cache.max_size = 0;
        assert!(manifest.validate().is_err());
        manifest.spec.cache.max_size = 3;

        manifest.spec.observability.log_format = "xml".to_string();
        assert!(manifest.validate().is_err());
        manifest.spec.observability.log_format = "json".to_string();

        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("concord-config.yaml");

        let mut manifest = CoordinatorConfigManifest::default();
        manifest.spec.cache.default_ttl_secs = Some(30);
        manifest.to_yaml_file(&path).unwrap();

        let loaded = CoordinatorConfigManifest::from_yaml_file(&path).unwrap();
        assert_eq!(loaded.spec.cache.default_ttl(), Some(Duration::from_secs(30)));
        assert_eq!(loaded.metadata.name, manifest.metadata.name);
    }
}
