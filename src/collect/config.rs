// src/collect/config.rs
use anyhow::{anyhow, Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::collect::extract::ValueBounds;
use crate::collect::fetcher::RetryPolicy;
use crate::collect::registry::SourceRegistry;
use crate::collect::types::SourceDescriptor;

const ENV_PATH: &str = "COLLECTOR_REGISTRY_PATH";

/// Run-wide knobs. Every field has a default, so `[settings]` may be partial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorSettings {
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub inter_region_delay_ms: u64,
    pub min_value: Decimal,
    pub max_value: Decimal,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_attempts: 3,
            backoff_base_ms: 500,
            inter_region_delay_ms: 3000,
            min_value: Decimal::ZERO,
            max_value: Decimal::from(10_000),
        }
    }
}

impl CollectorSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
        }
    }

    pub fn inter_region_delay(&self) -> Duration {
        Duration::from_millis(self.inter_region_delay_ms)
    }

    pub fn bounds(&self) -> ValueBounds {
        ValueBounds {
            min_exclusive: self.min_value,
            max_exclusive: self.max_value,
        }
    }

    /// COLLECTOR_TIMEOUT_SECS, COLLECTOR_MAX_ATTEMPTS, COLLECTOR_BACKOFF_MS and
    /// COLLECTOR_DELAY_MS win over file values. Unparsable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        fn env_num<T: std::str::FromStr>(key: &str) -> Option<T> {
            let raw = std::env::var(key).ok()?;
            match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(key, value = %raw, "ignoring unparsable override");
                    None
                }
            }
        }
        if let Some(v) = env_num("COLLECTOR_TIMEOUT_SECS") {
            self.timeout_secs = v;
        }
        if let Some(v) = env_num("COLLECTOR_MAX_ATTEMPTS") {
            self.max_attempts = v;
        }
        if let Some(v) = env_num("COLLECTOR_BACKOFF_MS") {
            self.backoff_base_ms = v;
        }
        if let Some(v) = env_num("COLLECTOR_DELAY_MS") {
            self.inter_region_delay_ms = v;
        }
        self
    }
}

/// On-disk shape of a registry file (TOML or JSON).
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RegistryFile {
    settings: CollectorSettings,
    /// Merge `regions` over the built-in registry instead of replacing it.
    extend_defaults: bool,
    regions: Vec<SourceDescriptor>,
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub settings: CollectorSettings,
    pub registry: SourceRegistry,
    /// File the config came from; `None` means built-in defaults.
    pub source: Option<PathBuf>,
}

/// Load a registry file. Supports TOML or JSON formats.
pub fn load_from(path: &Path) -> Result<LoadedConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading registry from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let file = parse_registry(&content, ext.as_str())
        .with_context(|| format!("parsing registry {}", path.display()))?;
    let mut cfg = build(file)?;
    cfg.source = Some(path.to_path_buf());
    Ok(cfg)
}

/// Load config using env var + fallbacks:
/// 1) $COLLECTOR_REGISTRY_PATH
/// 2) config/sources.toml
/// 3) config/sources.json
/// 4) built-in registry with default settings
///
/// Env overrides and API keys are applied in every case.
pub fn load_default() -> Result<LoadedConfig> {
    let cfg = if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            return Err(anyhow!("{ENV_PATH} points to non-existent path"));
        }
        load_from(&pb)?
    } else {
        let toml_p = PathBuf::from("config/sources.toml");
        let json_p = PathBuf::from("config/sources.json");
        if toml_p.exists() {
            load_from(&toml_p)?
        } else if json_p.exists() {
            load_from(&json_p)?
        } else {
            LoadedConfig {
                settings: CollectorSettings::default(),
                registry: SourceRegistry::builtin(),
                source: None,
            }
        }
    };
    Ok(LoadedConfig {
        settings: cfg.settings.with_env_overrides(),
        registry: cfg.registry.resolve_api_keys(),
        source: cfg.source,
    })
}

fn parse_registry(s: &str, hint_ext: &str) -> Result<RegistryFile> {
    match hint_ext {
        "toml" => Ok(toml::from_str(s)?),
        "json" => Ok(serde_json::from_str(s)?),
        // Unknown extension: JSON documents start with `{`.
        _ if s.trim_start().starts_with('{') => Ok(serde_json::from_str(s)?),
        _ => Ok(toml::from_str(s)?),
    }
}

fn build(file: RegistryFile) -> Result<LoadedConfig> {
    if file.settings.min_value >= file.settings.max_value {
        return Err(anyhow!(
            "settings.min_value ({}) must be below settings.max_value ({})",
            file.settings.min_value,
            file.settings.max_value
        ));
    }
    let registry = if file.extend_defaults {
        SourceRegistry::builtin().merged_with(file.regions)?
    } else {
        SourceRegistry::new(file.regions)?
    };
    if registry.is_empty() {
        tracing::warn!("registry file defines no regions");
    }
    Ok(LoadedConfig {
        settings: file.settings,
        registry,
        source: None,
    })
}
