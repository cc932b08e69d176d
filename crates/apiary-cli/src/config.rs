use anyhow::Context;
use apiary_swarm::SwarmConfig;
use serde::Deserialize;
use std::path::Path;

/// Top-level CLI configuration, loaded from a TOML file.
#[derive(Debug, Deserialize)]
pub struct ApiaryConfig {
    /// Default tracing filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Coordinator configuration.
    #[serde(default)]
    pub swarm: SwarmConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ApiaryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            swarm: SwarmConfig::default(),
        }
    }
}

impl ApiaryConfig {
    /// Load the config file; a missing file yields the defaults.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }
}
