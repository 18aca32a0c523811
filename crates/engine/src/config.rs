//! Service configuration

use anyhow::Result;
use engine_lib::EngineConfig;
use serde::Deserialize;
use tracing::warn;

/// Environment variable naming an optional configuration file
pub const CONFIG_FILE_ENV: &str = "ENGINE_CONFIG_FILE";

/// Service configuration
///
/// Values come from the file named by `ENGINE_CONFIG_FILE` (if set), then
/// from `ENGINE_*` environment variables, where `__` separates nested keys
/// (`ENGINE_API_PORT`, `ENGINE_ENGINE__DATA_DIR`).
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Port for the engine API, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_api_port() -> u16 {
    8080
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            engine: EngineConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from the optional file and the environment
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            builder = builder.add_source(config::File::with_name(&path));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("ENGINE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize().unwrap_or_else(|e| {
            warn!(error = %e, "Invalid configuration, using defaults");
            ServiceConfig::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_engine_section() {
        let config: ServiceConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "api_port = 9000\n[engine]\ndata_dir = \"/srv/engine\"\n[engine.retrain]\nretrain_interval = 20\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.api_port, 9000);
        assert_eq!(config.engine.data_dir, std::path::PathBuf::from("/srv/engine"));
        assert_eq!(config.engine.retrain.retrain_interval, 20);
        assert_eq!(config.engine.retrain.min_retrain_samples, 100);
    }

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.api_port, 8080);
        assert!(config.engine.learning_enabled);
    }
}
