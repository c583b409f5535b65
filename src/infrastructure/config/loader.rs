use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;

use crate::domain::error::ConfigError;
use crate::domain::models::config::Config;

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (`Serialized`)
    /// 2. `.swarmbot/config.yaml` (project config)
    /// 3. `.swarmbot/local.yaml` (project local overrides, optional)
    /// 4. Environment variables (`SWARMBOT_*` prefix, highest priority)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".swarmbot/config.yaml"))
            .merge(Yaml::file(".swarmbot/local.yaml"))
            .merge(Env::prefixed("SWARMBOT_").split("__"))
            .extract()
            .context("failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, skipping the project-local layers.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!("failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.coordinator.max_pending_tasks == 0 {
            return Err(ConfigError::InvalidMaxPendingTasks(config.coordinator.max_pending_tasks));
        }

        if config.coordinator.agent_heartbeat_interval_seconds == 0 {
            return Err(ConfigError::InvalidHeartbeatInterval(
                config.coordinator.agent_heartbeat_interval_seconds,
            ));
        }

        if config.coordinator.retry_base_delay_seconds >= config.coordinator.retry_max_delay_seconds {
            return Err(ConfigError::InvalidRetryBackoff(
                config.coordinator.retry_base_delay_seconds,
                config.coordinator.retry_max_delay_seconds,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        if config.coordinator.event_ring_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "event_ring_capacity must be greater than zero".to_string(),
            ));
        }

        if config.coordinator.message_bus_inbox_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "message_bus_inbox_capacity must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
