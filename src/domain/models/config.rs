//! Configuration record for the coordinator and its ambient stack.
//!
//! Mirrors the shape loaded by `crate::infrastructure::config::ConfigLoader`: programmatic
//! defaults overridden by project YAML, then by `SWARMBOT_`-prefixed environment variables.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration, deserializable from YAML and overridable from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Every key enumerated in the design's external-interfaces section, with its default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CoordinatorConfig {
    #[serde(default = "default_max_pending_tasks")]
    pub max_pending_tasks: usize,

    #[serde(default = "default_task_deadline_seconds")]
    pub default_task_deadline_seconds: u64,

    #[serde(default = "default_cancel_grace_seconds")]
    pub cancel_grace_seconds: u64,

    #[serde(default = "default_agent_heartbeat_interval_seconds")]
    pub agent_heartbeat_interval_seconds: u64,

    #[serde(default = "default_agent_unreachable_multiplier")]
    pub agent_unreachable_multiplier: u32,

    #[serde(default = "default_retry_base_delay_seconds")]
    pub retry_base_delay_seconds: u64,

    #[serde(default = "default_retry_max_delay_seconds")]
    pub retry_max_delay_seconds: u64,

    #[serde(default = "default_event_ring_capacity")]
    pub event_ring_capacity: usize,

    #[serde(default = "default_event_batch_window_ms")]
    pub event_batch_window_ms: u64,

    #[serde(default = "default_terminal_retention_seconds")]
    pub terminal_retention_seconds: u64,

    #[serde(default = "default_strict_required_capabilities")]
    pub strict_required_capabilities: bool,

    #[serde(default = "default_message_bus_inbox_capacity")]
    pub message_bus_inbox_capacity: usize,
}

const fn default_max_pending_tasks() -> usize {
    10_000
}
const fn default_task_deadline_seconds() -> u64 {
    300
}
const fn default_cancel_grace_seconds() -> u64 {
    5
}
const fn default_agent_heartbeat_interval_seconds() -> u64 {
    5
}
const fn default_agent_unreachable_multiplier() -> u32 {
    3
}
const fn default_retry_base_delay_seconds() -> u64 {
    1
}
const fn default_retry_max_delay_seconds() -> u64 {
    30
}
const fn default_event_ring_capacity() -> usize {
    10_000
}
const fn default_event_batch_window_ms() -> u64 {
    200
}
const fn default_terminal_retention_seconds() -> u64 {
    3_600
}
const fn default_strict_required_capabilities() -> bool {
    true
}
const fn default_message_bus_inbox_capacity() -> usize {
    1_024
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_pending_tasks: default_max_pending_tasks(),
            default_task_deadline_seconds: default_task_deadline_seconds(),
            cancel_grace_seconds: default_cancel_grace_seconds(),
            agent_heartbeat_interval_seconds: default_agent_heartbeat_interval_seconds(),
            agent_unreachable_multiplier: default_agent_unreachable_multiplier(),
            retry_base_delay_seconds: default_retry_base_delay_seconds(),
            retry_max_delay_seconds: default_retry_max_delay_seconds(),
            event_ring_capacity: default_event_ring_capacity(),
            event_batch_window_ms: default_event_batch_window_ms(),
            terminal_retention_seconds: default_terminal_retention_seconds(),
            strict_required_capabilities: default_strict_required_capabilities(),
            message_bus_inbox_capacity: default_message_bus_inbox_capacity(),
        }
    }
}

/// Logging configuration consumed by `crate::infrastructure::logging::LoggerImpl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: LogFormat,

    pub log_dir: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub enable_stdout: bool,

    #[serde(default)]
    pub rotation: RotationPolicy,

    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    Daily,
    Hourly,
    Never,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self::Daily
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

const fn default_true() -> bool {
    true
}

const fn default_retention_days() -> i64 {
    30
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            enable_stdout: true,
            rotation: RotationPolicy::default(),
            retention_days: default_retention_days(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.coordinator.max_pending_tasks, 10_000);
        assert_eq!(config.coordinator.default_task_deadline_seconds, 300);
        assert_eq!(config.coordinator.event_ring_capacity, 10_000);
        assert!(config.coordinator.strict_required_capabilities);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn yaml_round_trip_overrides_nested_fields() {
        let yaml = r"
coordinator:
  max_pending_tasks: 500
  strict_required_capabilities: false
logging:
  level: debug
  format: pretty
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.coordinator.max_pending_tasks, 500);
        assert!(!config.coordinator.strict_required_capabilities);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.coordinator.event_ring_capacity, 10_000, "unset keys keep defaults");
    }
}
