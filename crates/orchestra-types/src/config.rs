//! Service configuration types for orchestra.
//!
//! `ServiceConfig` represents `orchestra.toml`. Every section and field has a
//! default, so an empty file (or no file at all) yields a working setup that
//! talks to an agent executor on `http://localhost:8001`.

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub agent_service: AgentServiceConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

// ---------------------------------------------------------------------------
// [logging]
// ---------------------------------------------------------------------------

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// [agent_service]
// ---------------------------------------------------------------------------

/// Where and how to reach the external agent executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentServiceConfig {
    #[serde(default = "default_agent_url")]
    pub url: String,
    #[serde(default = "default_execute_path")]
    pub execute_path: String,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    /// Added to the step timeout to form the HTTP timeout, so the agent's own
    /// deadline fires first.
    #[serde(default = "default_timeout_margin")]
    pub timeout_margin_secs: u64,
}

fn default_agent_url() -> String {
    "http://localhost:8001".to_string()
}

fn default_execute_path() -> String {
    "/agents/execute".to_string()
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_timeout_margin() -> u64 {
    10
}

impl Default for AgentServiceConfig {
    fn default() -> Self {
        Self {
            url: default_agent_url(),
            execute_path: default_execute_path(),
            health_path: default_health_path(),
            timeout_margin_secs: default_timeout_margin(),
        }
    }
}

// ---------------------------------------------------------------------------
// [engine]
// ---------------------------------------------------------------------------

/// What the resolver does when an expression cannot be interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Conditions evaluate to true, mappings resolve to the literal text.
    #[default]
    Lenient,
    /// Conditions evaluate to false, unresolvable mappings fail the attempt.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Checkpoints retained per execution.
    #[serde(default = "default_max_checkpoints")]
    pub max_checkpoints: usize,
    /// How often a paused step re-checks the pause flag.
    #[serde(default = "default_pause_poll_interval")]
    pub pause_poll_interval_ms: u64,
    /// Base of the exponential retry backoff (`base * 2^attempt`).
    #[serde(default = "default_retry_backoff_base")]
    pub retry_backoff_base_ms: u64,
    #[serde(default = "default_max_concurrent_workflows")]
    pub max_concurrent_workflows: usize,
    /// Cadence of the background `cleanup()` loop in long-running hosts.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
    /// Agent-call timeout for steps declaring `timeout_secs = 0`.
    #[serde(default = "default_step_timeout")]
    pub default_step_timeout_secs: u64,
    /// Fail runs that exceed their definition's `global_timeout_secs`.
    #[serde(default = "default_true")]
    pub enforce_global_timeout: bool,
    #[serde(default)]
    pub fallback_policy: FallbackPolicy,
}

fn default_max_checkpoints() -> usize {
    10
}

fn default_pause_poll_interval() -> u64 {
    1000
}

fn default_retry_backoff_base() -> u64 {
    1000
}

fn default_max_concurrent_workflows() -> usize {
    50
}

fn default_cleanup_interval() -> u64 {
    60
}

fn default_step_timeout() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_checkpoints: default_max_checkpoints(),
            pause_poll_interval_ms: default_pause_poll_interval(),
            retry_backoff_base_ms: default_retry_backoff_base(),
            max_concurrent_workflows: default_max_concurrent_workflows(),
            cleanup_interval_secs: default_cleanup_interval(),
            default_step_timeout_secs: default_step_timeout(),
            enforce_global_timeout: default_true(),
            fallback_policy: FallbackPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_config_default_values() {
        let config = ServiceConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(config.agent_service.url, "http://localhost:8001");
        assert_eq!(config.agent_service.execute_path, "/agents/execute");
        assert_eq!(config.agent_service.timeout_margin_secs, 10);
        assert_eq!(config.engine.max_checkpoints, 10);
        assert_eq!(config.engine.max_concurrent_workflows, 50);
        assert_eq!(config.engine.fallback_policy, FallbackPolicy::Lenient);
        assert!(config.engine.enforce_global_timeout);
    }

    #[test]
    fn test_service_config_deserialize_empty() {
        let config: ServiceConfig = toml::from_str("").unwrap();
        assert_eq!(config, ServiceConfig::default());
    }

    #[test]
    fn test_service_config_deserialize_partial_sections() {
        let toml_str = r#"
[logging]
format = "json"

[agent_service]
url = "http://agents.internal:9000"

[engine]
max_checkpoints = 3
fallback_policy = "strict"
enforce_global_timeout = false
"#;
        let config: ServiceConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.agent_service.url, "http://agents.internal:9000");
        assert_eq!(config.agent_service.health_path, "/health");
        assert_eq!(config.engine.max_checkpoints, 3);
        assert_eq!(config.engine.fallback_policy, FallbackPolicy::Strict);
        assert!(!config.engine.enforce_global_timeout);
        assert_eq!(config.engine.retry_backoff_base_ms, 1000);
    }
}
