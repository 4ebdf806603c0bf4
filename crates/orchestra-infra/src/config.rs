//! Service configuration loader for orchestra.
//!
//! Reads a TOML file (default `orchestra.toml`) and deserializes it into
//! [`ServiceConfig`]. The lenient loader falls back to defaults when the file
//! is missing or malformed; the strict one reports why.

use std::path::Path;

use orchestra_types::config::ServiceConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Load configuration from `path`.
///
/// - If the file does not exist, returns [`ServiceConfig::default()`].
/// - If the file exists but cannot be read or parsed, logs a warning and
///   returns the default.
pub async fn load_config(path: &Path) -> ServiceConfig {
    match try_load_config(path).await {
        Ok(config) => config,
        Err(ConfigError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            ServiceConfig::default()
        }
        Err(err) => {
            tracing::warn!("{err}, using defaults");
            ServiceConfig::default()
        }
    }
}

/// Load configuration from `path`, failing on a missing or malformed file.
pub async fn try_load_config(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_types::config::{FallbackPolicy, LogFormat};
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("orchestra.toml");

        assert_eq!(load_config(&path).await, ServiceConfig::default());
        assert!(matches!(
            try_load_config(&path).await,
            Err(ConfigError::Io { .. })
        ));
    }

    #[tokio::test]
    async fn valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("orchestra.toml");
        tokio::fs::write(
            &path,
            r#"
[logging]
level = "debug"
format = "json"

[agent_service]
url = "http://agents.internal:9000"

[engine]
max_concurrent_workflows = 4
fallback_policy = "strict"
"#,
        )
        .await
        .unwrap();

        let config = load_config(&path).await;
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.agent_service.url, "http://agents.internal:9000");
        assert_eq!(config.agent_service.execute_path, "/agents/execute");
        assert_eq!(config.engine.max_concurrent_workflows, 4);
        assert_eq!(config.engine.fallback_policy, FallbackPolicy::Strict);
        assert_eq!(config.engine.max_checkpoints, 10);
        assert_eq!(try_load_config(&path).await.unwrap(), config);
    }

    #[tokio::test]
    async fn invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("orchestra.toml");
        tokio::fs::write(&path, "this is not { valid toml !!!")
            .await
            .unwrap();

        assert_eq!(load_config(&path).await, ServiceConfig::default());
        let err = try_load_config(&path).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().starts_with("failed to parse"), "got: {err}");
    }
}
