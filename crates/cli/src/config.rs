use std::path::Path;

use anyhow::{Context, Result};
use orchestrator::OrchestratorConfig;
use serde::{Deserialize, Serialize};

use crate::scripted::ScriptedUnit;

/// Contents of a `fanout.toml` file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FanoutConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub units: Vec<ScriptedUnit>,
}

impl FanoutConfig {
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.extension().is_some_and(|ext| ext == "json") => Self {
                orchestrator: OrchestratorConfig::load_json(path).await?,
                units: Vec::new(),
            },
            Some(path) => {
                let content = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                toml::from_str(&content)
                    .with_context(|| format!("Failed to parse {}", path.display()))?
            }
            None => Self::default(),
        };

        if config.units.is_empty() {
            tracing::debug!("No units configured, registering defaults");
            config.units = ScriptedUnit::defaults();
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_without_file_uses_defaults() {
        let config = FanoutConfig::load(None).await.unwrap();
        assert_eq!(config.orchestrator, OrchestratorConfig::default());
        assert_eq!(config.units, ScriptedUnit::defaults());
    }

    #[tokio::test]
    async fn test_load_from_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fanout.toml");
        tokio::fs::write(
            &path,
            r#"
[orchestrator]
grace_period_ms = 500

[[units]]
name = "alpha"
steps = 2
step_delay_ms = 10

[[units]]
name = "beta"
granularities = ["full_workflow", "analysis"]
fail_at_step = 1
fail_message = "boom"
"#,
        )
        .await
        .unwrap();

        let config = FanoutConfig::load(Some(&path)).await.unwrap();
        assert_eq!(config.orchestrator.grace_period_ms, 500);
        assert_eq!(config.orchestrator.poll_interval_ms, 1000);
        assert_eq!(config.units.len(), 2);
        assert_eq!(config.units[0].steps, 2);
        assert_eq!(config.units[1].fail_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_load_json_file_sets_orchestrator_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fanout.json");
        tokio::fs::write(&path, r#"{"poll_interval_ms": 25, "default_granularity": "analysis"}"#)
            .await
            .unwrap();

        let config = FanoutConfig::load(Some(&path)).await.unwrap();
        assert_eq!(config.orchestrator.poll_interval_ms, 25);
        assert_eq!(config.orchestrator.default_granularity, "analysis");
        assert_eq!(config.units, ScriptedUnit::defaults());
    }

    #[tokio::test]
    async fn test_load_rejects_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fanout.toml");
        tokio::fs::write(&path, "[[units]]\nsteps = \"many\"").await.unwrap();

        assert!(FanoutConfig::load(Some(&path)).await.is_err());
    }
}
