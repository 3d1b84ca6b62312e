use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use fanout_core::FULL_WORKFLOW;

use crate::error::{OrchestratorError, Result};

const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_GRACE_PERIOD_MS: u64 = 2000;
const DEFAULT_UNIT_BUFFER: usize = 64;

/// Tuning knobs for the orchestration core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Upper bound on a single multiplexer pull before the stopped-set is re-checked
    pub poll_interval_ms: u64,
    /// How long a stopped unit gets to wind down before its runner detaches
    pub grace_period_ms: u64,
    /// Granularity used by `execute` when none is given
    pub default_granularity: String,
    /// Capacity of the channel between a unit and its runner
    pub unit_buffer: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            default_granularity: FULL_WORKFLOW.to_string(),
            unit_buffer: DEFAULT_UNIT_BUFFER,
        }
    }
}

impl OrchestratorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period_ms = grace.as_millis() as u64;
        self
    }

    pub fn with_default_granularity(mut self, granularity: impl Into<String>) -> Self {
        self.default_granularity = granularity.into();
        self
    }

    /// Reject settings the orchestrator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.default_granularity.trim().is_empty() {
            return Err(OrchestratorError::Config(
                "default_granularity must not be empty".to_string(),
            ));
        }
        if self.unit_buffer == 0 {
            return Err(OrchestratorError::Config(
                "unit_buffer must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Load settings from a JSON object. Absent keys keep their defaults.
    pub async fn load_json(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| OrchestratorError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;

        debug!(
            path = %path.display(),
            poll_interval_ms = config.poll_interval_ms,
            grace_period_ms = config.grace_period_ms,
            "Orchestrator config loaded"
        );
        Ok(config)
    }
}
