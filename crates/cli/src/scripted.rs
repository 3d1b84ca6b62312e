use std::time::Duration;

use fanout_core::{
    async_trait, SharedContext, UnitEmitter, UnitError, UnitInput, UnitOfWork, FULL_WORKFLOW,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

fn default_granularities() -> Vec<String> {
    vec![FULL_WORKFLOW.to_string()]
}

fn default_steps() -> u32 {
    3
}

fn default_step_delay_ms() -> u64 {
    250
}

/// A `[[units]]` entry: a unit with no business logic that streams a fixed
/// number of steps and optionally fails or panics along the way.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScriptedUnit {
    pub name: String,
    #[serde(default = "default_granularities")]
    pub granularities: Vec<String>,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_at_step: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panic_at_step: Option<u32>,
}

impl ScriptedUnit {
    pub fn new(name: impl Into<String>, steps: u32, step_delay_ms: u64) -> Self {
        Self {
            name: name.into(),
            granularities: default_granularities(),
            steps,
            step_delay_ms,
            fail_at_step: None,
            fail_message: None,
            panic_at_step: None,
        }
    }

    pub fn with_granularities(mut self, granularities: &[&str]) -> Self {
        self.granularities = granularities.iter().map(|g| g.to_string()).collect();
        self
    }

    pub fn failing_at(mut self, step: u32, message: impl Into<String>) -> Self {
        self.fail_at_step = Some(step);
        self.fail_message = Some(message.into());
        self
    }

    pub fn panicking_at(mut self, step: u32) -> Self {
        self.panic_at_step = Some(step);
        self
    }

    /// Units registered when no config file lists any.
    pub fn defaults() -> Vec<Self> {
        vec![
            ScriptedUnit::new("researcher", 4, 300).with_granularities(&[FULL_WORKFLOW, "analysis"]),
            ScriptedUnit::new("writer", 6, 200).with_granularities(&[FULL_WORKFLOW, "draft"]),
            ScriptedUnit::new("reviewer", 3, 400).failing_at(2, "review checklist missing"),
        ]
    }
}

#[async_trait]
impl UnitOfWork for ScriptedUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_granularities(&self) -> Vec<String> {
        self.granularities.clone()
    }

    async fn produce(
        &self,
        granularity: &str,
        input: &UnitInput,
        _context: &SharedContext,
        emitter: UnitEmitter,
    ) -> fanout_core::Result<()> {
        let delay = Duration::from_millis(self.step_delay_ms);

        for step in 0..self.steps {
            if self.panic_at_step == Some(step) {
                panic!("{} hit scripted panic at step {}", self.name, step);
            }
            if self.fail_at_step == Some(step) {
                let message = self
                    .fail_message
                    .clone()
                    .unwrap_or_else(|| format!("scripted failure at step {}", step));
                return Err(UnitError::execution(&self.name, message).with_granularity(granularity));
            }

            emitter
                .streaming(json!({
                    "step": step + 1,
                    "total": self.steps,
                    "content": format!("{} working on: {}", self.name, input.text),
                }))
                .await?;

            tokio::select! {
                _ = emitter.cancelled() => return Err(UnitError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        emitter
            .complete(json!({
                "steps": self.steps,
                "result": format!("{} finished {}", self.name, granularity),
            }))
            .await
    }
}
