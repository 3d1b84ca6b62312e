#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use fanout_core::{
    async_trait, SharedContext, UnitEmitter, UnitError, UnitInput, UnitOfWork, FULL_WORKFLOW,
};
use orchestrator::{Orchestrator, OrchestratorConfig};
use serde_json::json;

#[derive(Debug, Clone)]
pub enum Behavior {
    Complete,
    FailAfterFirst(String),
    PanicAfterFirst,
    NoTerminal,
    /// Keeps sleeping through cancellation
    Stubborn,
}

/// Fixture unit that streams numbered steps, then ends per its behavior.
pub struct TestUnit {
    name: String,
    granularities: Vec<String>,
    steps: u32,
    delay: Duration,
    behavior: Behavior,
}

impl TestUnit {
    pub fn new(name: &str, steps: u32, delay: Duration, behavior: Behavior) -> Self {
        Self {
            name: name.to_string(),
            granularities: vec![FULL_WORKFLOW.to_string(), "analysis".to_string()],
            steps,
            delay,
            behavior,
        }
    }

    pub fn completing(name: &str, steps: u32) -> Arc<dyn UnitOfWork> {
        Arc::new(Self::new(name, steps, Duration::from_millis(5), Behavior::Complete))
    }

    pub fn failing(name: &str, message: &str) -> Arc<dyn UnitOfWork> {
        Arc::new(Self::new(
            name,
            3,
            Duration::from_millis(5),
            Behavior::FailAfterFirst(message.to_string()),
        ))
    }

    pub fn panicking(name: &str) -> Arc<dyn UnitOfWork> {
        Arc::new(Self::new(name, 3, Duration::from_millis(5), Behavior::PanicAfterFirst))
    }

    pub fn silent_finisher(name: &str) -> Arc<dyn UnitOfWork> {
        Arc::new(Self::new(name, 2, Duration::from_millis(5), Behavior::NoTerminal))
    }

    /// Streams for roughly ten seconds unless stopped.
    pub fn endless(name: &str) -> Arc<dyn UnitOfWork> {
        Arc::new(Self::new(name, 500, Duration::from_millis(20), Behavior::Complete))
    }

    pub fn stubborn(name: &str) -> Arc<dyn UnitOfWork> {
        Arc::new(Self::new(name, 1, Duration::from_secs(10), Behavior::Stubborn))
    }

    pub fn only_full_workflow(mut self) -> Self {
        self.granularities = vec![FULL_WORKFLOW.to_string()];
        self
    }
}

#[async_trait]
impl UnitOfWork for TestUnit {
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
        context: &SharedContext,
        emitter: UnitEmitter,
    ) -> fanout_core::Result<()> {
        for step in 0..self.steps {
            emitter
                .streaming(json!({"step": step, "input": input.text}))
                .await?;

            if step == 0 {
                match &self.behavior {
                    Behavior::FailAfterFirst(message) => {
                        return Err(UnitError::execution(&self.name, message.clone())
                            .with_granularity(granularity));
                    }
                    Behavior::PanicAfterFirst => panic!("{} crashed", self.name),
                    _ => {}
                }
            }

            if matches!(self.behavior, Behavior::Stubborn) {
                tokio::time::sleep(self.delay).await;
            } else {
                tokio::select! {
                    _ = emitter.cancelled() => return Err(UnitError::Cancelled),
                    _ = tokio::time::sleep(self.delay) => {}
                }
            }
        }

        if matches!(self.behavior, Behavior::NoTerminal) {
            return Ok(());
        }

        let context_value = context.downcast_ref::<String>().cloned();
        emitter
            .complete(json!({"steps": self.steps, "context": context_value}))
            .await
    }
}

pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig::default()
        .with_poll_interval(Duration::from_millis(50))
        .with_grace_period(Duration::from_millis(200))
}

pub fn orchestrator_with(units: Vec<Arc<dyn UnitOfWork>>) -> Orchestrator {
    let mut orchestrator = Orchestrator::new(test_config());
    for unit in units {
        orchestrator.register(unit).expect("register test unit");
    }
    orchestrator
}
