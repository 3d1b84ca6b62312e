//! Per-unit runner: supervises one `produce` call.
//!
//! The runner owns the unit's event channel and turns every way a run can
//! end (normal completion, a reported error, a panic, a stop request) into
//! exactly one terminal envelope on the shared feed.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinError;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fanout_core::{
    ErrorType, EventEnvelope, SharedContext, UnitEmitter, UnitError, UnitInput, UnitOfWork,
};

use crate::config::OrchestratorConfig;
use crate::multiplexer::FeedSender;
use crate::resources::FeedGuard;

/// Handle kept by the orchestrator for a spawned runner.
#[derive(Debug, Clone)]
pub struct RunnerHandle {
    cancel: CancellationToken,
    finished: watch::Receiver<bool>,
}

impl RunnerHandle {
    /// Whether the runner has closed its feed.
    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    /// Ask the runner to stop. Returns immediately.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait up to `limit` for the runner to close its feed.
    pub async fn wait_finished(&self, limit: Duration) -> bool {
        let mut finished = self.finished.clone();
        let acked = matches!(
            timeout(limit, finished.wait_for(|done| *done)).await,
            Ok(Ok(_))
        );
        acked
    }
}

/// How the supervised run ended.
enum Outcome {
    Cancelled,
    Finished(Result<fanout_core::Result<()>, JoinError>),
}

/// Runs one unit of work for one granularity.
pub struct UnitRunner {
    unit: Arc<dyn UnitOfWork>,
    granularity: String,
    input: UnitInput,
    context: SharedContext,
    cancel: CancellationToken,
    grace_period: Duration,
    buffer: usize,
}

impl UnitRunner {
    pub fn new(
        unit: Arc<dyn UnitOfWork>,
        granularity: impl Into<String>,
        input: UnitInput,
        context: SharedContext,
        cancel: CancellationToken,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            unit,
            granularity: granularity.into(),
            input,
            context,
            cancel,
            grace_period: config.grace_period(),
            buffer: config.unit_buffer,
        }
    }

    /// Spawn the runner onto the current Tokio runtime.
    pub fn spawn(self, queue: FeedSender) -> RunnerHandle {
        let (finished_tx, finished_rx) = watch::channel(false);
        let handle = RunnerHandle {
            cancel: self.cancel.clone(),
            finished: finished_rx,
        };

        tokio::spawn(self.run(queue, finished_tx));
        handle
    }

    /// Drive the unit to a terminal envelope.
    pub async fn run(self, queue: FeedSender, finished: watch::Sender<bool>) {
        let name = self.unit.name().to_string();
        let mut guard = FeedGuard::new(name.clone(), self.granularity.clone(), queue, finished);

        if !self.unit.supports(&self.granularity) {
            let error = UnitError::UnsupportedGranularity {
                unit: name.clone(),
                granularity: self.granularity.clone(),
            };
            warn!(unit = %name, granularity = %self.granularity, "Unsupported granularity");
            guard.forward(error_envelope(&name, &self.granularity, &error));
            guard.mark_completed();
            return;
        }

        info!(unit = %name, granularity = %self.granularity, "Runner started");

        let (emitter, mut events) =
            UnitEmitter::channel(&name, &self.granularity, self.buffer, self.cancel.clone());

        let unit = Arc::clone(&self.unit);
        let granularity = self.granularity.clone();
        let input = self.input.clone();
        let context = self.context.clone();
        let mut producer = tokio::spawn(async move {
            unit.produce(&granularity, &input, &context, emitter).await
        });

        let outcome = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Outcome::Cancelled,
                Some(envelope) = events.recv() => {
                    guard.forward(envelope);
                }
                result = &mut producer => break Outcome::Finished(result),
            }
        };

        match outcome {
            Outcome::Cancelled => {
                // Closing the channel fails any pending emit, so cooperative
                // units return promptly.
                drop(events);
                match timeout(self.grace_period, &mut producer).await {
                    Ok(_) => debug!(unit = %name, "Unit acknowledged cancellation"),
                    Err(_) => warn!(
                        unit = %name,
                        grace_ms = self.grace_period.as_millis() as u64,
                        "Unit ignored cancellation past grace period, detaching"
                    ),
                }
                guard.forward(EventEnvelope::stopped(
                    &name,
                    &self.granularity,
                    format!("{} stopped by user", name),
                ));
                info!(unit = %name, "Runner stopped");
            }
            Outcome::Finished(result) => {
                while let Ok(envelope) = events.try_recv() {
                    guard.forward(envelope);
                }
                self.finish(&name, &mut guard, result);
            }
        }

        guard.mark_completed();
    }

    fn finish(
        &self,
        name: &str,
        guard: &mut FeedGuard,
        result: Result<fanout_core::Result<()>, JoinError>,
    ) {
        match result {
            Ok(Ok(())) => {
                if guard.terminal_sent() {
                    info!(unit = %name, "Runner completed");
                } else {
                    warn!(unit = %name, "Unit completed without terminal event");
                    guard.forward(EventEnvelope::error(
                        name,
                        &self.granularity,
                        ErrorType::IncompleteStream,
                        format!("{} completed without terminal event", name),
                    ));
                }
            }
            Ok(Err(error)) => {
                if guard.terminal_sent() {
                    debug!(unit = %name, error = %error, "Ignoring error after terminal event");
                    return;
                }
                warn!(
                    unit = %name,
                    error = %error,
                    error_type = error.error_type().as_str(),
                    "Unit failed"
                );
                guard.forward(error_envelope(name, &self.granularity, &error));
            }
            Err(join_error) if join_error.is_panic() => {
                let message = panic_message(join_error.into_panic());
                warn!(unit = %name, panic = %message, "Unit panicked");
                guard.forward(EventEnvelope::error(
                    name,
                    &self.granularity,
                    ErrorType::UnexpectedError,
                    format!("{} panicked: {}", name, message),
                ));
            }
            Err(join_error) => {
                debug!(unit = %name, error = %join_error, "Unit task cancelled");
                guard.forward(EventEnvelope::stopped(
                    name,
                    &self.granularity,
                    format!("{} stopped", name),
                ));
            }
        }
    }
}

fn error_envelope(name: &str, granularity: &str, error: &UnitError) -> EventEnvelope {
    EventEnvelope::error(
        name,
        error.granularity().unwrap_or(granularity),
        error.error_type(),
        error.to_string(),
    )
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multiplexer::{Feed, FeedItem};
    use fanout_core::{async_trait, EventKind, FULL_WORKFLOW};
    use serde_json::json;
    use tokio::sync::mpsc;

    enum Script {
        Complete,
        Fail,
        Panic,
        NoTerminal,
        Forever,
        Stubborn,
    }

    struct Scripted {
        script: Script,
    }

    #[async_trait]
    impl UnitOfWork for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn supported_granularities(&self) -> Vec<String> {
            vec![FULL_WORKFLOW.to_string()]
        }

        async fn produce(
            &self,
            _granularity: &str,
            _input: &UnitInput,
            _context: &SharedContext,
            emitter: UnitEmitter,
        ) -> fanout_core::Result<()> {
            emitter.streaming(json!({"step": 1})).await?;
            match self.script {
                Script::Complete => emitter.complete(json!({"result": "ok"})).await,
                Script::Fail => Err(UnitError::execution("scripted", "boom")),
                Script::Panic => panic!("exploded"),
                Script::NoTerminal => Ok(()),
                Script::Forever => loop {
                    emitter.streaming(json!({"tick": true})).await?;
                    tokio::time::sleep(Duration::from_millis(5)).await;
                },
                Script::Stubborn => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                }
            }
        }
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig::default().with_grace_period(Duration::from_millis(100))
    }

    fn runner(script: Script, granularity: &str, cancel: CancellationToken) -> UnitRunner {
        UnitRunner::new(
            Arc::new(Scripted { script }),
            granularity,
            UnitInput::new("test"),
            SharedContext::empty(),
            cancel,
            &config(),
        )
    }

    async fn collect(mut rx: mpsc::UnboundedReceiver<FeedItem>) -> Vec<EventEnvelope> {
        let mut envelopes = Vec::new();
        while let Some(item) = rx.recv().await {
            match item.feed {
                Feed::Event(envelope) => envelopes.push(envelope),
                Feed::Finished => break,
            }
        }
        envelopes
    }

    #[tokio::test]
    async fn test_runner_forwards_complete_run() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = runner(Script::Complete, FULL_WORKFLOW, CancellationToken::new()).spawn(tx);

        let envelopes = collect(rx).await;
        let kinds: Vec<_> = envelopes.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Streaming, EventKind::Complete]);
        assert!(handle.wait_finished(Duration::from_secs(1)).await);
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn test_runner_converts_plugin_error() {
        let (tx, rx) = mpsc::unbounded_channel();
        runner(Script::Fail, FULL_WORKFLOW, CancellationToken::new()).spawn(tx);

        let envelopes = collect(rx).await;
        assert_eq!(envelopes.len(), 2);
        let last = &envelopes[1];
        assert_eq!(last.kind, EventKind::Error);
        assert_eq!(last.error_type(), Some(ErrorType::PluginError));
        assert!(last.message().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_runner_converts_panic() {
        let (tx, rx) = mpsc::unbounded_channel();
        runner(Script::Panic, FULL_WORKFLOW, CancellationToken::new()).spawn(tx);

        let envelopes = collect(rx).await;
        let last = envelopes.last().unwrap();
        assert_eq!(last.error_type(), Some(ErrorType::UnexpectedError));
        assert!(last.message().unwrap().contains("exploded"));
    }

    #[tokio::test]
    async fn test_runner_synthesizes_missing_terminal() {
        let (tx, rx) = mpsc::unbounded_channel();
        runner(Script::NoTerminal, FULL_WORKFLOW, CancellationToken::new()).spawn(tx);

        let envelopes = collect(rx).await;
        assert_eq!(envelopes.len(), 2);
        assert_eq!(envelopes[1].error_type(), Some(ErrorType::IncompleteStream));
        assert!(envelopes[1]
            .message()
            .unwrap()
            .contains("without terminal event"));
    }

    #[tokio::test]
    async fn test_runner_rejects_unsupported_granularity() {
        let (tx, rx) = mpsc::unbounded_channel();
        runner(Script::Complete, "synthesis", CancellationToken::new()).spawn(tx);

        let envelopes = collect(rx).await;
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].kind, EventKind::Error);
        assert_eq!(envelopes[0].granularity, "synthesis");
        assert!(envelopes[0].message().unwrap().contains("unsupported granularity"));
    }

    #[tokio::test]
    async fn test_runner_stops_on_cancel() {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = runner(Script::Forever, FULL_WORKFLOW, cancel.clone()).spawn(tx);

        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.cancel();
        assert!(handle.is_cancelled());

        let envelopes = collect(rx).await;
        let last = envelopes.last().unwrap();
        assert_eq!(last.kind, EventKind::Stopped);
        assert_eq!(
            envelopes.iter().filter(|e| e.is_terminal()).count(),
            1
        );
        assert!(handle.wait_finished(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_runner_detaches_after_grace_period() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = runner(Script::Stubborn, FULL_WORKFLOW, CancellationToken::new()).spawn(tx);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let started = std::time::Instant::now();
        handle.cancel();

        let envelopes = collect(rx).await;
        assert_eq!(envelopes.last().unwrap().kind, EventKind::Stopped);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_wait_finished_times_out_while_running() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = runner(Script::Forever, FULL_WORKFLOW, CancellationToken::new()).spawn(tx);

        assert!(!handle.wait_finished(Duration::from_millis(30)).await);
        assert!(!handle.is_finished());

        handle.cancel();
        collect(rx).await;
        assert!(handle.wait_finished(Duration::from_secs(1)).await);
    }
}
