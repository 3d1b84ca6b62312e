//! Event emitter handed to a unit of work for one `produce` call.

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::domain::{into_payload, EventEnvelope, EventKind};
use crate::error::{Result, UnitError};

/// Sending half of a unit's event sequence.
///
/// Every `produce` call gets a fresh emitter bound to a bounded channel, so
/// a unit that runs ahead of its consumer suspends in [`UnitEmitter::emit`].
/// Once the run is cancelled, or the runner has stopped listening, every
/// emit fails with [`UnitError::Cancelled`] and the unit is expected to
/// return.
#[derive(Debug, Clone)]
pub struct UnitEmitter {
    unit_name: String,
    granularity: String,
    sender: mpsc::Sender<EventEnvelope>,
    cancel: CancellationToken,
}

impl UnitEmitter {
    pub fn new(
        unit_name: impl Into<String>,
        granularity: impl Into<String>,
        sender: mpsc::Sender<EventEnvelope>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            unit_name: unit_name.into(),
            granularity: granularity.into(),
            sender,
            cancel,
        }
    }

    /// Create an emitter together with the receiving end of its channel.
    pub fn channel(
        unit_name: impl Into<String>,
        granularity: impl Into<String>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<EventEnvelope>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self::new(unit_name, granularity, sender, cancel), receiver)
    }

    pub fn unit_name(&self) -> &str {
        &self.unit_name
    }

    /// Granularity the unit was asked to run.
    pub fn granularity(&self) -> &str {
        &self.granularity
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the run has been asked to stop.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Emit an event for the run's own granularity.
    pub async fn emit(&self, kind: EventKind, payload: Value) -> Result<()> {
        let envelope = EventEnvelope::new(
            self.unit_name.clone(),
            kind,
            self.granularity.clone(),
            into_payload(payload),
        );
        self.send(envelope).await
    }

    /// Emit an event tagged with a sub-phase granularity (e.g. `analysis`
    /// inside a `full_workflow` run).
    pub async fn emit_in(
        &self,
        granularity: impl Into<String>,
        kind: EventKind,
        payload: Value,
    ) -> Result<()> {
        let envelope =
            EventEnvelope::new(self.unit_name.clone(), kind, granularity, into_payload(payload));
        self.send(envelope).await
    }

    pub async fn streaming(&self, payload: Value) -> Result<()> {
        self.emit(EventKind::Streaming, payload).await
    }

    pub async fn complete(&self, payload: Value) -> Result<()> {
        self.emit(EventKind::Complete, payload).await
    }

    async fn send(&self, envelope: EventEnvelope) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(UnitError::Cancelled);
        }
        self.sender
            .send(envelope)
            .await
            .map_err(|_| UnitError::Cancelled)
    }
}
