//! RAII guard for a runner's feed into the multiplexer queue.
//!
//! The guard owns the runner's sending side of the shared queue. Whatever way
//! the runner exits, dropping the guard signals end-of-stream for the unit,
//! and a runner that exits without a terminal envelope gets a synthesized
//! `task_error` one first.

use tokio::sync::watch;
use tracing::{debug, warn};

use fanout_core::{ErrorType, EventEnvelope};

use crate::multiplexer::{FeedItem, FeedSender};

/// RAII guard for one unit's feed.
///
/// # Example
///
/// ```ignore
/// let mut guard = FeedGuard::new("alpha", "full_workflow", queue, finished_tx);
/// guard.forward(envelope);
/// guard.mark_completed(); // runner exited normally
/// // Drop signals end-of-stream either way
/// ```
pub struct FeedGuard {
    unit: String,
    granularity: String,
    queue: FeedSender,
    finished: watch::Sender<bool>,
    terminal_sent: bool,
    completed: bool,
}

impl FeedGuard {
    pub fn new(
        unit: impl Into<String>,
        granularity: impl Into<String>,
        queue: FeedSender,
        finished: watch::Sender<bool>,
    ) -> Self {
        let unit = unit.into();
        debug!(unit = %unit, "Feed guard created");

        Self {
            unit,
            granularity: granularity.into(),
            queue,
            finished,
            terminal_sent: false,
            completed: false,
        }
    }

    /// Forward an envelope to the multiplexer.
    ///
    /// Anything after the first terminal envelope is dropped. Returns false if
    /// the envelope was not delivered.
    pub fn forward(&mut self, envelope: EventEnvelope) -> bool {
        if self.terminal_sent {
            debug!(
                unit = %self.unit,
                kind = envelope.kind.as_str(),
                "Dropping envelope after terminal event"
            );
            return false;
        }

        let terminal = envelope.is_terminal();
        let delivered = self.queue.send(FeedItem::event(&self.unit, envelope)).is_ok();
        if terminal {
            self.terminal_sent = true;
        }
        delivered
    }

    /// Whether a terminal envelope has gone out for this unit.
    pub fn terminal_sent(&self) -> bool {
        self.terminal_sent
    }

    /// Mark the runner as having exited normally.
    pub fn mark_completed(&mut self) {
        self.completed = true;
    }
}

impl Drop for FeedGuard {
    fn drop(&mut self) {
        if !self.completed {
            warn!(
                unit = %self.unit,
                "Runner exited without completing - closing feed"
            );
        }

        if !self.terminal_sent {
            let message = format!("runner for {} terminated unexpectedly", self.unit);
            let envelope =
                EventEnvelope::error(&self.unit, &self.granularity, ErrorType::TaskError, message);
            let _ = self.queue.send(FeedItem::event(&self.unit, envelope));
            self.terminal_sent = true;
        }

        let _ = self.queue.send(FeedItem::finished(&self.unit));
        self.finished.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multiplexer::Feed;
    use fanout_core::{into_payload, EventKind};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn streaming() -> EventEnvelope {
        EventEnvelope::streaming("alpha", "full_workflow", into_payload(json!({"step": 1})))
    }

    #[test]
    fn test_guard_forwards_until_terminal() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = watch::channel(false);
        let mut guard = FeedGuard::new("alpha", "full_workflow", tx, done_tx);

        assert!(guard.forward(streaming()));
        assert!(guard.forward(EventEnvelope::complete("alpha", "full_workflow", Default::default())));
        assert!(guard.terminal_sent());
        assert!(!guard.forward(streaming()));

        guard.mark_completed();
        drop(guard);

        let kinds: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|item| match item.feed {
                Feed::Event(envelope) => Some(envelope.kind),
                Feed::Finished => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![Some(EventKind::Streaming), Some(EventKind::Complete), None]
        );
        assert!(*done_rx.borrow());
    }

    #[test]
    fn test_guard_synthesizes_error_on_drop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = watch::channel(false);
        let mut guard = FeedGuard::new("alpha", "full_workflow", tx, done_tx);

        guard.forward(streaming());
        drop(guard);

        let _ = rx.try_recv().unwrap();
        match rx.try_recv().unwrap().feed {
            Feed::Event(envelope) => {
                assert_eq!(envelope.kind, EventKind::Error);
                assert_eq!(envelope.error_type(), Some(ErrorType::TaskError));
            }
            Feed::Finished => panic!("expected synthesized error"),
        }
        assert!(matches!(rx.try_recv().unwrap().feed, Feed::Finished));
        assert!(*done_rx.borrow());
    }

    #[test]
    fn test_guard_with_closed_queue() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = watch::channel(false);
        drop(rx);

        let mut guard = FeedGuard::new("alpha", "full_workflow", tx, done_tx);
        assert!(!guard.forward(streaming()));
        drop(guard);

        assert!(*done_rx.borrow());
    }
}
