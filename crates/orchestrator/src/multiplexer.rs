//! Fan-in of per-unit feeds into one ordered envelope sequence.
//!
//! Runners push into a single unbounded queue; the multiplexer pulls with a
//! bounded wait so it can re-check the stopped-set even while every unit is
//! silent. Order within one unit is preserved, order across units is arrival
//! order.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use events::EventBus;
use fanout_core::{ErrorType, EventEnvelope, EventKind};

use crate::stopped::StoppedSet;

/// Unit name used on envelopes the orchestrator itself emits.
pub const ORCHESTRATOR_UNIT: &str = "orchestrator";

/// What a runner sends for its unit.
#[derive(Debug)]
pub enum Feed {
    Event(EventEnvelope),
    /// End-of-stream for the unit
    Finished,
}

/// One queue entry, tagged with the unit that produced it.
#[derive(Debug)]
pub struct FeedItem {
    pub unit: String,
    pub feed: Feed,
}

impl FeedItem {
    pub fn event(unit: impl Into<String>, envelope: EventEnvelope) -> Self {
        Self {
            unit: unit.into(),
            feed: Feed::Event(envelope),
        }
    }

    pub fn finished(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            feed: Feed::Finished,
        }
    }
}

pub type FeedSender = mpsc::UnboundedSender<FeedItem>;
pub type FeedReceiver = mpsc::UnboundedReceiver<FeedItem>;

/// Merges the feeds of one session.
pub struct Multiplexer {
    session_id: Uuid,
    queue: FeedReceiver,
    units: Vec<String>,
    granularity: String,
    finished: HashSet<String>,
    terminated: HashSet<String>,
    pending: VecDeque<EventEnvelope>,
    stopped: StoppedSet,
    poll_interval: Duration,
    bus: Option<EventBus>,
}

impl Multiplexer {
    pub fn new(
        session_id: Uuid,
        queue: FeedReceiver,
        units: Vec<String>,
        granularity: impl Into<String>,
        stopped: StoppedSet,
        poll_interval: Duration,
    ) -> Self {
        let granularity = granularity.into();
        let mut pending = VecDeque::new();
        if units.is_empty() {
            pending.push_back(EventEnvelope::error(
                ORCHESTRATOR_UNIT,
                ORCHESTRATOR_UNIT,
                ErrorType::ValidationError,
                "No units selected",
            ));
        }

        Self {
            session_id,
            queue,
            units,
            granularity,
            finished: HashSet::new(),
            terminated: HashSet::new(),
            pending,
            stopped,
            poll_interval,
            bus: None,
        }
    }

    /// Mirror every forwarded envelope to `bus`.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Whether every unit has signalled end-of-stream.
    pub fn is_done(&self) -> bool {
        self.pending.is_empty() && self.units.iter().all(|u| self.finished.contains(u))
    }

    /// Next envelope for the caller, or `None` once every unit is finished.
    pub async fn next_envelope(&mut self) -> Option<EventEnvelope> {
        loop {
            if let Some(envelope) = self.pending.pop_front() {
                return Some(self.deliver(envelope));
            }
            if self.is_done() {
                info!(session_id = %self.session_id, "All units finished");
                return None;
            }

            match timeout(self.poll_interval, self.queue.recv()).await {
                Ok(Some(item)) => {
                    if let Some(envelope) = self.accept(item) {
                        return Some(self.deliver(envelope));
                    }
                }
                Ok(None) => self.close_remaining(),
                Err(_) => self.sweep_stopped(),
            }
        }
    }

    fn accept(&mut self, item: FeedItem) -> Option<EventEnvelope> {
        let FeedItem { unit, feed } = item;

        if self.finished.contains(&unit) {
            debug!(unit = %unit, "Dropping feed item from finished unit");
            return None;
        }

        match feed {
            Feed::Finished => {
                debug!(session_id = %self.session_id, unit = %unit, "Unit finished");
                if !self.terminated.contains(&unit) {
                    warn!(unit = %unit, "Unit finished without terminal event");
                    self.terminated.insert(unit.clone());
                    self.pending.push_back(EventEnvelope::error(
                        &unit,
                        &self.granularity,
                        ErrorType::TaskError,
                        format!("{} finished without terminal event", unit),
                    ));
                }
                self.finished.insert(unit);
                None
            }
            Feed::Event(envelope) => {
                if envelope.kind == EventKind::Streaming && self.stopped.contains(&unit) {
                    debug!(unit = %unit, "Dropping streaming event from stopped unit");
                    return None;
                }
                if envelope.is_terminal() && !self.terminated.insert(unit.clone()) {
                    debug!(unit = %unit, "Dropping duplicate terminal event");
                    return None;
                }
                Some(envelope)
            }
        }
    }

    /// Treat stopped units as finished, synthesizing their terminal event
    /// when the runner has not delivered one yet.
    fn sweep_stopped(&mut self) {
        let stopped: Vec<String> = self
            .units
            .iter()
            .filter(|u| !self.finished.contains(*u) && self.stopped.contains(u))
            .cloned()
            .collect();

        for unit in stopped {
            debug!(session_id = %self.session_id, unit = %unit, "Finishing stopped unit");
            if self.terminated.insert(unit.clone()) {
                self.pending.push_back(EventEnvelope::stopped(
                    &unit,
                    &self.granularity,
                    format!("{} stopped by user", unit),
                ));
            }
            self.finished.insert(unit);
        }
    }

    /// The queue closed with units outstanding: every sender is gone, so
    /// nothing more can arrive for them.
    fn close_remaining(&mut self) {
        let remaining: Vec<String> = self
            .units
            .iter()
            .filter(|u| !self.finished.contains(*u))
            .cloned()
            .collect();

        for unit in remaining {
            warn!(session_id = %self.session_id, unit = %unit, "Feed closed before unit finished");
            if self.terminated.insert(unit.clone()) {
                self.pending.push_back(EventEnvelope::error(
                    &unit,
                    &self.granularity,
                    ErrorType::TaskError,
                    format!("feed for {} closed unexpectedly", unit),
                ));
            }
            self.finished.insert(unit);
        }
    }

    fn deliver(&self, envelope: EventEnvelope) -> EventEnvelope {
        if let Some(ref bus) = self.bus {
            bus.publish(envelope.clone());
        }
        envelope
    }
}
