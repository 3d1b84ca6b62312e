//! Lifecycle manager for registered units of work.
//!
//! Registers units, starts fan-out sessions, and lets callers stop or
//! re-enable individual units while a session is in flight.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use events::EventBus;
use fanout_core::{SharedContext, UnitInput, UnitOfWork, UnitState};

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::multiplexer::Multiplexer;
use crate::runner::{RunnerHandle, UnitRunner};
use crate::session::SessionStream;
use crate::stopped::StoppedSet;

/// Slack on top of the grace period when `stop` waits for the runner.
const STOP_ACK_SLACK: Duration = Duration::from_millis(250);

/// Coordinates parallel execution across registered units.
///
/// The stopped-set is scoped to one orchestrator and cleared by every
/// `execute`, so callers are expected to run one session at a time per
/// instance. Concurrent sessions are allowed but share stop semantics.
pub struct Orchestrator {
    config: OrchestratorConfig,
    units: Vec<Arc<dyn UnitOfWork>>,
    index: HashMap<String, usize>,
    stopped: StoppedSet,
    active: Arc<RwLock<HashMap<String, RunnerHandle>>>,
    bus: Option<EventBus>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            units: Vec::new(),
            index: HashMap::new(),
            stopped: StoppedSet::new(),
            active: Arc::new(RwLock::new(HashMap::new())),
            bus: None,
        }
    }

    /// Mirror every forwarded envelope to `bus`.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn event_bus(&self) -> Option<&EventBus> {
        self.bus.as_ref()
    }

    /// Register a unit under its own name.
    pub fn register(&mut self, unit: Arc<dyn UnitOfWork>) -> Result<()> {
        let name = unit.name().to_string();
        if name.is_empty() {
            return Err(OrchestratorError::invalid_unit(name, "name must not be empty"));
        }
        if unit.supported_granularities().is_empty() {
            return Err(OrchestratorError::invalid_unit(
                name,
                "at least one granularity is required",
            ));
        }
        if self.index.contains_key(&name) {
            return Err(OrchestratorError::DuplicateUnit(name));
        }

        info!(
            unit = %name,
            granularities = ?unit.supported_granularities(),
            "Unit registered"
        );
        self.index.insert(name, self.units.len());
        self.units.push(unit);
        Ok(())
    }

    /// Names of all registered units, in registration order.
    pub fn list_available(&self) -> Vec<String> {
        self.units.iter().map(|u| u.name().to_string()).collect()
    }

    pub fn unit(&self, name: &str) -> Option<Arc<dyn UnitOfWork>> {
        self.index.get(name).map(|&i| Arc::clone(&self.units[i]))
    }

    /// Run the default granularity on every selected unit.
    pub fn execute<S: AsRef<str>>(
        &self,
        input: UnitInput,
        selected: &[S],
        context: SharedContext,
    ) -> Result<SessionStream> {
        let granularity = self.config.default_granularity.clone();
        self.execute_granularity(input, selected, context, granularity)
    }

    /// Run a single unit; shorthand for re-running a restarted unit.
    pub fn execute_single(
        &self,
        name: &str,
        input: UnitInput,
        context: SharedContext,
    ) -> Result<SessionStream> {
        self.execute(input, &[name], context)
    }

    /// Start one runner per selected unit and merge their envelopes.
    ///
    /// Selection errors are returned before anything starts. Must be called
    /// from within a Tokio runtime.
    pub fn execute_granularity<S: AsRef<str>>(
        &self,
        input: UnitInput,
        selected: &[S],
        context: SharedContext,
        granularity: impl Into<String>,
    ) -> Result<SessionStream> {
        let granularity = granularity.into();
        let names = self.validate_selection(selected)?;
        let session_id = Uuid::new_v4();

        self.stopped.clear();

        info!(
            session_id = %session_id,
            units = ?names,
            granularity = %granularity,
            "Starting execution session"
        );

        let session_token = CancellationToken::new();
        let (queue, receiver) = tokio::sync::mpsc::unbounded_channel();
        let mut handles = HashMap::with_capacity(names.len());

        for name in &names {
            let Some(unit) = self.unit(name) else {
                continue;
            };
            let runner = UnitRunner::new(
                unit,
                granularity.clone(),
                input.clone(),
                context.clone(),
                session_token.child_token(),
                &self.config,
            );
            handles.insert(name.clone(), runner.spawn(queue.clone()));
        }
        drop(queue);

        *self.active.write().unwrap_or_else(PoisonError::into_inner) = handles;

        let mut multiplexer = Multiplexer::new(
            session_id,
            receiver,
            names,
            granularity,
            self.stopped.clone(),
            self.config.poll_interval(),
        );
        if let Some(ref bus) = self.bus {
            multiplexer = multiplexer.with_event_bus(bus.clone());
        }

        Ok(SessionStream::new(multiplexer, session_token.drop_guard()))
    }

    fn validate_selection<S: AsRef<str>>(&self, selected: &[S]) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let mut unknown = Vec::new();
        let mut duplicates = Vec::new();
        let mut names = Vec::with_capacity(selected.len());

        for name in selected.iter().map(AsRef::as_ref) {
            if !self.index.contains_key(name) {
                if !unknown.iter().any(|u| u == name) {
                    unknown.push(name.to_string());
                }
            } else if !seen.insert(name) {
                if !duplicates.iter().any(|d| d == name) {
                    duplicates.push(name.to_string());
                }
            } else {
                names.push(name.to_string());
            }
        }

        if unknown.is_empty() && duplicates.is_empty() {
            return Ok(names);
        }

        warn!(unknown = ?unknown, duplicates = ?duplicates, "Rejected unit selection");
        Err(OrchestratorError::InvalidSelection {
            unknown,
            duplicates,
        })
    }

    /// Stop a unit. If it is running in the current session, wait for its
    /// runner to acknowledge (bounded by the grace period).
    pub async fn stop(&self, name: &str) {
        self.stopped.insert(name);

        let handle = self
            .active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();

        let Some(handle) = handle else {
            debug!(unit = %name, "Stop requested for unit with no active runner");
            return;
        };
        if handle.is_finished() {
            debug!(unit = %name, "Stop requested for finished unit");
            return;
        }

        info!(unit = %name, "Stopping unit");
        handle.cancel();

        let limit = self.config.grace_period() + STOP_ACK_SLACK;
        if handle.wait_finished(limit).await {
            info!(unit = %name, "Unit stop acknowledged");
        } else {
            warn!(
                unit = %name,
                waited_ms = limit.as_millis() as u64,
                "Unit stop not acknowledged in time"
            );
        }
    }

    /// Clear a unit's stopped flag. Does not start anything.
    pub fn restart(&self, name: &str) {
        if self.stopped.remove(name) {
            info!(unit = %name, "Unit re-enabled");
        } else {
            debug!(unit = %name, "Restart requested for unit that is not stopped");
        }
    }

    pub fn is_stopped(&self, name: &str) -> bool {
        self.stopped.contains(name)
    }

    /// Current state of every registered unit.
    pub fn status(&self) -> BTreeMap<String, UnitState> {
        let active = self.active.read().unwrap_or_else(PoisonError::into_inner);

        self.units
            .iter()
            .map(|unit| {
                let name = unit.name();
                let state = if self.stopped.contains(name) {
                    UnitState::Stopped
                } else {
                    match active.get(name) {
                        Some(handle) if handle.is_finished() => UnitState::Completed,
                        Some(_) => UnitState::Running,
                        None => UnitState::Ready,
                    }
                };
                (name.to_string(), state)
            })
            .collect()
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("units", &self.list_available())
            .field("stopped", &self.stopped.len())
            .field("has_event_bus", &self.bus.is_some())
            .finish()
    }
}
