//! Fan-out orchestration core.
//!
//! - [`Orchestrator`] - registers units, starts sessions, stop/restart/status
//! - [`UnitRunner`] - supervises one unit's run, containing every fault
//! - [`Multiplexer`] - merges per-unit feeds into one envelope sequence
//! - [`SessionStream`] - the caller's view of one session

pub mod config;
pub mod error;
pub mod manager;
pub mod multiplexer;
pub mod resources;
pub mod runner;
pub mod session;
pub mod stopped;

pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, Result};
pub use manager::Orchestrator;
pub use multiplexer::{Feed, FeedItem, Multiplexer, ORCHESTRATOR_UNIT};
pub use runner::{RunnerHandle, UnitRunner};
pub use session::SessionStream;
pub use stopped::StoppedSet;
