//! Core types shared by the fan-out orchestrator and the units it drives.
//!
//! - [`UnitOfWork`] - contract every backend implements
//! - [`UnitEmitter`] - per-run event sink handed to a unit
//! - [`EventEnvelope`] - normalized event record forwarded to callers

pub mod domain;
pub mod emitter;
pub mod error;
pub mod unit;

pub use domain::*;
pub use emitter::UnitEmitter;
pub use error::{Result, UnitError};
pub use unit::{UnitOfWork, FULL_WORKFLOW};

pub use async_trait::async_trait;
