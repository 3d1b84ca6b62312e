//! Observer bus for fan-out sessions.
//!
//! Every envelope an orchestrator forwards to its caller can also be
//! broadcast here, so activity trackers and UIs can watch a session without
//! consuming its stream.

mod bus;

pub use bus::EventBus;
pub use fanout_core::EventEnvelope;
