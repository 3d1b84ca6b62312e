mod envelope;
mod input;
mod state;

pub use envelope::{into_payload, ErrorType, EventEnvelope, EventKind, Payload};
pub use input::{SharedContext, UnitInput};
pub use state::UnitState;
