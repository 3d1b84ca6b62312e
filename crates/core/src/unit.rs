//! The contract every pluggable backend implements.

use async_trait::async_trait;

use crate::domain::{SharedContext, UnitInput};
use crate::emitter::UnitEmitter;
use crate::error::Result;

/// Granularity every backend is expected to offer.
pub const FULL_WORKFLOW: &str = "full_workflow";

/// A named, cancellable, asynchronous producer of event envelopes.
///
/// Implementations are registered once with the orchestrator and may be
/// invoked any number of times; each [`UnitOfWork::produce`] call gets its own
/// [`UnitEmitter`], so no iteration state is shared between runs.
///
/// A run must end with exactly one terminal envelope (`complete`, `error`
/// or `stopped`). Returning `Err` instead is also accepted: the runner turns
/// the error into the terminal envelope.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Stable identifier, unique across registered units.
    fn name(&self) -> &str;

    /// Granularities this unit knows how to execute, in preference order.
    fn supported_granularities(&self) -> Vec<String>;

    fn supports(&self, granularity: &str) -> bool {
        self.supported_granularities()
            .iter()
            .any(|g| g == granularity)
    }

    /// Run `granularity` for `input`, pushing progress through `emitter`.
    async fn produce(
        &self,
        granularity: &str,
        input: &UnitInput,
        context: &SharedContext,
        emitter: UnitEmitter,
    ) -> Result<()>;
}
