//! Caller-facing stream of one execution session.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use tokio_util::sync::DropGuard;
use uuid::Uuid;

use fanout_core::EventEnvelope;

use crate::multiplexer::Multiplexer;

/// Merged envelope stream returned by `execute`.
///
/// Dropping the stream before it ends cancels every runner of the session.
pub struct SessionStream {
    session_id: Uuid,
    inner: BoxStream<'static, EventEnvelope>,
    _cancel_on_drop: DropGuard,
}

impl SessionStream {
    pub(crate) fn new(multiplexer: Multiplexer, cancel_on_drop: DropGuard) -> Self {
        let session_id = multiplexer.session_id();
        let inner = stream::unfold(multiplexer, |mut mux| async move {
            let envelope = mux.next_envelope().await?;
            Some((envelope, mux))
        })
        .boxed();

        Self {
            session_id,
            inner,
            _cancel_on_drop: cancel_on_drop,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Drain the session into a vector.
    pub async fn collect_all(self) -> Vec<EventEnvelope> {
        self.collect().await
    }
}

impl Stream for SessionStream {
    type Item = EventEnvelope;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for SessionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStream")
            .field("session_id", &self.session_id)
            .finish()
    }
}
