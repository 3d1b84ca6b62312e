//! RAII guards for automatic cleanup.
//!
//! - [`FeedGuard`] - guarantees every runner ends its feed with a terminal
//!   envelope and an end-of-stream marker, even when it unwinds

mod feed_guard;

pub use feed_guard::FeedGuard;
