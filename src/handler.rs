//! The protocol handler contract the endpoint dispatches to.
//!
//! The core never parses application bytes itself — it hands a
//! `ConnectionWrapper` and a `SocketEvent` to a `Handler` implementation
//! (HTTP, AJP, a line protocol, whatever) and acts only on the returned
//! `HandlerResult`. This is the seam where the application protocol lives,
//! entirely external to the core.

use std::sync::Arc;

use crate::wrapper::ConnectionWrapper;

/// The reason a `SocketProcessor` is invoking the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketEvent {
    OpenRead,
    OpenWrite,
    Stop,
    Disconnect,
    Error,
}

/// What the handler wants done with the connection after `process` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerResult {
    /// Keep the connection open; its current interest set is unchanged.
    Open,
    /// Close the connection.
    Closed,
    /// The handler parked the connection for long-running (non-poller)
    /// work and will drive it back to readiness itself, e.g. via the
    /// blocking helper-selector pool.
    Long,
}

/// Consumed interface: the application protocol living above the core.
///
/// Implementations must be `Send + Sync` since `process` and `release` are
/// invoked from worker-pool threads and `release` from poller threads.
pub trait Handler: Send + Sync {
    /// Advance the protocol for one readiness event on `wrapper`.
    fn process(&self, wrapper: &Arc<ConnectionWrapper>, event: SocketEvent) -> HandlerResult;

    /// Invoked when a key is cancelled, so the handler can discard any
    /// in-flight per-connection state it was holding outside the wrapper.
    fn release(&self, wrapper: &Arc<ConnectionWrapper>) {
        let _ = wrapper;
    }

    /// Invoked once from `Endpoint::stop` after the worker pool has drained.
    fn recycle(&self) {}
}
