use std::io;
use std::net::SocketAddr;

/// Errors surfaced across the endpoint's lifecycle boundary.
///
/// Per-connection failures (`Tls`, `Timeout`, `HandshakeFailed`) never leave
/// a poller or acceptor thread — they are contained inside `cancelled_key`
/// or the worker dispatch path and only ever reach a `Handler` as a
/// `SocketEvent::Error`. Only `Bind` propagates out of `Endpoint::bind`.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("object pool '{pool}' exhausted")]
    PoolExhausted { pool: &'static str },

    #[error("connection timed out")]
    Timeout,

    #[error("tls handshake failed")]
    HandshakeFailed,

    #[error("endpoint is shutting down")]
    Shutdown,
}

impl EndpointError {
    /// True for errors that are per-connection and must never propagate out
    /// of a poller/acceptor thread.
    pub fn is_connection_local(&self) -> bool {
        matches!(
            self,
            EndpointError::Io(_)
                | EndpointError::Tls(_)
                | EndpointError::Timeout
                | EndpointError::HandshakeFailed
                | EndpointError::PoolExhausted { .. }
        )
    }
}

/// Result alias used throughout the crate's public surface.
pub type Result<T> = std::result::Result<T, EndpointError>;
