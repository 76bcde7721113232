//! A high-concurrency, readiness-based (epoll) TCP endpoint core.
//!
//! Built around an acceptor/poller/worker triad: one or more `Acceptor`
//! threads block in `accept(2)`, hand each connection to a round-robin
//! `Poller` (each owning its own epoll instance and thread), which waits
//! for readiness and submits work to a pluggable `ThreadPool`. Application
//! protocol logic lives entirely behind the `Handler` trait — this crate
//! never parses a single application byte.
//!
//! `Endpoint` ties the pieces together:
//!
//! ```no_run
//! use std::sync::Arc;
//! use nio_endpoint::{Endpoint, EndpointConfig, Handler, HandlerResult, SocketEvent};
//!
//! struct Echo;
//! impl Handler for Echo {
//!     fn process(&self, _wrapper: &Arc<nio_endpoint::ConnectionWrapper>, _event: SocketEvent) -> HandlerResult {
//!         HandlerResult::Open
//!     }
//! }
//!
//! let config = EndpointConfig::new("127.0.0.1:8080".parse().unwrap());
//! let mut endpoint = Endpoint::bind(config, Arc::new(Echo)).unwrap();
//! endpoint.start().unwrap();
//! endpoint.stop();
//! ```

#[macro_use]
mod sys;

pub mod epoll;

mod acceptor;
mod blocking;
mod channel;
mod config;
mod endpoint;
mod error;
mod event;
mod handler;
mod latch;
mod net;
mod poller;
mod pool;
mod sendfile;
mod tls;
mod waker;
mod worker;
mod wrapper;

pub use channel::{ByteBuffer, Channel, ReadOutcome, WriteOutcome};
pub use config::{EndpointConfig, KeepAlivePolicy, SocketProperties, TlsConfig};
pub use endpoint::Endpoint;
pub use error::{EndpointError, Result};
pub use handler::{Handler, HandlerResult, SocketEvent};
pub use latch::{ConnectionLatch, CountDownLatch};
pub use net::{TcpListener, TcpStream};
pub use pool::Pool;
pub use tls::{ensure_crypto_provider, HandshakeStatus, SecureChannel};
pub use worker::{DefaultThreadPool, ThreadPool};
pub use wrapper::ConnectionWrapper;

pub use blocking::{BlockingSelector, BlockingSelectorPool};
