//! The pluggable worker-pool interface and the per-dispatch
//! `SocketProcessor` task it runs.
//!
//! Backpressure is the `ThreadPool`'s problem to signal, not the core's to
//! enforce: `execute` returns `false` when the task could not be
//! accepted, and callers (the poller) treat that as an immediate key
//! cancellation rather than blocking the readiness loop.

use std::sync::Arc;

use crate::config::{EndpointConfig, KeepAlivePolicy};
use crate::epoll::Ready;
use crate::event::{Event, EventQueue};
use crate::handler::{Handler, HandlerResult, SocketEvent};
use crate::sendfile::{process_sendfile, SendfileOutcome};
use crate::tls::HandshakeStatus;
use crate::wrapper::ConnectionWrapper;

/// Consumed interface: construction of the worker thread pool is external
/// to the core; the core only needs somewhere to submit tasks and a way
/// to shut that submission point down.
pub trait ThreadPool: Send + Sync {
    /// Submits `task`. Returns `false` if the pool could not accept it
    /// (queue full, pool shutting down) — the caller must not assume the
    /// task ran.
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>) -> bool;

    fn shutdown(&self);
}

/// Default `ThreadPool`, a thin wrapper over the widely used `threadpool`
/// crate (see DESIGN.md for the alternatives considered).
pub struct DefaultThreadPool {
    inner: threadpool::ThreadPool,
}

impl DefaultThreadPool {
    pub fn new(workers: usize) -> DefaultThreadPool {
        DefaultThreadPool {
            inner: threadpool::ThreadPool::new(workers.max(1)),
        }
    }
}

impl ThreadPool for DefaultThreadPool {
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>) -> bool {
        self.inner.execute(task);
        true
    }

    fn shutdown(&self) {
        self.inner.join();
    }
}

/// A worker-pool dispatch unit: advances a connection's handshake (if
/// any), invokes the handler, and translates the outcome into interest
/// mutations submitted back to the owning poller's `EventQueue`.
///
/// Pooled like the buffer/event/channel caches since the struct itself is
/// cheap but not free to allocate under sustained load.
pub struct SocketProcessor {
    wrapper: Option<Arc<ConnectionWrapper>>,
    event: SocketEvent,
    handler: Option<Arc<dyn Handler>>,
    config: Option<Arc<EndpointConfig>>,
}

impl SocketProcessor {
    pub fn new() -> SocketProcessor {
        SocketProcessor {
            wrapper: None,
            event: SocketEvent::OpenRead,
            handler: None,
            config: None,
        }
    }

    pub fn bind(
        &mut self,
        wrapper: Arc<ConnectionWrapper>,
        event: SocketEvent,
        handler: Arc<dyn Handler>,
        config: Arc<EndpointConfig>,
    ) {
        self.wrapper = Some(wrapper);
        self.event = event;
        self.handler = Some(handler);
        self.config = Some(config);
    }

    pub fn reset(&mut self) {
        self.wrapper = None;
        self.handler = None;
        self.config = None;
    }

    /// Runs the bound dispatch to completion. Recursion only happens for
    /// the sendfile-pipelined-keepalive case, which is equivalent to
    /// "submit a worker task with OPEN_READ" while already running on a
    /// worker thread — see DESIGN.md.
    pub fn run(&mut self) {
        let wrapper = match self.wrapper.take() {
            Some(w) => w,
            None => return,
        };
        let handler = self.handler.clone().expect("processor bound before run");
        let event = self.event;

        if wrapper.is_closed() {
            return;
        }

        let queue: Arc<EventQueue> = wrapper.queue.clone();

        let handshake_progress = {
            let mut channel = wrapper.channel();
            if channel.handshake_complete() {
                Ok(HandshakeStatus::Complete)
            } else if matches!(
                event,
                SocketEvent::Stop | SocketEvent::Disconnect | SocketEvent::Error
            ) {
                Err(())
            } else {
                let readable = matches!(event, SocketEvent::OpenRead);
                let writable = matches!(event, SocketEvent::OpenWrite);
                channel.handshake(readable, writable).map_err(|_| ())
            }
        };

        match handshake_progress {
            Err(()) => {
                queue.push(Event::cancel(wrapper));
                return;
            }
            Ok(HandshakeStatus::NeedRead) => {
                queue.push(Event::add_interest(wrapper, Ready::readable()));
                return;
            }
            Ok(HandshakeStatus::NeedWrite) => {
                queue.push(Event::add_interest(wrapper, Ready::writable()));
                return;
            }
            Ok(HandshakeStatus::Complete) => {}
        }

        let result = handler.process(&wrapper, event);

        match result {
            HandlerResult::Closed => {
                let _ = wrapper.channel().close();
                queue.push(Event::cancel(wrapper));
                return;
            }
            HandlerResult::Long => {
                // Handler parked the connection for out-of-band blocking
                // I/O; it is responsible for driving it further.
            }
            HandlerResult::Open => {
                if wrapper.consume_keep_alive() {
                    queue.push(Event::add_interest(Arc::clone(&wrapper), Ready::readable()));
                } else {
                    queue.push(Event::cancel(Arc::clone(&wrapper)));
                    return;
                }
            }
        }

        self.drive_sendfile_if_attached(&wrapper, &queue);
    }

    fn drive_sendfile_if_attached(&self, wrapper: &Arc<ConnectionWrapper>, queue: &Arc<EventQueue>) {
        let policy = self
            .config
            .as_ref()
            .map(|c| c.socket.keep_alive_policy)
            .unwrap_or(KeepAlivePolicy::Open);

        let has_sendfile = wrapper.sendfile.lock().unwrap().is_some();
        if !has_sendfile {
            return;
        }

        let outcome = {
            let mut channel = wrapper.channel();
            process_sendfile(wrapper, &mut channel, policy)
        };

        match outcome {
            Ok(Some(SendfileOutcome::Pending)) => {
                queue.push(Event::add_interest(Arc::clone(wrapper), Ready::writable()));
            }
            Ok(Some(SendfileOutcome::Complete(KeepAlivePolicy::None))) => {
                queue.push(Event::cancel(Arc::clone(wrapper)));
            }
            Ok(Some(SendfileOutcome::Complete(KeepAlivePolicy::Pipelined(_)))) => {
                if wrapper.consume_keep_alive() {
                    // Equivalent to submitting a fresh OPEN_READ worker
                    // task while already on a worker thread.
                    if let Some(handler) = &self.handler {
                        match handler.process(wrapper, SocketEvent::OpenRead) {
                            HandlerResult::Closed => {
                                let _ = wrapper.channel().close();
                                queue.push(Event::cancel(Arc::clone(wrapper)));
                            }
                            _ => {
                                queue.push(Event::add_interest(Arc::clone(wrapper), Ready::readable()));
                            }
                        }
                    }
                } else {
                    queue.push(Event::cancel(Arc::clone(wrapper)));
                }
            }
            Ok(Some(SendfileOutcome::Complete(KeepAlivePolicy::Open))) => {
                queue.push(Event::add_interest(Arc::clone(wrapper), Ready::readable()));
            }
            Ok(Some(SendfileOutcome::Error)) | Err(_) => {
                queue.push(Event::cancel(Arc::clone(wrapper)));
            }
            Ok(None) => {}
        }
    }
}

impl Default for SocketProcessor {
    fn default() -> SocketProcessor {
        SocketProcessor::new()
    }
}
