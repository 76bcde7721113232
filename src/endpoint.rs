//! `Endpoint` lifecycle: binds the listening socket(s), starts the
//! acceptor/poller/worker triad, and tears it down in reverse order on
//! `stop`/`unbind`.

use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::acceptor::{bind_listener, Acceptor};
use crate::blocking::BlockingSelectorPool;
use crate::config::EndpointConfig;
use crate::error::{EndpointError, Result};
use crate::event::{Event, EventQueue};
use crate::handler::Handler;
use crate::latch::{ConnectionLatch, CountDownLatch};
use crate::pool::Pool;
use crate::poller::Poller;
use crate::tls::load_server_config;
use crate::worker::{DefaultThreadPool, SocketProcessor, ThreadPool};
use crate::wrapper::ConnectionWrapper;
use std::time::Duration;

/// A bound-but-not-yet-started endpoint, the state `Endpoint::bind`
/// returns. Only `start`/`unbind` are callable from here.
pub struct Endpoint {
    config: Arc<EndpointConfig>,
    handler: Arc<dyn Handler>,
    thread_pool: Arc<dyn ThreadPool>,
    latch: Arc<ConnectionLatch>,
    blocking_pool: Arc<BlockingSelectorPool>,
    event_pool: Arc<Pool<Event>>,
    processor_pool: Arc<Pool<SocketProcessor>>,
    connection_pool: Arc<Pool<ConnectionWrapper>>,

    listener: Option<StdTcpListener>,
    local_addr: SocketAddr,

    running: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    stop_latch: Option<Arc<CountDownLatch>>,

    poller_queues: Vec<Arc<EventQueue>>,
    poller_handles: Vec<thread::JoinHandle<()>>,
    acceptor_handles: Vec<thread::JoinHandle<()>>,
}

impl Endpoint {
    /// Binds the listening socket and constructs every collaborator, but
    /// starts no threads yet.
    pub fn bind(config: EndpointConfig, handler: Arc<dyn Handler>) -> Result<Endpoint> {
        let thread_pool: Arc<dyn ThreadPool> = Arc::new(DefaultThreadPool::new(config.worker_thread_count));
        Endpoint::bind_with_thread_pool(config, handler, thread_pool)
    }

    /// Same as `bind`, but with a caller-supplied `ThreadPool` instead of
    /// the `threadpool`-backed default.
    pub fn bind_with_thread_pool(
        config: EndpointConfig,
        handler: Arc<dyn Handler>,
        thread_pool: Arc<dyn ThreadPool>,
    ) -> Result<Endpoint> {
        let config = Arc::new(config);

        let listener = bind_listener(&config).map_err(|source| EndpointError::Bind {
            addr: config.address,
            source,
        })?;
        let local_addr = listener.local_addr().map_err(|source| EndpointError::Bind {
            addr: config.address,
            source,
        })?;

        let latch = Arc::new(ConnectionLatch::new(config.max_connections));
        let blocking_pool = Arc::new(BlockingSelectorPool::new(config.blocking_selector_count));
        let event_pool = Arc::new(Pool::new(config.event_pool_capacity, Event::empty));
        let processor_pool = Arc::new(Pool::new(config.processor_pool_capacity, SocketProcessor::new));
        let connection_pool = Arc::new(Pool::new_bare(config.channel_pool_capacity));

        Ok(Endpoint {
            config,
            handler,
            thread_pool,
            latch,
            blocking_pool,
            event_pool,
            processor_pool,
            connection_pool,
            listener: Some(listener),
            local_addr,
            running: Arc::new(AtomicBool::new(false)),
            closing: Arc::new(AtomicBool::new(false)),
            stop_latch: None,
            poller_queues: Vec::new(),
            poller_handles: Vec::new(),
            acceptor_handles: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A bounded pool of helper selectors a `Handler` may use for blocking
    /// I/O from a worker thread. Intended to be captured by the
    /// application's `Handler` implementation (e.g. into a `OnceLock`)
    /// right after `bind` returns and before `start` is called.
    pub fn blocking_pool(&self) -> Arc<BlockingSelectorPool> {
        Arc::clone(&self.blocking_pool)
    }

    /// Spawns the poller and acceptor threads.
    pub fn start(&mut self) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.closing.store(false, Ordering::Release);

        let stop_latch = Arc::new(CountDownLatch::new(self.config.poller_thread_count));
        self.stop_latch = Some(Arc::clone(&stop_latch));

        let mut pollers = Vec::with_capacity(self.config.poller_thread_count);
        for id in 0..self.config.poller_thread_count {
            let queue = Arc::new(EventQueue::new()?);
            let poller = Poller::new(
                id,
                Arc::clone(&queue),
                Arc::clone(&self.event_pool),
                Arc::clone(&self.processor_pool),
                Arc::clone(&self.latch),
                Arc::clone(&self.handler),
                Arc::clone(&self.thread_pool),
                Arc::clone(&self.config),
                Arc::clone(&self.closing),
                Arc::clone(&stop_latch),
                Arc::clone(&self.connection_pool),
            )?;
            self.poller_queues.push(queue);
            pollers.push(poller);
        }

        for poller in pollers {
            let handle = thread::Builder::new()
                .name(format!("endpoint-poller-{}", poller.id()))
                .spawn(move || poller.run())?;
            self.poller_handles.push(handle);
        }

        let tls_config = match &self.config.tls {
            Some(tls) => Some(load_server_config(tls)?),
            None => None,
        };

        let listener = self.listener.take().ok_or(EndpointError::Shutdown)?;
        for id in 0..self.config.acceptor_thread_count {
            let listener = listener.try_clone()?;
            let acceptor = Acceptor::new(
                id,
                listener,
                Arc::clone(&self.config),
                Arc::clone(&self.latch),
                self.poller_queues.clone(),
                Arc::clone(&self.running),
                tls_config.clone(),
                Arc::clone(&self.connection_pool),
            );
            let handle = thread::Builder::new()
                .name(format!("endpoint-acceptor-{}", id))
                .spawn(move || acceptor.run())?;
            self.acceptor_handles.push(handle);
        }
        self.listener = Some(listener);

        Ok(())
    }

    /// Stops accepting and tears every connection down.
    ///
    /// Clearing `running` is what actually unblocks each acceptor thread:
    /// their `accept(2)` calls are bounded by `SO_RCVTIMEO`
    /// (`accept_poll_timeout`) and recheck the flag on every timeout: see
    /// DESIGN.md's first Open Question decision. Dropping the endpoint's
    /// own listener handle here just releases that one fd; it does not by
    /// itself interrupt the acceptors' own cloned fds.
    ///
    /// Waits for every poller thread to count down the stop latch, bounded
    /// by `selector_timeout + 100ms` — a poller wakes at least that often
    /// even with no pending events, so a thread that is alive will always
    /// reach the countdown within that window. If the bound elapses first
    /// a stuck poller thread is logged and its `JoinHandle` is still
    /// joined, so `stop` can still hang on that join rather than return
    /// with the thread's resources in an unknown state.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }

        if let Some(listener) = self.listener.take() {
            drop(listener);
        }

        for handle in self.acceptor_handles.drain(..) {
            let _ = handle.join();
        }

        self.closing.store(true, Ordering::Release);
        for queue in &self.poller_queues {
            queue.push(Event::empty());
        }

        if let Some(stop_latch) = &self.stop_latch {
            let bound = self.config.selector_timeout + Duration::from_millis(100);
            if !stop_latch.wait_timeout(bound) {
                log::warn!(
                    "endpoint stop: poller threads did not all count down within {:?}, joining anyway",
                    bound
                );
            }
        }
        for handle in self.poller_handles.drain(..) {
            let _ = handle.join();
        }

        self.thread_pool.shutdown();
        self.handler.recycle();

        self.poller_queues.clear();
        self.stop_latch = None;
    }

    /// Releases the listening socket entirely. Only meaningful if `stop`
    /// has already run (or `start` was never called) — `unbind` does not
    /// tear down live connections itself.
    pub fn unbind(mut self) {
        self.listener.take();
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if self.running.load(Ordering::Acquire) {
            self.stop();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::handler::{HandlerResult, SocketEvent};
    use crate::wrapper::ConnectionWrapper;
    use std::io::{Read, Write};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct EchoHandler {
        processed: AtomicUsize,
    }

    impl Handler for EchoHandler {
        fn process(&self, wrapper: &Arc<ConnectionWrapper>, event: SocketEvent) -> HandlerResult {
            self.processed.fetch_add(1, Ordering::Relaxed);
            if event != SocketEvent::OpenRead {
                return HandlerResult::Open;
            }
            let mut buf = [0u8; 256];
            let mut channel = wrapper.channel();
            match channel.read(&mut buf) {
                Ok(crate::channel::ReadOutcome::Read(n)) => {
                    let _ = channel.write(&buf[..n]);
                    drop(channel);
                    HandlerResult::Open
                }
                Ok(crate::channel::ReadOutcome::Eof) => HandlerResult::Closed,
                _ => HandlerResult::Open,
            }
        }
    }

    #[test]
    fn bind_start_accepts_and_echoes() {
        let config = EndpointConfig::new("127.0.0.1:0".parse().unwrap())
            .poller_threads(1)
            .worker_threads(2);
        let handler = Arc::new(EchoHandler {
            processed: AtomicUsize::new(0),
        });
        let mut endpoint = Endpoint::bind(config, handler).unwrap();
        let addr = endpoint.local_addr();
        endpoint.start().unwrap();

        let mut client = std::net::TcpStream::connect(addr).unwrap();
        client.write_all(b"ping").unwrap();

        let mut buf = [0u8; 4];
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        endpoint.stop();
    }
}
