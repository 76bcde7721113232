//! The heart of the endpoint: each `Poller` owns one selector and a
//! dedicated thread that drains its `EventQueue`, waits for readiness,
//! dispatches ready keys to the worker pool (or runs sendfile inline),
//! and periodically sweeps for timed-out connections.

use std::io;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use slab::Slab;

use crate::config::{EndpointConfig, KeepAlivePolicy};
use crate::epoll::{Epoll, EpollOpt, Events, Ready, Token};
use crate::event::{Event, EventQueue, Op};
use crate::handler::{Handler, SocketEvent};
use crate::latch::ConnectionLatch;
use crate::pool::Pool;
use crate::sendfile::{process_sendfile, SendfileOutcome};
use crate::wrapper::{now_ms, ConnectionWrapper};
use crate::worker::{SocketProcessor, ThreadPool};

/// Reserved token for the poller's own wake eventfd; slab indices never
/// reach `usize::MAX` in practice.
const WAKE_TOKEN: Token = Token(usize::MAX);

pub struct Poller {
    id: usize,
    epoll: Epoll,
    queue: Arc<EventQueue>,
    event_pool: Arc<Pool<Event>>,
    processor_pool: Arc<Pool<SocketProcessor>>,
    slots: Slab<Arc<ConnectionWrapper>>,
    latch: Arc<ConnectionLatch>,
    handler: Arc<dyn Handler>,
    thread_pool: Arc<dyn ThreadPool>,
    config: Arc<EndpointConfig>,
    closing: Arc<AtomicBool>,
    stop_latch: Arc<crate::latch::CountDownLatch>,
    connection_pool: Arc<Pool<ConnectionWrapper>>,
    next_expiration_ms: i64,
}

impl Poller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        queue: Arc<EventQueue>,
        event_pool: Arc<Pool<Event>>,
        processor_pool: Arc<Pool<SocketProcessor>>,
        latch: Arc<ConnectionLatch>,
        handler: Arc<dyn Handler>,
        thread_pool: Arc<dyn ThreadPool>,
        config: Arc<EndpointConfig>,
        closing: Arc<AtomicBool>,
        stop_latch: Arc<crate::latch::CountDownLatch>,
        connection_pool: Arc<Pool<ConnectionWrapper>>,
    ) -> io::Result<Poller> {
        let epoll = Epoll::new()?;
        epoll.add(
            queue.waker(),
            WAKE_TOKEN,
            Ready::readable(),
            EpollOpt::edge(),
        )?;

        Ok(Poller {
            id,
            epoll,
            queue,
            event_pool,
            processor_pool,
            slots: Slab::new(),
            latch,
            handler,
            thread_pool,
            config,
            closing,
            stop_latch,
            connection_pool,
            next_expiration_ms: now_ms(),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn queue(&self) -> Arc<EventQueue> {
        Arc::clone(&self.queue)
    }

    pub fn run(mut self) {
        let mut events = Events::with_capacity(1024);

        loop {
            self.drain_events();

            let pending = self.queue.swap_wake();
            let timeout = if pending > 0 {
                Duration::from_millis(0)
            } else {
                self.config.selector_timeout
            };

            let ready_count = match self.epoll.wait(&mut events, Some(timeout)) {
                Ok(n) => n,
                Err(e) => {
                    log::warn!("poller {} select error: {}", self.id, e);
                    0
                }
            };
            self.queue.reset_wake();

            if self.closing.load(Ordering::Acquire) {
                self.drain_events();
                self.shutdown_all_keys();
                self.stop_latch.count_down();
                return;
            }

            if ready_count == 0 && !self.queue.is_empty() {
                self.drain_events();
            }

            self.dispatch_ready(&events);

            let had_events = ready_count > 0 || !self.queue.is_empty();
            self.run_timeouts(had_events);
        }
    }

    fn drain_events(&mut self) {
        let closing = self.closing.load(Ordering::Acquire);
        let mut drained = Vec::new();
        self.queue.drain(|event| drained.push(event));

        for mut event in drained {
            match event.op {
                Op::Register => {
                    if let Some(wrapper) = event.wrapper.take() {
                        self.apply_register(wrapper);
                    }
                }
                Op::AddInterest(mask) => {
                    if let Some(wrapper) = event.wrapper.take() {
                        self.apply_add_interest(wrapper, mask);
                    }
                }
                Op::Cancel => {
                    if let Some(wrapper) = event.wrapper.take() {
                        let token = wrapper.token();
                        self.cancel_key(token);
                    }
                }
            }

            event.reset();
            if !closing {
                let _ = self.event_pool.put(event);
            }
        }
    }

    fn apply_register(&mut self, wrapper: Arc<ConnectionWrapper>) {
        let idx = self.slots.insert(Arc::clone(&wrapper));
        let token = Token(idx);
        wrapper.set_token(token);

        let added = {
            let channel = wrapper.channel();
            self.epoll.add(&*channel, token, Ready::readable(), EpollOpt::edge())
        };

        match added {
            Ok(()) => wrapper.set_interest(Ready::readable()),
            Err(e) => {
                log::warn!("poller {} register failed: {}", self.id, e);
                self.slots.remove(idx);
                wrapper.mark_closed();
                self.latch.release();
            }
        }
    }

    fn apply_add_interest(&mut self, wrapper: Arc<ConnectionWrapper>, mask: Ready) {
        let token = wrapper.token();
        if !self.slots.contains(token.0) {
            // The key was already cancelled (and fully cleaned up) by
            // `cancel_key`; this is a harmless race between a worker
            // enqueuing interest and the connection closing. No further
            // accounting is needed here — see DESIGN.md.
            return;
        }

        let new_interest = wrapper.interest() | mask;
        if self.modify_raw(&wrapper, new_interest).is_ok() {
            wrapper.set_interest(new_interest);
        } else {
            self.cancel_key(token);
        }
    }

    /// Bypasses `Epoll::modify`'s "must be non-empty" validation, needed
    /// for the ready-key path which legitimately clears both bits
    /// momentarily between a wake and the worker re-arming interest.
    fn modify_raw(&self, wrapper: &ConnectionWrapper, interest: Ready) -> io::Result<()> {
        let channel = wrapper.channel();
        let fd = channel.as_raw_fd();
        self.epoll.0.modify(fd, wrapper.token(), interest, EpollOpt::edge())
    }

    fn dispatch_ready(&mut self, events: &Events) {
        for event in events.iter() {
            if event.token() == WAKE_TOKEN {
                let _ = self.queue.waker().finish();
                continue;
            }

            let token = event.token();
            let wrapper = match self.slots.get(token.0) {
                Some(w) => Arc::clone(w),
                None => continue,
            };

            let ready = event.readiness();
            let new_interest = wrapper.interest().remove(ready);
            if self.modify_raw(&wrapper, new_interest).is_err() {
                self.cancel_key(token);
                continue;
            }
            wrapper.set_interest(new_interest);

            let has_sendfile = wrapper.sendfile.lock().unwrap().is_some();
            if has_sendfile {
                self.drive_sendfile_inline(token, &wrapper);
                continue;
            }

            let mut should_cancel = false;
            if ready.is_readable() {
                wrapper.touch_read();
                if !self.submit(Arc::clone(&wrapper), SocketEvent::OpenRead) {
                    should_cancel = true;
                }
            }
            if !should_cancel && !wrapper.is_closed() && ready.is_writable() {
                wrapper.touch_write();
                if !self.submit(Arc::clone(&wrapper), SocketEvent::OpenWrite) {
                    should_cancel = true;
                }
            }
            if should_cancel {
                self.cancel_key(token);
            }
        }
    }

    fn drive_sendfile_inline(&mut self, token: Token, wrapper: &Arc<ConnectionWrapper>) {
        let policy = self.config.socket.keep_alive_policy;
        let outcome = {
            let mut channel = wrapper.channel();
            process_sendfile(wrapper, &mut channel, policy)
        };

        match outcome {
            Ok(Some(SendfileOutcome::Pending)) => {
                if self.modify_raw(wrapper, Ready::writable()).is_ok() {
                    wrapper.set_interest(Ready::writable());
                } else {
                    self.cancel_key(token);
                }
            }
            Ok(Some(SendfileOutcome::Complete(KeepAlivePolicy::None))) => {
                self.cancel_key(token);
            }
            Ok(Some(SendfileOutcome::Complete(KeepAlivePolicy::Pipelined(_)))) => {
                if wrapper.consume_keep_alive() {
                    if !self.submit(Arc::clone(wrapper), SocketEvent::OpenRead) {
                        self.cancel_key(token);
                    }
                } else {
                    self.cancel_key(token);
                }
            }
            Ok(Some(SendfileOutcome::Complete(KeepAlivePolicy::Open))) => {
                if self.modify_raw(wrapper, Ready::readable()).is_ok() {
                    wrapper.set_interest(Ready::readable());
                } else {
                    self.cancel_key(token);
                }
            }
            Ok(Some(SendfileOutcome::Error)) | Err(_) => {
                self.cancel_key(token);
            }
            Ok(None) => {}
        }
    }

    fn submit(&self, wrapper: Arc<ConnectionWrapper>, event: SocketEvent) -> bool {
        let mut processor = self.processor_pool.take();
        processor.bind(wrapper, event, Arc::clone(&self.handler), Arc::clone(&self.config));
        let processor_pool = Arc::clone(&self.processor_pool);
        let closing = Arc::clone(&self.closing);

        self.thread_pool.execute(Box::new(move || {
            processor.run();
            if !closing.load(Ordering::Acquire) {
                processor.reset();
                let _ = processor_pool.put(processor);
            }
        }))
    }

    /// The idempotent teardown sequence for a key. Slab removal is the
    /// sole idempotency guard: a second call on an already-removed token
    /// is a no-op.
    ///
    /// Once every other live reference to the wrapper has dropped (the
    /// acceptor's clone went into the slab only, and any in-flight worker
    /// task has finished), `Arc::try_unwrap` succeeds and the wrapper —
    /// channel, buffers and all — is returned to the connection pool for
    /// the acceptor to recycle into the next accepted socket. If another
    /// reference is still alive the wrapper is simply dropped normally
    /// wherever that last reference goes out of scope.
    fn cancel_key(&mut self, token: Token) {
        let wrapper = match self.slots.try_remove(token.0) {
            Some(w) => w,
            None => return,
        };

        self.handler.release(&wrapper);

        {
            let channel = wrapper.channel();
            let _ = self.epoll.delete(&*channel);
        }

        let _ = wrapper.channel().close();
        *wrapper.sendfile.lock().unwrap() = None;

        self.latch.release();
        wrapper.mark_closed();

        if let Ok(wrapper) = Arc::try_unwrap(wrapper) {
            let _ = self.connection_pool.put(wrapper);
        }
    }

    fn shutdown_all_keys(&mut self) {
        let tokens: Vec<usize> = self.slots.iter().map(|(idx, _)| idx).collect();
        for idx in tokens {
            if let Some(wrapper) = self.slots.get(idx) {
                let wrapper = Arc::clone(wrapper);
                self.handler.process(&wrapper, SocketEvent::Stop);
            }
            self.cancel_key(Token(idx));
        }
    }

    fn run_timeouts(&mut self, had_events: bool) {
        let now = now_ms();
        let key_count = self.slots.len();
        let closing = self.closing.load(Ordering::Acquire);

        if now < self.next_expiration_ms && (key_count > 0 || had_events) && !closing {
            return;
        }

        let tokens: Vec<usize> = self.slots.iter().map(|(idx, _)| idx).collect();
        for idx in tokens {
            let wrapper = match self.slots.get(idx) {
                Some(w) => Arc::clone(w),
                None => continue,
            };

            if closing {
                self.cancel_key(Token(idx));
                continue;
            }

            let interest = wrapper.interest();
            let timed_out = (interest.is_readable() && wrapper.read_timed_out(now))
                || (interest.is_writable() && wrapper.write_timed_out(now));

            if timed_out {
                let _ = self.modify_raw(&wrapper, Ready::empty());
                wrapper.set_interest(Ready::empty());

                if !self.submit(Arc::clone(&wrapper), SocketEvent::Error) {
                    self.cancel_key(Token(idx));
                }
            }
        }

        self.next_expiration_ms = now + self.config.timeout_interval.as_millis() as i64;
    }
}
