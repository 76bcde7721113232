//! Per-connection state attached to a poller's selector key.
//!
//! A `ConnectionWrapper` is bound to exactly one `Poller` from registration
//! until close, and its `interest_set` is mutated only by that poller's
//! thread. Everything else that needs to read or update wrapper state
//! (workers, the acceptor, the event-queue apply path) does so through the
//! atomics and the channel mutex below rather than by reaching into the
//! poller's selector.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::channel::Channel;
use crate::config::SocketProperties;
use crate::epoll::{Ready, Token};
use crate::event::EventQueue;
use crate::net::TcpStream;
use crate::sendfile::SendfileState;

/// A one-shot countdown gate used by the blocking-I/O helper path: a
/// worker thread registers a wrapper's channel on a borrowed helper
/// selector, then blocks here until that helper's thread signals
/// readiness or the wrapper closes.
pub struct CountdownLatch {
    state: Mutex<bool>,
    cond: Condvar,
}

impl CountdownLatch {
    pub fn new() -> CountdownLatch {
        CountdownLatch {
            state: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    pub fn count_down(&self) {
        let mut fired = self.state.lock().unwrap();
        *fired = true;
        self.cond.notify_all();
    }

    pub fn await_timeout(&self, timeout: Duration) -> bool {
        let fired = self.state.lock().unwrap();
        let (guard, _) = self
            .cond
            .wait_timeout_while(fired, timeout, |fired| !*fired)
            .unwrap();
        *guard
    }

    pub fn reset(&self) {
        *self.state.lock().unwrap() = false;
    }
}

impl Default for CountdownLatch {
    fn default() -> CountdownLatch {
        CountdownLatch::new()
    }
}

/// Per-connection state, attached to the selector key for the lifetime of
/// the connection.
pub struct ConnectionWrapper {
    /// The key this wrapper is attached to on its owning poller's
    /// selector. Unset (`usize::MAX`) until the poller thread processes
    /// this wrapper's `Register` event and assigns it a slab slot — the
    /// wrapper is constructed by the acceptor before that slot exists.
    token: AtomicUsize,
    /// Index of the owning poller in `Endpoint`'s poller list. Fixed for
    /// the wrapper's lifetime — a wrapper never migrates pollers.
    pub poller_id: usize,
    /// Event queue for the owning poller, used to submit `AddInterest`
    /// from any thread without touching the selector directly.
    pub(crate) queue: Arc<EventQueue>,

    channel: Mutex<Channel>,
    interest: AtomicU8,
    last_read_ms: AtomicI64,
    last_write_ms: AtomicI64,
    read_timeout_ms: i64,
    write_timeout_ms: i64,
    keep_alive_remaining: AtomicU32,
    secure: bool,
    closed: AtomicBool,

    pub(crate) sendfile: Mutex<Option<SendfileState>>,
    pub(crate) read_latch: CountdownLatch,
    pub(crate) write_latch: CountdownLatch,
}

impl ConnectionWrapper {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        token: Token,
        poller_id: usize,
        queue: Arc<EventQueue>,
        channel: Channel,
        read_timeout: Duration,
        write_timeout: Duration,
        keep_alive_remaining: u32,
        secure: bool,
    ) -> ConnectionWrapper {
        ConnectionWrapper {
            token: AtomicUsize::new(token.0),
            poller_id,
            queue,
            channel: Mutex::new(channel),
            interest: AtomicU8::new(Ready::readable().bits()),
            last_read_ms: AtomicI64::new(now_ms()),
            last_write_ms: AtomicI64::new(now_ms()),
            read_timeout_ms: read_timeout.as_millis() as i64,
            write_timeout_ms: write_timeout.as_millis() as i64,
            keep_alive_remaining: AtomicU32::new(keep_alive_remaining),
            secure,
            closed: AtomicBool::new(false),
            sendfile: Mutex::new(None),
            read_latch: CountdownLatch::new(),
            write_latch: CountdownLatch::new(),
        }
    }

    /// Rebinds a pooled wrapper to a freshly accepted socket, in place.
    /// The embedded `Channel` keeps its already-allocated buffers (see
    /// `Channel::reset`); every other field is reinitialized exactly as
    /// `new` would set it. Only called on a wrapper just taken out of the
    /// connection pool, before it is published (wrapped in an `Arc`) to
    /// any other thread.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn recycle(
        &mut self,
        poller_id: usize,
        queue: Arc<EventQueue>,
        stream: TcpStream,
        socket_props: &SocketProperties,
        read_timeout: Duration,
        write_timeout: Duration,
        keep_alive_remaining: u32,
        secure: bool,
    ) {
        self.token.store(usize::MAX, Ordering::Release);
        self.poller_id = poller_id;
        self.queue = queue;
        self.channel.get_mut().unwrap().reset(stream, socket_props);
        self.interest.store(Ready::readable().bits(), Ordering::Release);
        let now = now_ms();
        self.last_read_ms.store(now, Ordering::Relaxed);
        self.last_write_ms.store(now, Ordering::Relaxed);
        self.read_timeout_ms = read_timeout.as_millis() as i64;
        self.write_timeout_ms = write_timeout.as_millis() as i64;
        self.keep_alive_remaining.store(keep_alive_remaining, Ordering::Release);
        self.secure = secure;
        self.closed.store(false, Ordering::Release);
        *self.sendfile.lock().unwrap() = None;
        self.read_latch.reset();
        self.write_latch.reset();
    }

    pub fn channel(&self) -> std::sync::MutexGuard<'_, Channel> {
        self.channel.lock().unwrap()
    }

    pub fn token(&self) -> Token {
        Token(self.token.load(Ordering::Acquire))
    }

    /// Assigned once by the owning poller thread when draining this
    /// wrapper's `Register` event.
    pub(crate) fn set_token(&self, token: Token) {
        self.token.store(token.0, Ordering::Release);
    }

    pub fn interest(&self) -> Ready {
        Ready::from_bits(self.interest.load(Ordering::Acquire))
    }

    /// Only the owning poller thread calls this — it mirrors the selector
    /// key's interest onto the wrapper after applying an `epoll::modify`.
    pub(crate) fn set_interest(&self, interest: Ready) {
        self.interest.store(interest.bits(), Ordering::Release);
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn touch_read(&self) {
        self.last_read_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn touch_write(&self) {
        self.last_write_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn read_timed_out(&self, now: i64) -> bool {
        self.read_timeout_ms > 0 && now - self.last_read_ms.load(Ordering::Relaxed) > self.read_timeout_ms
    }

    pub fn write_timed_out(&self, now: i64) -> bool {
        self.write_timeout_ms > 0
            && now - self.last_write_ms.load(Ordering::Relaxed) > self.write_timeout_ms
    }

    /// Decrements the keep-alive budget and reports whether the connection
    /// may still serve another request afterwards.
    pub fn consume_keep_alive(&self) -> bool {
        let prev = self.keep_alive_remaining.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |n| Some(n.saturating_sub(1)),
        );
        match prev {
            Ok(prev) => prev > 1,
            Err(_) => false,
        }
    }

    pub fn keep_alive_remaining(&self) -> u32 {
        self.keep_alive_remaining.load(Ordering::Acquire)
    }

    /// Attaches a file for zero-copy transfer to this connection's socket.
    /// A `Handler` calls this from `process` to start a
    /// sendfile transfer; the poller/worker sendfile path drives it to
    /// completion and applies the connection's `KeepAlivePolicy` once done.
    pub fn start_sendfile(&self, file: std::fs::File, pos: u64, length: u64) {
        use std::os::unix::io::IntoRawFd;
        let fd = unsafe { crate::sys::fd::FileDesc::new(file.into_raw_fd()) };
        *self.sendfile.lock().unwrap() = Some(crate::sendfile::SendfileState::new(fd, pos, length));
    }

    /// Whether a sendfile transfer is currently attached and in progress.
    pub fn has_sendfile(&self) -> bool {
        self.sendfile.lock().unwrap().is_some()
    }
}

pub(crate) fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::channel::Channel;
    use crate::config::SocketProperties;
    use crate::net::TcpListener;

    fn make_wrapper(read_timeout_ms: i64) -> (TcpListener, ConnectionWrapper) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = crate::net::TcpStream::connect(addr).unwrap();
        let (server, _) = loop {
            match listener.accept() {
                Ok(pair) => break pair,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) => panic!("{e}"),
            }
        };
        drop(client);

        let channel = Channel::new_plain(server, &SocketProperties::default());
        let queue = Arc::new(EventQueue::new().unwrap());
        let wrapper = ConnectionWrapper::new(
            Token(0),
            0,
            queue,
            channel,
            Duration::from_millis(read_timeout_ms as u64),
            Duration::from_secs(20),
            2,
            false,
        );
        (listener, wrapper)
    }

    #[test]
    fn keep_alive_budget_counts_down_to_zero() {
        let (_listener, wrapper) = make_wrapper(20_000);
        assert!(wrapper.consume_keep_alive());
        assert!(!wrapper.consume_keep_alive());
        assert_eq!(wrapper.keep_alive_remaining(), 0);
    }

    #[test]
    fn read_timeout_is_not_triggered_before_deadline() {
        let (_listener, wrapper) = make_wrapper(60_000);
        assert!(!wrapper.read_timed_out(now_ms() + 1000));
    }

    #[test]
    fn read_timeout_triggers_after_deadline() {
        let (_listener, wrapper) = make_wrapper(10);
        assert!(wrapper.read_timed_out(now_ms() + 1000));
    }
}
