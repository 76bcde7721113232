//! The deferred interest-set mutation protocol between any thread and a
//! poller. Since the `ConnectionWrapper` already owns its `Channel`
//! behind a mutex (see `crate::wrapper`), an `Event` only needs to carry
//! the wrapper and the operation to apply to its key.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use concurrent_queue::ConcurrentQueue;

use crate::epoll::Ready;
use crate::waker::Waker;
use crate::wrapper::ConnectionWrapper;

/// What to do with the wrapper's key once drained from the queue.
#[derive(Clone)]
pub enum Op {
    /// Attach `wrapper` as the key's attachment with initial interest READ.
    Register,
    /// OR `mask` into the key's existing interest set.
    AddInterest(Ready),
    /// Cancel the key and tear the connection down — added because a
    /// worker thread deciding to close a connection (handshake failure,
    /// handler `Closed`, keep-alive exhaustion) has no other sound way to
    /// reach a selector it does not own; see DESIGN.md's Open Question
    /// notes.
    Cancel,
}

/// A single queued instruction. Pooled and reset between uses.
#[derive(Clone)]
pub struct Event {
    pub wrapper: Option<Arc<ConnectionWrapper>>,
    pub op: Op,
}

impl Event {
    pub fn register(wrapper: Arc<ConnectionWrapper>) -> Event {
        Event {
            wrapper: Some(wrapper),
            op: Op::Register,
        }
    }

    pub fn add_interest(wrapper: Arc<ConnectionWrapper>, mask: Ready) -> Event {
        Event {
            wrapper: Some(wrapper),
            op: Op::AddInterest(mask),
        }
    }

    pub fn cancel(wrapper: Arc<ConnectionWrapper>) -> Event {
        Event {
            wrapper: Some(wrapper),
            op: Op::Cancel,
        }
    }

    pub fn empty() -> Event {
        Event {
            wrapper: None,
            op: Op::AddInterest(Ready::empty()),
        }
    }

    /// Clears the event for return to its pool.
    pub fn reset(&mut self) {
        self.wrapper = None;
        self.op = Op::AddInterest(Ready::empty());
    }
}

/// Unbounded MPSC queue of pending `Event`s for one poller.
///
/// `push` bumps a pending counter; the -1 -> 0 transition wakes the
/// poller's selector via `waker` so a blocked `epoll_wait` returns
/// promptly instead of waiting out the full `selector_timeout`. This is
/// the crate's sole coordination primitive between event producers and
/// the poller thread: a pending-counter-plus-awakener scheme, here built
/// over an `eventfd`-backed `Waker`.
pub struct EventQueue {
    queue: ConcurrentQueue<Event>,
    pending: AtomicI64,
    waker: Waker,
}

impl EventQueue {
    pub fn new() -> std::io::Result<EventQueue> {
        Ok(EventQueue {
            queue: ConcurrentQueue::unbounded(),
            pending: AtomicI64::new(0),
            waker: Waker::new()?,
        })
    }

    pub fn waker(&self) -> &Waker {
        &self.waker
    }

    pub fn push(&self, event: Event) {
        // queue.push on an unbounded queue only errs once closed, which
        // this crate never does before the poller thread exits.
        let _ = self.queue.push(event);
        let prev = self.pending.fetch_add(1, Ordering::AcqRel);
        // The poller parks the counter at -1 while it blocks in
        // `epoll_wait` (see `swap_wake`). The wake has to fire on that
        // -1 -> 0 transition, not on 0 -> 1 — a poller that is merely idle
        // (counter at 0) will see the new event on its next drain anyway.
        if prev == -1 {
            let _ = self.waker.wakeup();
        }
    }

    pub fn pop(&self) -> Option<Event> {
        match self.queue.pop() {
            Ok(event) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                Some(event)
            }
            Err(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drains every currently queued event, applying `f` to each in FIFO
    /// order.
    pub fn drain<F: FnMut(Event)>(&self, mut f: F) {
        while let Some(event) = self.pop() {
            f(event);
        }
    }

    /// Swaps the wake counter to -1 and returns whether work was pending:
    /// a positive value means events arrived since the last drain and the
    /// poller must not block in `select`.
    pub fn swap_wake(&self) -> i64 {
        self.pending.swap(-1, Ordering::AcqRel)
    }

    pub fn reset_wake(&self) {
        self.pending.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::channel::Channel;
    use crate::config::SocketProperties;
    use crate::epoll::Token;
    use std::time::Duration;

    fn dummy_wrapper(queue: Arc<EventQueue>) -> Arc<ConnectionWrapper> {
        let listener = crate::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = crate::net::TcpStream::connect(addr).unwrap();
        let (stream, _) = loop {
            match listener.accept() {
                Ok(pair) => break pair,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) => panic!("{e}"),
            }
        };
        let channel = Channel::new_plain(stream, &SocketProperties::default());
        Arc::new(ConnectionWrapper::new(
            Token(0),
            0,
            queue,
            channel,
            Duration::from_secs(20),
            Duration::from_secs(20),
            100,
            false,
        ))
    }

    #[test]
    fn fifo_order_preserved() {
        let queue = Arc::new(EventQueue::new().unwrap());
        let wrapper = dummy_wrapper(Arc::clone(&queue));

        queue.push(Event::add_interest(Arc::clone(&wrapper), Ready::readable()));
        queue.push(Event::add_interest(Arc::clone(&wrapper), Ready::writable()));

        let first = queue.pop().unwrap();
        let second = queue.pop().unwrap();

        match (first.op, second.op) {
            (Op::AddInterest(a), Op::AddInterest(b)) => {
                assert!(a.is_readable());
                assert!(b.is_writable());
            }
            _ => panic!("unexpected op"),
        }
    }

    #[test]
    fn push_wakes_on_negative_to_zero_transition() {
        use crate::epoll::{Epoll, EpollOpt, Events};

        let queue = Arc::new(EventQueue::new().unwrap());
        let wrapper = dummy_wrapper(Arc::clone(&queue));

        let epoll = Epoll::new().unwrap();
        epoll
            .add(queue.waker(), Token(0), Ready::readable(), EpollOpt::edge())
            .unwrap();
        let mut events = Events::with_capacity(4);

        // Simulate a poller blocked in `epoll_wait` (pending parked at -1).
        queue.swap_wake();
        queue.push(Event::register(Arc::clone(&wrapper)));
        assert_eq!(
            epoll.wait(&mut events, Some(Duration::from_millis(200))).unwrap(),
            1,
            "push while the poller was blocked must wake it"
        );
        queue.waker().finish().unwrap();

        // Simulate an idle (non-blocked) poller (pending parked at 0).
        queue.reset_wake();
        queue.push(Event::register(wrapper));
        assert_eq!(
            epoll.wait(&mut events, Some(Duration::from_millis(50))).unwrap(),
            0,
            "push while the poller was already idle must not re-signal the eventfd"
        );
    }
}
