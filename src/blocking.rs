//! Blocking I/O for non-poller threads.
//!
//! Handler code sometimes needs to block the calling (worker) thread on
//! readiness — a long body read is the canonical example — without
//! borrowing one of the endpoint's main pollers for the wait. A small
//! bounded pool of helper selectors exists for exactly this: a blocking
//! `read`/`write` call temporarily registers the connection's channel on
//! a borrowed helper selector, waits on the wrapper's countdown latch for
//! the helper's background thread to signal readiness, then releases the
//! selector back to the pool.

use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use slab::Slab;

use crate::epoll::{Epoll, EpollOpt, Events, Ready, Token};
use crate::latch::ConnectionLatch;
use crate::pool::Pool;
use crate::wrapper::ConnectionWrapper;

/// One helper selector with a dedicated background thread that signals
/// whichever wrapper's countdown latch matches a ready key.
pub struct BlockingSelector {
    epoll: Arc<Epoll>,
    registered: Arc<Mutex<Slab<Arc<ConnectionWrapper>>>>,
}

impl BlockingSelector {
    fn new() -> io::Result<BlockingSelector> {
        let epoll = Arc::new(Epoll::new()?);
        let registered: Arc<Mutex<Slab<Arc<ConnectionWrapper>>>> =
            Arc::new(Mutex::new(Slab::new()));

        let loop_epoll = Arc::clone(&epoll);
        let loop_registered = Arc::clone(&registered);
        thread::Builder::new()
            .name("endpoint-blocking-selector".into())
            .spawn(move || blocking_selector_loop(loop_epoll, loop_registered))
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        Ok(BlockingSelector { epoll, registered })
    }

    /// Blocks the calling thread until `wrapper`'s channel becomes
    /// readable or `timeout` elapses. Returns whether it became ready.
    pub fn wait_readable(&self, wrapper: &Arc<ConnectionWrapper>, timeout: Duration) -> io::Result<bool> {
        self.wait(wrapper, Ready::readable(), &wrapper.read_latch, timeout)
    }

    pub fn wait_writable(&self, wrapper: &Arc<ConnectionWrapper>, timeout: Duration) -> io::Result<bool> {
        self.wait(wrapper, Ready::writable(), &wrapper.write_latch, timeout)
    }

    fn wait(
        &self,
        wrapper: &Arc<ConnectionWrapper>,
        interest: Ready,
        latch: &crate::wrapper::CountdownLatch,
        timeout: Duration,
    ) -> io::Result<bool> {
        latch.reset();

        let token = {
            let mut slab = self.registered.lock().unwrap();
            Token(slab.insert(Arc::clone(wrapper)))
        };

        let add_result = {
            let channel = wrapper.channel();
            self.epoll.add(&*channel, token, interest, EpollOpt::edge())
        };
        if let Err(e) = add_result {
            self.registered.lock().unwrap().remove(token.0);
            return Err(e);
        }

        let fired = latch.await_timeout(timeout);

        {
            let channel = wrapper.channel();
            let _ = self.epoll.delete(&*channel);
        }
        self.registered.lock().unwrap().remove(token.0);

        Ok(fired)
    }
}

fn blocking_selector_loop(epoll: Arc<Epoll>, registered: Arc<Mutex<Slab<Arc<ConnectionWrapper>>>>) {
    let mut events = Events::with_capacity(256);
    loop {
        match epoll.wait(&mut events, Some(Duration::from_millis(250))) {
            Ok(_) => {}
            Err(_) => continue,
        }

        for event in events.iter() {
            let wrapper = {
                let slab = registered.lock().unwrap();
                slab.get(event.token().0).cloned()
            };
            let wrapper = match wrapper {
                Some(w) => w,
                None => continue,
            };
            if event.is_readable() {
                wrapper.read_latch.count_down();
            }
            if event.is_writable() {
                wrapper.write_latch.count_down();
            }
        }
    }
}

/// Bounded pool of `BlockingSelector`s. If the pool is empty, a caller may
/// still construct one up to a hard cap rather than blocking immediately;
/// once that cap is reached, further callers wait for one to free up.
pub struct BlockingSelectorPool {
    pool: Pool<Arc<BlockingSelector>>,
    gate: ConnectionLatch,
}

impl BlockingSelectorPool {
    pub fn new(hard_cap: usize) -> BlockingSelectorPool {
        BlockingSelectorPool {
            pool: Pool::new(hard_cap, || {
                Arc::new(BlockingSelector::new().expect("blocking selector epoll_create1 failed"))
            }),
            gate: ConnectionLatch::new(hard_cap as i64),
        }
    }

    pub fn acquire(&self) -> Arc<BlockingSelector> {
        self.gate.acquire();
        self.pool.take()
    }

    pub fn release(&self, selector: Arc<BlockingSelector>) {
        let _ = self.pool.put(selector);
        self.gate.release();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::channel::Channel;
    use crate::config::SocketProperties;
    use crate::event::EventQueue;
    use std::io::Write;

    #[test]
    fn blocking_read_wakes_on_peer_write() {
        let listener = crate::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = std::net::TcpStream::connect(addr).unwrap();
        let (server, _) = loop {
            match listener.accept() {
                Ok(pair) => break pair,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => panic!("{e}"),
            }
        };

        let channel = Channel::new_plain(server, &SocketProperties::default());
        let queue = Arc::new(EventQueue::new().unwrap());
        let wrapper = Arc::new(ConnectionWrapper::new(
            crate::epoll::Token(0),
            0,
            queue,
            channel,
            Duration::from_secs(5),
            Duration::from_secs(5),
            10,
            false,
        ));

        let pool = BlockingSelectorPool::new(2);
        let selector = pool.acquire();

        let wrapper_clone = Arc::clone(&wrapper);
        let handle = thread::spawn(move || {
            selector.wait_readable(&wrapper_clone, Duration::from_secs(2))
        });

        thread::sleep(Duration::from_millis(50));
        client.write_all(b"hi").unwrap();

        assert!(handle.join().unwrap().unwrap());
    }
}
