use std::sync::{Condvar, Mutex};

/// A counting latch bounding the number of connections an endpoint will
/// hold open concurrently. The acceptor blocks in `acquire` before calling
/// `accept(2)`; a worker (or the poller, on close) calls `release` once the
/// connection's wrapper is torn down.
///
/// `limit < 0` disables the bound entirely — `acquire` then always
/// succeeds immediately, matching the "unlimited" setting for
/// `max_connections`.
pub struct ConnectionLatch {
    state: Mutex<State>,
    cond: Condvar,
}

struct State {
    limit: i64,
    count: i64,
}

impl ConnectionLatch {
    pub fn new(limit: i64) -> ConnectionLatch {
        ConnectionLatch {
            state: Mutex::new(State { limit, count: 0 }),
            cond: Condvar::new(),
        }
    }

    /// Block until a connection slot is available, then take it.
    pub fn acquire(&self) {
        let mut state = self.state.lock().unwrap();
        while state.limit >= 0 && state.count >= state.limit {
            state = self.cond.wait(state).unwrap();
        }
        state.count += 1;
    }

    /// Release a previously acquired slot, waking one waiter if any.
    pub fn release(&self) {
        let mut state = self.state.lock().unwrap();
        if state.count > 0 {
            state.count -= 1;
        }
        self.cond.notify_one();
    }

    pub fn count(&self) -> i64 {
        self.state.lock().unwrap().count
    }

    /// Change the bound at runtime; wakes all waiters so they can
    /// re-check against the new limit.
    pub fn set_limit(&self, limit: i64) {
        let mut state = self.state.lock().unwrap();
        state.limit = limit;
        self.cond.notify_all();
    }
}

/// A one-shot barrier that a fixed number of parties count down, used by
/// `Endpoint::stop` to wait for every poller thread to finish tearing down
/// its keys before returning.
pub struct CountDownLatch {
    state: Mutex<usize>,
    cond: Condvar,
}

impl CountDownLatch {
    pub fn new(count: usize) -> CountDownLatch {
        CountDownLatch {
            state: Mutex::new(count),
            cond: Condvar::new(),
        }
    }

    pub fn count_down(&self) {
        let mut state = self.state.lock().unwrap();
        if *state > 0 {
            *state -= 1;
        }
        if *state == 0 {
            self.cond.notify_all();
        }
    }

    pub fn wait(&self) {
        let state = self.state.lock().unwrap();
        let _guard = self.cond.wait_while(state, |count| *count > 0).unwrap();
    }

    pub fn wait_timeout(&self, timeout: std::time::Duration) -> bool {
        let state = self.state.lock().unwrap();
        let (guard, _) = self
            .cond
            .wait_timeout_while(state, timeout, |count| *count > 0)
            .unwrap();
        *guard == 0
    }
}

#[cfg(test)]
mod test {
    use super::{ConnectionLatch, CountDownLatch};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn bounded_latch_blocks_until_released() {
        let latch = Arc::new(ConnectionLatch::new(1));
        latch.acquire();
        assert_eq!(latch.count(), 1);

        let waiter = Arc::clone(&latch);
        let handle = thread::spawn(move || {
            waiter.acquire();
            waiter.count()
        });

        thread::sleep(Duration::from_millis(50));
        latch.release();

        assert_eq!(handle.join().unwrap(), 1);
    }

    #[test]
    fn unbounded_latch_never_blocks() {
        let latch = ConnectionLatch::new(-1);
        for _ in 0..1000 {
            latch.acquire();
        }
        assert_eq!(latch.count(), 1000);
    }

    #[test]
    fn count_down_latch_releases_waiters_at_zero() {
        let latch = Arc::new(CountDownLatch::new(2));

        let waiter = Arc::clone(&latch);
        let handle = thread::spawn(move || {
            waiter.wait();
        });

        latch.count_down();
        thread::sleep(Duration::from_millis(20));
        latch.count_down();

        handle.join().unwrap();
    }

    #[test]
    fn count_down_latch_wait_timeout_reports_incomplete() {
        let latch = CountDownLatch::new(1);
        assert!(!latch.wait_timeout(Duration::from_millis(20)));
        latch.count_down();
        assert!(latch.wait_timeout(Duration::from_millis(20)));
    }
}
