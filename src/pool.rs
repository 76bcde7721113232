use concurrent_queue::ConcurrentQueue;

/// A bounded LIFO-ish object cache. `push` drops the object on the floor
/// once the pool is full rather than blocking or erroring — callers that
/// need the failure to be visible should check `push`'s return value.
///
/// Used for the three object families the endpoint recycles hot-path:
/// read/write buffers, `Channel` wrappers and `Event`s. Each pool owns a
/// factory so `take` never returns `None` to a caller that actually needs
/// an object now.
pub struct Pool<T> {
    queue: ConcurrentQueue<T>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
}

impl<T> Pool<T> {
    pub fn new<F>(capacity: usize, factory: F) -> Pool<T>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Pool {
            queue: ConcurrentQueue::bounded(capacity.max(1)),
            factory: Box::new(factory),
        }
    }

    /// A pool for objects that need caller-supplied arguments to
    /// construct (a `Channel` needs a socket, a `ConnectionWrapper` needs
    /// a poller assignment) and so have no argument-free factory. Callers
    /// must use `try_take` and build fresh themselves on a `None`.
    pub fn new_bare(capacity: usize) -> Pool<T> {
        Pool {
            queue: ConcurrentQueue::bounded(capacity.max(1)),
            factory: Box::new(|| panic!("Pool::take called on a factory-less pool; use try_take")),
        }
    }

    /// Take a pooled object, or fall back to the factory if the pool is
    /// currently empty.
    pub fn take(&self) -> T {
        self.queue.pop().unwrap_or_else(|_| (self.factory)())
    }

    /// Take a pooled object if one is available, without ever calling the
    /// factory. The caller is responsible for constructing one itself on
    /// `None`.
    pub fn try_take(&self) -> Option<T> {
        self.queue.pop().ok()
    }

    /// Return an object to the pool. Returns the object back to the caller
    /// if the pool is full or has been closed, so it can be dropped there.
    pub fn put(&self, value: T) -> Option<T> {
        match self.queue.push(value) {
            Ok(()) => None,
            Err(concurrent_queue::PushError::Full(v)) => Some(v),
            Err(concurrent_queue::PushError::Closed(v)) => Some(v),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.queue.capacity()
    }
}

#[cfg(test)]
mod test {
    use super::Pool;

    #[test]
    fn take_falls_back_to_factory() {
        let pool: Pool<Vec<u8>> = Pool::new(2, || Vec::with_capacity(8));
        let buf = pool.take();
        assert_eq!(buf.capacity(), 8);
    }

    #[test]
    fn put_then_take_reuses() {
        let pool: Pool<Vec<u8>> = Pool::new(2, Vec::new);
        let mut buf = pool.take();
        buf.extend_from_slice(b"hello");
        assert!(pool.put(buf).is_none());
        assert_eq!(pool.len(), 1);

        let reused = pool.take();
        assert_eq!(reused, b"hello");
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn bare_pool_try_take_is_none_when_empty() {
        let pool: Pool<Vec<u8>> = Pool::new_bare(2);
        assert!(pool.try_take().is_none());

        assert!(pool.put(vec![1, 2, 3]).is_none());
        let reused = pool.try_take().unwrap();
        assert_eq!(reused, vec![1, 2, 3]);
        assert!(pool.try_take().is_none());
    }

    #[test]
    fn put_beyond_capacity_returns_value() {
        let pool: Pool<u32> = Pool::new(1, || 0);
        assert!(pool.put(1).is_none());
        let spilled = pool.put(2);
        assert_eq!(spilled, Some(2));
    }
}
