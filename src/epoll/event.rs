use crate::sys;

use super::{Ready, Token};

/// A single readiness event returned from `Epoll::wait`.
#[derive(Copy, Clone, Debug)]
pub struct Event {
    kind: Ready,
    token: Token,
}

impl Event {
    pub(crate) fn new(kind: Ready, token: Token) -> Event {
        Event { kind, token }
    }

    #[inline]
    pub fn token(&self) -> Token {
        self.token
    }

    #[inline]
    pub fn readiness(&self) -> Ready {
        self.kind
    }

    #[inline]
    pub fn is_readable(&self) -> bool {
        self.kind.is_readable()
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        self.kind.is_writable()
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.kind.is_error()
    }

    #[inline]
    pub fn is_hup(&self) -> bool {
        self.kind.is_hup()
    }
}

/// Storage for a batch of readiness events filled by `Epoll::wait`.
pub struct Events {
    pub(crate) inner: sys::epoll::Events,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Events {
        Events {
            inner: sys::epoll::Events::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    #[inline]
    pub fn get(&self, idx: usize) -> Option<Event> {
        self.inner.get(idx)
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter { events: self, index: 0 }
    }
}

impl<'a> IntoIterator for &'a Events {
    type Item = Event;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

pub struct Iter<'a> {
    events: &'a Events,
    index: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        let event = self.events.get(self.index)?;
        self.index += 1;
        Some(event)
    }
}

pub struct IntoIter {
    events: Events,
    index: usize,
}

impl Iterator for IntoIter {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        let event = self.events.get(self.index)?;
        self.index += 1;
        Some(event)
    }
}

impl IntoIterator for Events {
    type Item = Event;
    type IntoIter = IntoIter;

    fn into_iter(self) -> IntoIter {
        IntoIter { events: self, index: 0 }
    }
}
