//! Platform I/O substrate: epoll selector, eventfd-based waker plumbing,
//! and a small raw-fd helper. Linux-only for now, matching the rest of the
//! crate (`libc::sendfile`, `epoll_create1`).

#[macro_use]
mod macros;

pub mod epoll;
pub mod eventfd;
pub mod fd;

pub use self::epoll::Epoll;
