//! The acceptor. A dedicated thread blocks in `accept(2)`, gated on the
//! shared `ConnectionLatch`, and hands each accepted socket to a poller
//! (round-robin) via `Event::register`.
//!
//! Deliberately built on a *blocking* `std::net::TcpListener` rather than
//! the crate's own non-blocking `net::TcpListener` — see DESIGN.md's first
//! Open Question decision for why a bounded `SO_RCVTIMEO` poll was chosen
//! over converting this loop to readiness-based accept.

use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener, TcpStream as StdTcpStream};
use std::os::unix::io::{FromRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use socket2::{Domain, SockRef, Socket, Type};

use crate::channel::Channel;
use crate::config::{EndpointConfig, SocketProperties};
use crate::epoll::Token;
use crate::event::{Event, EventQueue};
use crate::latch::ConnectionLatch;
use crate::net::TcpStream;
use crate::pool::Pool;
use crate::tls::SecureChannel;
use crate::wrapper::ConnectionWrapper;

/// systemd socket-activation convention: inherited fds start at 3.
const SD_LISTEN_FDS_START: RawFd = 3;

/// Binds the endpoint's listening socket per `config`, or adopts an
/// inherited one (`use_inherited_channel`, `LISTEN_FDS`).
pub fn bind_listener(config: &EndpointConfig) -> io::Result<StdTcpListener> {
    if config.use_inherited_channel {
        let listener = inherit_listener()?;
        SockRef::from(&listener).set_read_timeout(Some(config.accept_poll_timeout))?;
        return Ok(listener);
    }

    let domain = match config.address {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, Some(socket2::Protocol::TCP))?;
    socket.set_reuse_address(config.socket.so_reuse_address)?;
    socket.bind(&config.address.into())?;
    socket.listen(config.accept_backlog)?;
    socket.set_read_timeout(Some(config.accept_poll_timeout))?;
    Ok(socket.into())
}

fn inherit_listener() -> io::Result<StdTcpListener> {
    let fds: usize = std::env::var("LISTEN_FDS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if fds == 0 {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            "use_inherited_channel set but LISTEN_FDS is absent or zero",
        ));
    }
    // We only ever adopt a single listener; systemd's convention passes it
    // as the first inherited fd.
    Ok(unsafe { StdTcpListener::from_raw_fd(SD_LISTEN_FDS_START) })
}

pub struct Acceptor {
    id: usize,
    listener: StdTcpListener,
    config: Arc<EndpointConfig>,
    latch: Arc<ConnectionLatch>,
    poller_queues: Vec<Arc<EventQueue>>,
    next_poller: AtomicUsize,
    running: Arc<AtomicBool>,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    connection_pool: Arc<Pool<ConnectionWrapper>>,
}

impl Acceptor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        listener: StdTcpListener,
        config: Arc<EndpointConfig>,
        latch: Arc<ConnectionLatch>,
        poller_queues: Vec<Arc<EventQueue>>,
        running: Arc<AtomicBool>,
        tls_config: Option<Arc<rustls::ServerConfig>>,
        connection_pool: Arc<Pool<ConnectionWrapper>>,
    ) -> Acceptor {
        Acceptor {
            id,
            listener,
            config,
            latch,
            poller_queues,
            next_poller: AtomicUsize::new(0),
            running,
            tls_config,
            connection_pool,
        }
    }

    /// Runs the blocking accept loop until `running` is cleared. `accept(2)`
    /// is bounded by `SO_RCVTIMEO` (`accept_poll_timeout`) so the loop
    /// periodically rechecks `running` rather than relying on a close of
    /// the listening fd to interrupt it — a `try_clone`d fd is a distinct
    /// kernel object and closing one does not unblock another thread's
    /// `accept(2)` on a dup of the same socket.
    pub fn run(self) {
        let mut backoff = self.config.accept_retry_backoff;

        loop {
            if !self.running.load(Ordering::Acquire) {
                return;
            }

            self.latch.acquire();

            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    backoff = self.config.accept_retry_backoff;
                    if let Err(e) = self.dispatch(stream) {
                        log::warn!("acceptor {} failed to dispatch accepted socket: {}", self.id, e);
                        self.latch.release();
                    }
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    // Accept-poll timeout elapsed with no pending connection;
                    // not a real error, just a chance to recheck `running`.
                    self.latch.release();
                }
                Err(e) => {
                    self.latch.release();
                    if !self.running.load(Ordering::Acquire) {
                        return;
                    }
                    log::warn!("acceptor {} accept error: {}", self.id, e);
                    thread::sleep(backoff);
                    backoff = (backoff * 2).min(self.config.accept_retry_backoff_max);
                }
            }
        }
    }

    /// Builds a registered wrapper for a freshly accepted socket, preferring
    /// a recycled wrapper (and its already-allocated channel buffers) from
    /// the connection pool over a fresh allocation.
    fn dispatch(&self, stream: StdTcpStream) -> io::Result<()> {
        configure_accepted_socket(&stream, &self.config.socket)?;
        let stream = TcpStream::new(stream)?;

        let poller_id = self.next_poller.fetch_add(1, Ordering::Relaxed) % self.poller_queues.len();
        let queue = Arc::clone(&self.poller_queues[poller_id]);
        let secure = self.tls_config.is_some();

        let wrapper = match self.connection_pool.try_take() {
            Some(mut wrapper) => {
                wrapper.recycle(
                    poller_id,
                    Arc::clone(&queue),
                    stream,
                    &self.config.socket,
                    self.config.read_timeout,
                    self.config.write_timeout,
                    self.config.keep_alive_requests,
                    secure,
                );
                Arc::new(wrapper)
            }
            None => {
                let (channel, secure) = match &self.tls_config {
                    Some(tls_config) => (
                        Channel::Secure(SecureChannel::new_server(
                            stream,
                            Arc::clone(tls_config),
                            &self.config.socket,
                        )?),
                        true,
                    ),
                    None => (Channel::new_plain(stream, &self.config.socket), false),
                };

                Arc::new(ConnectionWrapper::new(
                    Token(0),
                    poller_id,
                    Arc::clone(&queue),
                    channel,
                    self.config.read_timeout,
                    self.config.write_timeout,
                    self.config.keep_alive_requests,
                    secure,
                ))
            }
        };

        queue.push(Event::register(wrapper));
        Ok(())
    }
}

fn configure_accepted_socket(stream: &StdTcpStream, props: &SocketProperties) -> io::Result<()> {
    let sock = SockRef::from(stream);
    sock.set_nodelay(props.tcp_no_delay)?;
    sock.set_keepalive(props.so_keep_alive)?;
    if let Some(secs) = props.so_linger_secs {
        sock.set_linger(Some(Duration::from_secs(secs.max(0) as u64)))?;
    }
    if let Some(size) = props.recv_buf_size {
        sock.set_recv_buffer_size(size)?;
    }
    if let Some(size) = props.send_buf_size {
        sock.set_send_buffer_size(size)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bind_listener_produces_a_live_socket() {
        let config = EndpointConfig::new("127.0.0.1:0".parse().unwrap());
        let listener = bind_listener(&config).unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.port() > 0);
    }

    #[test]
    fn inherit_listener_errors_without_listen_fds() {
        std::env::remove_var("LISTEN_FDS");
        let mut config = EndpointConfig::new("127.0.0.1:0".parse().unwrap());
        config.use_inherited_channel = true;
        assert!(bind_listener(&config).is_err());
    }
}
