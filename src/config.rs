use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// How a connection's worth of keep-alive requests is accounted for.
///
/// Concretizes the "per keep-alive policy" language of the connection
/// lifecycle: a plain socket either gets unlimited reuse, a bounded number
/// of pipelined requests, or is closed after the first one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAlivePolicy {
    /// Close the connection after a single request/response cycle.
    None,
    /// Allow up to a fixed number of requests before closing.
    Pipelined(u32),
    /// Keep the connection open indefinitely, subject to the idle timeout.
    Open,
}

impl Default for KeepAlivePolicy {
    fn default() -> Self {
        KeepAlivePolicy::Open
    }
}

/// Per-socket options applied to every accepted connection, the Rust
/// analogue of Tomcat's `SocketProperties`.
#[derive(Debug, Clone)]
pub struct SocketProperties {
    pub recv_buf_size: Option<usize>,
    pub send_buf_size: Option<usize>,
    pub tcp_no_delay: bool,
    pub so_keep_alive: bool,
    pub so_linger_secs: Option<i32>,
    pub so_reuse_address: bool,
    /// Size of each buffer handed out by the buffer pool. There is no
    /// direct/heap split to express here — unlike the JVM, Rust has a single
    /// allocator — so this field only governs the pooled allocation's size.
    pub buffer_size: usize,
    pub keep_alive_policy: KeepAlivePolicy,
}

impl Default for SocketProperties {
    fn default() -> Self {
        SocketProperties {
            recv_buf_size: None,
            send_buf_size: None,
            tcp_no_delay: true,
            so_keep_alive: true,
            so_linger_secs: None,
            so_reuse_address: true,
            buffer_size: 8192,
            keep_alive_policy: KeepAlivePolicy::default(),
        }
    }
}

/// TLS material for a `Secure` endpoint. Absent entirely for a plain one.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_chain_path: PathBuf,
    pub private_key_path: PathBuf,
    pub require_client_auth: bool,
}

/// Top-level configuration for an `Endpoint`, built with plain setters
/// rather than a derive-based builder, preferring direct field-returning
/// methods over a separate builder type.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub address: SocketAddr,
    pub accept_backlog: i32,
    pub max_connections: i64,
    pub poller_thread_count: usize,
    pub acceptor_thread_count: usize,
    pub worker_thread_count: usize,
    pub blocking_selector_count: usize,
    pub event_pool_capacity: usize,
    pub buffer_pool_capacity: usize,
    pub channel_pool_capacity: usize,
    pub processor_pool_capacity: usize,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub accept_retry_backoff: Duration,
    pub accept_retry_backoff_max: Duration,
    /// Bounds how long a single blocking `accept(2)` call may block before
    /// returning `WouldBlock`/`TimedOut` so the acceptor thread can recheck
    /// `running` and exit promptly on `Endpoint::stop` (see DESIGN.md's
    /// first Open Question decision). Applied via `SO_RCVTIMEO`, which is a
    /// socket-level option shared by every `try_clone`d fd, not a per-fd one.
    pub accept_poll_timeout: Duration,
    /// Max block in `epoll_wait` when no events are pending.
    pub selector_timeout: Duration,
    /// Minimum gap between timeout scans on a poller.
    pub timeout_interval: Duration,
    pub keep_alive_requests: u32,
    /// Adopt the listening socket from the process environment (e.g. a
    /// systemd-activated fd) instead of binding one. The inherited fd is
    /// read from `LISTEN_FDS` following the systemd socket-activation
    /// convention.
    pub use_inherited_channel: bool,
    pub socket: SocketProperties,
    pub tls: Option<TlsConfig>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig {
            address: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            accept_backlog: 1024,
            max_connections: 8192,
            poller_thread_count: default_poller_thread_count(),
            acceptor_thread_count: 1,
            worker_thread_count: num_cpus_fallback(),
            blocking_selector_count: 1,
            event_pool_capacity: 512,
            buffer_pool_capacity: 512,
            channel_pool_capacity: 512,
            processor_pool_capacity: 512,
            read_timeout: Duration::from_secs(20),
            write_timeout: Duration::from_secs(20),
            accept_retry_backoff: Duration::from_millis(1),
            accept_retry_backoff_max: Duration::from_secs(1),
            accept_poll_timeout: Duration::from_millis(200),
            selector_timeout: Duration::from_millis(1000),
            timeout_interval: Duration::from_millis(1000),
            keep_alive_requests: 100,
            use_inherited_channel: false,
            socket: SocketProperties::default(),
            tls: None,
        }
    }
}

impl EndpointConfig {
    pub fn new(address: SocketAddr) -> EndpointConfig {
        EndpointConfig {
            address,
            ..EndpointConfig::default()
        }
    }

    pub fn max_connections(mut self, n: i64) -> Self {
        self.max_connections = n;
        self
    }

    pub fn poller_threads(mut self, n: usize) -> Self {
        self.poller_thread_count = n.max(1);
        self
    }

    pub fn worker_threads(mut self, n: usize) -> Self {
        self.worker_thread_count = n.max(1);
        self
    }

    pub fn blocking_selectors(mut self, n: usize) -> Self {
        self.blocking_selector_count = n.max(1);
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn socket_properties(mut self, props: SocketProperties) -> Self {
        self.socket = props;
        self
    }

    pub fn tls_config(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn is_secure(&self) -> bool {
        self.tls.is_some()
    }
}

fn num_cpus_fallback() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// `min(2, CPU)`, a sane default poller-thread count for most workloads.
fn default_poller_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().min(2))
        .unwrap_or(1)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = EndpointConfig::new("127.0.0.1:0".parse().unwrap());
        assert!(cfg.poller_thread_count >= 1);
        assert!(cfg.worker_thread_count >= 1);
        assert!(!cfg.is_secure());
    }

    #[test]
    fn builder_chains() {
        let cfg = EndpointConfig::new("127.0.0.1:8080".parse().unwrap())
            .max_connections(16)
            .poller_threads(4)
            .worker_threads(8);

        assert_eq!(cfg.max_connections, 16);
        assert_eq!(cfg.poller_thread_count, 4);
        assert_eq!(cfg.worker_thread_count, 8);
    }
}
