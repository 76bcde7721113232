use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Once};

use rustls::pki_types::ServerName;
use rustls::{ClientConnection, Connection, ServerConnection};

use crate::channel::{ReadOutcome, WriteOutcome};
use crate::config::{SocketProperties, TlsConfig};
use crate::error::{EndpointError, Result};
use crate::net::TcpStream;

static CRYPTO_PROVIDER_INIT: Once = Once::new();

/// Installs `aws-lc-rs` (rustls's default crypto backend) as the
/// process-wide default `CryptoProvider` the first time it is called.
/// `ServerConfig::builder()`/`ClientConfig::builder()` panic if no default
/// provider has been installed; installing it eagerly here removes the
/// footgun for callers who never think about crypto providers. Safe to call
/// from multiple threads or repeatedly (e.g. from test helpers that also
/// build a `ClientConfig` directly).
pub fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

/// Builds the `rustls::ServerConfig` an `Acceptor` hands every secure
/// channel it creates, loading PEM material the way
/// `warpy-ai-script`'s `runtime::async::tls` loader does.
///
/// Client certificate verification is not wired up: `TlsConfig` has no
/// trust-anchor field to verify against, so `require_client_auth` is
/// presently rejected rather than silently ignored — see DESIGN.md.
pub fn load_server_config(tls: &TlsConfig) -> Result<Arc<rustls::ServerConfig>> {
    ensure_crypto_provider();

    if tls.require_client_auth {
        return Err(EndpointError::Tls(rustls::Error::General(
            "require_client_auth is set but no client CA trust anchor is configured".into(),
        )));
    }

    let cert_file = File::open(&tls.cert_chain_path)?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<io::Result<Vec<_>>>()?;

    let key_file = File::open(&tls.private_key_path)?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))?
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no private key found"))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(EndpointError::Tls)?;

    Ok(Arc::new(config))
}

/// Result of driving the TLS state machine one step, mirroring the
/// `0 | NEED_READ | NEED_WRITE` vocabulary of the handshake contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    Complete,
    NeedRead,
    NeedWrite,
}

/// Either side of a TLS connection. The endpoint only ever terminates
/// server-side, but `ClientConnection` is kept so the same channel type
/// can drive an outbound TLS connection in tests.
enum Session {
    Server(Box<ServerConnection>),
    Client(Box<ClientConnection>),
}

impl Session {
    fn connection(&mut self) -> &mut dyn Connection {
        match self {
            Session::Server(conn) => conn.as_mut(),
            Session::Client(conn) => conn.as_mut(),
        }
    }

    fn is_handshaking(&self) -> bool {
        match self {
            Session::Server(conn) => conn.is_handshaking(),
            Session::Client(conn) => conn.is_handshaking(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Session::Server(_) => f.write_str("Session::Server"),
            Session::Client(_) => f.write_str("Session::Client"),
        }
    }
}

/// The TLS role a channel was constructed with, retained so a fresh
/// `Session` can be built when the channel is recycled for a new socket.
#[derive(Clone)]
enum Role {
    Server(Arc<rustls::ServerConfig>),
    Client(Arc<rustls::ClientConfig>, ServerName<'static>),
}

impl Role {
    fn new_session(&self) -> io::Result<Session> {
        match self {
            Role::Server(config) => {
                let conn = ServerConnection::new(Arc::clone(config))
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                Ok(Session::Server(Box::new(conn)))
            }
            Role::Client(config, name) => {
                let conn = ClientConnection::new(Arc::clone(config), name.clone())
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                Ok(Session::Client(Box::new(conn)))
            }
        }
    }
}

/// TLS channel: a TCP stream plus a `rustls` session driven directly
/// against the raw socket (no intermediate blocking wrapper), following
/// the same read_tls/process_new_packets/write_tls shape used to drive
/// rustls sessions over a non-blocking socket.
#[derive(Debug)]
pub struct SecureChannel {
    stream: TcpStream,
    session: Session,
    role: RoleDebug,
}

/// `Role` wrapper that only exists to give `SecureChannel` a `Debug` impl
/// without requiring `rustls::ServerConfig`/`ClientConfig` to implement it.
struct RoleDebug(Role);

impl std::fmt::Debug for RoleDebug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Role::Server(_) => f.write_str("Role::Server"),
            Role::Client(..) => f.write_str("Role::Client"),
        }
    }
}

impl SecureChannel {
    pub fn new_server(
        stream: TcpStream,
        config: Arc<rustls::ServerConfig>,
        _props: &SocketProperties,
    ) -> io::Result<SecureChannel> {
        let role = Role::Server(config);
        let session = role.new_session()?;
        Ok(SecureChannel {
            stream,
            session,
            role: RoleDebug(role),
        })
    }

    pub fn new_client(
        stream: TcpStream,
        config: Arc<rustls::ClientConfig>,
        name: ServerName<'static>,
        _props: &SocketProperties,
    ) -> io::Result<SecureChannel> {
        let role = Role::Client(config, name);
        let session = role.new_session()?;
        Ok(SecureChannel {
            stream,
            session,
            role: RoleDebug(role),
        })
    }

    pub fn is_handshake_complete(&self) -> bool {
        !self.session.is_handshaking()
    }

    pub fn handshake(&mut self, readable: bool, writable: bool) -> io::Result<HandshakeStatus> {
        if readable {
            self.pull_network_bytes()?;
        }
        if writable {
            self.push_network_bytes()?;
        }

        let conn = self.session.connection();
        if !conn.is_handshaking() {
            return Ok(HandshakeStatus::Complete);
        }
        if conn.wants_write() {
            return Ok(HandshakeStatus::NeedWrite);
        }
        if conn.wants_read() {
            return Ok(HandshakeStatus::NeedRead);
        }
        Ok(HandshakeStatus::Complete)
    }

    fn pull_network_bytes(&mut self) -> io::Result<()> {
        loop {
            match self.session.connection().read_tls(&mut self.stream) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        match self.session.connection().process_new_packets() {
            Ok(_) => Ok(()),
            Err(e) => Err(io::Error::new(io::ErrorKind::InvalidData, e)),
        }
    }

    fn push_network_bytes(&mut self) -> io::Result<()> {
        while self.session.connection().wants_write() {
            match self.session.connection().write_tls(&mut self.stream) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        self.pull_network_bytes()?;
        let handshaking = self.session.connection().is_handshaking();
        let mut reader = self.session.connection().reader();
        match reader.read(buf) {
            Ok(0) => {
                if handshaking {
                    Ok(ReadOutcome::WouldBlock)
                } else {
                    Ok(ReadOutcome::Eof)
                }
            }
            Ok(n) => Ok(ReadOutcome::Read(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(ReadOutcome::WouldBlock),
            Err(e) => Err(e),
        }
    }

    pub fn write(&mut self, buf: &[u8]) -> io::Result<WriteOutcome> {
        let n = self
            .session
            .connection()
            .writer()
            .write(buf)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        self.push_network_bytes()?;
        if n == 0 && !buf.is_empty() {
            Ok(WriteOutcome::WouldBlock)
        } else {
            Ok(WriteOutcome::Written(n))
        }
    }

    /// Drains the outbound encrypted buffer. Returns `true` once the
    /// connection no longer wants to write.
    pub fn flush_outbound(&mut self) -> io::Result<bool> {
        self.push_network_bytes()?;
        Ok(!self.session.connection().wants_write())
    }

    pub fn has_pending_outbound(&mut self) -> bool {
        self.session.connection().wants_write()
    }

    pub fn close(&mut self) -> io::Result<()> {
        self.session.connection().send_close_notify();
        self.push_network_bytes()
    }

    /// Rebinds the channel to a freshly accepted socket in place,
    /// discarding all handshake state and starting a new TLS session from
    /// the same role (server or client) this channel was originally built
    /// with.
    pub fn reset_in_place(&mut self, stream: TcpStream, _props: &SocketProperties) {
        self.session = self
            .role
            .0
            .new_session()
            .expect("role config was valid at construction time");
        self.stream = stream;
    }
}

impl AsRawFd for SecureChannel {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}
