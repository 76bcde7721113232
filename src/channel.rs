use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};

use crate::config::SocketProperties;
use crate::epoll::{Epoll, EpollOpt, Ready, Source, Token};
use crate::net::TcpStream;
use crate::tls::{HandshakeStatus, SecureChannel};

/// Outcome of a single non-blocking read.
#[derive(Debug)]
pub enum ReadOutcome {
    Read(usize),
    Eof,
    WouldBlock,
}

/// Outcome of a single non-blocking write.
#[derive(Debug)]
pub enum WriteOutcome {
    Written(usize),
    WouldBlock,
}

/// A growable byte buffer reused across connections. Plain channels carry
/// one pair (app read/write); secure channels add a second pair for the
/// encrypted network side.
#[derive(Debug, Default)]
pub struct ByteBuffer {
    data: Vec<u8>,
    pos: usize,
}

impl ByteBuffer {
    pub fn with_capacity(capacity: usize) -> ByteBuffer {
        ByteBuffer {
            data: Vec::with_capacity(capacity),
            pos: 0,
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.pos = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn unread(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    pub fn consume(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.data.len());
        if self.pos == self.data.len() {
            self.clear();
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }
}

/// Non-blocking plain-text channel over one TCP stream.
#[derive(Debug)]
pub struct PlainChannel {
    stream: TcpStream,
    read_buf: ByteBuffer,
    write_buf: ByteBuffer,
}

impl PlainChannel {
    pub fn new(stream: TcpStream, buffer_size: usize) -> PlainChannel {
        PlainChannel {
            stream,
            read_buf: ByteBuffer::with_capacity(buffer_size),
            write_buf: ByteBuffer::with_capacity(buffer_size),
        }
    }

    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        match self.stream.read(buf) {
            Ok(0) => Ok(ReadOutcome::Eof),
            Ok(n) => Ok(ReadOutcome::Read(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(ReadOutcome::WouldBlock),
            Err(e) => Err(e),
        }
    }

    pub fn write(&mut self, buf: &[u8]) -> io::Result<WriteOutcome> {
        match self.stream.write(buf) {
            Ok(n) => Ok(WriteOutcome::Written(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(WriteOutcome::WouldBlock),
            Err(e) => Err(e),
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }

    /// Rebinds this channel to a freshly accepted socket, keeping the
    /// already-allocated buffers (only their contents are cleared) so a
    /// channel taken from the pool doesn't reallocate.
    pub fn reset(&mut self, stream: TcpStream) {
        self.stream = stream;
        self.read_buf.clear();
        self.write_buf.clear();
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub fn close(&mut self) -> io::Result<()> {
        self.stream.shutdown(std::net::Shutdown::Both)
    }
}

impl AsRawFd for PlainChannel {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

/// Tagged union over the two channel variants. Owns exactly one OS socket;
/// the secure variant additionally owns TLS handshake state and the
/// encrypted-network buffer pair — see `crate::tls::SecureChannel`.
///
/// Common capability set: `handshake`, `read`, `write`, `flush_outbound`,
/// `close`. No inheritance is needed since there are exactly two shapes.
#[derive(Debug)]
pub enum Channel {
    Plain(PlainChannel),
    Secure(SecureChannel),
}

impl Channel {
    pub fn new_plain(stream: TcpStream, props: &SocketProperties) -> Channel {
        Channel::Plain(PlainChannel::new(stream, props.buffer_size))
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, Channel::Secure(_))
    }

    pub fn handshake_complete(&self) -> bool {
        match self {
            Channel::Plain(_) => true,
            Channel::Secure(secure) => secure.is_handshake_complete(),
        }
    }

    /// Drives the handshake state machine. Always `Complete` for a plain
    /// channel. Returns the interest mask the caller must re-register if
    /// incomplete.
    pub fn handshake(&mut self, readable: bool, writable: bool) -> io::Result<HandshakeStatus> {
        match self {
            Channel::Plain(_) => Ok(HandshakeStatus::Complete),
            Channel::Secure(secure) => secure.handshake(readable, writable),
        }
    }

    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        match self {
            Channel::Plain(plain) => plain.read(buf),
            Channel::Secure(secure) => secure.read(buf),
        }
    }

    pub fn write(&mut self, buf: &[u8]) -> io::Result<WriteOutcome> {
        match self {
            Channel::Plain(plain) => plain.write(buf),
            Channel::Secure(secure) => secure.write(buf),
        }
    }

    /// Drains any buffered outbound bytes (encrypted records on the secure
    /// variant; a no-op for plain). Returns `true` once nothing remains.
    pub fn flush_outbound(&mut self) -> io::Result<bool> {
        match self {
            Channel::Plain(plain) => {
                plain.flush()?;
                Ok(true)
            }
            Channel::Secure(secure) => secure.flush_outbound(),
        }
    }

    pub fn has_pending_outbound(&mut self) -> bool {
        match self {
            Channel::Plain(_) => false,
            Channel::Secure(secure) => secure.has_pending_outbound(),
        }
    }

    /// Rebinds this channel to a freshly accepted socket in place, so a
    /// channel taken from the pool keeps its already-allocated buffers
    /// (plain variant) rather than reallocating them. The secure variant
    /// discards handshake state and starts a fresh TLS session from the
    /// role (server/client config) it was originally built with.
    pub fn reset(&mut self, stream: TcpStream, props: &SocketProperties) {
        match self {
            Channel::Plain(plain) => plain.reset(stream),
            Channel::Secure(secure) => secure.reset_in_place(stream, props),
        }
    }

    pub fn close(&mut self) -> io::Result<()> {
        match self {
            Channel::Plain(plain) => plain.close(),
            Channel::Secure(secure) => secure.close(),
        }
    }
}

impl AsRawFd for Channel {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Channel::Plain(plain) => plain.as_raw_fd(),
            Channel::Secure(secure) => secure.as_raw_fd(),
        }
    }
}

impl Source for Channel {
    fn add(&self, epoll: &Epoll, token: Token, interest: Ready, opts: EpollOpt) -> io::Result<()> {
        self.as_raw_fd().add(epoll, token, interest, opts)
    }

    fn modify(&self, epoll: &Epoll, token: Token, interest: Ready, opts: EpollOpt) -> io::Result<()> {
        self.as_raw_fd().modify(epoll, token, interest, opts)
    }

    fn delete(&self, epoll: &Epoll) -> io::Result<()> {
        self.as_raw_fd().delete(epoll)
    }
}

#[cfg(test)]
mod test {
    use super::ByteBuffer;

    #[test]
    fn byte_buffer_consume_clears_on_full_drain() {
        let mut buf = ByteBuffer::with_capacity(16);
        buf.extend(b"hello");
        assert_eq!(buf.unread(), b"hello");
        buf.consume(5);
        assert!(buf.is_empty());
    }

    #[test]
    fn byte_buffer_partial_consume_keeps_remainder() {
        let mut buf = ByteBuffer::with_capacity(16);
        buf.extend(b"hello");
        buf.consume(2);
        assert_eq!(buf.unread(), b"llo");
    }
}
