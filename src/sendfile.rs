//! Zero-copy file-to-socket transfer.
//!
//! `process_sendfile` is generic over where it runs: inline on the poller
//! thread for a ready key, or from a `SocketProcessor` worker thread with
//! `called_by_processor = true`. It never touches the selector itself —
//! callers translate the returned `SendfileOutcome` into the appropriate
//! interest-set mutation (a direct `epoll::modify` on the poller thread,
//! or an `AddInterest` event from a worker).

use std::io;
use std::os::unix::io::AsRawFd;

use crate::channel::Channel;
use crate::config::KeepAlivePolicy;
use crate::sys::fd::FileDesc;
use crate::wrapper::ConnectionWrapper;

/// In-flight sendfile state for one connection. Lazily attached to the
/// wrapper by the handler when it wants to stream a file; torn down when
/// the transfer completes or errors.
pub struct SendfileState {
    file: FileDesc,
    pos: u64,
    length: u64,
}

impl SendfileState {
    pub fn new(file: FileDesc, pos: u64, length: u64) -> SendfileState {
        SendfileState { file, pos, length }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendfileOutcome {
    /// More bytes remain to transfer; the caller must ensure WRITE
    /// interest is (re-)armed for this key.
    Pending,
    /// The transfer finished; act on the connection's keep-alive policy.
    Complete(KeepAlivePolicy),
    Error,
}

/// Drives one step of a sendfile transfer attached to `wrapper`.
///
/// Returns `Ok(None)` if no sendfile is attached (nothing to do).
pub fn process_sendfile(
    wrapper: &ConnectionWrapper,
    channel: &mut Channel,
    policy: KeepAlivePolicy,
) -> io::Result<Option<SendfileOutcome>> {
    let mut guard = wrapper.sendfile.lock().unwrap();
    let state = match guard.as_mut() {
        Some(state) => state,
        None => return Ok(None),
    };

    if channel.has_pending_outbound() {
        let drained = channel.flush_outbound()?;
        wrapper.touch_write();
        if !drained {
            return Ok(Some(SendfileOutcome::Pending));
        }
    }

    if state.length > 0 {
        match transfer(channel.as_raw_fd(), &state.file, state.pos, state.length) {
            Ok(0) => {
                // Socket buffer full; try again once writable.
                return Ok(Some(SendfileOutcome::Pending));
            }
            Ok(n) => {
                state.pos += n;
                state.length -= n;
                wrapper.touch_write();
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                return Ok(Some(SendfileOutcome::Pending));
            }
            Err(e) => {
                *guard = None;
                return Err(e);
            }
        }
    }

    if state.length > 0 || channel.has_pending_outbound() {
        return Ok(Some(SendfileOutcome::Pending));
    }

    *guard = None;
    Ok(Some(SendfileOutcome::Complete(policy)))
}

fn transfer(out_fd: std::os::unix::io::RawFd, file: &FileDesc, pos: u64, length: u64) -> io::Result<u64> {
    let mut offset = pos as libc::off_t;
    let count = length.min(i32::MAX as u64) as usize;

    let n = syscall!(sendfile(out_fd, file.as_raw_fd(), &mut offset, count))?;
    Ok(n as u64)
}
