//! Owned file descriptors
//!
//! Every descriptor in the reactor is wrapped in an [`Fd`] that closes it
//! exactly once, whether through an explicit `close` (connection retirement
//! closes eagerly) or through `Drop`.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::unistd;

use crate::error::{NetError, NetResult};

/// An owned file descriptor, closed exactly once
#[derive(Debug)]
pub struct Fd {
    raw: RawFd,
    closed: AtomicBool,
}

impl Fd {
    /// Take ownership of `raw`
    pub fn new(raw: RawFd) -> Self {
        assert!(raw >= 0, "negative file descriptor");
        Fd {
            raw,
            closed: AtomicBool::new(false),
        }
    }

    /// The raw descriptor value
    #[inline]
    pub fn raw(&self) -> RawFd {
        self.raw
    }

    /// Switch the descriptor to non-blocking mode
    pub fn set_nonblocking(&self) -> NetResult<()> {
        let flags = fcntl(self.raw, FcntlArg::F_GETFL).map_err(NetError::Io)?;
        let flags = OFlag::from_bits_retain(flags) | OFlag::O_NONBLOCK;
        fcntl(self.raw, FcntlArg::F_SETFL(flags)).map_err(NetError::Io)?;
        Ok(())
    }

    /// Close the descriptor now. Subsequent calls (and `Drop`) are no-ops.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = unistd::close(self.raw);
        }
    }
}

impl AsRawFd for Fd {
    fn as_raw_fd(&self) -> RawFd {
        self.raw
    }
}

impl AsFd for Fd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        // Safety: self owns the descriptor and it stays open while borrowed
        unsafe { BorrowedFd::borrow_raw(self.raw) }
    }
}

impl Drop for Fd {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::IntoRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_close_is_idempotent() {
        let (a, _b) = UnixStream::pair().unwrap();
        let fd = Fd::new(a.into_raw_fd());
        fd.close();
        fd.close();
        // Drop closes again; the once-flag makes it a no-op.
    }

    #[test]
    fn test_set_nonblocking() {
        let (a, _b) = UnixStream::pair().unwrap();
        let fd = Fd::new(a.into_raw_fd());
        fd.set_nonblocking().unwrap();
        let flags = fcntl(fd.raw(), FcntlArg::F_GETFL).unwrap();
        assert!(OFlag::from_bits_retain(flags).contains(OFlag::O_NONBLOCK));
    }
}
