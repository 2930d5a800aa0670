//! Signal self-pipe
//!
//! A non-blocking socketpair bridging async signal handlers into the
//! reactor loop: a handler writes the signal number as a single byte into
//! the send end, and the reactor drains the receive end like any other
//! readable descriptor. `send_signal` only calls `send(2)`, which is
//! async-signal-safe.

use std::os::fd::IntoRawFd;

use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};

use crate::error::{NetError, NetResult};
use crate::fd::Fd;

/// A socketpair carrying signal numbers as single bytes
pub struct SignalPipe {
    recv: Fd,
    send: Fd,
}

impl SignalPipe {
    /// Create the pipe
    pub fn new() -> NetResult<Self> {
        let (recv, send) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::empty(),
        )
        .map_err(NetError::Setup)?;
        Ok(SignalPipe {
            recv: Fd::new(recv.into_raw_fd()),
            send: Fd::new(send.into_raw_fd()),
        })
    }

    /// Make both ends non-blocking
    pub fn set_nonblocking(&self) -> NetResult<()> {
        self.recv.set_nonblocking()?;
        self.send.set_nonblocking()
    }

    /// Read end, registered with the reactor
    #[inline]
    pub fn recv_fd(&self) -> &Fd {
        &self.recv
    }

    /// Write end, used by signal handlers
    #[inline]
    pub fn send_fd(&self) -> &Fd {
        &self.send
    }

    /// Deposit a signal number into the pipe. Async-signal-safe.
    pub fn send_signal(&self, sig: i32) {
        let byte = sig as u8;
        unsafe {
            libc::send(
                self.send.raw(),
                &byte as *const u8 as *const libc::c_void,
                1,
                0,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::socket::{recv, MsgFlags};

    #[test]
    fn test_signal_round_trip() {
        let pipe = SignalPipe::new().unwrap();
        pipe.set_nonblocking().unwrap();

        pipe.send_signal(libc::SIGTERM);
        pipe.send_signal(libc::SIGINT);

        let mut buf = [0u8; 16];
        let n = recv(pipe.recv_fd().raw(), &mut buf, MsgFlags::empty()).unwrap();
        assert_eq!(n, 2);
        assert_eq!(i32::from(buf[0]), libc::SIGTERM);
        assert_eq!(i32::from(buf[1]), libc::SIGINT);
    }

    #[test]
    fn test_empty_pipe_does_not_block() {
        let pipe = SignalPipe::new().unwrap();
        pipe.set_nonblocking().unwrap();
        let mut buf = [0u8; 1];
        assert!(recv(pipe.recv_fd().raw(), &mut buf, MsgFlags::empty()).is_err());
    }
}
