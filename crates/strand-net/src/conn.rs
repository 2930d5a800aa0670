//! Per-connection state
//!
//! A connection couples a socket with a read buffer and a write buffer.
//! One mutex serializes both buffers and the read/write syscalls, so a
//! reactor-driven task and an in-flight worker cannot interleave on the
//! same socket.

use std::io::IoSlice;
use std::mem;
use std::sync::Mutex;

use nix::errno::Errno;
use nix::sys::socket::{recv, MsgFlags};
use nix::sys::uio::writev;

use crate::error::{NetError, NetResult};
use crate::fd::Fd;

/// Bytes requested from the socket per recv call
const READ_CHUNK: usize = 16 * 1024;

#[derive(Default)]
struct Buffers {
    read_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

/// A client connection and its buffered request/response bytes
pub struct Conn {
    fd: Fd,
    buffers: Mutex<Buffers>,
}

impl Conn {
    /// Wrap an accepted, non-blocking socket
    pub fn new(fd: Fd) -> Self {
        Conn {
            fd,
            buffers: Mutex::new(Buffers::default()),
        }
    }

    #[inline]
    pub fn fd(&self) -> &Fd {
        &self.fd
    }

    /// Drain the socket into the read buffer until it reports EAGAIN.
    ///
    /// Returns `PeerClosed` when the peer shut down its end, `Io` on any
    /// non-transient error; EINTR is retried.
    pub fn read_fd(&self) -> NetResult<()> {
        let mut buffers = self.buffers.lock().unwrap();
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            match recv(self.fd.raw(), &mut chunk, MsgFlags::empty()) {
                Ok(0) => return Err(NetError::PeerClosed),
                Ok(n) => buffers.read_buf.extend_from_slice(&chunk[..n]),
                Err(Errno::EAGAIN) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(NetError::Io(e)),
            }
        }
    }

    /// Take the accumulated request bytes, leaving the buffer empty
    pub fn take_request(&self) -> Vec<u8> {
        mem::take(&mut self.buffers.lock().unwrap().read_buf)
    }

    /// Replace the write buffer with the response bytes
    pub fn store_response(&self, data: Vec<u8>) {
        self.buffers.lock().unwrap().write_buf = data;
    }

    /// Write the buffered response to the socket in one writev call
    pub fn write_fd(&self) -> NetResult<()> {
        let buffers = self.buffers.lock().unwrap();
        if buffers.write_buf.is_empty() {
            return Ok(());
        }
        let iov = [IoSlice::new(&buffers.write_buf)];
        loop {
            match writev(&self.fd, &iov) {
                Ok(_) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => return Ok(()),
                Err(e) => return Err(NetError::Io(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::fd::IntoRawFd;
    use std::os::unix::net::UnixStream;

    fn conn_pair() -> (Conn, UnixStream) {
        let (ours, theirs) = UnixStream::pair().unwrap();
        let fd = Fd::new(ours.into_raw_fd());
        fd.set_nonblocking().unwrap();
        (Conn::new(fd), theirs)
    }

    #[test]
    fn test_read_accumulates_until_eagain() {
        let (conn, mut peer) = conn_pair();
        peer.write_all(b"hello ").unwrap();
        peer.write_all(b"request").unwrap();

        conn.read_fd().unwrap();
        assert_eq!(conn.take_request(), b"hello request");
        // The buffer is consumed by the take.
        assert!(conn.take_request().is_empty());
    }

    #[test]
    fn test_write_round_trip() {
        let (conn, mut peer) = conn_pair();
        conn.store_response(b"success".to_vec());
        conn.write_fd().unwrap();

        let mut got = [0u8; 7];
        peer.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"success");
    }

    #[test]
    fn test_empty_write_is_noop() {
        let (conn, _peer) = conn_pair();
        conn.write_fd().unwrap();
    }

    #[test]
    fn test_peer_close_detected() {
        let (conn, peer) = conn_pair();
        drop(peer);
        assert_eq!(conn.read_fd(), Err(NetError::PeerClosed));
    }
}
