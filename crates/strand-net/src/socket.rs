//! TCP listen socket

use std::os::fd::{AsRawFd, IntoRawFd};

use nix::sys::socket::{
    bind, listen, setsockopt, socket, sockopt, AddressFamily, Backlog, SockFlag, SockProtocol,
    SockType, SockaddrIn,
};

use crate::error::{NetError, NetResult};
use crate::fd::Fd;

/// A bound, listening TCP socket
pub struct ListenSocket {
    fd: Fd,
    port: u16,
}

impl ListenSocket {
    /// Create a socket, bind it to `0.0.0.0:port` and start listening
    pub fn bind(port: u16) -> NetResult<Self> {
        assert!(port > 0, "listen port must be positive");

        let sock = socket(
            AddressFamily::Inet,
            SockType::Stream,
            SockFlag::empty(),
            SockProtocol::Tcp,
        )
        .map_err(NetError::Setup)?;

        let graceful = libc::linger {
            l_onoff: 1,
            l_linger: 1,
        };
        setsockopt(&sock, sockopt::Linger, &graceful).map_err(NetError::Setup)?;
        setsockopt(&sock, sockopt::ReuseAddr, &true).map_err(NetError::Setup)?;

        let addr = SockaddrIn::new(0, 0, 0, 0, port);
        bind(sock.as_raw_fd(), &addr).map_err(NetError::Setup)?;
        listen(&sock, Backlog::MAXCONN).map_err(NetError::Setup)?;

        Ok(ListenSocket {
            fd: Fd::new(sock.into_raw_fd()),
            port,
        })
    }

    #[inline]
    pub fn fd(&self) -> &Fd {
        &self.fd
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpStream;

    #[test]
    fn test_bind_and_accept_connection() {
        let listener = ListenSocket::bind(19471).unwrap();
        assert_eq!(listener.port(), 19471);

        let mut client = TcpStream::connect(("127.0.0.1", 19471)).unwrap();
        client.write_all(b"x").unwrap();

        let accepted = nix::sys::socket::accept(listener.fd().raw()).unwrap();
        assert!(accepted >= 0);
        let _ = nix::unistd::close(accepted);
    }

    #[test]
    fn test_rebind_same_port_after_drop() {
        let first = ListenSocket::bind(19472).unwrap();
        drop(first);
        // SO_REUSEADDR lets the port be taken again right away.
        let second = ListenSocket::bind(19472);
        assert!(second.is_ok());
    }
}
