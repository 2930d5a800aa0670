//! Edge-triggered epoll wrapper
//!
//! Registrations are always edge-triggered with EPOLLRDHUP, and oneshot by
//! parameter. Oneshot descriptors must be re-armed with [`Poller::rearm`]
//! after every delivery or they go silent; edge triggering means every
//! readable/writable delivery must be drained to EAGAIN.

use std::os::fd::RawFd;

use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};

use crate::error::{NetError, NetResult};
use crate::fd::Fd;

/// Readiness interest for a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
}

/// A delivered readiness event
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub fd: RawFd,
    flags: EpollFlags,
}

impl Event {
    #[inline]
    pub fn readable(&self) -> bool {
        self.flags.contains(EpollFlags::EPOLLIN)
    }

    #[inline]
    pub fn writable(&self) -> bool {
        self.flags.contains(EpollFlags::EPOLLOUT)
    }

    #[inline]
    pub fn hup_or_err(&self) -> bool {
        self.flags
            .intersects(EpollFlags::EPOLLRDHUP | EpollFlags::EPOLLHUP | EpollFlags::EPOLLERR)
    }
}

fn interest_flags(interest: Interest, oneshot: bool) -> EpollFlags {
    let mut flags = EpollFlags::EPOLLET | EpollFlags::EPOLLRDHUP;
    flags |= match interest {
        Interest::Read => EpollFlags::EPOLLIN,
        Interest::Write => EpollFlags::EPOLLOUT,
    };
    if oneshot {
        flags |= EpollFlags::EPOLLONESHOT;
    }
    flags
}

/// An epoll instance with a fixed wait batch size
pub struct Poller {
    epoll: Epoll,
    max_events: usize,
}

impl Poller {
    /// Create an epoll instance delivering at most `max_events` per wait
    pub fn new(max_events: usize) -> NetResult<Self> {
        assert!(max_events > 0, "poller needs a positive event budget");
        let epoll = Epoll::new(EpollCreateFlags::empty()).map_err(NetError::Poll)?;
        Ok(Poller { epoll, max_events })
    }

    /// Register `fd`, switching it to non-blocking mode first
    pub fn add(&self, fd: &Fd, interest: Interest, oneshot: bool) -> NetResult<()> {
        fd.set_nonblocking()?;
        let event = EpollEvent::new(interest_flags(interest, oneshot), fd.raw() as u64);
        self.epoll.add(fd, event).map_err(NetError::Poll)
    }

    /// Replace the interest of an already-registered descriptor; this is
    /// also how a oneshot registration is re-armed.
    pub fn rearm(&self, fd: &Fd, interest: Interest, oneshot: bool) -> NetResult<()> {
        let mut event = EpollEvent::new(interest_flags(interest, oneshot), fd.raw() as u64);
        self.epoll.modify(fd, &mut event).map_err(NetError::Poll)
    }

    /// Drop a registration. The descriptor itself stays open.
    pub fn remove(&self, fd: &Fd) -> NetResult<()> {
        self.epoll.delete(fd).map_err(NetError::Poll)
    }

    /// Block until at least one event arrives. An interrupted wait
    /// delivers an empty batch.
    pub fn wait(&self) -> NetResult<Vec<Event>> {
        self.wait_with(EpollTimeout::NONE)
    }

    fn wait_with(&self, timeout: EpollTimeout) -> NetResult<Vec<Event>> {
        let mut buf = vec![EpollEvent::empty(); self.max_events];
        let n = match self.epoll.wait(&mut buf, timeout) {
            Ok(n) => n,
            Err(Errno::EINTR) => 0,
            Err(e) => return Err(NetError::Poll(e)),
        };
        Ok(buf[..n]
            .iter()
            .map(|e| Event {
                fd: e.data() as RawFd,
                flags: e.events(),
            })
            .collect())
    }
}
