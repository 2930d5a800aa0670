//! Epoll reactor serving a byte-in/byte-out callback
//!
//! Single reactor thread, many workers. The reactor owns the epoll
//! instance, the listen socket and the fd-to-connection registry; all
//! connection I/O and the user callback run as tasks on the worker pool.
//! The serving path is: accept, wait for readability, drain the request
//! into the connection, run the callback, flip the registration to write
//! interest, flush the response, retire the connection.
//!
//! SIGINT and SIGTERM are bridged into the loop through a process-wide
//! self-pipe; `serve` returns when either arrives. The pipe and the
//! handlers are installed once per process, on the first `serve`.

use std::collections::HashMap;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use log::{debug, error, info, warn};
use nix::errno::Errno;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::socket::{accept, recv, MsgFlags};
use strand_core::sem::Semaphore;
use strand_runtime::pool::WorkerPool;

use crate::conn::Conn;
use crate::epoll::{Event, Interest, Poller};
use crate::fd::Fd;
use crate::pipe::SignalPipe;
use crate::socket::ListenSocket;

/// Request handler: consumes the request bytes, returns the response bytes
pub type Callback = dyn Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static;

/// Default worker thread count
pub const DEFAULT_THREADS: usize = 8;

/// Default epoll wait batch size
pub const MAX_EVENTS: usize = 8192;

type Registry = Mutex<HashMap<RawFd, Arc<Conn>>>;

/// Process-wide signal pipe; handlers may only touch the send end
static SIGNAL_PIPE: OnceLock<SignalPipe> = OnceLock::new();
static SIGNAL_SEND_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn forward_signal(sig: libc::c_int) {
    let fd = SIGNAL_SEND_FD.load(Ordering::Relaxed);
    if fd >= 0 {
        let byte = sig as u8;
        unsafe {
            libc::send(fd, &byte as *const u8 as *const libc::c_void, 1, 0);
        }
    }
}

/// Install the self-pipe and the SIGINT/SIGTERM/SIGPIPE dispositions once
fn signal_pipe() -> &'static SignalPipe {
    SIGNAL_PIPE.get_or_init(|| {
        let pipe = SignalPipe::new().expect("signal pipe creation failed");
        pipe.set_nonblocking().expect("signal pipe nonblocking");
        SIGNAL_SEND_FD.store(pipe.send_fd().raw(), Ordering::SeqCst);

        let flags = SaFlags::empty();
        let mask = SigSet::empty();
        unsafe {
            sigaction(Signal::SIGPIPE, &SigAction::new(SigHandler::SigIgn, flags, mask))
                .expect("ignore SIGPIPE");
            let forward = SigAction::new(SigHandler::Handler(forward_signal), flags, mask);
            sigaction(Signal::SIGTERM, &forward).expect("install SIGTERM handler");
            sigaction(Signal::SIGINT, &forward).expect("install SIGINT handler");
        }
        pipe
    })
}

/// Remove a connection from the registry, deregister it and close its fd
fn retire(conns: &Registry, poller: &Poller, fd: RawFd) {
    let conn = conns.lock().unwrap().remove(&fd);
    if let Some(conn) = conn {
        if let Err(e) = poller.remove(conn.fd()) {
            debug!("fd {} deregister failed: {}", fd, e);
        }
        conn.fd().close();
        debug!("fd {} retired", fd);
    }
}

/// TCP server multiplexing connections over one epoll loop
pub struct Server {
    port: u16,
    max_events: usize,
    cb: Arc<Callback>,
    pool: WorkerPool,
    conns: Arc<Registry>,
    poller: OnceLock<Arc<Poller>>,
    serving: AtomicBool,
}

impl Server {
    /// Create a server with the default worker count and event budget
    pub fn init<F>(port: u16, callback: F) -> Server
    where
        F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        Self::with_options(port, callback, DEFAULT_THREADS, MAX_EVENTS)
    }

    /// Create a server with explicit worker count and event budget
    pub fn with_options<F>(port: u16, callback: F, threads: usize, max_events: usize) -> Server
    where
        F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        assert!(port > 0, "port must be positive");
        assert!(threads > 0, "threads must be positive");
        assert!(max_events > 0, "max_events must be positive");

        Server {
            port,
            max_events,
            cb: Arc::new(callback),
            pool: WorkerPool::new(threads),
            conns: Arc::new(Mutex::new(HashMap::new())),
            poller: OnceLock::new(),
            serving: AtomicBool::new(false),
        }
    }

    /// Run the event loop. Blocks until SIGINT/SIGTERM arrives or the
    /// epoll instance fails.
    pub fn serve(&self) {
        assert!(
            !self.serving.swap(true, Ordering::SeqCst),
            "serve called twice"
        );

        let pipe = signal_pipe();
        let poller = Arc::new(Poller::new(self.max_events).expect("epoll creation failed"));
        let _ = self.poller.set(Arc::clone(&poller));

        // The pipe stays armed across deliveries; the listen socket is
        // oneshot and re-armed after every accept burst.
        poller
            .add(pipe.recv_fd(), Interest::Read, false)
            .expect("register signal pipe");
        let listener = ListenSocket::bind(self.port).expect("bind listen socket");
        poller
            .add(listener.fd(), Interest::Read, true)
            .expect("register listen socket");

        info!("serving on port {}", self.port);
        loop {
            let events = match poller.wait() {
                Ok(events) => events,
                Err(e) => {
                    error!("epoll wait failed: {}", e);
                    return;
                }
            };
            for event in &events {
                if !self.dispatch(event, &poller, &listener, pipe) {
                    return;
                }
            }
        }
    }

    /// Route one event; false ends the serve loop
    fn dispatch(
        &self,
        event: &Event,
        poller: &Arc<Poller>,
        listener: &ListenSocket,
        pipe: &SignalPipe,
    ) -> bool {
        if event.fd == pipe.recv_fd().raw() {
            return !event.readable() || self.drain_signals(pipe);
        }

        if event.fd == listener.fd().raw() {
            // A broken listen socket cannot be recovered from.
            assert!(
                !event.hup_or_err(),
                "listen socket failed, epoll flags on fd {}",
                event.fd
            );
            self.accept_burst(poller, listener);
            if let Err(e) = poller.rearm(listener.fd(), Interest::Read, true) {
                error!("listen socket re-arm failed: {}", e);
                return false;
            }
            return true;
        }

        if event.hup_or_err() {
            retire(&self.conns, poller, event.fd);
            return true;
        }
        if event.readable() {
            self.submit_read(poller, event.fd);
        }
        if event.writable() {
            self.submit_write(poller, event.fd);
        }
        true
    }

    /// Drain the signal pipe; false when an exit signal was delivered
    fn drain_signals(&self, pipe: &SignalPipe) -> bool {
        let mut buf = [0u8; 1024];
        loop {
            match recv(pipe.recv_fd().raw(), &mut buf, MsgFlags::empty()) {
                Ok(0) => return true,
                Ok(n) => {
                    for &sig in &buf[..n] {
                        if i32::from(sig) == libc::SIGINT || i32::from(sig) == libc::SIGTERM {
                            warn!("captured exit signal {}", sig);
                            return false;
                        }
                    }
                }
                Err(Errno::EAGAIN) => return true,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    error!("signal pipe read failed: {}", e);
                    return true;
                }
            }
        }
    }

    /// Accept every pending connection; the edge-triggered listen socket
    /// only reports again once fully drained.
    fn accept_burst(&self, poller: &Arc<Poller>, listener: &ListenSocket) {
        loop {
            match accept(listener.fd().raw()) {
                Ok(raw) => {
                    let conn = Arc::new(Conn::new(Fd::new(raw)));
                    self.conns.lock().unwrap().insert(raw, Arc::clone(&conn));
                    if let Err(e) = poller.add(conn.fd(), Interest::Read, true) {
                        warn!("fd {} registration failed: {}", raw, e);
                        retire(&self.conns, poller, raw);
                    } else {
                        debug!("fd {} accepted", raw);
                    }
                }
                Err(Errno::EAGAIN) => return,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    error!("accept failed: {}", e);
                    return;
                }
            }
        }
    }

    /// Hand a readable connection to the pool: drain the request, run the
    /// callback, buffer the response, flip the registration to write
    /// interest. The reactor only waits until the task has captured the
    /// connection; the I/O happens off the reactor thread.
    fn submit_read(&self, poller: &Arc<Poller>, fd: RawFd) {
        let captured = Arc::new(Semaphore::new(0));
        let gate = Arc::clone(&captured);
        let conns = Arc::clone(&self.conns);
        let cb = Arc::clone(&self.cb);
        let poller = Arc::clone(poller);

        let submitted = self.pool.submit(
            move || {
                let conn = conns.lock().unwrap().get(&fd).cloned();
                gate.notify();
                let Some(conn) = conn else { return };

                if let Err(e) = conn.read_fd() {
                    debug!("fd {} read failed: {}", fd, e);
                    retire(&conns, &poller, fd);
                    return;
                }
                let request = conn.take_request();
                let response = cb(&request);
                conn.store_response(response);
                if let Err(e) = poller.rearm(conn.fd(), Interest::Write, true) {
                    warn!("fd {} write re-arm failed: {}", fd, e);
                    retire(&conns, &poller, fd);
                }
            },
            false,
        );
        if submitted {
            captured.wait();
        }
    }

    /// Hand a writable connection to the pool: flush the response, then
    /// retire the connection.
    fn submit_write(&self, poller: &Arc<Poller>, fd: RawFd) {
        let captured = Arc::new(Semaphore::new(0));
        let gate = Arc::clone(&captured);
        let conns = Arc::clone(&self.conns);
        let poller = Arc::clone(poller);

        let submitted = self.pool.submit(
            move || {
                let conn = conns.lock().unwrap().get(&fd).cloned();
                gate.notify();
                let Some(conn) = conn else { return };

                if let Err(e) = conn.write_fd() {
                    debug!("fd {} write failed: {}", fd, e);
                }
                retire(&conns, &poller, fd);
            },
            false,
        );
        if submitted {
            captured.wait();
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        warn!("server closing");
        if let Some(poller) = self.poller.get() {
            let fds: Vec<RawFd> = self.conns.lock().unwrap().keys().copied().collect();
            for fd in fds {
                retire(&self.conns, poller, fd);
            }
            if self.serving.load(Ordering::SeqCst) {
                let _ = poller.remove(signal_pipe().recv_fd());
            }
        }
    }
}
