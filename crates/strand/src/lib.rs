//! # strand
//!
//! A fiber-based server runtime. Tasks run as stackful fibers on a fixed
//! pool of worker threads with per-worker bounded queues and work
//! stealing; an epoll reactor feeds connection I/O into the pool; a
//! read-optimized split map serves as the shared lookup primitive.
//!
//! ## Quick start
//!
//! ```ignore
//! use strand::{sched, Server, WorkerPool};
//!
//! // Schedule cooperative tasks.
//! let pool = WorkerPool::new(8);
//! pool.submit(
//!     || {
//!         // ... first half of the work ...
//!         sched(); // let a sibling task run on this thread
//!         // ... second half ...
//!     },
//!     false,
//! );
//!
//! // Or serve a protocol-agnostic request/response callback.
//! let server = Server::init(8080, |request| request.to_vec());
//! server.serve(); // returns on SIGINT/SIGTERM
//! ```
//!
//! ## Architecture
//!
//! ```text
//!    kernel ──► epoll_wait ──► Server (reactor thread)
//!                                 │ submit
//!                                 ▼
//!                  WorkerPool: N threads, bounded local queues,
//!                  random-victim work stealing
//!                                 │ one fiber per task
//!                                 ▼
//!                  Fiber: mmap stack + context switch; sched()
//!                  parks the fiber on its thread's yield queue
//! ```

// Core primitives
pub use strand_core::{Channel, FiberId, FiberState, Semaphore, SpinLock, SplitMap};

// Fibers and scheduling
pub use strand_runtime::{
    current_id, in_fiber, sched, Fiber, InstancePool, PoolConfig, Poolable, Task, WorkerPool,
};

// Reactor
pub use strand_net::{Conn, Fd, NetError, NetResult, Server};
