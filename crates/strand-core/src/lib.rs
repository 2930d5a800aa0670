//! # strand-core
//!
//! Platform-agnostic primitives for the strand runtime. Everything touching
//! the OS (context switches, stacks, sockets, epoll) lives in
//! `strand-runtime` and `strand-net`.
//!
//! ## Modules
//!
//! - `id` - fiber identifier type
//! - `state` - fiber lifecycle states
//! - `channel` - bounded MPMC channel with batch operations
//! - `map` - read-optimized concurrent key/value map
//! - `sem` - counting semaphore
//! - `spinlock` - spinlock for short critical sections

pub mod channel;
pub mod id;
pub mod map;
pub mod sem;
pub mod spinlock;
pub mod state;

// Re-exports for convenience
pub use channel::Channel;
pub use id::FiberId;
pub use map::SplitMap;
pub use sem::Semaphore;
pub use spinlock::SpinLock;
pub use state::FiberState;
