//! # strand-runtime
//!
//! Execution layer of the strand runtime:
//!
//! - stackful fibers with architecture-specific context switching
//! - mmap-backed fiber stacks with guard pages
//! - a work-stealing worker pool scheduling tasks as fibers
//! - a sharded instance recycler with generational eviction

pub mod arch;
pub mod config;
pub mod fiber;
pub mod pool;
pub mod recycle;
pub mod stack;
pub mod tls;

// Re-exports
pub use config::PoolConfig;
pub use fiber::{current_id, in_fiber, sched, Fiber};
pub use pool::{Task, WorkerPool};
pub use recycle::{InstancePool, Poolable};
pub use stack::{Stack, StackError, DEFAULT_STACK_SIZE};
