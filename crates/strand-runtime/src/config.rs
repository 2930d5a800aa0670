//! Worker pool configuration

use crate::stack::DEFAULT_STACK_SIZE;

/// Configuration for a [`WorkerPool`](crate::pool::WorkerPool)
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads
    pub workers: usize,

    /// Capacity of each worker's local task queue
    pub queue_capacity: usize,

    /// Usable stack bytes per task fiber
    pub stack_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            queue_capacity: 1024,
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads
    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    /// Set the per-worker task queue capacity
    pub fn queue_capacity(mut self, n: usize) -> Self {
        self.queue_capacity = n;
        self
    }

    /// Set the fiber stack size
    pub fn stack_size(mut self, n: usize) -> Self {
        self.stack_size = n;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.workers == 0 {
            return Err("workers must be at least 1");
        }
        if self.queue_capacity == 0 {
            return Err("queue_capacity must be at least 1");
        }
        if self.stack_size == 0 {
            return Err("stack_size must be at least one page");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(PoolConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_workers() {
        assert!(PoolConfig::new().workers(0).validate().is_err());
        assert!(PoolConfig::new().queue_capacity(0).validate().is_err());
    }
}
