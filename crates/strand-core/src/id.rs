//! Fiber identifier type

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// Process-wide monotonically increasing fiber id source.
///
/// Id 0 is reserved for the per-thread main fibers.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a fiber
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct FiberId(u64);

impl FiberId {
    /// Id shared by every thread's main fiber
    pub const MAIN: FiberId = FiberId(0);

    /// Allocate the next worker-fiber id
    #[inline]
    pub fn allocate() -> Self {
        FiberId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Whether this is a main-fiber id
    #[inline]
    pub const fn is_main(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_main() {
            write!(f, "FiberId(main)")
        } else {
            write!(f, "FiberId({})", self.0)
        }
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_main() {
            write!(f, "main")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic() {
        let a = FiberId::allocate();
        let b = FiberId::allocate();
        assert!(b.as_u64() > a.as_u64());
        assert!(!a.is_main());
    }

    #[test]
    fn test_main_id() {
        assert!(FiberId::MAIN.is_main());
        assert_eq!(FiberId::MAIN.as_u64(), 0);
        assert_eq!(format!("{}", FiberId::MAIN), "main");
    }
}
