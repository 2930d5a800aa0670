//! Per-fiber stacks
//!
//! Each worker fiber owns an anonymous mapping with a PROT_NONE guard page
//! at the low end, so running off the stack faults instead of corrupting a
//! neighbour.

use thiserror::Error;

/// Default usable stack size per fiber (64 KiB)
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

/// Guard page size at the low end of every stack
const GUARD_SIZE: usize = 4096;

const PAGE_SIZE: usize = 4096;

/// Errors mapping or protecting a fiber stack
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StackError {
    #[error("stack mapping failed")]
    AllocationFailed,

    #[error("guard page protection failed")]
    ProtectionFailed,
}

/// An owned, mapped fiber stack
pub struct Stack {
    base: *mut u8,
    total: usize,
}

// Safety: the mapping is owned exclusively by this handle
unsafe impl Send for Stack {}

impl Stack {
    /// Map a stack with `size` usable bytes (rounded up to whole pages)
    pub fn map(size: usize) -> Result<Self, StackError> {
        let usable = size.max(PAGE_SIZE).next_multiple_of(PAGE_SIZE);
        let total = usable + GUARD_SIZE;

        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                total,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(StackError::AllocationFailed);
        }

        // Guard page at the low end; a downward-growing overflow hits it.
        let ret = unsafe { libc::mprotect(base, GUARD_SIZE, libc::PROT_NONE) };
        if ret != 0 {
            unsafe { libc::munmap(base, total) };
            return Err(StackError::ProtectionFailed);
        }

        Ok(Stack {
            base: base as *mut u8,
            total,
        })
    }

    /// Highest address of the stack; execution starts here and grows down
    #[inline]
    pub fn top(&self) -> *mut u8 {
        unsafe { self.base.add(self.total) }
    }

    /// Usable bytes between the guard page and the top
    #[inline]
    pub fn usable(&self) -> usize {
        self.total - GUARD_SIZE
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.total);
        }
    }
}
