//! Thread-local fiber context
//!
//! Each OS thread lazily materializes a main fiber (its scheduling frame)
//! and tracks which fiber currently runs. Raw pointers are used so the
//! running fiber can be reached from the trampoline without borrowing
//! through a `RefCell` across a context switch; the boxes behind them are
//! owned by this module (main) or by the caller of `go` (workers), both of
//! which outlive the switch.

use std::cell::{Cell, RefCell};
use std::ptr;

use crate::fiber::Fiber;

thread_local! {
    /// Owns this thread's main fiber
    static MAIN: RefCell<Option<Box<Fiber>>> = const { RefCell::new(None) };

    /// Stable address of the main fiber
    static MAIN_PTR: Cell<*mut Fiber> = const { Cell::new(ptr::null_mut()) };

    /// The fiber currently running on this thread
    static CURRENT: Cell<*mut Fiber> = const { Cell::new(ptr::null_mut()) };
}

/// Materialize the main fiber for this thread if needed; returns it
pub(crate) fn ensure_main() -> *mut Fiber {
    MAIN_PTR.with(|cell| {
        let existing = cell.get();
        if !existing.is_null() {
            return existing;
        }
        let mut boxed = Box::new(Fiber::new_main());
        let raw: *mut Fiber = &mut *boxed;
        MAIN.with(|main| *main.borrow_mut() = Some(boxed));
        cell.set(raw);
        CURRENT.with(|cur| {
            if cur.get().is_null() {
                cur.set(raw);
            }
        });
        raw
    })
}

/// This thread's main fiber, or null before the first fiber ran here
#[inline]
pub(crate) fn main_ptr() -> *mut Fiber {
    MAIN_PTR.with(|cell| cell.get())
}

/// The currently running fiber (the main fiber when no worker runs)
#[inline]
pub(crate) fn current() -> *mut Fiber {
    CURRENT.with(|cell| cell.get())
}

#[inline]
pub(crate) fn set_current(fiber: *mut Fiber) {
    CURRENT.with(|cell| cell.set(fiber));
}

/// Whether the caller executes inside a worker fiber
#[inline]
pub fn in_fiber() -> bool {
    let cur = current();
    !cur.is_null() && cur != main_ptr()
}
