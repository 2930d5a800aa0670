//! Stackful fibers
//!
//! A fiber is a cooperatively scheduled execution context with its own
//! mapped stack. The first fiber operation on an OS thread materializes
//! that thread's **main fiber**, which owns no stack and represents the
//! scheduling frame. `go` switches from the main fiber into a worker
//! fiber; the worker runs until it calls `sched` (back to Runnable) or its
//! callback finishes (Dead).
//!
//! A fiber that has yielded must not be moved in memory before it is
//! resumed; its suspended frame refers back into the `Fiber` value. Keep
//! long-lived fibers boxed, as the worker pool does.

use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use log::debug;
use strand_core::id::FiberId;
use strand_core::state::FiberState;

use crate::arch::{self, SavedRegs};
use crate::stack::{Stack, DEFAULT_STACK_SIZE};
use crate::tls;

/// A stackful, cooperatively scheduled execution context
pub struct Fiber {
    id: FiberId,
    state: FiberState,
    regs: SavedRegs,

    /// None only for main fibers
    stack: Option<Stack>,

    /// The boxed callback, owned by the trampoline once the fiber starts
    cb: *mut Box<dyn FnOnce()>,

    /// Whether the trampoline has taken ownership of `cb`
    started: bool,
}

impl Fiber {
    /// Create a runnable fiber with the default stack size
    pub fn new<F>(cb: F) -> Fiber
    where
        F: FnOnce() + 'static,
    {
        Self::with_stack_size(cb, DEFAULT_STACK_SIZE)
    }

    /// Create a runnable fiber with `stack_size` usable stack bytes
    pub fn with_stack_size<F>(cb: F, stack_size: usize) -> Fiber
    where
        F: FnOnce() + 'static,
    {
        assert!(stack_size > 0, "fiber stack size must be positive");
        let stack = Stack::map(stack_size).expect("fiber stack mapping failed");
        let stack_top = stack.top();

        let boxed: Box<dyn FnOnce()> = Box::new(cb);
        let cb = Box::into_raw(Box::new(boxed));

        let mut fiber = Fiber {
            id: FiberId::allocate(),
            state: FiberState::Idle,
            regs: SavedRegs::zeroed(),
            stack: Some(stack),
            cb,
            started: false,
        };
        unsafe {
            arch::init_context(
                &mut fiber.regs,
                stack_top,
                fiber_entry as usize,
                cb as usize,
                fiber_exit as usize,
            );
        }
        fiber.state = FiberState::Runnable;
        fiber
    }

    /// Constructor for a thread's main fiber
    pub(crate) fn new_main() -> Fiber {
        Fiber {
            id: FiberId::MAIN,
            state: FiberState::Running,
            regs: SavedRegs::zeroed(),
            stack: None,
            cb: ptr::null_mut(),
            started: true,
        }
    }

    #[inline]
    pub fn id(&self) -> FiberId {
        self.id
    }

    #[inline]
    pub fn state(&self) -> FiberState {
        self.state
    }

    /// Resume this fiber on the calling thread.
    ///
    /// No-op unless the fiber is Runnable. Returns once the fiber yields
    /// or finishes; inspect `state` to tell which.
    pub fn go(&mut self) {
        if self.state != FiberState::Runnable {
            return;
        }
        let main = tls::ensure_main();
        debug_assert!(
            tls::current() == main,
            "go() is only valid from the scheduling frame"
        );

        self.state = FiberState::Running;
        self.started = true;
        let self_ptr: *mut Fiber = self;
        unsafe {
            (*main).state = FiberState::Waiting;
            tls::set_current(self_ptr);
            arch::context_switch(&mut (*main).regs, &self.regs);
        }
        // Back on the scheduling frame; the fiber updated both states
        // before switching out.
    }

    /// Yield back to the scheduling frame, leaving this fiber Runnable.
    ///
    /// Only meaningful from inside the running fiber; a main fiber cannot
    /// yield.
    pub fn sched(&mut self) {
        let main = tls::main_ptr();
        if main.is_null() || ptr::eq(self, main) {
            return;
        }
        if self.state != FiberState::Running {
            return;
        }
        self.switch_out(FiberState::Runnable);
    }

    /// Leave this fiber in `next` state and resume the main fiber
    fn switch_out(&mut self, next: FiberState) {
        let main = tls::main_ptr();
        debug_assert!(!main.is_null(), "switch_out without a main fiber");
        self.state = next;
        unsafe {
            (*main).state = FiberState::Running;
            tls::set_current(main);
            arch::context_switch(&mut self.regs, &(*main).regs);
        }
        // Resumed by a later go().
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        // A fiber discarded before its first run still owns the callback.
        if !self.started && !self.cb.is_null() {
            unsafe { drop(Box::from_raw(self.cb)) };
        }
    }
}

/// Yield the current fiber, if any. No-op outside a worker fiber.
pub fn sched() {
    let cur = tls::current();
    if cur.is_null() {
        return;
    }
    unsafe { (*cur).sched() };
}

/// Id of the currently running fiber; `FiberId::MAIN` outside fibers
pub fn current_id() -> FiberId {
    let cur = tls::current();
    if cur.is_null() {
        FiberId::MAIN
    } else {
        unsafe { (*cur).id() }
    }
}

/// Whether the caller is inside a worker fiber
#[inline]
pub fn in_fiber() -> bool {
    tls::in_fiber()
}

/// Runs the user callback inside the fiber, guarded against unwinding
extern "C" fn fiber_entry(arg: usize) {
    let cb = unsafe { Box::from_raw(arg as *mut Box<dyn FnOnce()>) };
    if panic::catch_unwind(AssertUnwindSafe(*cb)).is_err() {
        debug!("fiber {} callback panicked; fiber retired", current_id());
    }
}

/// Terminates the fiber after its callback returned; never returns
extern "C" fn fiber_exit() {
    let cur = tls::current();
    debug_assert!(!cur.is_null() && cur != tls::main_ptr());
    unsafe { (*cur).switch_out(FiberState::Dead) };
    unreachable!("dead fiber resumed");
}
