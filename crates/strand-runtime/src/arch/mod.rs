//! Architecture-specific context switching
//!
//! Each architecture module provides the saved-register block, the switch
//! routine and the entry trampoline for stackful fibers.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub mod x86_64;
        pub use x86_64::{SavedRegs, context_switch, init_context};
    } else if #[cfg(target_arch = "aarch64")] {
        pub mod aarch64;
        pub use aarch64::{SavedRegs, context_switch, init_context};
    } else {
        compile_error!("Unsupported architecture");
    }
}
