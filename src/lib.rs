//! MLFQ process scheduler for a small x86_64 teaching kernel.
//!
//! The crate owns the process table, the four-level run queues and the
//! process lifecycle (fork, exit, wait, kill, sleep and wakeup). Memory,
//! files and the CPU itself are reached through the [`arch::Platform`]
//! traits so the same core runs on bare metal and under host tests.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

/// Log an invariant violation and halt.
macro_rules! halt {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
        panic!($($arg)*)
    }};
}

pub mod arch;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod syscalls;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod serial;

#[cfg(test)]
mod sim;

pub use error::{SchedError, SchedResult};
pub use scheduler::{Channel, Kernel, PStat, Pid, ProcessState};
