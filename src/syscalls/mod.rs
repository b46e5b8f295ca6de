use crate::arch::Platform;
use crate::error::SchedResult;
use crate::scheduler::{Kernel, PStat, Pid};

/// Syscall numbers (passed in RAX from userland).
pub const SYS_FORK: u64 = 1;
pub const SYS_EXIT: u64 = 2;
pub const SYS_WAIT: u64 = 3;
pub const SYS_KILL: u64 = 6;
pub const SYS_GETPID: u64 = 11;
pub const SYS_SBRK: u64 = 12;
pub const SYS_GETPINFO: u64 = 22;
pub const SYS_YIELD: u64 = 23;

/// Returned in RAX for any failed call.
pub const ERR: u64 = u64::MAX;

/// Central syscall dispatcher, called from the trap handler.
/// Arguments come from registers: rax=number, rdi=arg0, rsi=arg1, rdx=arg2.
/// Returns result in rax.
///
/// A process killed while in the kernel exits here instead of returning to
/// user space.
pub fn dispatch<P: Platform>(
    kernel: &Kernel<P>,
    number: u64,
    arg0: u64,
    _arg1: u64,
    _arg2: u64,
) -> u64 {
    if kernel.killed() {
        kernel.exit();
    }

    let ret = match number {
        SYS_FORK => status(kernel.fork().map(|pid| pid.0 as u64)),
        SYS_EXIT => kernel.exit(),
        SYS_WAIT => status(kernel.wait().map(|pid| pid.0 as u64)),
        SYS_KILL => match u32::try_from(arg0) {
            Ok(pid) => status(kernel.kill(Pid(pid)).map(|()| 0)),
            Err(_) => ERR,
        },
        SYS_GETPID => kernel.getpid().0 as u64,
        SYS_SBRK => status(kernel.growproc(arg0 as i64 as isize).map(|old| old as u64)),
        SYS_GETPINFO => {
            // arg0 = pointer to a user PStat
            let ptr = arg0 as *mut PStat;
            if ptr.is_null() {
                return ERR;
            }
            // SAFETY: the trap handler only passes pointers it has checked
            // against the caller's address space.
            unsafe { ptr.write(kernel.getpinfo()) };
            0
        }
        SYS_YIELD => {
            kernel.yield_now();
            0
        }
        _ => {
            log::warn!("syscall: unknown number {}", number);
            ERR
        }
    };

    if kernel.killed() {
        kernel.exit();
    }
    ret
}

fn status(result: SchedResult<u64>) -> u64 {
    match result {
        Ok(value) => value,
        Err(e) => {
            log::debug!("syscall: {}", e);
            ERR
        }
    }
}
