//! Scheduler introspection: the `getpinfo` snapshot and the console
//! process dump.

use core::fmt::{self, Write};

use crate::arch::Platform;
use crate::config::{NLEVELS, NPROC};

use super::task::ProcessState;
use super::Kernel;

/// Per-slot scheduling statistics, laid out for copying to user space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct PStat {
    /// Whether the slot holds a live (non-zombie) process.
    pub inuse: [bool; NPROC],
    pub pid: [u32; NPROC],
    /// Current queue level.
    pub priority: [u8; NPROC],
    /// Ticks consumed at each level.
    pub ticks: [[u32; NLEVELS]; NPROC],
}

impl PStat {
    pub const fn new() -> Self {
        PStat {
            inuse: [false; NPROC],
            pid: [0; NPROC],
            priority: [0; NPROC],
            ticks: [[0; NLEVELS]; NPROC],
        }
    }

    /// Slots currently in use.
    pub fn live(&self) -> impl Iterator<Item = usize> + '_ {
        (0..NPROC).filter(move |&slot| self.inuse[slot])
    }
}

impl Default for PStat {
    fn default() -> Self {
        Self::new()
    }
}

/// One line per live process: pid, level, then ticks per level.
impl fmt::Display for PStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "pid\tprio\tq0\tq1\tq2\tq3")?;
        for slot in self.live() {
            write!(f, "{}\t{}", self.pid[slot], self.priority[slot])?;
            for ticks in self.ticks[slot] {
                write!(f, "\t{}", ticks)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl<P: Platform> Kernel<P> {
    /// Consistent snapshot of every slot, taken under the table lock.
    pub fn getpinfo(&self) -> PStat {
        self.lock_table().snapshot()
    }

    /// Print a process listing to `out`. Runs when a user types ^P on the
    /// console, so it takes no lock to avoid wedging a stuck machine
    /// further.
    pub fn procdump(&self, out: &mut dyn Write) -> fmt::Result {
        // SAFETY: read-only and tolerant of torn state.
        let table = unsafe { self.table.peek() };
        for p in table.procs.iter().filter(|p| p.state != ProcessState::Unused) {
            write!(out, "{} {} {}", p.pid, p.state.name(), p.name)?;
            if p.state == ProcessState::Sleeping {
                let mut pcs = [0u64; 10];
                let n = self.platform.caller_pcs(&p.context, &mut pcs);
                for pc in pcs.iter().take(n) {
                    write!(out, " {:#x}", pc)?;
                }
            }
            writeln!(out)?;
        }
        Ok(())
    }
}
