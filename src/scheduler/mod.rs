//! Multi-level feedback queue scheduler.
//!
//! Four run queues with quanta of 1, 2, 4 and 8 ticks. A process that uses
//! up the quantum of its level drops one level; at the lowest level it goes
//! round robin. Processes never move back up.
//!
//! Every CPU runs [`Kernel::scheduler`], which picks the first runnable
//! process from the highest non-empty level and switches to it. The process
//! comes back to the scheduler through [`Kernel::sched`] when it yields,
//! sleeps or exits.

mod cpu;
mod lifecycle;
mod lock;
pub mod pstat;
pub mod queue;
mod sync;
pub mod table;
pub mod task;

use core::ptr::{addr_of, addr_of_mut};

use crate::arch::Platform;

use cpu::Cpus;
use lock::{TableGuard, TableLock};
use table::ProcTable;

pub use pstat::PStat;
pub use task::{Channel, Pid, ProcessState, TrapFrame};

/// The scheduler and everything it guards.
pub struct Kernel<P: Platform> {
    platform: P,
    table: TableLock<P::Context>,
    cpus: Cpus<P::Context>,
}

impl<P: Platform> Kernel<P> {
    pub fn new(platform: P) -> Self {
        Kernel {
            platform,
            table: TableLock::new(ProcTable::new()),
            cpus: Cpus::new(),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Per-CPU scheduler loop. Never returns.
    pub fn scheduler(&self) -> ! {
        log::info!("cpu {}: starting scheduler", self.platform.cpu_id());
        loop {
            // Let devices interrupt between scans so an idle CPU can
            // notice a process becoming runnable.
            self.platform.intr_on();
            if !self.run_next() {
                self.platform.idle();
            }
        }
    }

    /// One scheduling decision: switch to the first runnable process, if
    /// any, and return once it gives the CPU back.
    pub fn run_next(&self) -> bool {
        let mut table = self.lock_table();
        let Some(slot) = table.dispatch() else {
            return false;
        };

        let cpu = self.mycpu();
        // SAFETY: interrupts are off while the table lock is held.
        unsafe { (*cpu).proc = Some(slot) };
        {
            let p = table.proc(slot);
            log::trace!(
                "cpu {}: run pid {} at level {}",
                self.platform.cpu_id(),
                p.pid,
                p.priority
            );
            self.platform.uvm_activate(p.space.as_ref(), p.kstack.as_ref());
        }

        let next: *const P::Context = &table.proc(slot).context;
        // SAFETY: the context lives in the table, which never moves, and the
        // process only touches it again while holding the table lock.
        unsafe { self.platform.swtch(addr_of_mut!((*cpu).context), next) };

        // The process is done running for now. It must have changed its
        // state before coming back.
        self.platform.kvm_activate();
        // SAFETY: as above.
        unsafe { (*self.mycpu()).proc = None };
        true
    }

    /// Give the CPU to the scheduler. The caller must hold the table lock
    /// and nothing else, and must already have moved the current process
    /// out of the running state.
    pub(crate) fn sched(&self, table: &mut TableGuard<'_, P>) {
        let cpu = self.mycpu();
        // SAFETY: interrupts are off while the table lock is held.
        let (slot, noff, intena) = unsafe { ((*cpu).proc, (*cpu).noff, (*cpu).intena) };
        let Some(slot) = slot else {
            halt!("sched: no process");
        };
        if !self.table.holding(self.platform.cpu_id()) {
            halt!("sched: table lock not held");
        }
        if noff != 1 {
            halt!("sched: {} locks held", noff);
        }
        if table.state(slot) == ProcessState::Running {
            halt!("sched: process still running");
        }
        if self.platform.intr_get() {
            halt!("sched: interruptible");
        }

        let own: *mut P::Context = &mut table.proc_mut(slot).context;
        // SAFETY: see run_next.
        unsafe { self.platform.swtch(own, addr_of!((*cpu).context)) };

        // We may be resumed on another CPU.
        // SAFETY: interrupts are still off.
        unsafe { (*self.mycpu()).intena = intena };
    }

    /// Give up the CPU for one scheduling round. This is also what a timer
    /// interrupt calls: every yield is charged as one tick.
    pub fn yield_now(&self) {
        let mut table = self.lock_table();
        let slot = self.myproc();
        table.charge_tick(slot);
        self.sched(&mut table);
    }

    /// First code a new process runs, on its own kernel stack, before
    /// returning to user space.
    pub fn forkret(&self) {
        // Still holding the table lock taken by the scheduler.
        // SAFETY: the scheduler's guard is never dropped on this stack; the
        // scheduler drops its own once it runs again.
        unsafe { self.table.release_raw() };
        self.pop_off();
    }

    /// Inspect the table under the lock.
    #[cfg(test)]
    pub(crate) fn with_table<R>(&self, f: impl FnOnce(&ProcTable<P::Context>) -> R) -> R {
        let table = self.lock_table();
        f(&table)
    }
}
