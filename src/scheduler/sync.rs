//! Sleep and wakeup.
//!
//! A process sleeps on a [`Channel`] while holding some other lock that
//! protects the condition it waits for. The table lock is taken before that
//! lock is released, so a wakeup issued under the condition lock cannot
//! slip in between the check and the sleep.

use spin::{Mutex, MutexGuard};

use crate::arch::Platform;

use super::lock::TableGuard;
use super::task::Channel;
use super::Kernel;

impl<P: Platform> Kernel<P> {
    /// Atomically release `guard` and sleep on `chan`. Reacquires `lock`
    /// when woken.
    pub fn sleep<'a, T>(
        &self,
        chan: Channel,
        lock: &'a Mutex<T>,
        guard: MutexGuard<'a, T>,
    ) -> MutexGuard<'a, T> {
        let mut table = self.lock_table();
        drop(guard);
        self.sleep_locked(chan, &mut table);
        drop(table);
        lock.lock()
    }

    /// Sleep on `chan` when the condition is itself guarded by the table lock.
    pub(crate) fn sleep_locked(&self, chan: Channel, table: &mut TableGuard<'_, P>) {
        let slot = self.myproc();
        table.block(slot, chan);
        log::trace!("sleep: pid {} on {:?}", table.proc(slot).pid, chan);
        self.sched(table);
        // Tidy up.
        table.proc_mut(slot).chan = None;
    }

    /// Wake every process sleeping on `chan`.
    pub fn wakeup(&self, chan: Channel) {
        let woken = self.lock_table().wakeup(chan);
        if woken > 0 {
            log::trace!("wakeup: {:?} woke {}", chan, woken);
        }
    }
}
