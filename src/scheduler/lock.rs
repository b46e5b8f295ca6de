//! The process table lock.
//!
//! A spinlock that disables interrupts on the acquiring CPU and remembers
//! which CPU holds it. The lock is handed across context switches: a
//! process that calls `sched` with the lock held is resumed later by a
//! scheduler that acquired it on its own account, and a fresh process drops
//! its scheduler's hold in `forkret`.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::{Mutex, MutexGuard};

use crate::arch::Platform;

use super::table::ProcTable;
use super::Kernel;

const NO_HOLDER: usize = usize::MAX;

pub(crate) struct TableLock<C> {
    lock: Mutex<()>,
    holder: AtomicUsize,
    table: UnsafeCell<ProcTable<C>>,
}

unsafe impl<C: Send> Sync for TableLock<C> {}

impl<C> TableLock<C> {
    pub(crate) fn new(table: ProcTable<C>) -> Self {
        TableLock {
            lock: Mutex::new(()),
            holder: AtomicUsize::new(NO_HOLDER),
            table: UnsafeCell::new(table),
        }
    }

    /// Is the lock held by `cpu`?
    pub(crate) fn holding(&self, cpu: usize) -> bool {
        self.lock.is_locked() && self.holder.load(Ordering::Acquire) == cpu
    }

    /// Release a hold that was taken by another context on this CPU.
    ///
    /// # Safety
    /// The lock must be held on the current CPU and the guard that took it
    /// must never be dropped.
    pub(crate) unsafe fn release_raw(&self) {
        self.holder.store(NO_HOLDER, Ordering::Release);
        self.lock.force_unlock();
    }

    /// The table without taking the lock.
    ///
    /// # Safety
    /// Readers may observe a table in the middle of an update. Only for
    /// diagnostics on a machine that may already be wedged.
    pub(crate) unsafe fn peek(&self) -> &ProcTable<C> {
        &*self.table.get()
    }
}

pub(crate) struct TableGuard<'a, P: Platform> {
    kernel: &'a Kernel<P>,
    guard: Option<MutexGuard<'a, ()>>,
}

impl<'a, P: Platform> Deref for TableGuard<'a, P> {
    type Target = ProcTable<P::Context>;

    fn deref(&self) -> &Self::Target {
        // SAFETY: the spinlock is held.
        unsafe { &*self.kernel.table.table.get() }
    }
}

impl<'a, P: Platform> DerefMut for TableGuard<'a, P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: the spinlock is held.
        unsafe { &mut *self.kernel.table.table.get() }
    }
}

impl<'a, P: Platform> Drop for TableGuard<'a, P> {
    fn drop(&mut self) {
        self.kernel.table.holder.store(NO_HOLDER, Ordering::Release);
        drop(self.guard.take());
        self.kernel.pop_off();
    }
}

impl<P: Platform> Kernel<P> {
    /// Acquire the table lock. Interrupts stay off on this CPU until the
    /// guard is dropped.
    pub(crate) fn lock_table(&self) -> TableGuard<'_, P> {
        // Disable interrupts to avoid deadlock with an interrupt handler.
        self.push_off();
        let cpu = self.platform.cpu_id();
        if self.table.holding(cpu) {
            halt!("acquire: table lock already held by cpu {}", cpu);
        }
        let guard = self.table.lock.lock();
        self.table.holder.store(cpu, Ordering::Release);
        TableGuard {
            kernel: self,
            guard: Some(guard),
        }
    }
}
