//! Per-CPU scheduler state and interrupt nesting.

use core::cell::UnsafeCell;

use crate::arch::Platform;
use crate::config::NCPU;

use super::Kernel;

pub(crate) struct Cpu<C> {
    /// Slot of the process running here, if any.
    pub(crate) proc: Option<usize>,
    /// Scheduler context; `swtch` here to enter the scheduler loop.
    pub(crate) context: C,
    /// Depth of `push_off` nesting.
    pub(crate) noff: usize,
    /// Were interrupts enabled before the outermost `push_off`?
    pub(crate) intena: bool,
}

/// One [`Cpu`] per hardware CPU. An entry is only touched by its own CPU
/// with interrupts disabled, which is what makes sharing it sound.
pub(crate) struct Cpus<C>([UnsafeCell<Cpu<C>>; NCPU]);

unsafe impl<C: Send> Sync for Cpus<C> {}

impl<C: Default> Cpus<C> {
    pub(crate) fn new() -> Self {
        Cpus(core::array::from_fn(|_| {
            UnsafeCell::new(Cpu {
                proc: None,
                context: C::default(),
                noff: 0,
                intena: false,
            })
        }))
    }
}

impl<C> Cpus<C> {
    pub(crate) fn get(&self, id: usize) -> *mut Cpu<C> {
        if id >= NCPU {
            halt!("cpu id {} out of range", id);
        }
        self.0[id].get()
    }
}

impl<P: Platform> Kernel<P> {
    /// State of the executing CPU. Interrupts must be off so the caller
    /// cannot migrate while using it.
    pub(crate) fn mycpu(&self) -> *mut Cpu<P::Context> {
        if self.platform.intr_get() {
            halt!("mycpu called with interrupts enabled");
        }
        self.cpus.get(self.platform.cpu_id())
    }

    /// Like `intr_off`, but matched: it takes two `pop_off`s to undo two
    /// `push_off`s, and interrupts come back on only if they were on at the
    /// outermost `push_off`.
    pub(crate) fn push_off(&self) {
        let old = self.platform.intr_get();
        self.platform.intr_off();
        let cpu = self.mycpu();
        // SAFETY: interrupts are off; only this CPU touches its entry.
        unsafe {
            if (*cpu).noff == 0 {
                (*cpu).intena = old;
            }
            (*cpu).noff += 1;
        }
    }

    pub(crate) fn pop_off(&self) {
        if self.platform.intr_get() {
            halt!("pop_off: interruptible");
        }
        let cpu = self.mycpu();
        // SAFETY: as in push_off.
        let enable = unsafe {
            if (*cpu).noff < 1 {
                halt!("pop_off: unbalanced");
            }
            (*cpu).noff -= 1;
            (*cpu).noff == 0 && (*cpu).intena
        };
        if enable {
            self.platform.intr_on();
        }
    }

    /// Slot of the process running on this CPU.
    pub(crate) fn current_slot(&self) -> Option<usize> {
        self.push_off();
        // SAFETY: interrupts are off.
        let slot = unsafe { (*self.mycpu()).proc };
        self.pop_off();
        slot
    }

    /// Like [`current_slot`](Self::current_slot) for callers that can only
    /// run in process context.
    pub(crate) fn myproc(&self) -> usize {
        match self.current_slot() {
            Some(slot) => slot,
            None => halt!("no current process"),
        }
    }
}
