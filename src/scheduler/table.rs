//! Process table.
//!
//! Sole owner of process state and run queue membership. Every method here
//! runs with the table lock held: the only way to reach a `ProcTable` is
//! through a [`TableGuard`](super::lock::TableGuard), so each method changes
//! state and queue membership together, atomically.

use crate::config::{quantum, NLEVELS, NPROC};
use crate::error::{SchedError, SchedResult};

use super::pstat::PStat;
use super::queue::RunQueues;
use super::task::{Channel, Pid, Process, ProcessState, Remains, TrapFrame};

/// Result of looking for a child to reap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChildScan {
    /// Slot of a zombie child.
    Zombie(usize),
    /// Children exist but none has exited yet.
    Alive,
    NoChildren,
}

pub struct ProcTable<C> {
    pub(crate) procs: [Process<C>; NPROC],
    pub(crate) queues: RunQueues,
    next_pid: u32,
    init: Option<usize>,
}

impl<C: Default> ProcTable<C> {
    pub fn new() -> Self {
        ProcTable {
            procs: core::array::from_fn(|_| Process::new()),
            queues: RunQueues::new(),
            next_pid: 1,
            init: None,
        }
    }
}

impl<C: Default> Default for ProcTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> ProcTable<C> {
    pub(crate) fn proc(&self, slot: usize) -> &Process<C> {
        &self.procs[slot]
    }

    pub(crate) fn proc_mut(&mut self, slot: usize) -> &mut Process<C> {
        &mut self.procs[slot]
    }

    pub fn init_slot(&self) -> Option<usize> {
        self.init
    }

    pub(crate) fn set_init(&mut self, slot: usize) {
        self.init = Some(slot);
    }

    /// Slot of the live (or zombie) process with this pid.
    pub fn find(&self, pid: Pid) -> Option<usize> {
        if pid == Pid::NONE {
            return None;
        }
        self.procs
            .iter()
            .position(|p| p.pid == pid && p.state != ProcessState::Unused)
    }

    pub fn state(&self, slot: usize) -> ProcessState {
        self.procs[slot].state
    }

    pub fn priority(&self, slot: usize) -> usize {
        self.procs[slot].priority
    }

    pub fn ticks(&self, slot: usize) -> [u32; NLEVELS] {
        self.procs[slot].ticks
    }

    pub fn queues(&self) -> &RunQueues {
        &self.queues
    }

    /// Claim an unused slot: assign the next pid, reset the MLFQ bookkeeping
    /// and queue it at the tail of level 0 as an embryo.
    pub fn claim(&mut self) -> SchedResult<usize> {
        let Some(slot) = self
            .procs
            .iter()
            .position(|p| p.state == ProcessState::Unused)
        else {
            log::warn!("proc: table full ({} slots)", NPROC);
            return Err(SchedError::NoProcessSlot);
        };

        let pid = Pid(self.next_pid);
        self.next_pid += 1;

        let p = &mut self.procs[slot];
        p.pid = pid;
        p.state = ProcessState::Embryo;
        p.priority = 0;
        p.ticks = [0; NLEVELS];
        p.parent = None;
        p.chan = None;
        p.killed = false;
        self.queues.append_tail(0, slot);
        Ok(slot)
    }

    /// Undo [`claim`](Self::claim) for an embryo whose setup failed.
    pub fn discard(&mut self, slot: usize) -> Remains {
        if self.procs[slot].state != ProcessState::Embryo {
            halt!("discard: slot {} is not an embryo", slot);
        }
        self.queues.remove(self.procs[slot].priority, slot);
        self.clear(slot)
    }

    /// Return a reaped zombie's slot to the unused pool.
    pub fn reclaim(&mut self, slot: usize) -> Remains {
        if self.procs[slot].state != ProcessState::Zombie {
            halt!("reclaim: slot {} is not a zombie", slot);
        }
        if let Some(level) = self.queues.level_of(slot) {
            halt!("reclaim: zombie slot {} still queued at level {}", slot, level);
        }
        self.clear(slot)
    }

    fn clear(&mut self, slot: usize) -> Remains {
        let p = &mut self.procs[slot];
        let remains = Remains {
            kstack: p.kstack.take(),
            space: p.space.take(),
        };
        p.state = ProcessState::Unused;
        p.pid = Pid::NONE;
        p.parent = None;
        p.chan = None;
        p.killed = false;
        p.size = 0;
        p.trapframe = TrapFrame::default();
        p.name.clear();
        remains
    }

    /// Embryo finished setup.
    pub fn make_runnable(&mut self, slot: usize) {
        if self.procs[slot].state != ProcessState::Embryo {
            halt!("make_runnable: slot {} is not an embryo", slot);
        }
        self.procs[slot].state = ProcessState::Runnable;
    }

    /// Pick the first runnable slot, scanning level 0 to 3 and each level
    /// head to tail, and mark it running. It keeps its queue position.
    pub fn dispatch(&mut self) -> Option<usize> {
        let procs = &self.procs;
        let slot = (0..NLEVELS).find_map(|level| {
            self.queues
                .iter(level)
                .find(|&slot| procs[slot].state == ProcessState::Runnable)
        })?;
        self.procs[slot].state = ProcessState::Running;
        Some(slot)
    }

    /// Account one tick to a running process and make it runnable again.
    ///
    /// When the quantum of its level is used up it moves to the tail of the
    /// next level down, or to the tail of level 3 once it is there.
    pub fn charge_tick(&mut self, slot: usize) {
        let level = self.procs[slot].priority;
        self.procs[slot].ticks[level] += 1;
        let used = self.procs[slot].ticks[level];

        if used % quantum(level) == 0 {
            let next = (level + 1).min(NLEVELS - 1);
            self.queues.remove(level, slot);
            self.queues.append_tail(next, slot);
            self.procs[slot].priority = next;
            log::trace!(
                "proc: pid {} used {} ticks at level {}, now level {}",
                self.procs[slot].pid,
                used,
                level,
                next
            );
        }
        self.procs[slot].state = ProcessState::Runnable;
    }

    /// Put a running process to sleep on `chan`. Sleepers leave the run queues.
    pub fn block(&mut self, slot: usize, chan: Channel) {
        let p = &mut self.procs[slot];
        p.chan = Some(chan);
        p.state = ProcessState::Sleeping;
        let level = p.priority;
        self.queues.remove(level, slot);
    }

    /// Wake every process sleeping on `chan`. Returns how many woke.
    pub fn wakeup(&mut self, chan: Channel) -> usize {
        let mut woken = 0;
        for slot in 0..NPROC {
            let p = &self.procs[slot];
            if p.state == ProcessState::Sleeping && p.chan == Some(chan) {
                self.wake(slot);
                woken += 1;
            }
        }
        woken
    }

    /// Sleeping → runnable, at the head of its level.
    fn wake(&mut self, slot: usize) {
        self.procs[slot].state = ProcessState::Runnable;
        self.queues.move_to_front(self.procs[slot].priority, slot);
    }

    /// Turn the process in `slot` into a zombie: wake its parent, hand its
    /// children to init and drop it from its run queue.
    pub fn exit_proc(&mut self, slot: usize) {
        let Some(init) = self.init else {
            halt!("exit: no init process");
        };
        if slot == init {
            halt!("init exiting");
        }

        // Parent might be sleeping in wait().
        if let Some(parent) = self.procs[slot].parent {
            self.wakeup(Channel::Proc(parent));
        }

        for child in 0..NPROC {
            if self.procs[child].parent == Some(slot) {
                self.procs[child].parent = Some(init);
                if self.procs[child].state == ProcessState::Zombie {
                    self.wakeup(Channel::Proc(init));
                }
            }
        }

        let level = self.procs[slot].priority;
        self.procs[slot].state = ProcessState::Zombie;
        self.queues.remove(level, slot);
    }

    pub(crate) fn scan_children(&self, parent: usize) -> ChildScan {
        let mut have_kids = false;
        for (slot, p) in self.procs.iter().enumerate() {
            if p.parent != Some(parent) {
                continue;
            }
            have_kids = true;
            if p.state == ProcessState::Zombie {
                return ChildScan::Zombie(slot);
            }
        }
        if have_kids {
            ChildScan::Alive
        } else {
            ChildScan::NoChildren
        }
    }

    /// Flag `pid` for termination. A sleeper is made runnable so it can
    /// notice; it goes back to the head of its level like any woken process.
    pub fn kill(&mut self, pid: Pid) -> SchedResult<()> {
        let slot = self.find(pid).ok_or(SchedError::NoSuchProcess)?;
        self.procs[slot].killed = true;
        if self.procs[slot].state == ProcessState::Sleeping {
            self.wake(slot);
        }
        Ok(())
    }

    pub fn snapshot(&self) -> PStat {
        let mut st = PStat::new();
        for (slot, p) in self.procs.iter().enumerate() {
            st.inuse[slot] = !matches!(p.state, ProcessState::Unused | ProcessState::Zombie);
            st.pid[slot] = p.pid.0;
            st.priority[slot] = p.priority as u8;
            st.ticks[slot] = p.ticks;
        }
        st
    }

    /// Check queue membership against process state.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        for (slot, p) in self.procs.iter().enumerate() {
            let levels: Vec<usize> = (0..NLEVELS)
                .filter(|&level| self.queues.contains(level, slot))
                .collect();
            for &level in &levels {
                assert_eq!(
                    self.queues.iter(level).filter(|&s| s == slot).count(),
                    1,
                    "slot {} queued twice at level {}",
                    slot,
                    level
                );
            }
            match p.state {
                ProcessState::Runnable | ProcessState::Running => {
                    assert_eq!(levels, vec![p.priority], "slot {} ({:?})", slot, p.state)
                }
                ProcessState::Embryo => assert_eq!(levels, vec![0], "embryo slot {}", slot),
                ProcessState::Sleeping | ProcessState::Zombie | ProcessState::Unused => {
                    assert!(levels.is_empty(), "slot {} ({:?}) queued", slot, p.state)
                }
            }
        }
    }
}
