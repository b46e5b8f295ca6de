//! MLFQ run queues.
//!
//! Each level holds process table slot indices in dispatch order. The table
//! owns the processes; a queue only refers to them.

use alloc::collections::VecDeque;

use crate::config::{NLEVELS, NPROC};

pub struct RunQueues {
    levels: [VecDeque<usize>; NLEVELS],
}

impl RunQueues {
    pub fn new() -> Self {
        RunQueues {
            levels: core::array::from_fn(|_| VecDeque::with_capacity(NPROC)),
        }
    }

    /// Append `slot` at the tail of `level`.
    pub fn append_tail(&mut self, level: usize, slot: usize) {
        log::trace!("runq: slot {} -> tail of level {}", slot, level);
        self.levels[level].push_back(slot);
    }

    /// Remove `slot` from `level`, wherever it is.
    ///
    /// Panics if it is not there: queue membership and process state are
    /// out of sync and the table can no longer be trusted.
    pub fn remove(&mut self, level: usize, slot: usize) {
        match self.position(level, slot) {
            Some(pos) => {
                self.levels[level].remove(pos);
            }
            None => halt!("runq remove: slot {} not queued at level {}", slot, level),
        }
    }

    /// Put `slot` at the head of `level`.
    ///
    /// No-op when it is already the head. A slot queued further back is
    /// spliced out first; a slot that left the queue to sleep is linked in.
    pub fn move_to_front(&mut self, level: usize, slot: usize) {
        let queue = &mut self.levels[level];
        if queue.front() == Some(&slot) {
            return;
        }
        if let Some(pos) = queue.iter().position(|&s| s == slot) {
            queue.remove(pos);
        }
        log::trace!("runq: slot {} -> front of level {}", slot, level);
        queue.push_front(slot);
    }

    pub fn contains(&self, level: usize, slot: usize) -> bool {
        self.position(level, slot).is_some()
    }

    /// Level currently holding `slot`, if any.
    pub fn level_of(&self, slot: usize) -> Option<usize> {
        (0..NLEVELS).find(|&level| self.contains(level, slot))
    }

    /// Slots of `level`, head first.
    pub fn iter(&self, level: usize) -> impl Iterator<Item = usize> + '_ {
        self.levels[level].iter().copied()
    }

    pub fn head(&self, level: usize) -> Option<usize> {
        self.levels[level].front().copied()
    }

    pub fn len(&self, level: usize) -> usize {
        self.levels[level].len()
    }

    fn position(&self, level: usize, slot: usize) -> Option<usize> {
        self.levels[level].iter().position(|&s| s == slot)
    }
}

impl Default for RunQueues {
    fn default() -> Self {
        Self::new()
    }
}
