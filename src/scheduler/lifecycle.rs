//! Process creation and teardown.

use alloc::string::String;

use crate::arch::{FileHandle, Platform};
use crate::config::{FL_IF, NOFILE, PGSIZE, USER_CS, USER_DS};
use crate::error::{SchedError, SchedResult};

use super::table::ChildScan;
use super::task::{Channel, Pid, Remains, TrapFrame};
use super::Kernel;

impl<P: Platform> Kernel<P> {
    /// Claim a slot and give it a kernel stack and an initial context that
    /// enters [`forkret`](Self::forkret). The slot stays an embryo.
    fn allocproc(&self) -> SchedResult<usize> {
        let slot = self.lock_table().claim()?;

        let Some(kstack) = self.platform.kstack_alloc() else {
            self.lock_table().discard(slot);
            log::warn!("allocproc: no kernel stack for slot {}", slot);
            return Err(SchedError::OutOfMemory);
        };
        let context = self.platform.new_context(&kstack);

        let mut table = self.lock_table();
        let p = table.proc_mut(slot);
        p.kstack = Some(kstack);
        p.context = context;
        p.trapframe = TrapFrame::default();
        Ok(slot)
    }

    fn free_remains(&self, remains: Remains) {
        if let Some(kstack) = remains.kstack {
            self.platform.kstack_free(kstack);
        }
        if let Some(space) = remains.space {
            self.platform.uvm_free(space);
        }
    }

    /// Create the first user process from `initcode`. It becomes the
    /// reaper for every orphan and may never exit.
    pub fn userinit(&self, initcode: &[u8]) -> Pid {
        let slot = match self.allocproc() {
            Ok(slot) => slot,
            Err(e) => halt!("userinit: {}", e),
        };
        let Some(space) = self.platform.uvm_create(initcode) else {
            halt!("userinit: out of memory?");
        };
        let cwd = self.platform.lookup("/");

        let mut table = self.lock_table();
        table.set_init(slot);
        let p = table.proc_mut(slot);
        p.space = Some(space);
        p.size = PGSIZE;
        p.trapframe = TrapFrame {
            cs: USER_CS,
            ss: USER_DS,
            rflags: FL_IF,
            rsp: PGSIZE as u64,
            // beginning of initcode
            rip: 0,
            ..TrapFrame::default()
        };
        p.name = String::from("initcode");
        p.cwd = cwd;
        let pid = p.pid;
        table.make_runnable(slot);

        log::info!("userinit: init is pid {}", pid);
        pid
    }

    /// Create a copy of the calling process. The child starts runnable at
    /// level 0 and sees 0 as the result of its fork.
    pub fn fork(&self) -> SchedResult<Pid> {
        let parent = self.myproc();
        let child = self.allocproc()?;

        let mut table = self.lock_table();
        let copied = {
            let p = table.proc(parent);
            p.space
                .as_ref()
                .and_then(|space| self.platform.uvm_copy(space, p.size))
        };
        let Some(space) = copied else {
            let remains = table.discard(child);
            drop(table);
            self.free_remains(remains);
            log::warn!("fork: could not copy address space");
            return Err(SchedError::OutOfMemory);
        };

        let (parent_pid, size, trapframe, name) = {
            let p = table.proc(parent);
            (p.pid, p.size, p.trapframe, p.name.clone())
        };
        let ofile: [Option<FileHandle>; NOFILE] = core::array::from_fn(|fd| {
            table.proc(parent).ofile[fd]
                .as_ref()
                .map(|f| self.platform.dup(f))
        });
        let cwd = table.proc(parent).cwd.as_ref().map(|dir| self.platform.idup(dir));

        let c = table.proc_mut(child);
        c.space = Some(space);
        c.size = size;
        c.parent = Some(parent);
        c.trapframe = trapframe;
        // Clear rax so that fork returns 0 in the child.
        c.trapframe.rax = 0;
        c.ofile = ofile;
        c.cwd = cwd;
        c.name = name;
        let pid = c.pid;
        table.make_runnable(child);

        log::debug!("fork: pid {} -> pid {}", parent_pid, pid);
        Ok(pid)
    }

    /// Exit the calling process. It stays a zombie until its parent (or
    /// init, if the parent is gone) reaps it with [`wait`](Self::wait).
    pub fn exit(&self) -> ! {
        let slot = self.myproc();

        let (files, cwd) = {
            let mut table = self.lock_table();
            if table.init_slot() == Some(slot) {
                halt!("init exiting");
            }
            let p = table.proc_mut(slot);
            let files = core::mem::replace(&mut p.ofile, core::array::from_fn(|_| None));
            (files, p.cwd.take())
        };
        // Close all open files.
        for file in files.into_iter().flatten() {
            self.platform.close(file);
        }
        if let Some(dir) = cwd {
            self.platform.release(dir);
        }

        let mut table = self.lock_table();
        let pid = table.proc(slot).pid;
        table.exit_proc(slot);
        log::debug!("exit: pid {}", pid);

        // Jump into the scheduler, never to return.
        self.sched(&mut table);
        halt!("zombie exit");
    }

    /// Wait for a child to exit and return its pid.
    pub fn wait(&self) -> SchedResult<Pid> {
        let me = self.myproc();
        let mut table = self.lock_table();
        loop {
            match table.scan_children(me) {
                ChildScan::Zombie(child) => {
                    let pid = table.proc(child).pid;
                    let remains = table.reclaim(child);
                    drop(table);
                    self.free_remains(remains);
                    log::debug!("wait: reaped pid {}", pid);
                    return Ok(pid);
                }
                ChildScan::NoChildren => return Err(SchedError::NoChildren),
                ChildScan::Alive => {
                    if table.proc(me).killed {
                        return Err(SchedError::NoChildren);
                    }
                    // Wait for children to exit. (See the wakeup in exit_proc.)
                    self.sleep_locked(Channel::Proc(me), &mut table);
                }
            }
        }
    }

    /// Kill the process with the given pid. It won't exit until it next
    /// crosses the user/kernel boundary.
    pub fn kill(&self, pid: Pid) -> SchedResult<()> {
        let result = self.lock_table().kill(pid);
        match result {
            Ok(()) => log::debug!("kill: pid {} marked", pid),
            Err(e) => log::debug!("kill: pid {}: {}", pid, e),
        }
        result
    }

    /// Grow (or shrink, for negative `n`) the caller's memory by `n` bytes.
    /// Returns the previous size.
    pub fn growproc(&self, n: isize) -> SchedResult<usize> {
        let slot = self.myproc();
        let mut table = self.lock_table();
        let p = table.proc_mut(slot);
        let old = p.size;
        if n == 0 {
            return Ok(old);
        }

        let target = if n > 0 {
            old.checked_add(n as usize)
        } else {
            old.checked_sub(n.unsigned_abs())
        }
        .ok_or(SchedError::OutOfMemory)?;
        let space = p.space.as_mut().ok_or(SchedError::OutOfMemory)?;
        let size = self
            .platform
            .uvm_resize(space, old, target)
            .ok_or(SchedError::OutOfMemory)?;
        p.size = size;
        self.platform.uvm_activate(p.space.as_ref(), p.kstack.as_ref());
        Ok(old)
    }

    /// Pid of the calling process, or [`Pid::NONE`] outside process context.
    pub fn getpid(&self) -> Pid {
        match self.current_slot() {
            Some(slot) => self.lock_table().proc(slot).pid,
            None => Pid::NONE,
        }
    }

    /// Has the calling process been killed?
    pub fn killed(&self) -> bool {
        match self.current_slot() {
            Some(slot) => self.lock_table().proc(slot).killed,
            None => false,
        }
    }

    /// Install `file` as descriptor `fd` of the calling process.
    #[cfg(test)]
    pub(crate) fn install_file(&self, fd: usize, file: FileHandle) {
        let slot = self.myproc();
        self.lock_table().proc_mut(slot).ofile[fd] = Some(file);
    }
}
