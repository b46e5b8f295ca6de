use alloc::string::String;
use core::fmt;

use crate::arch::{AddressSpace, FileHandle, InodeHandle, KernelStack};
use crate::config::{NLEVELS, NOFILE};

/// Unique process identifier. Zero never names a live process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u32);

impl Pid {
    pub const NONE: Pid = Pid(0);
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Unused,
    Embryo,
    Sleeping,
    Runnable,
    Running,
    Zombie,
}

impl ProcessState {
    /// Fixed-width label used by the process dump.
    pub fn name(self) -> &'static str {
        match self {
            ProcessState::Unused => "unused",
            ProcessState::Embryo => "embryo",
            ProcessState::Sleeping => "sleep ",
            ProcessState::Runnable => "runble",
            ProcessState::Running => "run   ",
            ProcessState::Zombie => "zombie",
        }
    }
}

/// What a sleeping process is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Events concerning the process in the given table slot (child exit).
    Proc(usize),
    /// Any kernel object, keyed by address.
    Addr(usize),
}

impl Channel {
    pub fn of<T>(object: &T) -> Self {
        Channel::Addr(object as *const T as usize)
    }
}

/// User register state saved on kernel entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct TrapFrame {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

/// One process table slot.
pub(crate) struct Process<C> {
    pub(crate) pid: Pid,
    pub(crate) state: ProcessState,
    /// Index of the run queue holding this slot.
    pub(crate) priority: usize,
    /// Ticks consumed at each level. Only ever incremented.
    pub(crate) ticks: [u32; NLEVELS],
    /// Slot of the parent process.
    pub(crate) parent: Option<usize>,
    /// Valid only while sleeping.
    pub(crate) chan: Option<Channel>,
    pub(crate) killed: bool,

    /// Size of the user address space in bytes.
    pub(crate) size: usize,
    pub(crate) space: Option<AddressSpace>,
    pub(crate) kstack: Option<KernelStack>,
    pub(crate) context: C,
    pub(crate) trapframe: TrapFrame,
    pub(crate) ofile: [Option<FileHandle>; NOFILE],
    pub(crate) cwd: Option<InodeHandle>,
    pub(crate) name: String,
}

impl<C: Default> Process<C> {
    pub(crate) fn new() -> Self {
        Process {
            pid: Pid::NONE,
            state: ProcessState::Unused,
            priority: 0,
            ticks: [0; NLEVELS],
            parent: None,
            chan: None,
            killed: false,
            size: 0,
            space: None,
            kstack: None,
            context: C::default(),
            trapframe: TrapFrame::default(),
            ofile: core::array::from_fn(|_| None),
            cwd: None,
            name: String::new(),
        }
    }
}

/// Memory detached from a slot, to be freed through the platform once the
/// table lock is released.
#[derive(Debug, Default)]
pub struct Remains {
    pub kstack: Option<KernelStack>,
    pub space: Option<AddressSpace>,
}
