//! Bare-metal x86_64 implementation of [`Arch`].

use core::arch::global_asm;
use ::x86_64::instructions::{self, interrupts};

use super::{Arch, KernelStack};

/// CPU register context saved/restored during context switches.
/// All callee-saved registers on x86_64 System V ABI.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct Context {
    pub rsp: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
}

impl Context {
    /// Context that starts executing `entry` on the stack ending at `stack_top`.
    pub fn new(entry: u64, stack_top: u64) -> Self {
        // Leave room for the return address slot, keep 16-byte alignment.
        let aligned_sp = (stack_top - 8) & !0xF;
        Context {
            rsp: aligned_sp,
            rip: entry,
            ..Context::default()
        }
    }
}

// Save callee-saved registers into `old` (rdi), restore from `new` (rsi).
global_asm!(
    ".global mlfq_swtch",
    "mlfq_swtch:",
    "mov [rdi + 0x00], rsp",
    "mov [rdi + 0x08], rbp",
    "mov [rdi + 0x10], rbx",
    "mov [rdi + 0x18], r12",
    "mov [rdi + 0x20], r13",
    "mov [rdi + 0x28], r14",
    "mov [rdi + 0x30], r15",
    "lea rax, [rip + 2f]",
    "mov [rdi + 0x38], rax",
    "mov rsp, [rsi + 0x00]",
    "mov rbp, [rsi + 0x08]",
    "mov rbx, [rsi + 0x10]",
    "mov r12, [rsi + 0x18]",
    "mov r13, [rsi + 0x20]",
    "mov r14, [rsi + 0x28]",
    "mov r15, [rsi + 0x30]",
    "jmp [rsi + 0x38]",
    "2:",
    "ret",
);

extern "C" {
    fn mlfq_swtch(old: *mut Context, new: *const Context);
}

/// Interrupt control and context switching for x86_64.
pub struct X86Cpu {
    /// First code a new process runs; must call `Kernel::forkret` and then
    /// return to user mode through the trap path.
    entry: extern "C" fn() -> !,
    /// Reads the executing CPU's index (e.g. from the local APIC id).
    cpu_id: fn() -> usize,
}

impl X86Cpu {
    pub const fn new(entry: extern "C" fn() -> !, cpu_id: fn() -> usize) -> Self {
        X86Cpu { entry, cpu_id }
    }
}

impl Arch for X86Cpu {
    type Context = Context;

    fn cpu_id(&self) -> usize {
        (self.cpu_id)()
    }

    fn intr_on(&self) {
        interrupts::enable();
    }

    fn intr_off(&self) {
        interrupts::disable();
    }

    fn intr_get(&self) -> bool {
        interrupts::are_enabled()
    }

    fn new_context(&self, kstack: &KernelStack) -> Context {
        Context::new(self.entry as usize as u64, kstack.top())
    }

    unsafe fn swtch(&self, old: *mut Context, new: *const Context) {
        unsafe { mlfq_swtch(old, new) }
    }

    fn caller_pcs(&self, context: &Context, pcs: &mut [u64]) -> usize {
        // Follow the saved frame-pointer chain: [rbp] = caller rbp, [rbp+8] = return address.
        let mut rbp = context.rbp;
        let mut n = 0;
        while n < pcs.len() && rbp != 0 && rbp % 8 == 0 {
            let frame = rbp as *const u64;
            unsafe {
                pcs[n] = *frame.add(1);
                rbp = *frame;
            }
            n += 1;
        }
        n
    }

    fn idle(&self) {
        instructions::hlt();
    }
}
