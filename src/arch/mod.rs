//! Platform collaborators.
//!
//! The scheduler core never touches hardware, page tables or the filesystem
//! directly. Everything it needs from the rest of the kernel goes through the
//! three traits below, bundled as [`Platform`].

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod x86;

/// A kernel stack owned by one process.
#[derive(Debug, PartialEq, Eq)]
pub struct KernelStack {
    /// Lowest address of the stack region.
    pub base: u64,
}

impl KernelStack {
    /// Top of the stack, 16-byte aligned.
    pub fn top(&self) -> u64 {
        (self.base + crate::config::KSTACK_SIZE as u64) & !0xF
    }
}

/// A user address space, identified by its page table root (CR3).
#[derive(Debug, PartialEq, Eq)]
pub struct AddressSpace {
    pub root: u64,
}

/// Reference-counted open file. Not `Clone`: duplicate through [`Files::dup`].
#[derive(Debug, PartialEq, Eq)]
pub struct FileHandle(pub u64);

/// Reference-counted directory inode. Not `Clone`: duplicate through [`Files::idup`].
#[derive(Debug, PartialEq, Eq)]
pub struct InodeHandle(pub u64);

/// CPU-level primitives: identity, interrupt flag and context switching.
pub trait Arch: Sync {
    /// Saved callee-saved register state of a suspended execution context.
    type Context: Default + Send;

    /// Index of the executing CPU. Only meaningful with interrupts disabled.
    fn cpu_id(&self) -> usize;

    fn intr_on(&self);
    fn intr_off(&self);
    fn intr_get(&self) -> bool;

    /// Initial context for a freshly allocated process. Switching to it must
    /// call [`Kernel::forkret`](crate::scheduler::Kernel::forkret) first.
    fn new_context(&self, kstack: &KernelStack) -> Self::Context;

    /// Save the current registers into `old` and resume `new`.
    ///
    /// # Safety
    /// Both pointers must reference live contexts that stay in place until
    /// this context is switched back to.
    unsafe fn swtch(&self, old: *mut Self::Context, new: *const Self::Context);

    /// Fill `pcs` with return addresses found by walking the stack of a
    /// suspended context. Returns how many were written.
    fn caller_pcs(&self, _context: &Self::Context, _pcs: &mut [u64]) -> usize {
        0
    }

    /// Called by an idle scheduler loop between scans.
    fn idle(&self) {
        core::hint::spin_loop();
    }
}

/// Kernel stacks and user address spaces.
pub trait Memory: Sync {
    fn kstack_alloc(&self) -> Option<KernelStack>;
    fn kstack_free(&self, stack: KernelStack);

    /// Build a fresh address space holding `image` at virtual address 0.
    fn uvm_create(&self, image: &[u8]) -> Option<AddressSpace>;
    /// Deep copy the first `size` bytes of `src`.
    fn uvm_copy(&self, src: &AddressSpace, size: usize) -> Option<AddressSpace>;
    /// Grow or shrink from `old_size` to `new_size`. Returns the new size.
    fn uvm_resize(
        &self,
        space: &mut AddressSpace,
        old_size: usize,
        new_size: usize,
    ) -> Option<usize>;
    fn uvm_free(&self, space: AddressSpace);

    /// Load a process address space and kernel stack before running it.
    fn uvm_activate(&self, _space: Option<&AddressSpace>, _kstack: Option<&KernelStack>) {}
    /// Switch back to the kernel-only page table.
    fn kvm_activate(&self) {}
}

/// Open file and directory handles.
pub trait Files: Sync {
    fn dup(&self, file: &FileHandle) -> FileHandle;
    fn close(&self, file: FileHandle);

    fn lookup(&self, path: &str) -> Option<InodeHandle>;
    fn idup(&self, dir: &InodeHandle) -> InodeHandle;
    fn release(&self, dir: InodeHandle);
}

/// Everything the scheduler needs from the surrounding kernel.
pub trait Platform: Arch + Memory + Files {}

impl<T: Arch + Memory + Files> Platform for T {}
