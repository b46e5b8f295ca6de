/// Maximum number of processes (process table slots).
pub const NPROC: usize = 64;

/// Maximum number of CPUs.
pub const NCPU: usize = 8;

/// Open files per process.
pub const NOFILE: usize = 16;

/// Number of MLFQ priority levels. Level 0 is the highest priority.
pub const NLEVELS: usize = 4;

/// Timer ticks a process may consume at each level before it is demoted
/// (levels 0..2) or rotated to the tail of its queue (level 3).
pub const QUANTA: [u32; NLEVELS] = [1, 2, 4, 8];

/// Size of each process's kernel stack (16 KiB).
pub const KSTACK_SIZE: usize = 4096 * 4;

/// Page size.
pub const PGSIZE: usize = 4096;

/// User code segment selector (GDT index 4, RPL 3).
pub const USER_CS: u64 = 0x23;

/// User data segment selector (GDT index 3, RPL 3).
pub const USER_DS: u64 = 0x1B;

/// RFLAGS interrupt-enable bit.
pub const FL_IF: u64 = 0x200;

/// Quantum of a priority level, in ticks.
pub const fn quantum(level: usize) -> u32 {
    QUANTA[level]
}
