//! Host platform for tests.
//!
//! Every process runs on its own OS thread. `swtch` hands a baton from the
//! thread being switched out to the thread being switched in, so exactly one
//! of them runs per simulated CPU. The test thread itself acts as CPU 0's
//! scheduler and drives it with [`Kernel::run_next`]; other CPUs are driven
//! from extra threads with [`run_cpu_until`].

use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use crate::arch::{AddressSpace, Arch, FileHandle, Files, InodeHandle, KernelStack, Memory};
use crate::config::NCPU;
use crate::scheduler::{Channel, Kernel, Pid};

/// A scheduler context that has not been switched away from for this long
/// is assumed to be waiting on a process that panicked.
const STALL: Duration = Duration::from_secs(10);

/// Largest user address space `uvm_resize` will grant.
const MAX_USER: usize = 1 << 20;

thread_local! {
    static CPU: Cell<usize> = const { Cell::new(0) };
}

/// Which thread a context belongs to. Zero until first used.
#[derive(Debug, Default)]
pub struct SimContext {
    token: usize,
}

/// Baton for one context: holds the CPU it is resumed on.
#[derive(Default)]
struct Gate {
    cpu: Mutex<Option<usize>>,
    cv: Condvar,
}

impl Gate {
    fn open(&self, cpu: usize) {
        *self.cpu.lock().unwrap() = Some(cpu);
        self.cv.notify_one();
    }

    fn wait(&self, stall: Option<Duration>) -> usize {
        let mut cpu = self.cpu.lock().unwrap();
        loop {
            if let Some(id) = cpu.take() {
                return id;
            }
            cpu = match stall {
                Some(limit) => {
                    let (guard, timeout) = self.cv.wait_timeout(cpu, limit).unwrap();
                    assert!(!timeout.timed_out() || guard.is_some(), "simulation stalled");
                    guard
                }
                None => self.cv.wait(cpu).unwrap(),
            };
        }
    }
}

type Body = Box<dyn FnOnce(&'static Kernel<Sim>) + Send>;

pub struct Sim {
    intr: [AtomicBool; NCPU],
    next_token: AtomicUsize,
    gates: Mutex<HashMap<usize, Arc<Gate>>>,
    started: Mutex<HashSet<usize>>,
    /// Tokens of per-CPU scheduler contexts.
    schedulers: Mutex<HashSet<usize>>,
    bodies: Mutex<HashMap<u32, Body>>,
    kernel: OnceLock<&'static Kernel<Sim>>,
    init: Mutex<Option<Pid>>,

    next_addr: AtomicU64,
    pub kstacks: AtomicUsize,
    pub spaces: AtomicUsize,
    pub fail_kstack: AtomicBool,
    pub fail_uvm_copy: AtomicBool,

    files: Mutex<HashMap<u64, usize>>,
    inodes: Mutex<HashMap<u64, usize>>,
}

/// Boot a fresh kernel on the simulator. The calling thread becomes CPU 0.
pub fn boot() -> &'static Kernel<Sim> {
    CPU.with(|c| c.set(0));
    let kernel: &'static Kernel<Sim> = Box::leak(Box::new(Kernel::new(Sim::new())));
    let _ = kernel.platform().kernel.set(kernel);
    kernel
}

/// Boot and create init, which runs `body` when first scheduled.
pub fn boot_with_init(
    body: impl FnOnce(&'static Kernel<Sim>) + Send + 'static,
) -> (&'static Kernel<Sim>, Pid) {
    let kernel = boot();
    let init = kernel.userinit(b"\x90\x90");
    *kernel.platform().init.lock().unwrap() = Some(init);
    kernel.platform().on_start(init, body);
    (kernel, init)
}

/// Run CPU 0's scheduler until no process is runnable. Returns the number
/// of dispatches.
pub fn run_until_idle(kernel: &Kernel<Sim>) -> usize {
    let mut runs = 0;
    while kernel.run_next() {
        runs += 1;
        assert!(runs < 10_000, "scheduler never went idle");
    }
    runs
}

/// Run CPU `cpu`'s scheduler on the calling thread until `done` is set.
/// Returns the number of dispatches.
pub fn run_cpu_until(kernel: &Kernel<Sim>, cpu: usize, done: &AtomicBool) -> usize {
    CPU.with(|c| c.set(cpu));
    let mut deadline = Instant::now() + STALL;
    let mut runs = 0;
    while !done.load(Ordering::SeqCst) {
        if kernel.run_next() {
            runs += 1;
            deadline = Instant::now() + STALL;
        } else {
            assert!(Instant::now() < deadline, "cpu {} never saw the run finish", cpu);
            thread::yield_now();
        }
    }
    runs
}

impl Sim {
    fn new() -> Self {
        Sim {
            intr: core::array::from_fn(|_| AtomicBool::new(false)),
            next_token: AtomicUsize::new(1),
            gates: Mutex::new(HashMap::new()),
            started: Mutex::new(HashSet::new()),
            schedulers: Mutex::new(HashSet::new()),
            bodies: Mutex::new(HashMap::new()),
            kernel: OnceLock::new(),
            init: Mutex::new(None),
            next_addr: AtomicU64::new(0x10_0000),
            kstacks: AtomicUsize::new(0),
            spaces: AtomicUsize::new(0),
            fail_kstack: AtomicBool::new(false),
            fail_uvm_copy: AtomicBool::new(false),
            files: Mutex::new(HashMap::new()),
            inodes: Mutex::new(HashMap::new()),
        }
    }

    /// Code the process `pid` runs once it is first scheduled. When it
    /// returns the process exits; init instead sleeps forever.
    pub fn on_start(&self, pid: Pid, body: impl FnOnce(&'static Kernel<Sim>) + Send + 'static) {
        self.bodies.lock().unwrap().insert(pid.0, Box::new(body));
    }

    /// A new open file with one reference.
    pub fn open(&self, id: u64) -> FileHandle {
        self.files.lock().unwrap().insert(id, 1);
        FileHandle(id)
    }

    pub fn file_refs(&self, id: u64) -> usize {
        self.files.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    pub fn inode_refs(&self, id: u64) -> usize {
        self.inodes.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    fn fresh_token(&self) -> usize {
        self.next_token.fetch_add(1, Ordering::SeqCst)
    }

    fn gate(&self, token: usize) -> Arc<Gate> {
        self.gates.lock().unwrap().entry(token).or_default().clone()
    }

    fn alloc_addr(&self) -> u64 {
        self.next_addr.fetch_add(0x1_0000, Ordering::SeqCst)
    }

    fn spawn_process(&self, gate: Arc<Gate>) {
        let kernel = *self.kernel.get().expect("sim kernel not booted");
        thread::Builder::new()
            .name("sim-proc".into())
            .spawn(move || {
                let cpu = gate.wait(None);
                CPU.with(|c| c.set(cpu));
                kernel.forkret();

                let pid = kernel.getpid();
                let body = kernel.platform().bodies.lock().unwrap().remove(&pid.0);
                if let Some(body) = body {
                    body(kernel);
                }
                if *kernel.platform().init.lock().unwrap() == Some(pid) {
                    park(kernel);
                }
                kernel.exit();
            })
            .expect("spawn process thread");
    }
}

/// Sleep on a channel nobody ever wakes.
pub fn park(kernel: &Kernel<Sim>) -> ! {
    let lock = spin::Mutex::new(());
    loop {
        let guard = lock.lock();
        drop(kernel.sleep(Channel::Addr(usize::MAX), &lock, guard));
    }
}

/// Sum of the per-level tick counters of `pid`.
pub fn total_ticks(kernel: &Kernel<Sim>, pid: Pid) -> u32 {
    let st = kernel.getpinfo();
    (0..st.pid.len())
        .find(|&slot| st.pid[slot] == pid.0)
        .map(|slot| st.ticks[slot].iter().sum())
        .unwrap_or(0)
}

impl Arch for Sim {
    type Context = SimContext;

    fn cpu_id(&self) -> usize {
        CPU.with(|c| c.get())
    }

    fn intr_on(&self) {
        self.intr[self.cpu_id()].store(true, Ordering::SeqCst);
    }

    fn intr_off(&self) {
        self.intr[self.cpu_id()].store(false, Ordering::SeqCst);
    }

    fn intr_get(&self) -> bool {
        self.intr[self.cpu_id()].load(Ordering::SeqCst)
    }

    fn new_context(&self, _kstack: &KernelStack) -> SimContext {
        SimContext {
            token: self.fresh_token(),
        }
    }

    unsafe fn swtch(&self, old: *mut SimContext, new: *const SimContext) {
        let cpu = self.cpu_id();
        let old = unsafe { &mut *old };
        if old.token == 0 {
            // Only scheduler contexts start out unbound; they belong to the
            // thread that first switches away from them.
            old.token = self.fresh_token();
            self.started.lock().unwrap().insert(old.token);
            self.schedulers.lock().unwrap().insert(old.token);
        }
        let mine = self.gate(old.token);
        let stall = self
            .schedulers
            .lock()
            .unwrap()
            .contains(&old.token)
            .then_some(STALL);

        let target = unsafe { (*new).token };
        let theirs = self.gate(target);
        if self.started.lock().unwrap().insert(target) {
            self.spawn_process(theirs.clone());
        }
        theirs.open(cpu);

        let resumed = mine.wait(stall);
        CPU.with(|c| c.set(resumed));
    }
}

impl Memory for Sim {
    fn kstack_alloc(&self) -> Option<KernelStack> {
        if self.fail_kstack.load(Ordering::SeqCst) {
            return None;
        }
        self.kstacks.fetch_add(1, Ordering::SeqCst);
        Some(KernelStack {
            base: self.alloc_addr(),
        })
    }

    fn kstack_free(&self, _stack: KernelStack) {
        self.kstacks.fetch_sub(1, Ordering::SeqCst);
    }

    fn uvm_create(&self, _image: &[u8]) -> Option<AddressSpace> {
        self.spaces.fetch_add(1, Ordering::SeqCst);
        Some(AddressSpace {
            root: self.alloc_addr(),
        })
    }

    fn uvm_copy(&self, _src: &AddressSpace, _size: usize) -> Option<AddressSpace> {
        if self.fail_uvm_copy.load(Ordering::SeqCst) {
            return None;
        }
        self.spaces.fetch_add(1, Ordering::SeqCst);
        Some(AddressSpace {
            root: self.alloc_addr(),
        })
    }

    fn uvm_resize(
        &self,
        _space: &mut AddressSpace,
        _old_size: usize,
        new_size: usize,
    ) -> Option<usize> {
        (new_size <= MAX_USER).then_some(new_size)
    }

    fn uvm_free(&self, _space: AddressSpace) {
        self.spaces.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Files for Sim {
    fn dup(&self, file: &FileHandle) -> FileHandle {
        *self.files.lock().unwrap().entry(file.0).or_insert(0) += 1;
        FileHandle(file.0)
    }

    fn close(&self, file: FileHandle) {
        if let Some(refs) = self.files.lock().unwrap().get_mut(&file.0) {
            *refs -= 1;
        }
    }

    fn lookup(&self, _path: &str) -> Option<InodeHandle> {
        *self.inodes.lock().unwrap().entry(1).or_insert(0) += 1;
        Some(InodeHandle(1))
    }

    fn idup(&self, dir: &InodeHandle) -> InodeHandle {
        *self.inodes.lock().unwrap().entry(dir.0).or_insert(0) += 1;
        InodeHandle(dir.0)
    }

    fn release(&self, dir: InodeHandle) {
        if let Some(refs) = self.inodes.lock().unwrap().get_mut(&dir.0) {
            *refs -= 1;
        }
    }
}
