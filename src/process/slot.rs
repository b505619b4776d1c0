/*
 * Process Slot
 *
 * A `ProcessSlot` is one entry of the fixed-size process table (C1). Unlike
 * the teacher's heap-allocated `Process`/`Thread` pair keyed by a `BTreeMap`,
 * a slot lives at a fixed index for its entire lifetime and is reused in
 * place once its occupant exits - this is what lets the stride heap and the
 * MLFQ scan address occupants by plain `SlotIndex` instead of chasing an
 * `Arc`.
 */

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use spin::Mutex;

use crate::fs_iface::InodeId;
use crate::io::FileDescriptorTable;
use crate::scheduler::InterruptContext;
use crate::vm::AddressSpaceOps;

/// Shared handle to an address space. Wrapped in `Arc` so every thread of a
/// process can hold the same handle - cloning the `Arc` is this core's
/// stand-in for the source's "pgdir shared by reference" between a main
/// thread and its non-main threads.
pub type SharedAddrSpace = Arc<Mutex<Box<dyn AddressSpaceOps>>>;

/// Number of process-table slots, shared by MLFQ and Stride occupants alike.
pub const NPROC: usize = 64;

/// Highest tid a process may hand out to its threads (tid 0 is reserved for
/// "this is the main thread").
pub const MAX_THREADS: usize = 64;

/// Page size assumed by the address-space layout (§6): thread stacks, the
/// heap, and `sbrk` all move in units of this.
pub const PGSIZE: usize = 4096;

/// Index into the process table. `usize::MAX` is never a valid slot, so it
/// doubles as a niche-free "no slot" sentinel where `Option<SlotIndex>` is
/// too heavy (e.g. atomics).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotIndex(pub usize);

impl SlotIndex {
    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// Lifecycle state of a process-table slot, mirroring the classic
/// unused/embryo/runnable/running/sleeping/zombie progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Unused,
    Embryo,
    Runnable,
    Running,
    Sleeping,
    Zombie,
}

/// Which scheduling strategy currently owns this slot, and that strategy's
/// private bookkeeping. Replaces a tagged union with a Rust sum type: the
/// fields that only make sense for one class simply don't exist under the
/// other arm, instead of being garbage-valued as in the union they're
/// grounded on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedClass {
    /// Multi-Level Feedback Queue occupant (C3).
    Mlfq {
        /// 0 (highest) ..= 2 (lowest).
        priority: u8,
        /// Ticks consumed at the current priority level since last reset.
        tick: u32,
        /// Ticks run since the last priority demotion, used by the aging rule.
        runticks: u32,
    },
    /// Stride-scheduled occupant (C2).
    Stride {
        /// Current pass value; the heap root is always the lowest.
        passvalue: u64,
        tickets: u32,
        /// 1000 / tickets, fixed-point-free integer stride.
        stride: u64,
    },
}

impl SchedClass {
    pub fn new_mlfq() -> Self {
        SchedClass::Mlfq {
            priority: 0,
            tick: 0,
            runticks: 0,
        }
    }

    pub fn is_mlfq(&self) -> bool {
        matches!(self, SchedClass::Mlfq { .. })
    }

    pub fn is_stride(&self) -> bool {
        matches!(self, SchedClass::Stride { .. })
    }
}

/// One entry of the process table.
pub struct ProcessSlot {
    pub pid: u32,
    pub state: SlotState,
    pub sched_class: SchedClass,

    pub parent: Option<SlotIndex>,
    pub name: String,

    /// Kernel stack, allocated on `allocproc`, freed when the slot returns to
    /// `Unused`. `None` for an unoccupied slot.
    pub kstack: Option<Box<[u8]>>,
    /// Saved register/trap-frame context (C1's "kernel context"). Restored by
    /// the context-switch ISR when this slot is dispatched, overwritten with
    /// the interrupted state when it is switched away from.
    pub interrupt_context: InterruptContext,

    /// The slot that owns this address space's "main" identity. `None` means
    /// this slot *is* the main thread (self-reference in the source this is
    /// grounded on becomes an option instead of a pointer to self).
    pub main_thread: Option<SlotIndex>,

    /// Address space, meaningful only on a main thread (`main_thread ==
    /// None`); non-main threads share their main's `Arc` clone rather than
    /// keeping their own copy, so this field is always read through
    /// `ProcessTable::main_of`.
    pub addr_space: Option<SharedAddrSpace>,
    /// Legacy size marker (bytes mapped below the heap).
    pub sz: usize,
    /// Top of the heap region.
    pub heap: usize,
    /// Base address of the per-process stack area.
    pub stack: usize,
    /// Current working directory inode, shared by reference across threads.
    pub cwd: Option<InodeId>,
    /// Thread id within `main_thread`'s address space; 0 for the main thread
    /// itself.
    pub tid: u32,
    /// Highest tid ever handed out by this slot's `main_thread`, and also the
    /// thread's exit-value store once it has exited (see `thread_exit`).
    pub maxtid: u32,
    /// Which tids in `1..MAX_THREADS` are currently claimed, indexed by the
    /// main thread's slot.
    pub has_thread: [bool; MAX_THREADS],

    pub fd_table: FileDescriptorTable,

    pub killed: bool,
    /// Sleep channel the slot is blocked on, `None` when not sleeping.
    pub chan: Option<usize>,
    pub exit_code: i32,

    /// Stride-ticket total this main thread is responsible for, summed
    /// across itself and any sibling thread that independently holds a
    /// Stride share. Meaningful only on a main-thread slot (`main_thread ==
    /// None`); kept in step by `scheduler::cpu_share::set_cpu_share` and
    /// refunded by `scheduler::thread::deallocthread`.
    pub all_tickets: u32,
    /// Reentrancy guard: set for the duration of this slot's own `exit`
    /// teardown, so a second caller tearing down the same main thread (e.g.
    /// a `kill`-induced exit racing the thread's own voluntary exit) finds
    /// the work already in flight and skips it.
    pub exit_guard: bool,
    /// Reentrancy guard: set for the duration of a `thread_create` call
    /// targeting this main thread, so a second concurrent `thread_create`
    /// against the same main thread doesn't claim the same tid twice.
    pub create_guard: bool,
}

impl ProcessSlot {
    pub fn empty() -> Self {
        ProcessSlot {
            pid: 0,
            state: SlotState::Unused,
            sched_class: SchedClass::new_mlfq(),
            parent: None,
            name: String::new(),
            kstack: None,
            interrupt_context: InterruptContext::default(),
            main_thread: None,
            addr_space: None,
            sz: 0,
            heap: 0,
            stack: 0,
            cwd: None,
            tid: 0,
            maxtid: 0,
            has_thread: [false; MAX_THREADS],
            fd_table: FileDescriptorTable::new(),
            killed: false,
            chan: None,
            exit_code: 0,
            all_tickets: 0,
            exit_guard: false,
            create_guard: false,
        }
    }

    pub fn is_runnable_mlfq(&self) -> bool {
        self.state == SlotState::Runnable && self.sched_class.is_mlfq()
    }

    /// Reset a slot back to a pristine, unoccupied state. Called on `exit`
    /// once a parent has reaped it via `wait`.
    pub fn reset(&mut self) {
        *self = ProcessSlot::empty();
    }
}
