/*
 * Hybrid MLFQ/Stride Scheduler Core
 *
 * Ties the process table (`process::table`) to the two scheduling
 * strategies (`mlfq`, `stride`), their dispatch arbitration (`dispatch`),
 * their yield policies (`yield_policy`), the cpu-share syscalls
 * (`cpu_share`), blocking (`sleep`), and threads (`thread`) into the
 * interrupt-driven context-switch loop. The `InterruptFrame`/
 * `InterruptContext` structures and the naked-asm ISR wrappers below are
 * carried over from the original round-robin scheduler nearly verbatim -
 * saving/restoring x86_64 general-purpose registers around an `iretq` has
 * nothing to do with *which* policy picks the next slot, only with *how*
 * the CPU hands control to it.
 *
 * What changed from the teacher: `Scheduler`'s `Vec<Thread>` +
 * `VecDeque<ThreadId>` ready queue is gone. `schedule_from_interrupt` now
 * asks a slot's own `SchedClass` whether it has quantum left
 * (`yield_policy`), and if not, asks the `Dispatcher` to arbitrate between
 * the MLFQ scan and the Stride heap root (`dispatch::Dispatcher::tick`) -
 * the same "pop the scheduler's ptable lock, do the decision, drop it
 * before the switch" shape the original's `schedule_from_interrupt` used
 * around `SCHEDULER.lock()`, just over `ProcessTable`/`Dispatcher` instead
 * of `Scheduler`.
 */

use core::{
    arch::asm,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};
use spin::Mutex;

pub mod cpu_share;
pub mod dispatch;
pub mod mlfq;
pub mod sleep;
pub mod stride;
pub mod thread;
pub mod yield_policy;

pub use dispatch::{DispatchOutcome, Dispatcher};
pub use mlfq::MlfqState;
pub use stride::StrideHeap;
pub use yield_policy::YieldDecision;

use crate::process::slot::{SchedClass, SlotIndex, SlotState};
use crate::process::table::ProcessManager;

/// Global dispatcher instance: MLFQ scan state plus the Stride min-heap.
/// Always locked together with `ProcessManager`'s table lock, outer lock
/// first, matching the single-coarse-lock discipline `process::table`
/// documents (SPEC_FULL.md §5).
static DISPATCHER: Mutex<Dispatcher> = Mutex::new(Dispatcher::new());

/// Slot index currently `Running`, or `usize::MAX` when nothing is (before
/// the scheduler is enabled, or while idling). Atomic so it can be read
/// from `yield_now`/interrupt context without taking any lock.
static CURRENT_SLOT: AtomicUsize = AtomicUsize::new(usize::MAX);

/// The slot orphaned children are reparented to on `exit`, set once by
/// `SchedulerManager::enable` to whichever slot was bootstrapped by
/// `process::lifecycle::userinit` before the scheduler was turned on.
static INIT_SLOT: Mutex<Option<SlotIndex>> = Mutex::new(None);

/// Scheduler enabled flag. Context switches are a no-op until this is set,
/// so kernel boot code can run without being preempted mid-setup.
static SCHEDULER_ENABLED: AtomicBool = AtomicBool::new(false);

/// Preemption disabled flag, set around critical sections (e.g. while a
/// syscall handler already holds the process table lock) so a timer tick
/// landing mid-section can't deadlock trying to take it again.
static PREEMPTION_DISABLED: AtomicBool = AtomicBool::new(false);

/// Interrupt frame pushed by the CPU on entry to an interrupt handler.
///
/// When an interrupt occurs, the x86_64 CPU automatically pushes these
/// registers onto the stack in this exact order. `#[repr(C)]` makes the
/// layout match what the CPU pushes.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct InterruptFrame {
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl Default for InterruptFrame {
    fn default() -> Self {
        Self {
            rip: 0,
            cs: 0x08,
            rflags: 0x202,
            rsp: 0,
            ss: 0x10,
        }
    }
}

/// Complete saved CPU context for interrupt-based context switching: the
/// CPU-pushed interrupt frame plus every general-purpose register our
/// handler saves by hand. This is `ProcessSlot::interrupt_context`'s type -
/// the kernel-context half of C1's process-table slot.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct InterruptContext {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,

    pub iret_frame: InterruptFrame,
}

impl Default for InterruptContext {
    fn default() -> Self {
        Self {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            r11: 0,
            r10: 0,
            r9: 0,
            r8: 0,
            rbp: 0,
            rdi: 0,
            rsi: 0,
            rdx: 0,
            rcx: 0,
            rbx: 0,
            rax: 0,
            iret_frame: InterruptFrame::default(),
        }
    }
}

/// ZST namespace over the scheduler singletons: the dispatcher, the
/// current-slot tracker, and the enabled/preemption flags.
pub struct SchedulerManager;

impl SchedulerManager {
    /// Bring up the process table and reset the dispatcher/flags. Must run
    /// before `process::lifecycle::userinit` allocates the first slot.
    pub fn init() {
        log::info!("Initializing hybrid MLFQ/Stride scheduler...");
        ProcessManager::init();
        *DISPATCHER.lock() = Dispatcher::new();
        *INIT_SLOT.lock() = None;
        CURRENT_SLOT.store(usize::MAX, Ordering::SeqCst);
        log::info!("Scheduler initialized");
    }

    /// Turn on preemption. `init_slot` names the slot that orphaned
    /// children are reparented to on `exit` - ordinarily whatever
    /// `process::lifecycle::userinit` returned during boot.
    pub fn enable(init_slot: SlotIndex) {
        *INIT_SLOT.lock() = Some(init_slot);
        SCHEDULER_ENABLED.store(true, Ordering::SeqCst);
        log::info!("Scheduler enabled - hybrid MLFQ/Stride multitasking active");
    }

    pub fn is_enabled() -> bool {
        SCHEDULER_ENABLED.load(Ordering::SeqCst)
    }

    /// The slot `exit`/`thread_exit` should reparent orphaned children to.
    ///
    /// # Panics
    /// Panics if called before `enable`.
    pub fn init_slot() -> SlotIndex {
        INIT_SLOT
            .lock()
            .expect("SchedulerManager::enable must run before exit can reparent orphans")
    }

    /// Run `f` with both the process table and the dispatcher locked,
    /// table lock first - the one combination every cross-slot operation
    /// in `process`/`scheduler` (fork, exit, wait, cpu_share, the dispatch
    /// loop itself) is written against.
    pub fn with_state<F, R>(f: F) -> R
    where
        F: FnOnce(&mut crate::process::table::ProcessTable, &mut Dispatcher) -> R,
    {
        ProcessManager::with(|table| {
            let mut dispatcher = DISPATCHER.lock();
            f(table, &mut dispatcher)
        })
    }

    /// Currently `Running` slot, or `None` if nothing is (pre-boot or
    /// idling).
    pub fn current_slot() -> Option<SlotIndex> {
        match CURRENT_SLOT.load(Ordering::SeqCst) {
            usize::MAX => None,
            idx => Some(SlotIndex(idx)),
        }
    }

    /// Voluntarily give up the CPU. Triggers the same interrupt-based
    /// context switch path a timer tick would, via `INT 0x81`.
    pub fn yield_now() {
        if !SCHEDULER_ENABLED.load(Ordering::SeqCst) {
            return;
        }
        if !crate::arch::x86_64::interrupts::are_enabled() {
            return;
        }
        unsafe {
            asm!("int 0x81", options(nostack));
        }
    }
}

/// Software interrupt handler for voluntary yielding (`INT 0x81`).
///
/// Identical to the timer handler except it isn't triggered by the PIC, so
/// no EOI is sent.
#[unsafe(naked)]
pub unsafe extern "C" fn yield_interrupt_handler() {
    core::arch::naked_asm!(
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",

        "mov rdi, rsp",
        "call {schedule_fn}",

        "mov rsp, rax",

        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "pop rax",

        "iretq",

        schedule_fn = sym schedule_from_interrupt,
    )
}

/// Preemptive timer interrupt handler (naked assembly wrapper). Saves every
/// general-purpose register to build an `InterruptContext` on the stack,
/// calls `schedule_from_interrupt`, switches to whatever context it
/// returns, and `iretq`s into it.
#[unsafe(naked)]
pub unsafe extern "C" fn preemptive_timer_interrupt_handler() {
    core::arch::naked_asm!(
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",

        "mov rdi, rsp",
        "call {schedule_fn}",

        "mov rsp, rax",

        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "pop rax",

        // Send EOI to PIC before iret
        "push rax",
        "mov al, 0x20",
        "out 0x20, al",
        "pop rax",

        "iretq",

        schedule_fn = sym schedule_from_interrupt,
    )
}

/// Called from the naked interrupt handlers with a pointer to the
/// interrupted slot's `InterruptContext` on the stack. Decides whether that
/// slot keeps running (quantum not spent) or whether the dispatcher should
/// pick a new one, and returns a pointer to whichever context the caller
/// should `iretq` into.
///
/// Runs with interrupts disabled; must not block. The returned pointer
/// outlives the `ProcessManager`/`DISPATCHER` guards taken to compute it,
/// same as the original's `schedule_from_interrupt` returning
/// `&next_thread.interrupt_context` from inside its own scheduler-lock
/// scope: both point into a `'static` table that is never moved or freed,
/// and nothing else touches it between this function returning and the
/// asm's `mov rsp, rax` reading through the pointer.
#[unsafe(no_mangle)]
pub extern "C" fn schedule_from_interrupt(
    current_ctx_ptr: *const InterruptContext,
) -> *const InterruptContext {
    if !SCHEDULER_ENABLED.load(Ordering::SeqCst) {
        return current_ctx_ptr;
    }

    crate::utils::timer::on_timer_interrupt();

    if PREEMPTION_DISABLED.load(Ordering::SeqCst) {
        return current_ctx_ptr;
    }

    SchedulerManager::with_state(|table, dispatcher| {
        if let Some(idx) = SchedulerManager::current_slot() {
            table.slot_mut(idx).interrupt_context = unsafe { *current_ctx_ptr };

            // Only run the quantum-accounting/yield-policy decision if the
            // slot is still `Running`. A slot that already transitioned
            // itself to `Sleeping` (sleep) or `Zombie` (exit/thread_exit)
            // before reaching here via `yield_now` must fall straight
            // through to dispatch - otherwise mlfq_yield/stride_yield would
            // stamp it back to `Running`/`Runnable` and resurrect it.
            if table.slot(idx).state == SlotState::Running {
                let decision = match table.slot(idx).sched_class {
                    SchedClass::Mlfq { .. } => yield_policy::mlfq_yield(table, &mut dispatcher.mlfq, idx),
                    SchedClass::Stride { .. } => {
                        yield_policy::stride_yield(table, &mut dispatcher.stride, idx)
                    }
                };

                if decision == YieldDecision::KeepRunning {
                    table.slot_mut(idx).state = SlotState::Running;
                    return &table.slot(idx).interrupt_context as *const InterruptContext;
                }
            }
        }

        match dispatcher.tick(table) {
            DispatchOutcome::RanMlfq(idx) | DispatchOutcome::RanStride(idx) => {
                CURRENT_SLOT.store(idx.as_usize(), Ordering::SeqCst);
                &table.slot(idx).interrupt_context as *const InterruptContext
            }
            DispatchOutcome::StrideRequeuedOnly | DispatchOutcome::Idle => current_ctx_ptr,
        }
    })
}
