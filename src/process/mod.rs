/*
 * Process Model
 *
 * The fixed-size process table (C1/C4) and the fork/exit/wait lifecycle
 * built on top of it (C5). Scheduling-strategy state (MLFQ/Stride) lives
 * in `scheduler`, not here - a `ProcessSlot` only carries the data those
 * strategies need to read, not the strategies themselves.
 */

pub mod lifecycle;
pub mod slot;
pub mod table;

pub use lifecycle::{fork, growproc, userinit, wait, WaitOutcome};
pub use slot::{ProcessSlot, SchedClass, SharedAddrSpace, SlotIndex, SlotState, MAX_THREADS, NPROC, PGSIZE};
pub use table::{ProcessManager, ProcessTable};
