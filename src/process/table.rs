/*
 * Process Table
 *
 * The fixed-size process table (C1) behind a single coarse lock (§5): every
 * operation that touches more than one slot's scheduling-relevant state -
 * allocation, fork, exit, wait, sleep/wakeup, the scheduler loop itself -
 * holds `ProcessTable`'s lock for the duration, exactly the discipline the
 * xv6 original this is grounded on uses around `ptable.lock`.
 */

use alloc::boxed::Box;
use alloc::string::String;
use spin::Mutex;

use crate::error::KernelError;
use super::slot::{ProcessSlot, SlotIndex, SlotState, NPROC};

/// Size of a process kernel stack, in bytes.
pub const KSTACK_SIZE: usize = 16 * 1024;

pub struct ProcessTable {
    slots: [ProcessSlot; NPROC],
    next_pid: u32,
}

impl ProcessTable {
    fn new() -> Self {
        ProcessTable {
            slots: core::array::from_fn(|_| ProcessSlot::empty()),
            next_pid: 1,
        }
    }

    pub fn slot(&self, idx: SlotIndex) -> &ProcessSlot {
        &self.slots[idx.as_usize()]
    }

    pub fn slot_mut(&mut self, idx: SlotIndex) -> &mut ProcessSlot {
        &mut self.slots[idx.as_usize()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotIndex, &ProcessSlot)> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, s)| (SlotIndex(i), s))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SlotIndex, &mut ProcessSlot)> {
        self.slots
            .iter_mut()
            .enumerate()
            .map(|(i, s)| (SlotIndex(i), s))
    }

    pub fn find_by_pid(&self, pid: u32) -> Option<SlotIndex> {
        self.iter()
            .find(|(_, s)| s.state != SlotState::Unused && s.pid == pid)
            .map(|(i, _)| i)
    }

    /// The slot that owns `idx`'s address space: `idx` itself if it is a
    /// main thread, otherwise its `main_thread`. Every cross-thread-shared
    /// field (`addr_space`, `sz`, `heap`, `stack`, `cwd`, `name`) is read
    /// through this indirection rather than duplicated per slot.
    pub fn main_of(&self, idx: SlotIndex) -> SlotIndex {
        self.slot(idx).main_thread.unwrap_or(idx)
    }

    /// Live (non-`Unused`) slots whose `parent` is `idx`.
    pub fn children_of(&self, idx: SlotIndex) -> alloc::vec::Vec<SlotIndex> {
        self.iter()
            .filter(|(_, s)| s.state != SlotState::Unused && s.parent == Some(idx))
            .map(|(i, _)| i)
            .collect()
    }

    /// Live slots sharing `main`'s address-space identity (`main_thread ==
    /// Some(main)`), i.e. every non-main thread of that process. Does not
    /// include `main` itself.
    pub fn threads_of(&self, main: SlotIndex) -> alloc::vec::Vec<SlotIndex> {
        self.iter()
            .filter(|(_, s)| s.state != SlotState::Unused && s.main_thread == Some(main))
            .map(|(i, _)| i)
            .collect()
    }

    /// Find an `Unused` slot, mark it `Embryo`, assign it a fresh pid, and
    /// allocate its kernel stack. Grounded on `allocproc`: on any allocation
    /// failure below the pid assignment the slot is unwound back to `Unused`
    /// rather than left half-initialized.
    pub fn alloc_slot(&mut self, name: &str) -> Result<SlotIndex, KernelError> {
        let idx = self
            .iter()
            .find(|(_, s)| s.state == SlotState::Unused)
            .map(|(i, _)| i)
            .ok_or(KernelError::NoFreeSlot)?;

        let pid = self.next_pid;
        self.next_pid += 1;

        let kstack = alloc_kernel_stack();

        let slot = self.slot_mut(idx);
        slot.reset();
        slot.pid = pid;
        slot.state = SlotState::Embryo;
        slot.name = String::from(name);
        slot.kstack = Some(kstack);
        slot.main_thread = None;
        slot.tid = 0;
        slot.maxtid = 0;

        Ok(idx)
    }

    /// Return a slot to `Unused`, releasing its kernel stack. Grounded on the
    /// `UNUSED`-transition tail of `wait`/`exitproc`.
    pub fn free_slot(&mut self, idx: SlotIndex) {
        self.slot_mut(idx).reset();
    }

    pub fn count_runnable_mlfq(&self) -> usize {
        self.iter().filter(|(_, s)| s.is_runnable_mlfq()).count()
    }

    /// Construct a bare table for unit tests outside this module, which
    /// cannot otherwise reach the private constructor.
    #[cfg(test)]
    pub fn new_for_test() -> Self {
        ProcessTable::new()
    }
}

fn alloc_kernel_stack() -> Box<[u8]> {
    alloc::vec![0u8; KSTACK_SIZE].into_boxed_slice()
}

/// Global process table singleton, mirroring the teacher's
/// `spin::Mutex<Option<Scheduler>>`-behind-a-ZST-namespace convention.
static PROCESS_TABLE: Mutex<Option<ProcessTable>> = Mutex::new(None);

/// ZST namespace over the process table singleton (C1/C4 entry points used
/// by the rest of the kernel).
pub struct ProcessManager;

impl ProcessManager {
    pub fn init() {
        let mut guard = PROCESS_TABLE.lock();
        *guard = Some(ProcessTable::new());
    }

    pub fn with<F, R>(f: F) -> R
    where
        F: FnOnce(&mut ProcessTable) -> R,
    {
        let mut guard = PROCESS_TABLE.lock();
        let table = guard
            .as_mut()
            .expect("ProcessManager::init must run before first use");
        f(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_table() -> ProcessTable {
        ProcessTable::new()
    }

    #[test]
    fn alloc_slot_assigns_increasing_pids() {
        let mut table = fresh_table();
        let a = table.alloc_slot("a").unwrap();
        let b = table.alloc_slot("b").unwrap();
        assert!(table.slot(a).pid < table.slot(b).pid);
        assert_eq!(table.slot(a).state, SlotState::Embryo);
    }

    #[test]
    fn alloc_slot_fails_when_table_full() {
        let mut table = fresh_table();
        for _ in 0..NPROC {
            table.alloc_slot("x").unwrap();
        }
        assert_eq!(table.alloc_slot("overflow"), Err(KernelError::NoFreeSlot));
    }

    #[test]
    fn free_slot_allows_reuse() {
        let mut table = fresh_table();
        for _ in 0..NPROC {
            table.alloc_slot("x").unwrap();
        }
        let victim = SlotIndex(3);
        table.free_slot(victim);
        let reused = table.alloc_slot("reused").unwrap();
        assert_eq!(reused, victim);
    }

    #[test]
    fn find_by_pid_ignores_unused_slots() {
        let mut table = fresh_table();
        let a = table.alloc_slot("a").unwrap();
        let pid = table.slot(a).pid;
        assert_eq!(table.find_by_pid(pid), Some(a));
        table.free_slot(a);
        assert_eq!(table.find_by_pid(pid), None);
    }
}
