/*
 * Threads (C9)
 *
 * A thread is a process-table slot sharing `addr_space`, `cwd`, `heap`, and
 * `parent` with its `main_thread`. Grounded on `thread_create`/
 * `thread_join`/`thread_exit`/`deallocthread`: the "thread id" the source
 * hands back to userspace and joins on is the new slot's `pid` (not its
 * small `tid`, which only orders its stack slot within the main's address
 * space) - `*thread = np->pid;` in `thread_create`, `p->pid == thread` in
 * `thread_join`.
 */

use crate::error::KernelError;
use crate::process::slot::{SchedClass, SlotIndex, SlotState, MAX_THREADS, PGSIZE};
use crate::process::table::ProcessTable;
use super::dispatch::Dispatcher;

/// Create a new thread sharing `caller`'s main thread's address space.
/// Grounded on `thread_create`. Returns the new thread's pid (the handle
/// `thread_join`/`thread_exit` key off of).
pub fn thread_create(
    table: &mut ProcessTable,
    caller: SlotIndex,
    entry: usize,
    arg: usize,
) -> Result<u32, KernelError> {
    let main = table.main_of(caller);

    if table.slot(main).create_guard {
        return Err(KernelError::Reentrant);
    }
    table.slot_mut(main).create_guard = true;
    let result = thread_create_on_main(table, main, entry, arg);
    table.slot_mut(main).create_guard = false;
    result
}

fn thread_create_on_main(
    table: &mut ProcessTable,
    main: SlotIndex,
    entry: usize,
    arg: usize,
) -> Result<u32, KernelError> {
    let tid = (1..MAX_THREADS)
        .find(|&t| !table.slot(main).has_thread[t])
        .ok_or(KernelError::NoFreeSlot)? as u32;

    let (addr_space, sz, heap, stack_top, cwd, fd_table, name, parent, mut maxtid, mut trap_frame) = {
        let m = table.slot(main);
        (
            m.addr_space.clone(),
            m.sz,
            m.heap,
            m.stack,
            m.cwd,
            m.fd_table.clone(),
            m.name.clone(),
            m.parent,
            m.maxtid,
            m.interrupt_context,
        )
    };

    let space = addr_space
        .clone()
        .ok_or(KernelError::AddressSpaceFailure)?;

    // If this tid extends the thread-stack region, remember the (low, high)
    // bounds passed to `allocuvm` so a later failure in this function can
    // roll the page back out rather than leaking it (§7: partial
    // allocations are rolled back).
    let mut top = stack_top.saturating_sub((3 + tid as usize - 1) * PGSIZE);
    let mut grown_range: Option<(usize, usize)> = None;
    if tid > maxtid {
        maxtid = tid;
        let low = top - PGSIZE;
        let high = top;
        top = space.lock().allocuvm(low, high)?;
        grown_range = Some((low, high));
    }

    let sentinel: u64 = 0xffffffff;
    let argbuf: u64 = arg as u64;
    top -= 16;
    {
        let mut guard = space.lock();
        if let Err(e) = guard.copyout(top, &sentinel.to_le_bytes()) {
            drop(guard);
            undo_stack_growth(&space, grown_range);
            return Err(e);
        }
        if let Err(e) = guard.copyout(top + 8, &argbuf.to_le_bytes()) {
            drop(guard);
            undo_stack_growth(&space, grown_range);
            return Err(e);
        }
    }

    trap_frame.rax = 0;
    trap_frame.iret_frame.rip = entry as u64;
    trap_frame.iret_frame.rsp = top as u64;

    let idx = match table.alloc_slot(&name) {
        Ok(idx) => idx,
        Err(e) => {
            undo_stack_growth(&space, grown_range);
            return Err(e);
        }
    };
    {
        let slot = table.slot_mut(idx);
        slot.main_thread = Some(main);
        slot.parent = parent;
        slot.fd_table = fd_table;
        slot.cwd = cwd;
        slot.addr_space = Some(space);
        slot.sz = sz;
        slot.heap = heap;
        slot.stack = stack_top;
        slot.tid = tid;
        slot.interrupt_context = trap_frame;
        slot.state = SlotState::Runnable;
    }

    table.slot_mut(main).maxtid = maxtid;
    table.slot_mut(main).has_thread[tid as usize] = true;

    Ok(table.slot(idx).pid)
}

/// Reverse a thread-stack page grown by `thread_create_on_main` when a later
/// step in the same call fails, so the half-finished allocation doesn't
/// outlive the error. `grown_range` is the exact `(low, high)` pair passed
/// to `allocuvm`; shrinking back from `high` to `low` undoes it. No-op if
/// this tid never grew the region (`grown_range` is `None`).
fn undo_stack_growth(space: &crate::process::slot::SharedAddrSpace, grown_range: Option<(usize, usize)>) {
    if let Some((low, high)) = grown_range {
        let _ = space.lock().deallocuvm(high, low);
    }
}

/// Outcome of one single-shot `thread_join` scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadJoinOutcome {
    /// `pid` was ZOMBIE; its slot was reaped and `retval` extracted.
    Reaped { retval: i32 },
    /// No live slot has this pid at all.
    NotFound,
    /// The slot exists but hasn't exited yet; the caller should sleep on
    /// its own slot index as channel and retry when woken.
    Pending,
}

/// Grounded on `thread_join`'s per-iteration body (the retry-on-pending
/// sleep is the caller's job, matching `process::lifecycle::wait`).
pub fn thread_join(table: &mut ProcessTable, pid: u32) -> ThreadJoinOutcome {
    let Some(idx) = table.find_by_pid(pid) else {
        return ThreadJoinOutcome::NotFound;
    };

    if table.slot(idx).state != SlotState::Zombie {
        return ThreadJoinOutcome::Pending;
    }

    let retval = table.slot(idx).maxtid as i32;
    let main = table.main_of(idx);
    let tid = table.slot(idx).tid as usize;
    if tid != 0 {
        table.slot_mut(main).has_thread[tid] = false;
    }
    table.free_slot(idx);

    ThreadJoinOutcome::Reaped { retval }
}

/// What a `thread_exit` call ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadExitOutcome {
    /// The caller *was* its own main thread, so this behaved as a full
    /// process `exit` (§4.4) instead.
    ExitedProcess,
    /// The caller was a non-main thread; it is now ZOMBIE and its main's
    /// wait channel has been woken.
    Zombie,
}

/// Grounded on `thread_exit`: a main thread calling this just exits; any
/// other thread stores its return value (reusing `maxtid`, as the source
/// does) and zombifies itself for a `thread_join` to reap.
pub fn thread_exit(
    table: &mut ProcessTable,
    dispatcher: &mut Dispatcher,
    init: SlotIndex,
    idx: SlotIndex,
    retval: i32,
) -> ThreadExitOutcome {
    let main = table.main_of(idx);
    if main == idx {
        crate::process::lifecycle::exit(table, dispatcher, init, idx, retval);
        return ThreadExitOutcome::ExitedProcess;
    }

    let slot = table.slot_mut(idx);
    slot.maxtid = retval as u32;
    slot.state = SlotState::Zombie;
    super::sleep::wakeup(table, main.as_usize());
    ThreadExitOutcome::Zombie
}

/// Tear down every thread of `main`'s address space except the one whose
/// pid is `keep_pid` (`None` during a full process exit, where every
/// sibling including the caller's own thread slot goes away), then shrink
/// the thread-stack region back to nothing. Refunds any sibling's Stride
/// tickets before freeing its slot, since a thread may independently hold
/// a Stride share distinct from its main thread's. Grounded on
/// `deallocthread`.
pub fn deallocthread(
    table: &mut ProcessTable,
    dispatcher: &mut Dispatcher,
    main: SlotIndex,
    keep_pid: Option<u32>,
) {
    for t in table.threads_of(main) {
        if Some(table.slot(t).pid) != keep_pid {
            if let SchedClass::Stride { tickets, .. } = table.slot(t).sched_class {
                dispatcher.stride.total_tickets -= tickets;
                dispatcher.stride.remove(table, t);
            }
            table.free_slot(t);
        }
    }

    let maxtid = table.slot(main).maxtid as usize;
    if maxtid > 0 {
        if let Some(space) = table.slot(main).addr_space.clone() {
            let top = table.slot(main).stack;
            let bottom = top.saturating_sub(maxtid * PGSIZE);
            let _ = space.lock().deallocuvm(top, bottom);
        }
        table.slot_mut(main).maxtid = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;
    use crate::process::table::ProcessTable as RawTable;
    use crate::vm::AddressSpaceOps;

    struct FakeAddrSpace;
    impl AddressSpaceOps for FakeAddrSpace {
        fn setupkvm(&mut self) -> Result<(), KernelError> {
            Ok(())
        }
        fn inituvm(&mut self, _image: &[u8]) -> Result<usize, KernelError> {
            Ok(PGSIZE)
        }
        fn allocuvm(&mut self, _old: usize, new: usize) -> Result<usize, KernelError> {
            Ok(new)
        }
        fn deallocuvm(&mut self, _old: usize, new: usize) -> Result<usize, KernelError> {
            Ok(new)
        }
        fn copyuvm(&self) -> Result<Box<dyn AddressSpaceOps>, KernelError> {
            Ok(Box::new(FakeAddrSpace))
        }
        fn copyout(&mut self, _va: usize, _data: &[u8]) -> Result<(), KernelError> {
            Ok(())
        }
        fn switchuvm(&self) {}
        fn freevm(&mut self) {}
    }

    /// Same as `FakeAddrSpace`, but counts `deallocuvm` calls so a test can
    /// confirm a grown thread-stack page was rolled back.
    struct RecordingAddrSpace {
        dealloc_calls: alloc::sync::Arc<spin::Mutex<u32>>,
    }
    impl AddressSpaceOps for RecordingAddrSpace {
        fn setupkvm(&mut self) -> Result<(), KernelError> {
            Ok(())
        }
        fn inituvm(&mut self, _image: &[u8]) -> Result<usize, KernelError> {
            Ok(PGSIZE)
        }
        fn allocuvm(&mut self, _old: usize, new: usize) -> Result<usize, KernelError> {
            Ok(new)
        }
        fn deallocuvm(&mut self, _old: usize, new: usize) -> Result<usize, KernelError> {
            *self.dealloc_calls.lock() += 1;
            Ok(new)
        }
        fn copyuvm(&self) -> Result<Box<dyn AddressSpaceOps>, KernelError> {
            Ok(Box::new(RecordingAddrSpace {
                dealloc_calls: self.dealloc_calls.clone(),
            }))
        }
        fn copyout(&mut self, _va: usize, _data: &[u8]) -> Result<(), KernelError> {
            Ok(())
        }
        fn switchuvm(&self) {}
        fn freevm(&mut self) {}
    }

    fn seeded_main(table: &mut RawTable) -> SlotIndex {
        let idx = table.alloc_slot("main").unwrap();
        let slot = table.slot_mut(idx);
        slot.addr_space = Some(alloc::sync::Arc::new(spin::Mutex::new(
            Box::new(FakeAddrSpace) as Box<dyn AddressSpaceOps>,
        )));
        slot.sz = PGSIZE;
        slot.heap = PGSIZE;
        slot.stack = 64 * PGSIZE;
        slot.state = SlotState::Runnable;
        idx
    }

    #[test]
    fn thread_create_claims_lowest_unused_tid_and_marks_runnable() {
        let mut table = RawTable::new_for_test();
        let main = seeded_main(&mut table);
        let pid = thread_create(&mut table, main, 0x1000, 42).unwrap();
        let idx = table.find_by_pid(pid).unwrap();

        assert_eq!(table.slot(idx).tid, 1);
        assert_eq!(table.slot(idx).main_thread, Some(main));
        assert_eq!(table.slot(idx).state, SlotState::Runnable);
        assert!(table.slot(main).has_thread[1]);
        assert_eq!(table.slot(main).maxtid, 1);
    }

    #[test]
    fn thread_create_reuses_lowest_freed_tid() {
        let mut table = RawTable::new_for_test();
        let main = seeded_main(&mut table);
        let a = thread_create(&mut table, main, 0, 0).unwrap();
        let _b = thread_create(&mut table, main, 0, 0).unwrap();
        table.slot_mut(table.find_by_pid(a).unwrap()).tid; // tid 1
        table.slot_mut(main).has_thread[1] = false;

        let c = thread_create(&mut table, main, 0, 0).unwrap();
        let c_idx = table.find_by_pid(c).unwrap();
        assert_eq!(table.slot(c_idx).tid, 1);
    }

    #[test]
    fn thread_create_rolls_back_grown_stack_page_when_slot_allocation_fails() {
        let mut table = RawTable::new_for_test();
        let dealloc_calls = alloc::sync::Arc::new(spin::Mutex::new(0u32));
        let main = table.alloc_slot("main").unwrap();
        {
            let slot = table.slot_mut(main);
            slot.addr_space = Some(alloc::sync::Arc::new(spin::Mutex::new(Box::new(
                RecordingAddrSpace {
                    dealloc_calls: dealloc_calls.clone(),
                },
            ) as Box<dyn AddressSpaceOps>)));
            slot.sz = PGSIZE;
            slot.heap = PGSIZE;
            slot.stack = 64 * PGSIZE;
            slot.state = SlotState::Runnable;
        }

        // Fill every remaining slot so thread_create's own alloc_slot fails
        // after the thread-stack page has already been grown.
        while table.alloc_slot("filler").is_ok() {}

        assert_eq!(
            thread_create(&mut table, main, 0, 0),
            Err(KernelError::NoFreeSlot)
        );
        assert_eq!(*dealloc_calls.lock(), 1);
        assert_eq!(table.slot(main).maxtid, 0);
    }

    #[test]
    fn thread_join_reaps_a_zombie_thread_and_clears_its_tid() {
        let mut table = RawTable::new_for_test();
        let main = seeded_main(&mut table);
        let pid = thread_create(&mut table, main, 0, 0).unwrap();
        let idx = table.find_by_pid(pid).unwrap();
        table.slot_mut(idx).state = SlotState::Zombie;
        table.slot_mut(idx).maxtid = 7;

        match thread_join(&mut table, pid) {
            ThreadJoinOutcome::Reaped { retval } => assert_eq!(retval, 7),
            other => panic!("expected Reaped, got {:?}", other),
        }
        assert!(!table.slot(main).has_thread[1]);
        assert_eq!(table.slot(idx).state, SlotState::Unused);
    }

    #[test]
    fn thread_join_on_unknown_pid_reports_not_found() {
        let mut table = RawTable::new_for_test();
        assert_eq!(thread_join(&mut table, 9999), ThreadJoinOutcome::NotFound);
    }

    #[test]
    fn thread_join_on_still_live_thread_reports_pending() {
        let mut table = RawTable::new_for_test();
        let main = seeded_main(&mut table);
        let pid = thread_create(&mut table, main, 0, 0).unwrap();
        assert_eq!(thread_join(&mut table, pid), ThreadJoinOutcome::Pending);
    }

    #[test]
    fn thread_exit_on_a_non_main_thread_zombifies_and_wakes_main() {
        let mut table = RawTable::new_for_test();
        let main = seeded_main(&mut table);
        table.slot_mut(main).chan = Some(main.as_usize());
        table.slot_mut(main).state = SlotState::Sleeping;
        let pid = thread_create(&mut table, main, 0, 0).unwrap();
        let idx = table.find_by_pid(pid).unwrap();

        let mut dispatcher = Dispatcher::new();
        let outcome = thread_exit(&mut table, &mut dispatcher, main, idx, 5);

        assert_eq!(outcome, ThreadExitOutcome::Zombie);
        assert_eq!(table.slot(idx).state, SlotState::Zombie);
        assert_eq!(table.slot(idx).maxtid, 5);
        assert_eq!(table.slot(main).state, SlotState::Runnable);
    }

    #[test]
    fn thread_exit_on_the_main_thread_itself_behaves_like_exit() {
        let mut table = RawTable::new_for_test();
        let init = seeded_main(&mut table);
        let main = seeded_main(&mut table);
        let mut dispatcher = Dispatcher::new();

        let outcome = thread_exit(&mut table, &mut dispatcher, init, main, 3);

        assert_eq!(outcome, ThreadExitOutcome::ExitedProcess);
        assert_eq!(table.slot(main).state, SlotState::Zombie);
        assert_eq!(table.slot(main).exit_code, 3);
    }

    #[test]
    fn deallocthread_frees_every_sibling_but_keep_pid() {
        let mut table = RawTable::new_for_test();
        let main = seeded_main(&mut table);
        let a = thread_create(&mut table, main, 0, 0).unwrap();
        let _b = thread_create(&mut table, main, 0, 0).unwrap();
        let a_idx = table.find_by_pid(a).unwrap();

        let mut dispatcher = Dispatcher::new();
        deallocthread(&mut table, &mut dispatcher, main, Some(a));

        assert_eq!(table.slot(a_idx).state, SlotState::Runnable);
        assert_eq!(table.slot(main).maxtid, 0);
    }

    #[test]
    fn deallocthread_refunds_a_sibling_threads_stride_tickets() {
        let mut table = RawTable::new_for_test();
        let main = seeded_main(&mut table);
        let a = thread_create(&mut table, main, 0, 0).unwrap();
        let a_idx = table.find_by_pid(a).unwrap();
        table.slot_mut(a_idx).sched_class = SchedClass::Stride {
            passvalue: 0,
            tickets: 10,
            stride: 100,
        };

        let mut dispatcher = Dispatcher::new();
        dispatcher.stride.total_tickets = 10;
        dispatcher.stride.push(&table, a_idx);

        deallocthread(&mut table, &mut dispatcher, main, None);

        assert_eq!(dispatcher.stride.total_tickets, 0);
        assert!(dispatcher.stride.is_empty());
    }

    #[test]
    fn thread_create_rejects_concurrent_calls_on_the_same_main_via_create_guard() {
        let mut table = RawTable::new_for_test();
        let main = seeded_main(&mut table);
        table.slot_mut(main).create_guard = true;

        assert_eq!(
            thread_create(&mut table, main, 0, 0),
            Err(KernelError::Reentrant)
        );
    }

    #[test]
    fn thread_create_clears_create_guard_on_success() {
        let mut table = RawTable::new_for_test();
        let main = seeded_main(&mut table);
        thread_create(&mut table, main, 0, 0).unwrap();
        assert!(!table.slot(main).create_guard);
    }
}
