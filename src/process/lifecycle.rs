/*
 * Fork / Exit / Wait (C5)
 *
 * The three operations that create, tear down, and reap process-table
 * slots. Grounded on `fork`/`exit`/`wait`/`userinit`/`growproc`: control
 * flow and field-by-field copies follow those functions closely, with the
 * `struct proc*` chase through `curproc->main_thread` replaced by
 * `ProcessTable::main_of`.
 *
 * As with `mlfq`/`stride`/`dispatch`/`yield_policy`/`cpu_share`, the
 * blocking half of `wait` (and of `thread_join` in `scheduler::thread`) is
 * not modeled as a literal blocking call: a kernel `sched()` call doesn't
 * return until some other context switches back into it, which a host unit
 * test cannot drive without real preemption. `wait` here is the single-shot
 * scan `sched()` would retry after every wakeup; the retry loop itself lives
 * in the syscall handler, alongside the real `sleep` call.
 */

use alloc::boxed::Box;

use crate::error::KernelError;
use crate::vm::AddressSpaceOps;
use super::slot::{SchedClass, SlotIndex, SlotState};
use super::table::ProcessTable;
use crate::scheduler::dispatch::Dispatcher;
use crate::scheduler::thread;

/// Bootstrap the very first process: install a fresh kernel+user address
/// space, load `image` at the bottom of userspace, and mark it RUNNABLE.
/// Grounded on `userinit`.
pub fn userinit(
    table: &mut ProcessTable,
    mut addr_space: Box<dyn AddressSpaceOps>,
    image: &[u8],
    root_cwd: crate::fs_iface::InodeId,
) -> Result<SlotIndex, KernelError> {
    addr_space.setupkvm()?;
    let sz = addr_space.inituvm(image)?;

    let idx = table.alloc_slot("initcode")?;
    let slot = table.slot_mut(idx);
    slot.sz = sz;
    slot.heap = sz;
    slot.stack = usize::MAX - super::slot::PGSIZE + 1; // KERNBASE - PGSIZE, arch-defined in a real build
    slot.cwd = Some(root_cwd);
    slot.addr_space = Some(alloc::sync::Arc::new(spin::Mutex::new(addr_space)));
    slot.state = SlotState::Runnable;

    Ok(idx)
}

/// Duplicate `parent`'s main thread into a new slot. Grounded on `fork`:
/// the parent is always the caller's `main_thread`, never a thread slot
/// directly.
pub fn fork(table: &mut ProcessTable, parent: SlotIndex) -> Result<u32, KernelError> {
    let parent_main = table.main_of(parent);

    let child_addr_space = {
        let main = table.slot(parent_main);
        let space = main
            .addr_space
            .as_ref()
            .expect("fork: parent main thread has no address space")
            .lock();
        space.copyuvm()?
    };

    let idx = table.alloc_slot("")?;

    let (sz, heap, stack, cwd, fd_table, name, trap_frame) = {
        let main = table.slot(parent_main);
        (
            main.sz,
            main.heap,
            main.stack,
            main.cwd,
            main.fd_table.clone(),
            main.name.clone(),
            main.interrupt_context,
        )
    };

    let pid = {
        let slot = table.slot_mut(idx);
        slot.sz = sz;
        slot.heap = heap;
        slot.stack = stack;
        slot.cwd = cwd;
        slot.fd_table = fd_table;
        slot.name = name;
        slot.parent = Some(parent_main);
        slot.addr_space = Some(alloc::sync::Arc::new(spin::Mutex::new(child_addr_space)));
        slot.interrupt_context = trap_frame;
        slot.interrupt_context.rax = 0; // fork returns 0 in the child
        slot.state = SlotState::Runnable;
        slot.pid
    };

    Ok(pid)
}

/// Adjust the caller's main thread's heap by `delta` bytes (may be
/// negative). Returns the heap size *before* the adjustment, matching
/// `growproc`'s `sbrk` convention.
pub fn growproc(table: &mut ProcessTable, caller: SlotIndex, delta: isize) -> Result<usize, KernelError> {
    let main = table.main_of(caller);
    let old = table.slot(main).heap;
    let new = if delta >= 0 {
        old + delta as usize
    } else {
        old.saturating_sub((-delta) as usize)
    };

    let resulting = {
        let space = table
            .slot(main)
            .addr_space
            .as_ref()
            .expect("growproc: main thread has no address space")
            .clone();
        let mut guard = space.lock();
        if delta >= 0 {
            guard.allocuvm(old, new)?
        } else {
            guard.deallocuvm(old, new)?
        }
    };

    table.slot_mut(main).heap = resulting;
    Ok(old)
}

/// Tear down the current slot. If it is Stride-scheduled, removes it from
/// the heap and refunds its tickets first. Dealloc's every sibling thread,
/// wakes the parent, reparents live children to `init`, and transitions to
/// ZOMBIE. Never frees the address space itself - that happens when the
/// parent reaps this slot via [`wait`] (matching the original: `exit`
/// leaves `pgdir` alive so a concurrently-sleeping `wait` can still read
/// from it up to the reap).
///
/// Grounded on `exit`. The caller is responsible for invoking the scheduler
/// immediately afterward; this function only performs the table-lock-held
/// bookkeeping, not the context switch.
pub fn exit(
    table: &mut ProcessTable,
    dispatcher: &mut Dispatcher,
    init: SlotIndex,
    idx: SlotIndex,
    exit_code: i32,
) {
    debug_assert_eq!(table.main_of(idx), idx, "exit must be called on a main thread");

    if table.slot(idx).exit_guard {
        // Already tearing this slot down - e.g. a `kill`-induced exit racing
        // the thread's own voluntary exit. Don't redo the bookkeeping.
        return;
    }
    table.slot_mut(idx).exit_guard = true;

    if let SchedClass::Stride { tickets, .. } = table.slot(idx).sched_class {
        dispatcher.stride.total_tickets -= tickets;
        dispatcher.stride.remove(table, idx);
        table.slot_mut(idx).all_tickets = table.slot(idx).all_tickets.saturating_sub(tickets);
    }

    thread::deallocthread(table, dispatcher, idx, None);

    let parent = table.slot(idx).parent;

    for child in table.children_of(idx) {
        table.slot_mut(child).parent = Some(init);
        if table.slot(child).state == SlotState::Zombie {
            wake_init_for_reparented_zombie(table, init);
        }
    }

    if let Some(p) = parent {
        crate::scheduler::sleep::wakeup(table, p.as_usize());
    }

    let slot = table.slot_mut(idx);
    slot.exit_code = exit_code;
    slot.state = SlotState::Zombie;
    slot.all_tickets = 0;
    slot.exit_guard = false;
}

fn wake_init_for_reparented_zombie(table: &mut ProcessTable, init: SlotIndex) {
    crate::scheduler::sleep::wakeup(table, init.as_usize());
}

/// Outcome of one single-shot `wait` scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A ZOMBIE child was found, reaped, and its slot freed.
    Reaped { pid: u32, exit_code: i32 },
    /// The caller has no children at all; it must not sleep.
    NoChildren,
    /// The caller is marked `killed`; it must not sleep, same as having no
    /// children. Grounded on `wait`'s `if(!havekids || curproc->killed)`.
    Killed,
    /// Live children exist but none are ZOMBIE yet; the caller should sleep
    /// on its own slot index as channel and retry when woken.
    Pending,
}

/// Scan for a ZOMBIE child of `caller`, reaping the first one found.
/// Grounded on `wait`'s per-iteration body (the retry-on-no-match sleep is
/// the caller's job, per this module's doc comment). A caller marked
/// `killed` never sleeps, even with live children outstanding.
pub fn wait(table: &mut ProcessTable, caller: SlotIndex) -> WaitOutcome {
    let children = table.children_of(caller);
    if children.is_empty() {
        return WaitOutcome::NoChildren;
    }

    if table.slot(caller).killed {
        return WaitOutcome::Killed;
    }

    for child in children {
        if table.slot(child).state == SlotState::Zombie {
            let pid = table.slot(child).pid;
            let exit_code = table.slot(child).exit_code;
            if let Some(space) = table.slot_mut(child).addr_space.take() {
                space.lock().freevm();
            }
            table.free_slot(child);
            return WaitOutcome::Reaped { pid, exit_code };
        }
    }

    WaitOutcome::Pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::table::ProcessTable as RawTable;
    use crate::scheduler::dispatch::Dispatcher;

    struct FakeAddrSpace {
        freed: bool,
    }

    impl AddressSpaceOps for FakeAddrSpace {
        fn setupkvm(&mut self) -> Result<(), KernelError> {
            Ok(())
        }
        fn inituvm(&mut self, image: &[u8]) -> Result<usize, KernelError> {
            Ok(image.len().max(super::super::slot::PGSIZE))
        }
        fn allocuvm(&mut self, _old: usize, new: usize) -> Result<usize, KernelError> {
            Ok(new)
        }
        fn deallocuvm(&mut self, _old: usize, new: usize) -> Result<usize, KernelError> {
            Ok(new)
        }
        fn copyuvm(&self) -> Result<Box<dyn AddressSpaceOps>, KernelError> {
            Ok(Box::new(FakeAddrSpace { freed: false }))
        }
        fn copyout(&mut self, _va: usize, _data: &[u8]) -> Result<(), KernelError> {
            Ok(())
        }
        fn switchuvm(&self) {}
        fn freevm(&mut self) {
            self.freed = true;
        }
    }

    fn seeded_main(table: &mut RawTable) -> SlotIndex {
        let idx = table.alloc_slot("init").unwrap();
        let slot = table.slot_mut(idx);
        slot.addr_space = Some(alloc::sync::Arc::new(spin::Mutex::new(
            Box::new(FakeAddrSpace { freed: false }) as Box<dyn AddressSpaceOps>,
        )));
        slot.sz = 4096;
        slot.heap = 4096;
        slot.stack = 8192;
        slot.state = SlotState::Runnable;
        idx
    }

    #[test]
    fn fork_duplicates_parent_and_zeroes_child_return_register() {
        let mut table = RawTable::new_for_test();
        let parent = seeded_main(&mut table);
        table.slot_mut(parent).interrupt_context.rax = 999;

        let child_pid = fork(&mut table, parent).unwrap();
        let child = table.find_by_pid(child_pid).unwrap();

        assert_eq!(table.slot(child).parent, Some(parent));
        assert_eq!(table.slot(child).interrupt_context.rax, 0);
        assert_eq!(table.slot(child).state, SlotState::Runnable);
        assert_eq!(table.slot(child).heap, table.slot(parent).heap);
    }

    #[test]
    fn growproc_grows_and_shrinks_heap() {
        let mut table = RawTable::new_for_test();
        let idx = seeded_main(&mut table);
        let old = growproc(&mut table, idx, 4096).unwrap();
        assert_eq!(old, 4096);
        assert_eq!(table.slot(idx).heap, 8192);

        let old = growproc(&mut table, idx, -4096).unwrap();
        assert_eq!(old, 8192);
        assert_eq!(table.slot(idx).heap, 4096);
    }

    #[test]
    fn wait_reaps_a_zombie_child_and_frees_its_slot() {
        let mut table = RawTable::new_for_test();
        let parent = seeded_main(&mut table);
        let child_pid = fork(&mut table, parent).unwrap();
        let child = table.find_by_pid(child_pid).unwrap();
        table.slot_mut(child).state = SlotState::Zombie;
        table.slot_mut(child).exit_code = 7;

        match wait(&mut table, parent) {
            WaitOutcome::Reaped { pid, exit_code } => {
                assert_eq!(pid, child_pid);
                assert_eq!(exit_code, 7);
            }
            other => panic!("expected Reaped, got {:?}", other),
        }
        assert_eq!(table.slot(child).state, SlotState::Unused);
    }

    #[test]
    fn wait_reports_no_children_when_none_exist() {
        let mut table = RawTable::new_for_test();
        let parent = seeded_main(&mut table);
        assert_eq!(wait(&mut table, parent), WaitOutcome::NoChildren);
    }

    #[test]
    fn wait_reports_pending_when_children_are_still_alive() {
        let mut table = RawTable::new_for_test();
        let parent = seeded_main(&mut table);
        fork(&mut table, parent).unwrap();
        assert_eq!(wait(&mut table, parent), WaitOutcome::Pending);
    }

    #[test]
    fn wait_reports_killed_instead_of_sleeping_when_caller_is_marked_killed() {
        let mut table = RawTable::new_for_test();
        let parent = seeded_main(&mut table);
        fork(&mut table, parent).unwrap();
        table.slot_mut(parent).killed = true;
        assert_eq!(wait(&mut table, parent), WaitOutcome::Killed);
    }

    #[test]
    fn exit_reparents_live_children_to_init_and_wakes_parent() {
        let mut table = RawTable::new_for_test();
        let init = seeded_main(&mut table);
        let parent = seeded_main(&mut table);
        table.slot_mut(parent).chan = Some(parent.as_usize());
        table.slot_mut(parent).state = SlotState::Sleeping;

        let child_pid = fork(&mut table, parent).unwrap();
        let child = table.find_by_pid(child_pid).unwrap();

        let mut dispatcher = Dispatcher::new();
        exit(&mut table, &mut dispatcher, init, parent, 0);

        assert_eq!(table.slot(parent).state, SlotState::Zombie);
        assert_eq!(table.slot(child).parent, Some(init));
        assert_eq!(table.slot(parent).state, SlotState::Zombie);
    }

    #[test]
    fn exit_refunds_tickets_and_removes_from_stride_heap() {
        let mut table = RawTable::new_for_test();
        let init = seeded_main(&mut table);
        let idx = seeded_main(&mut table);
        table.slot_mut(idx).sched_class = SchedClass::Stride {
            passvalue: 0,
            tickets: 15,
            stride: 1000 / 15,
        };
        let mut dispatcher = Dispatcher::new();
        dispatcher.stride.total_tickets = 15;
        dispatcher.stride.push(&table, idx);

        exit(&mut table, &mut dispatcher, init, idx, 0);

        assert_eq!(dispatcher.stride.total_tickets, 0);
        assert!(dispatcher.stride.is_empty());
    }

    #[test]
    fn exit_is_a_no_op_when_exit_guard_is_already_held() {
        let mut table = RawTable::new_for_test();
        let init = seeded_main(&mut table);
        let idx = seeded_main(&mut table);
        table.slot_mut(idx).exit_guard = true;
        table.slot_mut(idx).exit_code = 0;

        let mut dispatcher = Dispatcher::new();
        exit(&mut table, &mut dispatcher, init, idx, 42);

        // The guard was already held, so this call must not have redone the
        // teardown: state stays whatever it was, exit_code is untouched.
        assert_eq!(table.slot(idx).state, SlotState::Runnable);
        assert_eq!(table.slot(idx).exit_code, 0);
    }

    #[test]
    fn exit_clears_exit_guard_and_all_tickets_once_done() {
        let mut table = RawTable::new_for_test();
        let init = seeded_main(&mut table);
        let idx = seeded_main(&mut table);
        table.slot_mut(idx).all_tickets = 15;

        let mut dispatcher = Dispatcher::new();
        exit(&mut table, &mut dispatcher, init, idx, 0);

        assert!(!table.slot(idx).exit_guard);
        assert_eq!(table.slot(idx).all_tickets, 0);
    }
}
