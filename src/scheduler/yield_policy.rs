/*
 * Yield Policies (C7)
 *
 * MLFQ and Stride occupants give up the CPU differently: an MLFQ occupant
 * keeps running until its level's tick quantum is spent, while a Stride
 * occupant yields (and re-seats itself in the heap) on every voluntary
 * yield call. Grounded on `mlfq_yield`/`stride_yield`/`yield`.
 *
 * This module decides *whether* a slot actually gives up the CPU this call;
 * the real context switch that decision triggers is `scheduler::dispatch`'s
 * (and ultimately the arch-specific ISR glue's) job.
 */

use crate::process::slot::{SchedClass, SlotIndex, SlotState};
use crate::process::table::ProcessTable;
use super::mlfq::{tick_limit, MlfqState};
use super::stride::StrideHeap;

/// Outcome of a yield-policy call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YieldDecision {
    /// The occupant still has quantum left; it keeps running without a real
    /// context switch.
    KeepRunning,
    /// The occupant gave up the CPU; it is now `Runnable` and the caller
    /// must trigger a context switch away from it.
    Yielded,
}

/// MLFQ's yield policy: consume one tick of the current level's quantum; if
/// the quantum isn't spent yet, keep running in place. Grounded on
/// `mlfq_yield`.
pub fn mlfq_yield(table: &mut ProcessTable, mlfq: &mut MlfqState, idx: SlotIndex) -> YieldDecision {
    let quantum_spent = {
        let slot = table.slot_mut(idx);
        match &mut slot.sched_class {
            SchedClass::Mlfq { priority, tick, runticks } => {
                if *tick < tick_limit(*priority) {
                    *tick += 1;
                    *runticks += 1;
                    mlfq.tick += 1;
                    false
                } else {
                    *tick = 0;
                    true
                }
            }
            SchedClass::Stride { .. } => {
                panic!("mlfq_yield called on a stride occupant")
            }
        }
    };

    if !quantum_spent {
        MlfqState::check_down_priority(table, idx);
        return YieldDecision::KeepRunning;
    }

    table.slot_mut(idx).state = SlotState::Runnable;
    YieldDecision::Yielded
}

/// Stride's yield policy: always yields, re-seating the occupant in the
/// heap with its pass value advanced by its own stride. Grounded on
/// `stride_yield`/`yield`'s stride branch.
pub fn stride_yield(table: &mut ProcessTable, stride: &mut StrideHeap, idx: SlotIndex) -> YieldDecision {
    debug_assert!(
        matches!(table.slot(idx).sched_class, SchedClass::Stride { .. }),
        "stride_yield called on a non-stride occupant"
    );
    stride.requeue_root(table);
    table.slot_mut(idx).state = SlotState::Runnable;
    YieldDecision::Yielded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::table::ProcessTable as RawTable;

    #[test]
    fn mlfq_yield_keeps_running_until_quantum_spent() {
        let mut table = RawTable::new_for_test();
        let idx = table.alloc_slot("p").unwrap();
        table.slot_mut(idx).state = SlotState::Running;
        // priority 0 -> tick_limit 1, so the very first call spends it.
        let mut mlfq = MlfqState::new();
        let decision = mlfq_yield(&mut table, &mut mlfq, idx);
        assert_eq!(decision, YieldDecision::Yielded);
        assert_eq!(table.slot(idx).state, SlotState::Runnable);
    }

    #[test]
    fn mlfq_yield_continues_running_when_quantum_remains() {
        let mut table = RawTable::new_for_test();
        let idx = table.alloc_slot("p").unwrap();
        table.slot_mut(idx).state = SlotState::Running;
        table.slot_mut(idx).sched_class = SchedClass::Mlfq {
            priority: 2, // tick_limit(2) == 4
            tick: 0,
            runticks: 0,
        };
        let mut mlfq = MlfqState::new();
        let decision = mlfq_yield(&mut table, &mut mlfq, idx);
        assert_eq!(decision, YieldDecision::KeepRunning);
        assert_eq!(table.slot(idx).state, SlotState::Running);
    }

    #[test]
    fn stride_yield_always_yields_and_advances_passvalue() {
        let mut table = RawTable::new_for_test();
        let idx = table.alloc_slot("p").unwrap();
        let slot = table.slot_mut(idx);
        slot.state = SlotState::Running;
        slot.sched_class = SchedClass::Stride {
            passvalue: 0,
            tickets: 10,
            stride: 100,
        };
        let mut stride = StrideHeap::new();
        stride.push(&table, idx);

        let decision = stride_yield(&mut table, &mut stride, idx);
        assert_eq!(decision, YieldDecision::Yielded);
        assert_eq!(table.slot(idx).state, SlotState::Runnable);
        match table.slot(idx).sched_class {
            SchedClass::Stride { passvalue, .. } => assert_eq!(passvalue, 100),
            _ => unreachable!(),
        }
    }
}
