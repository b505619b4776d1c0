/*
 * MLFQ State and Selection (C3)
 *
 * Three priority levels, a per-level tick quantum, a per-level aging budget,
 * and a global boost every 100 scheduler ticks. Grounded on `boost`,
 * `ticklimit`, `runlimit`, `check_down_priority`, and the MLFQ half of
 * `mlfq_run`; expressed here as plain functions over `&mut ProcessTable`
 * rather than methods reaching into a single active `Scheduler` trait
 * object, per the dispatch-shape note in `SPEC_FULL.md` §4.5.
 */

use crate::process::slot::{SchedClass, SlotIndex, SlotState};
use crate::process::table::ProcessTable;

/// Ticks before a table-wide boost resets every MLFQ occupant to level 0.
pub const BOOST_PERIOD: u32 = 100;

/// Per-level tick quantum: how many ticks a level gets before the occupant
/// is forced to yield back to the scheduler.
pub fn tick_limit(priority: u8) -> u32 {
    match priority {
        0 => 1,
        1 => 2,
        2 => 4,
        _ => panic!("mlfq priority out of range: {}", priority),
    }
}

/// Per-level aging budget: how many ticks of *running* (not just scheduled)
/// time a level tolerates before demoting the occupant. Level 2 never
/// demotes further - there is nowhere lower to go.
pub fn run_limit(priority: u8) -> u32 {
    match priority {
        0 => 5,
        1 => 10,
        _ => u32::MAX,
    }
}

/// Table-wide MLFQ scheduling state: which priority level the round-robin
/// scan is currently favoring, where in the table it left off, and how many
/// ticks have elapsed since the last boost.
#[derive(Debug, Clone, Copy)]
pub struct MlfqState {
    pub priority: u8,
    pub index: usize,
    pub tick: u32,
    /// MLFQ's own virtual pass value, compared against the Stride heap root
    /// each scheduler-loop iteration to decide who runs next (C6).
    pub passvalue: u64,
}

impl MlfqState {
    pub const fn new() -> Self {
        MlfqState {
            priority: 0,
            index: 0,
            tick: 0,
            passvalue: 0,
        }
    }

    /// Advance MLFQ's pass value after it "wins" a dispatch round against the
    /// Stride heap root. Grounded on the scheduler loop's
    /// `mlfq.passvalue += 1000/(100-stride.total_tickets)`.
    ///
    /// `total_tickets` is clamped below `100` by `cpu_share`'s ticket-cap
    /// enforcement, so the divisor here never reaches zero.
    pub fn advance_passvalue(&mut self, total_tickets: u32) {
        self.passvalue += 1000 / (100 - total_tickets as u64);
    }

    /// Reset every runnable MLFQ occupant to priority 0 and restart the scan
    /// from the top. Called once every `BOOST_PERIOD` ticks, and once at
    /// scheduler start.
    pub fn boost(&mut self, table: &mut ProcessTable) {
        self.priority = 0;
        self.index = 0;
        self.tick = 0;
        for (_, slot) in table.iter_mut() {
            if slot.state == SlotState::Runnable {
                if let SchedClass::Mlfq {
                    priority,
                    tick,
                    runticks,
                } = &mut slot.sched_class
                {
                    *priority = 0;
                    *tick = 0;
                    *runticks = 0;
                }
            }
        }
    }

    /// Demote a slot if it has exhausted its level's aging budget. Grounded
    /// on `check_down_priority`: level 2 is a no-op floor, never demoted.
    pub fn check_down_priority(table: &mut ProcessTable, idx: SlotIndex) {
        let slot = table.slot_mut(idx);
        if let SchedClass::Mlfq {
            priority,
            tick,
            runticks,
        } = &mut slot.sched_class
        {
            if *priority > 1 {
                return;
            }
            if *runticks >= run_limit(*priority) {
                *priority += 1;
                *tick = 0;
                *runticks = 0;
            }
        }
    }

    /// Pick the next MLFQ occupant to run, advancing the round-robin scan
    /// position and bumping its tick counters. Grounded on `mlfq_run`'s
    /// selection half (the actual context switch is the caller's job - see
    /// `scheduler::dispatch`).
    ///
    /// Returns `None` if there are no runnable MLFQ occupants at all.
    pub fn select_next(&mut self, table: &mut ProcessTable) -> Option<SlotIndex> {
        if self.tick >= BOOST_PERIOD {
            self.boost(table);
        }

        let min_priority = table
            .iter()
            .filter(|(_, s)| s.is_runnable_mlfq())
            .filter_map(|(_, s)| match s.sched_class {
                SchedClass::Mlfq { priority, .. } => Some(priority),
                _ => None,
            })
            .min()?;

        if min_priority != self.priority {
            self.priority = min_priority;
            self.index = 0;
        }

        let n = table.iter().count();
        if n == 0 {
            return None;
        }

        for step in 0..n {
            let i = (self.index + step) % n;
            let idx = SlotIndex(i);
            let slot = table.slot(idx);
            let matches = slot.is_runnable_mlfq()
                && matches!(slot.sched_class, SchedClass::Mlfq { priority, .. } if priority == self.priority);
            if matches {
                self.index = (i + 1) % n;

                self.tick += 1;
                if let SchedClass::Mlfq { tick, runticks, .. } =
                    &mut table.slot_mut(idx).sched_class
                {
                    *tick += 1;
                    *runticks += 1;
                }
                Self::check_down_priority(table, idx);
                return Some(idx);
            }
        }

        None
    }
}

impl Default for MlfqState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::table::ProcessTable as RawTable;

    fn runnable_mlfq(table: &mut RawTable) -> SlotIndex {
        let idx = table.alloc_slot("p").unwrap();
        table.slot_mut(idx).state = SlotState::Runnable;
        idx
    }

    #[test]
    fn tick_and_run_limits_match_three_levels() {
        assert_eq!(tick_limit(0), 1);
        assert_eq!(tick_limit(1), 2);
        assert_eq!(tick_limit(2), 4);
        assert_eq!(run_limit(0), 5);
        assert_eq!(run_limit(1), 10);
    }

    #[test]
    fn select_next_returns_none_with_no_runnable_occupants() {
        let mut table = RawTable::new_for_test();
        let mut mlfq = MlfqState::new();
        assert_eq!(mlfq.select_next(&mut table), None);
    }

    #[test]
    fn select_next_prefers_lowest_priority_level() {
        let mut table = RawTable::new_for_test();
        let low = runnable_mlfq(&mut table);
        let high = runnable_mlfq(&mut table);
        table.slot_mut(high).sched_class = SchedClass::Mlfq {
            priority: 2,
            tick: 0,
            runticks: 0,
        };
        let mut mlfq = MlfqState::new();
        let picked = mlfq.select_next(&mut table).unwrap();
        assert_eq!(picked, low);
    }

    #[test]
    fn check_down_priority_demotes_after_run_limit() {
        let mut table = RawTable::new_for_test();
        let idx = runnable_mlfq(&mut table);
        table.slot_mut(idx).sched_class = SchedClass::Mlfq {
            priority: 0,
            tick: 0,
            runticks: run_limit(0),
        };
        MlfqState::check_down_priority(&mut table, idx);
        match table.slot(idx).sched_class {
            SchedClass::Mlfq { priority, tick, runticks } => {
                assert_eq!(priority, 1);
                assert_eq!(tick, 0);
                assert_eq!(runticks, 0);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn check_down_priority_never_demotes_past_level_two() {
        let mut table = RawTable::new_for_test();
        let idx = runnable_mlfq(&mut table);
        table.slot_mut(idx).sched_class = SchedClass::Mlfq {
            priority: 2,
            tick: 0,
            runticks: run_limit(2).min(1_000_000),
        };
        MlfqState::check_down_priority(&mut table, idx);
        match table.slot(idx).sched_class {
            SchedClass::Mlfq { priority, .. } => assert_eq!(priority, 2),
            _ => unreachable!(),
        }
    }

    #[test]
    fn boost_resets_all_runnable_occupants_to_level_zero() {
        let mut table = RawTable::new_for_test();
        let idx = runnable_mlfq(&mut table);
        table.slot_mut(idx).sched_class = SchedClass::Mlfq {
            priority: 2,
            tick: 7,
            runticks: 3,
        };
        let mut mlfq = MlfqState::new();
        mlfq.tick = BOOST_PERIOD;
        mlfq.boost(&mut table);
        match table.slot(idx).sched_class {
            SchedClass::Mlfq { priority, tick, runticks } => {
                assert_eq!(priority, 0);
                assert_eq!(tick, 0);
                assert_eq!(runticks, 0);
            }
            _ => unreachable!(),
        }
        assert_eq!(mlfq.tick, 0);
    }
}
