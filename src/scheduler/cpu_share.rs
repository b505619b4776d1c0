/*
 * CPU-Share API (C10)
 *
 * `set_cpu_share`/`getlev`, the two syscall-facing knobs onto the hybrid
 * scheduler: moving an MLFQ occupant onto the Stride side (or adjusting an
 * existing Stride occupant's ticket count), and reading back an MLFQ
 * occupant's current priority level. Grounded on `set_cpu_share`/`getlev`.
 *
 * The source this is grounded on has a bug in the already-Stride branch of
 * `set_cpu_share`: it assigns the new ticket count to the scheduling
 * union's `tick` field instead of `tickets`. `SPEC_FULL.md` §9 resolves
 * this as a defect, not a behavior to preserve - the implementation below
 * updates `tickets`.
 */

use crate::error::KernelError;
use crate::process::slot::{SchedClass, SlotIndex};
use crate::process::table::ProcessTable;
use super::dispatch::Dispatcher;
use super::stride::TICKET_CAP;

/// Move `idx` onto the Stride side with `tickets` tickets (if it's
/// currently an MLFQ occupant), or adjust its existing ticket count (if
/// it's already a Stride occupant). Returns the accepted ticket count.
///
/// Also keeps `idx`'s main thread's `all_tickets` in step: a thread may
/// independently hold a Stride share distinct from its main thread's own,
/// so `all_tickets` is the running total of every such share across the
/// whole thread group, not just `idx` itself.
pub fn set_cpu_share(
    table: &mut ProcessTable,
    dispatcher: &mut Dispatcher,
    idx: SlotIndex,
    tickets: u32,
) -> Result<u32, KernelError> {
    if tickets == 0 {
        return Err(KernelError::ZeroTickets);
    }

    let main = table.main_of(idx);

    match table.slot(idx).sched_class {
        SchedClass::Mlfq { .. } => {
            if dispatcher.stride.total_tickets + tickets > TICKET_CAP {
                return Err(KernelError::TicketCapExceeded);
            }

            // Seed the new occupant's pass value from whichever side is
            // currently "ahead": the stride root if one exists, else
            // MLFQ's own pass value.
            let passvalue = match dispatcher.stride.peek() {
                Some(root) => match table.slot(root).sched_class {
                    SchedClass::Stride { passvalue, .. } => passvalue,
                    SchedClass::Mlfq { .. } => unreachable!("stride heap held an mlfq occupant"),
                },
                None => dispatcher.mlfq.passvalue,
            };

            dispatcher.stride.total_tickets += tickets;
            table.slot_mut(idx).sched_class = SchedClass::Stride {
                passvalue,
                tickets,
                stride: 1000 / tickets as u64,
            };
            dispatcher.stride.push(table, idx);
            table.slot_mut(main).all_tickets += tickets;
            Ok(tickets)
        }
        SchedClass::Stride { tickets: old_tickets, .. } => {
            let future_total = dispatcher.stride.total_tickets - old_tickets + tickets;
            if future_total > TICKET_CAP {
                return Err(KernelError::TicketCapExceeded);
            }
            dispatcher.stride.total_tickets = future_total;
            if let SchedClass::Stride { tickets: t, stride, .. } = &mut table.slot_mut(idx).sched_class {
                *t = tickets;
                *stride = 1000 / tickets as u64;
            }
            table.slot_mut(main).all_tickets = table.slot(main).all_tickets - old_tickets + tickets;
            Ok(tickets)
        }
    }
}

/// Read back `idx`'s MLFQ priority level, or `-1` if it is a Stride
/// occupant (undefined in the source this is grounded on; resolved as -1
/// per `SPEC_FULL.md` §9).
pub fn getlev(table: &ProcessTable, idx: SlotIndex) -> i32 {
    match table.slot(idx).sched_class {
        SchedClass::Mlfq { priority, .. } => priority as i32,
        SchedClass::Stride { .. } => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::table::ProcessTable as RawTable;

    #[test]
    fn getlev_on_mlfq_returns_priority() {
        let mut table = RawTable::new_for_test();
        let idx = table.alloc_slot("p").unwrap();
        table.slot_mut(idx).sched_class = SchedClass::Mlfq {
            priority: 1,
            tick: 0,
            runticks: 0,
        };
        assert_eq!(getlev(&table, idx), 1);
    }

    #[test]
    fn getlev_on_stride_returns_negative_one() {
        let mut table = RawTable::new_for_test();
        let idx = table.alloc_slot("p").unwrap();
        table.slot_mut(idx).sched_class = SchedClass::Stride {
            passvalue: 0,
            tickets: 10,
            stride: 100,
        };
        assert_eq!(getlev(&table, idx), -1);
    }

    #[test]
    fn set_cpu_share_moves_mlfq_occupant_to_stride() {
        let mut table = RawTable::new_for_test();
        let idx = table.alloc_slot("p").unwrap();
        let mut dispatcher = Dispatcher::new();
        let tickets = set_cpu_share(&mut table, &mut dispatcher, idx, 10).unwrap();
        assert_eq!(tickets, 10);
        assert!(table.slot(idx).sched_class.is_stride());
        assert_eq!(dispatcher.stride.total_tickets, 10);
        assert_eq!(dispatcher.stride.peek(), Some(idx));
    }

    #[test]
    fn set_cpu_share_rejects_zero_tickets() {
        let mut table = RawTable::new_for_test();
        let idx = table.alloc_slot("p").unwrap();
        let mut dispatcher = Dispatcher::new();
        assert_eq!(
            set_cpu_share(&mut table, &mut dispatcher, idx, 0),
            Err(KernelError::ZeroTickets)
        );
    }

    #[test]
    fn set_cpu_share_rejects_over_cap() {
        let mut table = RawTable::new_for_test();
        let idx = table.alloc_slot("p").unwrap();
        let mut dispatcher = Dispatcher::new();
        assert_eq!(
            set_cpu_share(&mut table, &mut dispatcher, idx, TICKET_CAP + 1),
            Err(KernelError::TicketCapExceeded)
        );
    }

    #[test]
    fn set_cpu_share_updates_tickets_field_on_existing_stride_occupant() {
        let mut table = RawTable::new_for_test();
        let idx = table.alloc_slot("p").unwrap();
        let mut dispatcher = Dispatcher::new();
        set_cpu_share(&mut table, &mut dispatcher, idx, 10).unwrap();
        set_cpu_share(&mut table, &mut dispatcher, idx, 20).unwrap();
        match table.slot(idx).sched_class {
            SchedClass::Stride { tickets, stride, .. } => {
                assert_eq!(tickets, 20);
                assert_eq!(stride, 50);
            }
            _ => unreachable!(),
        }
        assert_eq!(dispatcher.stride.total_tickets, 20);
    }

    #[test]
    fn set_cpu_share_accumulates_all_tickets_on_the_main_thread() {
        let mut table = RawTable::new_for_test();
        let main = table.alloc_slot("main").unwrap();
        let mut dispatcher = Dispatcher::new();

        set_cpu_share(&mut table, &mut dispatcher, main, 10).unwrap();
        assert_eq!(table.slot(main).all_tickets, 10);

        set_cpu_share(&mut table, &mut dispatcher, main, 25).unwrap();
        assert_eq!(table.slot(main).all_tickets, 25);
    }
}
