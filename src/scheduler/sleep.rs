/*
 * Sleep / Wakeup / Kill (C8)
 *
 * Channel-based blocking: a slot sleeps on an opaque `chan` token and is
 * woken when something calls `wakeup` with that same token. Grounded on
 * `sleep`, `wakeup`/`wakeup1`, and `kill`. The lock-handoff dance the
 * original performs around `sleep` (release whatever lock the caller held,
 * reacquire the table lock, and vice versa on wakeup) is the caller's job
 * here: every function in this module assumes the process table's lock is
 * already held for its duration, same as the rest of `scheduler`/`process`.
 */

use crate::error::KernelError;
use crate::process::slot::{SlotIndex, SlotState};
use crate::process::table::ProcessTable;

/// Block `idx` on `chan` until a matching `wakeup`. Grounded on `sleep`.
pub fn sleep(table: &mut ProcessTable, idx: SlotIndex, chan: usize) {
    let slot = table.slot_mut(idx);
    slot.chan = Some(chan);
    slot.state = SlotState::Sleeping;
}

/// Wake every slot sleeping on `chan`. Grounded on `wakeup`/`wakeup1`.
pub fn wakeup(table: &mut ProcessTable, chan: usize) {
    for (_, slot) in table.iter_mut() {
        if slot.state == SlotState::Sleeping && slot.chan == Some(chan) {
            slot.state = SlotState::Runnable;
            slot.chan = None;
        }
    }
}

/// Mark the process named by `pid` for termination, waking it if it was
/// sleeping so it notices on its next trip through the kernel. Grounded on
/// `kill`.
pub fn kill(table: &mut ProcessTable, pid: u32) -> Result<(), KernelError> {
    let idx = table.find_by_pid(pid).ok_or(KernelError::UnknownPid)?;
    let slot = table.slot_mut(idx);
    slot.killed = true;
    if slot.state == SlotState::Sleeping {
        slot.state = SlotState::Runnable;
        slot.chan = None;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::table::ProcessTable as RawTable;

    #[test]
    fn sleep_then_wakeup_makes_slot_runnable() {
        let mut table = RawTable::new_for_test();
        let idx = table.alloc_slot("p").unwrap();
        const CHAN: usize = 0x1000;
        sleep(&mut table, idx, CHAN);
        assert_eq!(table.slot(idx).state, SlotState::Sleeping);
        wakeup(&mut table, CHAN);
        assert_eq!(table.slot(idx).state, SlotState::Runnable);
        assert_eq!(table.slot(idx).chan, None);
    }

    #[test]
    fn wakeup_on_other_channel_does_not_wake() {
        let mut table = RawTable::new_for_test();
        let idx = table.alloc_slot("p").unwrap();
        sleep(&mut table, idx, 1);
        wakeup(&mut table, 2);
        assert_eq!(table.slot(idx).state, SlotState::Sleeping);
    }

    #[test]
    fn kill_wakes_a_sleeping_process() {
        let mut table = RawTable::new_for_test();
        let idx = table.alloc_slot("p").unwrap();
        let pid = table.slot(idx).pid;
        sleep(&mut table, idx, 42);
        kill(&mut table, pid).unwrap();
        assert!(table.slot(idx).killed);
        assert_eq!(table.slot(idx).state, SlotState::Runnable);
    }

    #[test]
    fn kill_unknown_pid_errors() {
        let mut table = RawTable::new_for_test();
        assert_eq!(kill(&mut table, 9999), Err(KernelError::UnknownPid));
    }
}
