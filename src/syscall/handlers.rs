/*
 * System Call Handlers
 *
 * This module implements the actual syscall handler functions that are
 * dispatched from the syscall entry point.
 *
 * Each handler:
 * - Validates arguments from userspace (pointers, file descriptors, etc.)
 * - Performs the requested operation
 * - Returns result or error code (negative for errors)
 *
 * Security considerations:
 * - All userspace pointers MUST be validated before dereferencing
 * - File descriptors must be checked for validity
 * - Integer overflows must be prevented
 * - Resources must be properly cleaned up on error paths
 */

use super::numbers::*;
use crate::io::device::Errno;
use crate::process::{lifecycle, WaitOutcome};
use crate::scheduler::thread::{self, ThreadExitOutcome, ThreadJoinOutcome};
use crate::scheduler::{cpu_share, sleep, SchedulerManager};

fn errno(e: Errno) -> isize {
    -(e as i32 as isize)
}

/// Validate a user pointer
///
/// Checks that a pointer from userspace is:
/// - Not NULL
/// - Within userspace address range (< 0x0000_8000_0000_0000)
/// - Does not overflow when adding count
///
/// Returns Ok(()) if valid, Err(error_code) otherwise.
fn validate_user_ptr<T>(ptr: *const T, count: usize) -> Result<(), isize> {
    let addr = ptr as usize;

    // Check for NULL pointer
    if addr == 0 {
        return Err(-EFAULT);
    }

    // Check if address is in kernel space (high half)
    if addr >= 0x0000_8000_0000_0000 {
        return Err(-EFAULT);
    }

    // Check for overflow when computing end address
    if addr.checked_add(count * core::mem::size_of::<T>()).is_none() {
        return Err(-EFAULT);
    }

    Ok(())
}

// Syscall handlers will be implemented in Phase 5
// For now, they all return ENOSYS (not implemented)

pub fn sys_read(_fd: i32, _buf: *mut u8, _count: usize) -> isize {
    -ENOSYS
}

pub fn sys_write(_fd: i32, _buf: *const u8, _count: usize) -> isize {
    -ENOSYS
}

pub fn sys_close(_fd: i32) -> isize {
    -ENOSYS
}

pub fn sys_fstat(_fd: i32, _statbuf: *mut u8) -> isize {
    -ENOSYS
}

pub fn sys_lseek(_fd: i32, _offset: i64, _whence: i32) -> isize {
    -ENOSYS
}

pub fn sys_isatty(_fd: i32) -> isize {
    -ENOSYS
}

/// `brk`: move the calling process's main thread's heap boundary to `addr`,
/// or (when `addr` is null) just report the current boundary. Built on
/// `growproc` (C5), which works in deltas rather than absolute addresses.
pub fn sys_brk(addr: *mut u8) -> isize {
    let Some(caller) = SchedulerManager::current_slot() else {
        return errno(Errno::ESRCH);
    };

    SchedulerManager::with_state(|table, _dispatcher| {
        let main = table.main_of(caller);
        let current = table.slot(main).heap;
        if addr.is_null() {
            return current as isize;
        }

        let target = addr as usize;
        let delta = target as isize - current as isize;
        match lifecycle::growproc(table, caller, delta) {
            Ok(_old_break) => target as isize,
            Err(e) => e.into(),
        }
    })
}

/// `exit`: tear down the calling process (C5) and never return to
/// userspace. The actual context switch away from this (now ZOMBIE) slot
/// happens on the next timer tick or voluntary yield, same as every other
/// slot transition in this scheduler.
pub fn sys_exit(status: i32) -> ! {
    if let Some(caller) = SchedulerManager::current_slot() {
        SchedulerManager::with_state(|table, dispatcher| {
            lifecycle::exit(table, dispatcher, SchedulerManager::init_slot(), caller, status);
        });
    }
    loop {
        SchedulerManager::yield_now();
        x86_64::instructions::hlt();
    }
}

/// `sched_yield`: voluntarily give up the CPU via the same interrupt-based
/// context switch a timer tick would trigger.
pub fn sys_yield() -> isize {
    SchedulerManager::yield_now();
    0
}

/// `fork` (C5): duplicate the caller's main thread's address space into a
/// new process. Returns the child's pid to the parent; the child's own
/// return value (0) is baked into its saved register context by `fork`
/// itself, not produced here.
pub fn sys_fork() -> isize {
    let Some(caller) = SchedulerManager::current_slot() else {
        return errno(Errno::ESRCH);
    };
    SchedulerManager::with_state(|table, _dispatcher| match lifecycle::fork(table, caller) {
        Ok(pid) => pid as isize,
        Err(e) => e.into(),
    })
}

/// `wait` (C5): block until a child exits, reaping its slot. Retries the
/// single-shot scan `lifecycle::wait` performs, sleeping on the caller's own
/// slot index as wait channel between attempts - `exit` wakes that channel
/// for every parent it reparents a zombie child onto or wakes directly.
pub fn sys_wait(status: *mut i32) -> isize {
    loop {
        let Some(caller) = SchedulerManager::current_slot() else {
            return errno(Errno::ESRCH);
        };

        let outcome = SchedulerManager::with_state(|table, _dispatcher| lifecycle::wait(table, caller));

        match outcome {
            WaitOutcome::Reaped { pid, exit_code } => {
                if !status.is_null() && validate_user_ptr(status, 1).is_ok() {
                    unsafe {
                        *status = exit_code;
                    }
                }
                return pid as isize;
            }
            WaitOutcome::NoChildren => return errno(Errno::ECHILD),
            WaitOutcome::Killed => return errno(Errno::EINTR),
            WaitOutcome::Pending => {
                SchedulerManager::with_state(|table, _dispatcher| {
                    sleep::sleep(table, caller, caller.as_usize());
                });
                SchedulerManager::yield_now();
            }
        }
    }
}

/// `kill` (C8): mark `pid` for termination, waking it if it was sleeping.
pub fn sys_kill(pid: i32) -> isize {
    SchedulerManager::with_state(|table, _dispatcher| match sleep::kill(table, pid as u32) {
        Ok(()) => 0,
        Err(e) => e.into(),
    })
}

/// `thread_create` (C9): spawn a new thread sharing the caller's main
/// thread's address space, entering at `entry` with `arg` on its stack.
pub fn sys_thread_create(entry: usize, arg: usize) -> isize {
    let Some(caller) = SchedulerManager::current_slot() else {
        return errno(Errno::ESRCH);
    };
    SchedulerManager::with_state(|table, _dispatcher| {
        match thread::thread_create(table, caller, entry, arg) {
            Ok(pid) => pid as isize,
            Err(e) => e.into(),
        }
    })
}

/// `thread_join` (C9): block until the thread named by `tid` (really its
/// pid, per this module's doc comment) exits, reaping its slot and handing
/// back its exit value through `retval`.
pub fn sys_thread_join(tid: i32, retval: *mut i32) -> isize {
    loop {
        let outcome = SchedulerManager::with_state(|table, _dispatcher| {
            thread::thread_join(table, tid as u32)
        });

        match outcome {
            ThreadJoinOutcome::Reaped { retval: value } => {
                if !retval.is_null() && validate_user_ptr(retval, 1).is_ok() {
                    unsafe {
                        *retval = value;
                    }
                }
                return 0;
            }
            ThreadJoinOutcome::NotFound => return errno(Errno::ESRCH),
            ThreadJoinOutcome::Pending => {
                let Some(caller) = SchedulerManager::current_slot() else {
                    return errno(Errno::ESRCH);
                };
                SchedulerManager::with_state(|table, _dispatcher| {
                    sleep::sleep(table, caller, caller.as_usize());
                });
                SchedulerManager::yield_now();
            }
        }
    }
}

/// `thread_exit` (C9): exit the calling thread, or (if it is its own main
/// thread) the whole process. Never returns to userspace.
pub fn sys_thread_exit(retval: i32) -> ! {
    if let Some(caller) = SchedulerManager::current_slot() {
        let outcome = SchedulerManager::with_state(|table, dispatcher| {
            thread::thread_exit(table, dispatcher, SchedulerManager::init_slot(), caller, retval)
        });
        let _ = outcome; // ExitedProcess and Zombie both leave this slot non-runnable
    }
    loop {
        SchedulerManager::yield_now();
        x86_64::instructions::hlt();
    }
}

/// `set_cpu_share` (C10): move the caller onto the Stride side of the
/// hybrid scheduler, or adjust its existing ticket count.
pub fn sys_set_cpu_share(tickets: u32) -> isize {
    let Some(caller) = SchedulerManager::current_slot() else {
        return errno(Errno::ESRCH);
    };
    SchedulerManager::with_state(|table, dispatcher| {
        match cpu_share::set_cpu_share(table, dispatcher, caller, tickets) {
            Ok(accepted) => accepted as isize,
            Err(e) => e.into(),
        }
    })
}

/// `getlev` (C10): read back the caller's current MLFQ priority level, or
/// -1 if it has been moved onto the Stride side.
pub fn sys_getlev() -> isize {
    let Some(caller) = SchedulerManager::current_slot() else {
        return errno(Errno::ESRCH);
    };
    SchedulerManager::with_state(|table, _dispatcher| cpu_share::getlev(table, caller) as isize)
}
