/*
 * Kernel Error Types
 *
 * Internal fallible kernel operations (slot allocation, ticket accounting,
 * pid lookups) return `Result<T, KernelError>` rather than threading raw
 * negative integers through every call site. The syscall boundary is the
 * one place this gets collapsed to the `isize` convention userspace expects,
 * mirroring how `io::device::Errno` is the single currency at the FD-table
 * boundary.
 */

/// Internal kernel error, converted to a negative `isize` at the syscall boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// No UNUSED slot available in the process table.
    NoFreeSlot,
    /// Accepting a ticket request would push `total_tickets` over the cap.
    TicketCapExceeded,
    /// `tickets == 0` was requested.
    ZeroTickets,
    /// A pid/tid named in a syscall does not correspond to a live slot.
    UnknownPid,
    /// The caller has no children to wait for.
    NoChildren,
    /// The VM or FS consumed-interface call failed (page allocation, copy, etc).
    AddressSpaceFailure,
    /// A reentrancy guard (`exit_guard`/`create_guard`) was already held.
    Reentrant,
}

impl KernelError {
    /// The POSIX-style errno this error surfaces as from a syscall.
    pub const fn errno(self) -> crate::io::device::Errno {
        use crate::io::device::Errno;
        match self {
            KernelError::NoFreeSlot => Errno::EAGAIN,
            KernelError::TicketCapExceeded => Errno::EINVAL,
            KernelError::ZeroTickets => Errno::EINVAL,
            KernelError::UnknownPid => Errno::ESRCH,
            KernelError::NoChildren => Errno::ECHILD,
            KernelError::AddressSpaceFailure => Errno::ENOMEM,
            KernelError::Reentrant => Errno::EBUSY,
        }
    }
}

/// Collapse a `Result<T, KernelError>` into the syscall `-1` convention this
/// core's calls use (§6/§7): success isn't representable generically here,
/// callers extract their own success value and only reach for this on the
/// error path.
impl From<KernelError> for isize {
    fn from(err: KernelError) -> isize {
        -(err.errno() as i32 as isize)
    }
}
