/*
 * Address Space Consumed Interface
 *
 * Real virtual memory (page tables, physical frame allocation, copy-on-fork)
 * is out of scope for this core - the process/thread lifecycle only needs
 * *some* address space to grow, duplicate, and tear down on the events
 * this core drives (fork, growproc, thread_create, exit). `AddressSpaceOps`
 * is that boundary, expressed the way `io::device::Device` is a swappable
 * boundary for character devices: a trait object the lifecycle code calls
 * through, with no assumption about what backs it.
 *
 * Grounded on `copyuvm`/`allocuvm`/`deallocuvm`/`switchuvm`/`inituvm`/
 * `setupkvm`/`copyout` call sites in the source this core's control flow is
 * grounded on; naming kept close to those so the mapping from spec
 * operation to trait method stays obvious.
 */

use alloc::boxed::Box;
use crate::error::KernelError;

/// One process's (or, for threads, one address-space-sharing group's) view
/// onto virtual memory. A real implementation would back this with page
/// tables; this core only ever calls through the trait.
pub trait AddressSpaceOps: Send + Sync {
    /// Map the kernel's own text/data into this address space, as every
    /// address space must be able to service syscalls/interrupts.
    fn setupkvm(&mut self) -> Result<(), KernelError>;

    /// Load a fresh program image at the bottom of userspace, used when
    /// creating the very first process. Returns the new total size.
    fn inituvm(&mut self, image: &[u8]) -> Result<usize, KernelError>;

    /// Grow (if `new_size > old_size`) or shrink (otherwise) the process
    /// heap. Returns the resulting size on success.
    fn allocuvm(&mut self, old_size: usize, new_size: usize) -> Result<usize, KernelError>;

    /// Shrink the address space, freeing any pages that fell below
    /// `new_size`. Returns the resulting size.
    fn deallocuvm(&mut self, old_size: usize, new_size: usize) -> Result<usize, KernelError>;

    /// Deep-copy this address space (copy-on-fork). Used by `fork`; never
    /// called for `thread_create`, which shares the parent's address space
    /// instead of copying it.
    fn copyuvm(&self) -> Result<Box<dyn AddressSpaceOps>, KernelError>;

    /// Copy `data` into this address space at virtual address `va`, used to
    /// plant a new thread's initial stack frame.
    fn copyout(&mut self, va: usize, data: &[u8]) -> Result<(), KernelError>;

    /// Make this the active address space on the current CPU.
    fn switchuvm(&self);

    /// Release every mapping and backing frame. Called once, when the last
    /// thread sharing this address space has exited.
    fn freevm(&mut self);
}

/// Switch the current CPU back to the kernel's own address space, used when
/// no process is running. This has no per-process state to operate on, so
/// it isn't part of `AddressSpaceOps`; a real implementation lives in the
/// arch-specific boot/dispatch glue, not in this core.
pub fn switchkvm() {}
