/*
 * Filesystem Consumed Interface
 *
 * A real filesystem (path resolution, on-disk inodes, journaling) is out of
 * scope for this core. What the process/thread lifecycle needs from one is
 * narrow: duplicate the open-file table across fork/thread_create, release
 * it on exit, and resolve the current working directory. `FileSystemOps` is
 * that boundary, grounded on `io::device::Device` as a swappable-trait
 * pattern the same way `vm::AddressSpaceOps` is.
 *
 * One simplification over the original this is grounded on: file reference
 * counting (`idup`/`iput`) is handled automatically by `Arc<dyn Device>` in
 * `io::fd::FileDescriptorTable`, so this trait only needs to expose the
 * operations Rust's ownership model doesn't already give for free - working
 * directory resolution and the on-disk transaction boundary.
 */

use crate::error::KernelError;

/// Opaque handle to a resolved filesystem path (an inode number, in a real
/// implementation).
pub type InodeId = u64;

pub trait FileSystemOps: Send + Sync {
    /// Resolve `path` relative to `cwd`, returning the inode it names.
    fn namei(&self, cwd: InodeId, path: &str) -> Result<InodeId, KernelError>;

    /// Begin an on-disk transaction. Paired with `end_op`.
    fn begin_op(&self);

    /// End the current on-disk transaction.
    fn end_op(&self);

    /// The inode id of the filesystem root, used to seed a new process's
    /// current working directory when it has no parent to inherit from.
    fn root_inode(&self) -> InodeId;
}
