/*
 * Input/Output System
 *
 * Low-level port I/O primitives and the device/FD-table abstraction that
 * sits at the boundary between a thread's syscalls and the devices it has
 * open. TTY/VFS file backends are a consumed interface here, not something
 * this core implements.
 */

pub mod device;
pub mod fd;
pub mod pio;

pub use pio::{Io, Pio, ReadOnly};

pub use device::{Device, Errno};
pub use fd::FileDescriptorTable;
