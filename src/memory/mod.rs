/*
 * Memory Management
 *
 * Real virtual memory and physical frame management are a consumed
 * interface here (see `vm::AddressSpaceOps`), not something this core
 * reimplements. This module is left with the one piece that is purely
 * ambient infrastructure regardless of that boundary: the kernel's own
 * heap, which every other module allocates through.
 */

pub mod heap;

/// Top-level memory initialization: bring up the kernel heap so `alloc`
/// (`Box`, `Vec`, `Arc`, ...) is usable by the rest of boot.
pub fn init() {
    log::info!("Initializing memory management...");
    heap::init().expect("Failed to initialize kernel heap");
}
