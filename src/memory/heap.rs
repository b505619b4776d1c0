/*
 * Kernel Heap Allocator
 *
 * Dynamic memory allocation for the kernel, built on the linked_list_allocator
 * crate. Real paging is a consumed interface (see `vm::AddressSpaceOps`), not
 * something this core reimplements, so the heap is backed by a static byte
 * array reserved in the kernel's own BSS rather than by mapping fresh
 * physical frames.
 *
 * MEMORY LAYOUT:
 * - Backing storage: a statically-sized byte array, linked into the kernel image
 * - Size: 8 MiB (configurable via HEAP_SIZE constant)
 *
 * ERROR HANDLING:
 * - Allocation failures trigger kernel panic (alloc_error_handler); this is
 *   appropriate for kernel code where OOM is typically fatal.
 */

use linked_list_allocator::LockedHeap;

/// Size of the kernel heap in bytes (8 MiB).
/// Each thread needs a PGSIZE stack, so 8 MiB supports many concurrent
/// threads plus other kernel data structures.
pub const HEAP_SIZE: usize = 8 * 1024 * 1024;

/// Backing storage for the kernel heap, reserved statically since this core
/// does not map its own virtual memory.
static mut HEAP: [u8; HEAP_SIZE] = [0; HEAP_SIZE];

/// Global allocator instance used by Rust's allocation APIs (Box, Vec, Arc, ...).
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Initialize the kernel heap.
///
/// # Safety
/// Must be called exactly once during kernel initialization, before any
/// allocation is attempted.
pub fn init() -> Result<(), &'static str> {
    log::info!("Initializing kernel heap...");
    log::info!("Heap size: {} KiB", HEAP_SIZE / 1024);

    // SAFETY: called exactly once, before anything else touches the heap.
    unsafe {
        let heap_start = core::ptr::addr_of_mut!(HEAP) as *mut u8;
        ALLOCATOR.lock().init(heap_start, HEAP_SIZE);
    }

    log::info!("Kernel heap initialized successfully");
    Ok(())
}

/// Allocation error handler (required when using a global allocator in no_std).
///
/// Allocation failure is fatal in kernel context: there is no user space to
/// return an error to.
#[alloc_error_handler]
fn alloc_error(layout: core::alloc::Layout) -> ! {
    panic!("Kernel heap allocation failed: {:?}", layout);
}
