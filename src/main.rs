/*
 * Hybrid MLFQ/Stride Teaching Kernel - Boot Entry Point
 *
 * Bare-metal entry point that brings up the machine far enough to create
 * the first process and hand control to the scheduler. The process/thread
 * table and the hybrid MLFQ/Stride dispatcher themselves live in the
 * library crate (`strideq_kernel`) so their `#[cfg(test)]` modules can run
 * hosted; this binary only wires them to real hardware.
 *
 * Boot sequence:
 * 1. Bring up COM2 + the structured logger as early as possible
 * 2. GDT, then IDT (order matters: IDT needs the GDT's TSS selector for
 *    the double-fault IST)
 * 3. SYSCALL/SYSRET MSRs
 * 4. Kernel heap, so `alloc` is usable by everything after this point
 * 5. PIC remap
 * 6. Scheduler state + the first process (`userinit`)
 * 7. Enable interrupts and hand off to the scheduler
 */

#![no_std]
#![no_main]
#![feature(abi_x86_interrupt)]
#![feature(alloc_error_handler)]
#![allow(dead_code)]

extern crate alloc;

use alloc::boxed::Box;
use core::panic::PanicInfo;

use strideq_kernel::error::KernelError;
use strideq_kernel::fs_iface::InodeId;
use strideq_kernel::process::{self, lifecycle, ProcessManager, SlotIndex};
use strideq_kernel::scheduler::SchedulerManager;
use strideq_kernel::vm::AddressSpaceOps;
use strideq_kernel::{arch, syscall, utils};

mod memory;

#[repr(C, align(16))]
pub struct AlignedBspStack([u8; 64 * 1024]);

#[unsafe(no_mangle)]
pub static mut BSP_STACK: AlignedBspStack = AlignedBspStack([0; 64 * 1024]);

/// Placeholder init-process image. A real loader (out of scope for this
/// core; see `vm::AddressSpaceOps`) would hand `userinit` the first
/// userspace binary's bytes here.
static INIT_IMAGE: [u8; 16] = [0; 16];

/// Root filesystem inode handed to the first process's `cwd`. Filesystem
/// lookup is a consumed interface (`fs_iface::FileSystemOps`), not
/// something this core resolves itself.
const ROOT_INODE: InodeId = 0;

/// Stand-in address space for the first process. Real paging/virtual
/// memory is out of scope for this core (see `vm::AddressSpaceOps`); this
/// type just tracks the bookkeeping `userinit`/`growproc` expect so the
/// scheduler has a first process to run.
struct BootAddrSpace;

impl BootAddrSpace {
    const fn new() -> Self {
        BootAddrSpace
    }
}

impl AddressSpaceOps for BootAddrSpace {
    fn setupkvm(&mut self) -> Result<(), KernelError> {
        Ok(())
    }

    fn inituvm(&mut self, image: &[u8]) -> Result<usize, KernelError> {
        Ok(image.len().max(process::PGSIZE))
    }

    fn allocuvm(&mut self, _old_size: usize, new_size: usize) -> Result<usize, KernelError> {
        Ok(new_size)
    }

    fn deallocuvm(&mut self, _old_size: usize, new_size: usize) -> Result<usize, KernelError> {
        Ok(new_size)
    }

    fn copyuvm(&self) -> Result<Box<dyn AddressSpaceOps>, KernelError> {
        Ok(Box::new(BootAddrSpace::new()))
    }

    fn copyout(&mut self, _va: usize, _data: &[u8]) -> Result<(), KernelError> {
        Ok(())
    }

    fn switchuvm(&self) {}

    fn freevm(&mut self) {}
}

/// ===============================
///  EARLY ENTRY POINT (_start)
/// ===============================
///
/// Called directly by the bootloader on ALL CORES.
/// Required to:
///   - Identify the bootstrap processor
///   - Switch to our own 64 KiB kernel stack
///   - Call into Rust's `kstart`
///   - Park application processors
///
#[unsafe(naked)]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn _start() -> ! {
    core::arch::naked_asm!(
        // CPUID leaf 1 -> EBX[31:24] = local APIC ID
        "mov eax, 1",
        "cpuid",
        "shr ebx, 24",

        // Only core 0 runs the kernel; everyone else parks. A real SMP
        // boot would read the bootstrap processor id out of the loader's
        // handoff structure instead of hardcoding it, but that structure
        // is loader-specific and out of scope for this core.
        "cmp ebx, 0",
        "jne 2f",

        // Switch to our 64 KiB BSP stack
        "lea rax, [rip + BSP_STACK]",
        "add rax, {stack_size}",
        "mov rsp, rax",

        "jmp kstart",

        "2:",
        "1:",
        "hlt",
        "jmp 1b",

        stack_size = const 64 * 1024,
    );
}

/// ===============================
///  RUST KERNEL ENTRY POINT
/// ===============================
///
/// Now running on our own kernel stack. Application processors never run
/// this function.
///
#[unsafe(no_mangle)]
pub extern "C" fn kstart() -> ! {
    utils::debug::init_debug_infrastructure();
    utils::logger::init(true);
    log::info!("Hybrid MLFQ/Stride kernel starting...");

    arch::x86_64::gdt::init();
    // Must come before memory::init(): any exception before the IDT is
    // loaded triple faults the machine.
    arch::x86_64::idt::init();
    syscall::init();

    memory::init();
    arch::x86_64::peripheral::init_peripherals();

    SchedulerManager::init();

    let init_slot = ProcessManager::with(|table| {
        lifecycle::userinit(table, Box::new(BootAddrSpace::new()), &INIT_IMAGE, ROOT_INODE)
            .expect("failed to create the init process")
    });
    mark_runnable(init_slot);

    SchedulerManager::enable(init_slot);

    x86_64::instructions::interrupts::enable();
    log::info!("Interrupts enabled - hybrid MLFQ/Stride scheduler is live");

    // Emergency idle: timer interrupts preempt us into the scheduler
    // whenever a runnable slot exists.
    loop {
        x86_64::instructions::hlt();
    }
}

/// `userinit` leaves its slot in `Embryo`, same as xv6 - it becomes
/// `Runnable` once the caller is ready to let the scheduler see it.
fn mark_runnable(idx: SlotIndex) {
    ProcessManager::with(|table| {
        table.slot_mut(idx).state = process::SlotState::Runnable;
    });
}

///  PANIC HANDLER
/// ===============================
///
/// Logging may fail very early in boot, but is safe once the logger is up.
///
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    x86_64::instructions::interrupts::disable();

    if let Some(location) = info.location() {
        log::error!(
            "PANIC at {}:{}: {}",
            location.file(),
            location.line(),
            info.message()
        );
    } else {
        log::error!("PANIC: {}", info.message());
    }

    loop {
        x86_64::instructions::hlt();
    }
}
