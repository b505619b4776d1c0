/*
 * Kernel Utilities and Support Functions
 *
 * This module contains various utility functions, macros, and support
 * code used throughout the kernel. It provides common functionality
 * like logging, text output, and debugging macros.
 *
 * Key components:
 * - writer: Serial port text output functionality
 * - macros: Kernel-specific print and debug macros
 * - logger: Structured logging system for kernel messages
 * - timer: Tick counting and the scheduler's timer hooks
 * - debug: Early-boot IRQ/exception logging over COM2
 */

pub mod writer;
#[macro_use]
pub mod macros;
pub mod debug;
pub mod logger;
pub mod timer;
