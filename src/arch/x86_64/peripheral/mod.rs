/*
 * Peripheral Device Management
 *
 * This module manages the peripheral devices available to the kernel. It
 * provides initialization and access to hardware components like the COM2
 * serial port and the 8259 PIC.
 *
 * Key peripherals managed:
 * - COM2 serial port for debug logging
 * - 8259 PIC for IRQ remapping
 */

use spin::Mutex;

use crate::io::Pio;

use self::uart_16550::SerialPort;

pub mod pic;
pub mod uart_16550;

/// Mutex-protected static instance of COM2 serial port.
pub static COM2: Mutex<SerialPort<Pio<u8>>> = Mutex::new(SerialPort::<Pio<u8>>::new(0x2F8));

/// Initializes the debug port (COM2) for logging.
///
/// This function should be called early in the boot process before any logging occurs.
pub fn init_debug_port() {
    COM2.lock().init();
}

/// Initializes the peripherals (excluding debug ports, which are brought up
/// earlier so logging is available as soon as possible).
pub fn init_peripherals() {
    pic::init_pic();
    log::info!("PIC initialization complete");
}
