//! Device drivers module.
//!
//! Only the console driver lives here; the network bridge's device model
//! lives under [`crate::net::device`] since it is shared with the rest of
//! the networking stack.

pub mod console;

pub use console::{get_console_driver, ConsoleDevice, ConsoleDriver, SerialConsole, VgaConsole};

/// Initialize all drivers.
pub fn init() {
    crate::println!("[DRIVERS] Initializing device drivers...");
    console::init();
    crate::println!("[DRIVERS] Device drivers initialized");
}
