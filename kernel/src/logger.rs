//! Wires the `log` facade to the active console device.
//!
//! Syscall dispatch, environment lifecycle, and IPC rendezvous transitions
//! log through `log::{debug, info, warn, error}` rather than raw
//! `println!`, mirroring the upstream crate's driver/network modules. On
//! the host test target this is inert -- `log`'s macros no-op until
//! [`init`] installs a logger, and tests assert on return values instead of
//! captured output.

use log::{LevelFilter, Log, Metadata, Record};

struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= LevelFilter::Debug
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            crate::println!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Install the kernel logger. Idempotent; safe to call at most once per
/// boot (subsequent calls are rejected by the `log` crate and ignored).
pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Debug);
    }
}
