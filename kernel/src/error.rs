//! Kernel error types
//!
//! Internal collaborators (address-space manager, environment table,
//! scheduler) report failures through [`KernelError`]; syscall handlers
//! convert these into the stable [`crate::syscall::SyscallError`] ABI via
//! `From` impls, mirroring the upstream crate's
//! `impl From<IpcError> for SyscallError` pattern.

use core::fmt;

/// Main kernel error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// No physical frame available.
    OutOfMemory,
    /// No free slot in the environment table.
    NoFreeEnv,
    /// `envid` does not name a live environment, or checkperm failed.
    BadEnv,
    /// Address is unaligned, `>= UTOP`, or otherwise out of range.
    InvalidAddress { addr: usize },
    /// Permission word requests a bit outside `SYSCALL_MASK`.
    InvalidPermission { perm: u64 },
    /// `srcva` is not mapped in the source address space.
    Unmapped { addr: usize },
    /// A `page_map` would escalate from read-only to writable.
    WriteEscalation,
    /// Target environment is not currently blocked in `ipc_recv`.
    IpcNotRecv,
    /// `env_set_status` was asked for anything but `Runnable`/`NotRunnable`.
    InvalidStatus { value: u64 },
}

pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::NoFreeEnv => write!(f, "no free environment slots"),
            Self::BadEnv => write!(f, "bad environment id"),
            Self::InvalidAddress { addr } => write!(f, "invalid address 0x{addr:x}"),
            Self::InvalidPermission { perm } => write!(f, "invalid permission bits 0x{perm:x}"),
            Self::Unmapped { addr } => write!(f, "address 0x{addr:x} not mapped"),
            Self::WriteEscalation => write!(f, "write permission escalation refused"),
            Self::IpcNotRecv => write!(f, "target is not receiving"),
            Self::InvalidStatus { value } => write!(f, "invalid env status {value}"),
        }
    }
}
