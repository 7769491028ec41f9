//! Compile-time kernel constants.
//!
//! Mirrors the upstream crate's habit of keeping ABI-shaping numbers
//! (`process::MAX_PROCESSES`, `mm::FRAME_SIZE`) as `pub const`s close to the
//! subsystems that own them; the cross-cutting ones that the dispatcher and
//! several collaborators all need live here instead.

/// Page size, fixed at 4 KiB.
pub const PAGE_SIZE: usize = 4096;

/// Boundary between user-accessible and kernel-only virtual addresses.
///
/// Addresses `>= UTOP` are never valid arguments to a user-facing
/// address-space syscall.
pub const UTOP: usize = 0x0000_8000_0000_0000;

/// Maximum number of simultaneously live environments.
pub const MAX_ENVS: usize = 1024;

/// Fixed frame size `net_try_receive`/`net_mac` validate their buffers
/// against (an Ethernet MTU, not negotiated).
pub const NET_PACKET_SIZE: usize = 1514;

/// Round `addr` down to the nearest page boundary.
pub const fn page_align_down(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

/// Round `size` up to a whole number of pages.
pub const fn page_round_up(size: usize) -> usize {
    (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// `true` iff `addr` is page-aligned.
pub const fn is_page_aligned(addr: usize) -> bool {
    addr & (PAGE_SIZE - 1) == 0
}
