//! Validate user-supplied pointers before the kernel dereferences them.
//!
//! Every syscall argument that names a buffer (`cputs`'s string, a
//! `net_try_transmit` frame) passes through here first. A failure here is
//! in a different class than an ordinary [`crate::error::KernelError`]: it
//! means the caller handed the kernel a bad or malicious address, and the
//! dispatcher responds by destroying the environment rather than returning
//! an error code to it.

extern crate alloc;

use alloc::vec::Vec;

use crate::{
    config::{page_align_down, PAGE_SIZE, UTOP},
    mm::{AddressSpace, FrameAllocator, PagePerm},
};

/// A user pointer failed validation: unmapped, insufficiently permissioned,
/// or out of the user range entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserPtrFault {
    pub addr: usize,
}

/// Confirm that every page touching `[va, va+len)` is mapped in `space`
/// with at least `required`, and that the whole range lies below [`UTOP`].
///
/// A zero-length range is trivially valid provided `va < UTOP`.
pub fn validate_range(
    space: &AddressSpace,
    va: usize,
    len: usize,
    required: PagePerm,
) -> Result<(), UserPtrFault> {
    if va >= UTOP || va.checked_add(len).is_none_or(|end| end > UTOP) {
        return Err(UserPtrFault { addr: va });
    }
    if len == 0 {
        return Ok(());
    }

    let first_page = page_align_down(va);
    let last_page = page_align_down(va + len - 1);
    let mut page = first_page;
    loop {
        match space.lookup(page) {
            Some((_, perm)) if perm.contains(required) => {}
            _ => return Err(UserPtrFault { addr: page }),
        }
        if page == last_page {
            break;
        }
        page += PAGE_SIZE;
    }
    Ok(())
}

/// Validate a range for reading: requires `PRESENT | USER`.
pub fn validate_readable(space: &AddressSpace, va: usize, len: usize) -> Result<(), UserPtrFault> {
    validate_range(space, va, len, PagePerm::PRESENT | PagePerm::USER)
}

/// Validate a range for writing: requires `PRESENT | USER | WRITABLE`.
pub fn validate_writable(space: &AddressSpace, va: usize, len: usize) -> Result<(), UserPtrFault> {
    validate_range(
        space,
        va,
        len,
        PagePerm::PRESENT | PagePerm::USER | PagePerm::WRITABLE,
    )
}

/// Copy `len` bytes out of a validated user range, page by page.
///
/// Callers are expected to have already run [`validate_readable`]; this
/// itself does not check permissions, only that mapped pages exist (an
/// unmapped page is treated as zeros, matching a freshly `page_alloc`'d
/// page that was never mapped at this address).
pub fn read_user_bytes(space: &AddressSpace, frames: &FrameAllocator, va: usize, len: usize) -> Vec<u8> {
    let mut out = alloc::vec![0u8; len];
    let mut cur = va;
    let mut off = 0;
    while off < len {
        let page = page_align_down(cur);
        let page_off = cur - page;
        let chunk = (PAGE_SIZE - page_off).min(len - off);
        if let Some((frame, _)) = space.lookup(page) {
            frames.read(frame, page_off, &mut out[off..off + chunk]);
        }
        cur += chunk;
        off += chunk;
    }
    out
}

/// Copy `data` into a validated user range, page by page. Bytes landing on
/// an unmapped page are silently dropped.
pub fn write_user_bytes(space: &AddressSpace, frames: &FrameAllocator, va: usize, data: &[u8]) {
    let mut cur = va;
    let mut off = 0;
    while off < data.len() {
        let page = page_align_down(cur);
        let page_off = cur - page;
        let chunk = (PAGE_SIZE - page_off).min(data.len() - off);
        if let Some((frame, _)) = space.lookup(page) {
            frames.write(frame, page_off, &data[off..off + chunk]);
        }
        cur += chunk;
        off += chunk;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_range_below_utop_is_valid() {
        let space = AddressSpace::new();
        assert!(validate_readable(&space, 0x1000, 0).is_ok());
    }

    #[test]
    fn unmapped_page_is_rejected() {
        let space = AddressSpace::new();
        assert!(validate_readable(&space, 0x1000, 4).is_err());
    }

    #[test]
    fn mapped_readonly_page_rejects_write() {
        let frames = FrameAllocator::new();
        let frame = frames.alloc().unwrap();
        let mut space = AddressSpace::new();
        space.insert(&frames, 0x1000, frame, PagePerm::PRESENT | PagePerm::USER);

        assert!(validate_readable(&space, 0x1000, 4).is_ok());
        assert!(validate_writable(&space, 0x1000, 4).is_err());
    }

    #[test]
    fn range_spanning_two_pages_requires_both_mapped() {
        let frames = FrameAllocator::new();
        let f1 = frames.alloc().unwrap();
        let mut space = AddressSpace::new();
        space.insert(&frames, 0x0000, f1, PagePerm::PRESENT | PagePerm::USER);

        // Only the first of two touched pages is mapped.
        assert!(validate_readable(&space, PAGE_SIZE - 4, 8).is_err());
    }

    #[test]
    fn address_at_or_above_utop_is_rejected() {
        let space = AddressSpace::new();
        assert!(validate_readable(&space, UTOP, 1).is_err());
    }
}
