//! Virtual memory primitives: frame allocator + per-environment address space.
//!
//! Physical pages are modeled as an arena of reference-counted frame
//! records rather than real hardware page tables (see design notes on
//! cyclic/shared frames) -- `insert`/`lookup`/`remove` on an
//! [`AddressSpace`] are the only mutators of a frame's refcount, matching
//! the invariant that a frame's refcount equals the number of mappings
//! pointing at it.

#![allow(dead_code)]

extern crate alloc;

use alloc::{boxed::Box, collections::BTreeMap, vec::Vec};

use bitflags::bitflags;
use spin::Mutex;

use crate::{
    config::{is_page_aligned, PAGE_SIZE, UTOP},
    error::{KernelError, KernelResult},
};

pub mod user_validation;

bitflags! {
    /// Page permission bits accepted across the page_alloc/page_map/page_unmap
    /// syscall surface.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PagePerm: u64 {
        const PRESENT  = 1 << 0;
        const USER     = 1 << 2;
        const WRITABLE = 1 << 1;
        const AVAIL    = 1 << 9;
    }
}

impl PagePerm {
    /// Bits a syscall caller is allowed to request; anything outside this
    /// mask is rejected with `InvalidPermission`.
    pub const SYSCALL_MASK: Self = Self::from_bits_truncate(
        Self::PRESENT.bits() | Self::USER.bits() | Self::WRITABLE.bits() | Self::AVAIL.bits(),
    );

    /// Validate a raw permission word from a syscall argument, forcing on
    /// `PRESENT | USER` and rejecting any bit outside `SYSCALL_MASK`.
    pub fn from_syscall_word(word: u64) -> KernelResult<Self> {
        if word & !Self::SYSCALL_MASK.bits() != 0 {
            return Err(KernelError::InvalidPermission { perm: word });
        }
        Ok(Self::from_bits_truncate(word) | Self::PRESENT | Self::USER)
    }
}

/// Opaque handle to a physical frame record in the [`FrameAllocator`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameId(u32);

struct FrameRecord {
    refcount: u32,
    data: Box<[u8; PAGE_SIZE]>,
}

/// Arena of reference-counted physical page frames.
///
/// Stands in for the real physical allocator/page-directory collaborator;
/// `alloc` zero-fills a fresh frame, `incref`/`decref` track the number of
/// address-space mappings pointing at it, and the frame is freed back to
/// the arena once its refcount reaches zero.
pub struct FrameAllocator {
    frames: Mutex<Vec<Option<FrameRecord>>>,
}

impl FrameAllocator {
    pub fn new() -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
        }
    }

    /// Allocate a zero-filled frame with refcount 0; the first [`AddressSpace::insert`]
    /// that maps it brings the refcount to 1.
    pub fn alloc(&self) -> KernelResult<FrameId> {
        let mut frames = self.frames.lock();
        let record = FrameRecord {
            refcount: 0,
            data: Box::new([0u8; PAGE_SIZE]),
        };
        if let Some(slot) = frames.iter().position(|f| f.is_none()) {
            frames[slot] = Some(record);
            Ok(FrameId(slot as u32))
        } else {
            frames.push(Some(record));
            Ok(FrameId((frames.len() - 1) as u32))
        }
    }

    pub fn incref(&self, id: FrameId) {
        let mut frames = self.frames.lock();
        if let Some(Some(record)) = frames.get_mut(id.0 as usize) {
            record.refcount += 1;
        }
    }

    /// Decrement a frame's refcount, freeing it back to the arena at zero.
    /// Drop one reference to `id`, freeing the frame once the count hits zero.
    ///
    /// Every call site must have previously `incref`'d `id` (`AddressSpace::insert`
    /// does this for every mapping it creates); calling this on a frame that was
    /// never mapped is a caller bug, not a no-op.
    pub fn decref(&self, id: FrameId) {
        let mut frames = self.frames.lock();
        if let Some(slot) = frames.get_mut(id.0 as usize) {
            let free = if let Some(record) = slot {
                debug_assert!(record.refcount > 0, "decref of a frame with refcount 0");
                record.refcount -= 1;
                record.refcount == 0
            } else {
                false
            };
            if free {
                *slot = None;
            }
        }
    }

    pub fn refcount(&self, id: FrameId) -> u32 {
        self.frames
            .lock()
            .get(id.0 as usize)
            .and_then(|f| f.as_ref())
            .map(|record| record.refcount)
            .unwrap_or(0)
    }

    pub fn read(&self, id: FrameId, offset: usize, buf: &mut [u8]) {
        let frames = self.frames.lock();
        if let Some(Some(record)) = frames.get(id.0 as usize) {
            let end = (offset + buf.len()).min(PAGE_SIZE);
            let n = end.saturating_sub(offset);
            buf[..n].copy_from_slice(&record.data[offset..offset + n]);
        }
    }

    pub fn write(&self, id: FrameId, offset: usize, buf: &[u8]) {
        let mut frames = self.frames.lock();
        if let Some(Some(record)) = frames.get_mut(id.0 as usize) {
            let end = (offset + buf.len()).min(PAGE_SIZE);
            let n = end.saturating_sub(offset);
            record.data[offset..offset + n].copy_from_slice(&buf[..n]);
        }
    }
}

impl Default for FrameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// A single page-table-entry-equivalent: which frame backs a virtual page
/// and with what permission.
#[derive(Debug, Clone, Copy)]
struct Mapping {
    frame: FrameId,
    perm: PagePerm,
}

/// Per-environment virtual address space: a page-aligned-key map from
/// virtual address to physical frame, standing in for a real page
/// directory (see glossary).
pub struct AddressSpace {
    mappings: BTreeMap<usize, Mapping>,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self {
            mappings: BTreeMap::new(),
        }
    }

    /// Insert `frame` at `va` with `perm`, replacing and unmapping any
    /// existing mapping (which drops its refcount first).
    pub fn insert(&mut self, frames: &FrameAllocator, va: usize, frame: FrameId, perm: PagePerm) {
        if let Some(old) = self.mappings.insert(va, Mapping { frame, perm }) {
            frames.decref(old.frame);
        }
        frames.incref(frame);
    }

    pub fn lookup(&self, va: usize) -> Option<(FrameId, PagePerm)> {
        let key = crate::config::page_align_down(va);
        self.mappings.get(&key).map(|m| (m.frame, m.perm))
    }

    /// Remove the mapping at `va`, if any is present. A no-op (and not an
    /// error) when `va` is not mapped.
    pub fn remove(&mut self, frames: &FrameAllocator, va: usize) {
        let key = crate::config::page_align_down(va);
        if let Some(mapping) = self.mappings.remove(&key) {
            frames.decref(mapping.frame);
        }
    }

    /// Reload the hardware page-directory register for this address space.
    /// A no-op on the host test double; on bare metal this would be a
    /// `mov cr3, <root>`.
    pub fn activate(&self) {}
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a raw syscall virtual address: must be page-aligned and
/// strictly below `UTOP`.
pub fn check_user_va(va: usize) -> KernelResult<()> {
    if va >= UTOP || !is_page_aligned(va) {
        return Err(KernelError::InvalidAddress { addr: va });
    }
    Ok(())
}
