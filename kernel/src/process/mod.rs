//! Environment management: the kernel's sole unit of execution.
//!
//! An "environment" plays the role a process/thread pair would in a more
//! conventional kernel, but is deliberately flatter: one trapframe, one
//! address space, no kernel-mode threads. [`EnvTable`] replaces the
//! upstream crate's `ProcessTable`; unlike it, access is mediated entirely
//! through [`EnvTable::with_env`] / [`EnvTable::with_env_mut`] closures
//! rather than returning `&'static` references extracted via raw-pointer
//! lifetime extension out of a lock guard.

#![allow(dead_code)]

extern crate alloc;

use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use crate::{
    arch::x86_64::trapframe::Trapframe,
    config::MAX_ENVS,
    error::{KernelError, KernelResult},
    mm::{AddressSpace, PagePerm},
};

/// Number of bits of an [`EnvId`] reserved for the generation counter; the
/// rest address a slot in the environment table. Guards against a stale
/// `envid` (captured before the slot was reused) being mistaken for the
/// environment now occupying that slot.
const GEN_SHIFT: u32 = 16;
const INDEX_MASK: u32 = (1 << GEN_SHIFT) - 1;

/// Opaque handle to an environment: `(generation << GEN_SHIFT) | index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnvId(u32);

impl EnvId {
    fn new(generation: u32, index: usize) -> Self {
        Self((generation << GEN_SHIFT) | (index as u32 & INDEX_MASK))
    }

    fn index(self) -> usize {
        (self.0 & INDEX_MASK) as usize
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

/// Environment scheduling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvStatus {
    /// Slot is unoccupied.
    Free,
    /// Eligible to be scheduled.
    Runnable,
    /// Alive but not currently eligible (blocked in `ipc_recv`).
    NotRunnable,
    /// Marked for reaping; still occupies its slot until destroyed.
    Dying,
}

/// The single-slot IPC rendezvous state attached to every environment.
#[derive(Debug, Clone, Copy)]
pub struct IpcState {
    /// Set while blocked inside `ipc_recv`.
    pub recving: bool,
    /// Destination page for an incoming page transfer; `0` declines one.
    pub dstva: usize,
    /// Sender of the most recently delivered message.
    pub from: EnvId,
    /// 32-bit payload of the most recently delivered message.
    pub value: u32,
    /// Permissions the transferred page (if any) was mapped with.
    pub perm: PagePerm,
}

impl IpcState {
    const fn new() -> Self {
        Self {
            recving: false,
            dstva: 0,
            from: EnvId(0),
            value: 0,
            perm: PagePerm::empty(),
        }
    }
}

/// A single environment: its saved register state, address space, and
/// IPC mailbox.
pub struct Env {
    pub id: EnvId,
    pub parent_id: EnvId,
    pub status: EnvStatus,
    pub trapframe: Trapframe,
    pub address_space: AddressSpace,
    /// Current top of the heap, advanced by `sbrk`.
    pub brk: usize,
    /// User-mode entry point to invoke on a page fault; `0` means none
    /// registered, so a fault destroys the environment.
    pub pgfault_upcall: usize,
    pub ipc: IpcState,
}

impl Env {
    fn new(id: EnvId, parent_id: EnvId) -> Self {
        Self {
            id,
            parent_id,
            status: EnvStatus::Runnable,
            trapframe: Trapframe::zeroed(),
            address_space: AddressSpace::new(),
            brk: 0,
            pgfault_upcall: 0,
            ipc: IpcState::new(),
        }
    }
}

struct Slot {
    generation: u32,
    env: Option<Env>,
}

/// The table of all live environments.
///
/// Mirrors the role of the upstream crate's `ProcessTable`, but every
/// accessor takes a closure so a `&mut Env` never escapes the internal
/// lock.
pub struct EnvTable {
    slots: Mutex<BTreeMap<usize, Slot>>,
    next_index: AtomicU32,
}

impl EnvTable {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(BTreeMap::new()),
            next_index: AtomicU32::new(0),
        }
    }

    /// Allocate a new environment as a child of `parent_id`.
    pub fn alloc(&self, parent_id: EnvId) -> KernelResult<EnvId> {
        let mut slots = self.slots.lock();

        // `destroy` leaves a slot's entry in the map (with `env: None`) so its
        // generation survives for stale-id detection, so counting map entries
        // here would count destroyed environments as live. Count occupancy
        // instead, and search for an actually free index -- `next_index` is
        // only a starting hint, not a guarantee the slot it names is free.
        let live = slots.values().filter(|s| s.env.is_some()).count();
        if live >= MAX_ENVS {
            return Err(KernelError::NoFreeEnv);
        }

        let start = self.next_index.load(Ordering::Relaxed) as usize % MAX_ENVS;
        let index = (0..MAX_ENVS)
            .map(|offset| (start + offset) % MAX_ENVS)
            .find(|idx| slots.get(idx).is_none_or(|s| s.env.is_none()))
            .expect("live count below MAX_ENVS guarantees a free index");
        self.next_index.store((index + 1) as u32, Ordering::Relaxed);

        let generation = slots.get(&index).map(|s| s.generation + 1).unwrap_or(1);
        let id = EnvId::new(generation, index);

        slots.insert(
            index,
            Slot {
                generation,
                env: Some(Env::new(id, parent_id)),
            },
        );
        Ok(id)
    }

    /// Remove an environment from the table entirely.
    pub fn destroy(&self, id: EnvId) -> KernelResult<()> {
        let mut slots = self.slots.lock();
        match slots.get_mut(&id.index()) {
            Some(slot) if slot.generation == id.0 >> GEN_SHIFT && slot.env.is_some() => {
                slot.env = None;
                Ok(())
            }
            _ => Err(KernelError::BadEnv),
        }
    }

    /// Look up whether `caller` may act on `target`: the caller's own
    /// environment, or the parent of `target`.
    pub fn checkperm(&self, caller: EnvId, target: EnvId) -> bool {
        if caller == target {
            return true;
        }
        self.with_env(target, |env| env.parent_id == caller)
            .unwrap_or(false)
    }

    pub fn with_env<R>(&self, id: EnvId, f: impl FnOnce(&Env) -> R) -> KernelResult<R> {
        let slots = self.slots.lock();
        match slots.get(&id.index()) {
            Some(slot) if slot.generation == id.0 >> GEN_SHIFT => {
                slot.env.as_ref().map(f).ok_or(KernelError::BadEnv)
            }
            _ => Err(KernelError::BadEnv),
        }
    }

    pub fn with_env_mut<R>(&self, id: EnvId, f: impl FnOnce(&mut Env) -> R) -> KernelResult<R> {
        let mut slots = self.slots.lock();
        match slots.get_mut(&id.index()) {
            Some(slot) if slot.generation == id.0 >> GEN_SHIFT => {
                slot.env.as_mut().map(f).ok_or(KernelError::BadEnv)
            }
            _ => Err(KernelError::BadEnv),
        }
    }

    /// Find an environment blocked in `ipc_recv` that is willing to accept
    /// a message from `from`: used by `ipc_try_send`.
    pub fn find_receiving(&self, target: EnvId) -> KernelResult<()> {
        self.with_env(target, |env| env.ipc.recving)?
            .then_some(())
            .ok_or(KernelError::IpcNotRecv)
    }

    pub fn exists(&self, id: EnvId) -> bool {
        self.with_env(id, |_| ()).is_ok()
    }

    /// Exchange trapframe and address space between two live environments,
    /// leaving `id`/`parent_id` untouched. Used by `env_hyoui`: the
    /// closure-based `with_env`/`with_env_mut` API can only ever borrow one
    /// slot at a time, so a possession swap has to drop to the table's
    /// lock directly.
    pub fn swap_bodies(&self, a: EnvId, b: EnvId) -> KernelResult<()> {
        let mut slots = self.slots.lock();
        let (a_idx, b_idx) = (a.index(), b.index());
        if a_idx == b_idx {
            return Err(KernelError::BadEnv);
        }

        let valid = |slots: &BTreeMap<usize, Slot>, id: EnvId, idx: usize| {
            slots
                .get(&idx)
                .is_some_and(|s| s.generation == id.0 >> GEN_SHIFT && s.env.is_some())
        };
        if !valid(&slots, a, a_idx) || !valid(&slots, b, b_idx) {
            return Err(KernelError::BadEnv);
        }

        let mut slot_a = slots.remove(&a_idx).expect("validated above");
        let mut slot_b = slots.remove(&b_idx).expect("validated above");
        {
            let env_a = slot_a.env.as_mut().expect("validated above");
            let env_b = slot_b.env.as_mut().expect("validated above");
            core::mem::swap(&mut env_a.trapframe, &mut env_b.trapframe);
            core::mem::swap(&mut env_a.address_space, &mut env_b.address_space);
        }
        slots.insert(a_idx, slot_a);
        slots.insert(b_idx, slot_b);
        Ok(())
    }

    /// Round-robin the next runnable environment strictly after `after`'s
    /// slot, wrapping back to the start of the table. Used by the
    /// cooperative scheduler's `yield_now`.
    pub fn next_runnable_after(&self, after: EnvId) -> Option<EnvId> {
        let slots = self.slots.lock();
        let start = after.index();

        let runnable = |slot: &Slot| {
            slot.env
                .as_ref()
                .filter(|env| env.status == EnvStatus::Runnable)
                .map(|env| env.id)
        };

        slots
            .range(start + 1..)
            .find_map(|(_, slot)| runnable(slot))
            .or_else(|| slots.range(..=start).find_map(|(_, slot)| runnable(slot)))
    }
}

impl Default for EnvTable {
    fn default() -> Self {
        Self::new()
    }
}

pub fn init() {
    crate::println!("[PROCESS] environment table ready");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_assigns_distinct_ids() {
        let table = EnvTable::new();
        let a = table.alloc(EnvId(0)).unwrap();
        let b = table.alloc(EnvId(0)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn destroy_then_reuse_bumps_generation() {
        let table = EnvTable::new();
        let a = table.alloc(EnvId(0)).unwrap();
        table.destroy(a).unwrap();
        assert!(table.with_env(a, |_| ()).is_err(), "stale id must not resolve");
    }

    #[test]
    fn destroy_frees_the_slot_for_reallocation() {
        let table = EnvTable::new();
        // Churn through more allocations than MAX_ENVS, destroying each one
        // before allocating the next. If destroyed slots were never
        // reclaimed, this would eventually return NoFreeEnv despite there
        // being at most one live environment at a time.
        for _ in 0..(crate::config::MAX_ENVS * 2) {
            let id = table.alloc(EnvId(0)).unwrap();
            table.destroy(id).unwrap();
        }
    }

    #[test]
    fn checkperm_allows_self_and_parent_only() {
        let table = EnvTable::new();
        let parent = table.alloc(EnvId(0)).unwrap();
        let child = table.alloc(parent).unwrap();
        let stranger = table.alloc(EnvId(0)).unwrap();

        assert!(table.checkperm(child, child));
        assert!(table.checkperm(parent, child));
        assert!(!table.checkperm(stranger, child));
    }

    #[test]
    fn bad_envid_is_rejected() {
        let table = EnvTable::new();
        assert!(table.with_env(EnvId(0xFFFF_FFFF), |_| ()).is_err());
    }
}
