//! Single-slot synchronous IPC rendezvous.
//!
//! Every environment has exactly one receive slot ([`crate::process::IpcState`]).
//! `recv` parks the caller in that slot; `try_send` is the non-blocking
//! producer side that fills it. There is no queueing -- a sender that loses
//! the race to a slot gets `IpcNotRecv` and is expected to retry (typically
//! via `yield`).

use crate::{
    config::UTOP,
    error::{KernelError, KernelResult},
    mm::{check_user_va, FrameAllocator, PagePerm},
    process::{EnvId, EnvStatus, EnvTable},
};

pub fn init() {
    crate::println!("[IPC] rendezvous ready");
}

/// Block the caller in `ipc_recv`.
///
/// `dstva` below [`UTOP`] opts into a page transfer and must be
/// page-aligned; `dstva >= UTOP` declines one.
pub fn recv(envs: &EnvTable, caller: EnvId, dstva: usize) -> KernelResult<()> {
    if dstva < UTOP {
        check_user_va(dstva)?;
    }

    envs.with_env_mut(caller, |env| {
        env.ipc.recving = true;
        env.ipc.dstva = dstva;
        env.status = EnvStatus::NotRunnable;
    })
}

/// Attempt to deliver `value` (and, optionally, a page) to `target`.
///
/// Unlike every other syscall that names an `envid`, this does **not**
/// checkperm -- any environment may send to any other.
///
/// Argument validation is deliberately ordered to match the reference
/// `sys_ipc_try_send`: `target` existence and its `ipc_recv` readiness are
/// checked first, and only once both hold is `perm_word` (or `srcva`)
/// inspected. A malformed permission word sent at a target that doesn't
/// exist or isn't receiving must surface as `BadEnv`/`IpcNotRecv`, not
/// `InvalidPermission`.
pub fn try_send(
    envs: &EnvTable,
    frames: &FrameAllocator,
    caller: EnvId,
    target: EnvId,
    value: u32,
    srcva: usize,
    perm_word: u64,
) -> KernelResult<()> {
    if !envs.exists(target) {
        return Err(KernelError::BadEnv);
    }
    if !envs.with_env(target, |env| env.ipc.recving)? {
        return Err(KernelError::IpcNotRecv);
    }

    let sending_page = srcva < UTOP;
    let transfer = if sending_page {
        check_user_va(srcva)?;
        let perm = PagePerm::from_syscall_word(perm_word)?;
        let (frame, caller_perm) = envs
            .with_env(caller, |env| env.address_space.lookup(srcva))?
            .ok_or(KernelError::Unmapped { addr: srcva })?;
        if perm.contains(PagePerm::WRITABLE) && !caller_perm.contains(PagePerm::WRITABLE) {
            return Err(KernelError::WriteEscalation);
        }
        let dstva = envs.with_env(target, |env| env.ipc.dstva)?;
        (dstva < UTOP).then_some((frame, perm))
    } else {
        None
    };

    envs.with_env_mut(target, |env| {
        if let Some((frame, perm)) = transfer {
            let dstva = env.ipc.dstva;
            env.address_space.insert(frames, dstva, frame, perm);
            env.ipc.perm = perm;
        } else {
            env.ipc.perm = PagePerm::empty();
        }
        env.ipc.value = value;
        env.ipc.from = caller;
        env.ipc.recving = false;
        env.trapframe.set_return_value(0);
        env.status = EnvStatus::Runnable;
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_without_receiver_is_rejected() {
        let envs = EnvTable::new();
        let frames = FrameAllocator::new();
        let a = envs.alloc(EnvId::from_raw(0)).unwrap();
        let b = envs.alloc(EnvId::from_raw(0)).unwrap();

        let err = try_send(&envs, &frames, a, b, 42, UTOP, 0).unwrap_err();
        assert_eq!(err, KernelError::IpcNotRecv);
    }

    #[test]
    fn recv_then_send_delivers_value() {
        let envs = EnvTable::new();
        let frames = FrameAllocator::new();
        let a = envs.alloc(EnvId::from_raw(0)).unwrap();
        let b = envs.alloc(EnvId::from_raw(0)).unwrap();

        recv(&envs, b, UTOP).unwrap();
        try_send(&envs, &frames, a, b, 99, UTOP, 0).unwrap();

        envs.with_env(b, |env| {
            assert_eq!(env.ipc.value, 99);
            assert_eq!(env.ipc.from, a);
            assert!(!env.ipc.recving);
            assert_eq!(env.status, EnvStatus::Runnable);
        })
        .unwrap();
    }

    #[test]
    fn page_transfer_requires_both_sides_opted_in() {
        let envs = EnvTable::new();
        let frames = FrameAllocator::new();
        let a = envs.alloc(EnvId::from_raw(0)).unwrap();
        let b = envs.alloc(EnvId::from_raw(0)).unwrap();

        let frame = frames.alloc().unwrap();
        envs.with_env_mut(a, |env| {
            env.address_space
                .insert(&frames, 0x1000, frame, PagePerm::PRESENT | PagePerm::USER);
        })
        .unwrap();

        recv(&envs, b, 0x2000).unwrap();
        try_send(
            &envs,
            &frames,
            a,
            b,
            1,
            0x1000,
            (PagePerm::PRESENT | PagePerm::USER).bits(),
        )
        .unwrap();

        envs.with_env(b, |env| {
            assert!(env.address_space.lookup(0x2000).is_some());
            assert_eq!(env.ipc.perm, PagePerm::PRESENT | PagePerm::USER);
        })
        .unwrap();
    }

    #[test]
    fn write_escalation_is_refused() {
        let envs = EnvTable::new();
        let frames = FrameAllocator::new();
        let a = envs.alloc(EnvId::from_raw(0)).unwrap();
        let b = envs.alloc(EnvId::from_raw(0)).unwrap();

        let frame = frames.alloc().unwrap();
        envs.with_env_mut(a, |env| {
            env.address_space
                .insert(&frames, 0x1000, frame, PagePerm::PRESENT | PagePerm::USER);
        })
        .unwrap();

        recv(&envs, b, 0x2000).unwrap();
        let err = try_send(
            &envs,
            &frames,
            a,
            b,
            1,
            0x1000,
            (PagePerm::PRESENT | PagePerm::USER | PagePerm::WRITABLE).bits(),
        )
        .unwrap_err();
        assert_eq!(err, KernelError::WriteEscalation);
    }

    #[test]
    fn second_sender_loses_the_race() {
        let envs = EnvTable::new();
        let frames = FrameAllocator::new();
        let a = envs.alloc(EnvId::from_raw(0)).unwrap();
        let b = envs.alloc(EnvId::from_raw(0)).unwrap();
        let c = envs.alloc(EnvId::from_raw(0)).unwrap();

        recv(&envs, c, UTOP).unwrap();
        try_send(&envs, &frames, a, c, 1, UTOP, 0).unwrap();
        let err = try_send(&envs, &frames, b, c, 2, UTOP, 0).unwrap_err();
        assert_eq!(err, KernelError::IpcNotRecv);
    }
}
