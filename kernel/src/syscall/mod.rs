//! System call dispatch: the trusted boundary between environments and the
//! kernel.
//!
//! [`syscall`] matches a `(number, a1..a5)` tuple against the registered
//! handlers and returns a tagged [`Outcome`] instead of a bare `i32` --
//! the source conflates an ordinary return with a trapframe pop, but a
//! handler that yields, blocks in `ipc_recv`, or successfully possesses
//! another environment via `env_hyoui` never writes a return value into
//! the caller's saved registers at all. Modeling that as data lets the
//! trap-return wrapper (outside the scope of this crate -- see
//! `DESIGN.md`) route control deterministically instead of special-casing
//! syscall numbers.
//!
//! Every handler composes over a [`Kernel`]: the environment table, the
//! frame arena, and the scheduler, passed by reference rather than reached
//! for as free-floating statics.

extern crate alloc;

use core::mem::size_of;

use crate::{
    arch::x86_64::trapframe::Trapframe,
    config::{page_round_up, NET_PACKET_SIZE, PAGE_SIZE},
    error::KernelError,
    ipc,
    mm::{check_user_va, user_validation, FrameAllocator, PagePerm},
    net::{self, Packet},
    process::{EnvId, EnvStatus, EnvTable},
    sched::Scheduler,
    timer,
};

/// Syscall numbers, stable ABI (see spec glossary `§6`).
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Cputs = 0,
    Cgetc = 1,
    Getenvid = 2,
    EnvDestroy = 3,
    MapKernelPage = 4,
    Sbrk = 5,
    Yield = 6,
    Exofork = 7,
    EnvSetStatus = 8,
    PageAlloc = 9,
    PageMap = 10,
    PageUnmap = 11,
    EnvSetPgfaultUpcall = 12,
    IpcTrySend = 13,
    IpcRecv = 14,
    EnvSetTrapframe = 15,
    EnvHyoui = 16,
    TimeMsec = 17,
    NetTryTransmit = 18,
    NetTryReceive = 19,
    NetMac = 20,
}

impl TryFrom<usize> for Syscall {
    type Error = ();

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Cputs,
            1 => Self::Cgetc,
            2 => Self::Getenvid,
            3 => Self::EnvDestroy,
            4 => Self::MapKernelPage,
            5 => Self::Sbrk,
            6 => Self::Yield,
            7 => Self::Exofork,
            8 => Self::EnvSetStatus,
            9 => Self::PageAlloc,
            10 => Self::PageMap,
            11 => Self::PageUnmap,
            12 => Self::EnvSetPgfaultUpcall,
            13 => Self::IpcTrySend,
            14 => Self::IpcRecv,
            15 => Self::EnvSetTrapframe,
            16 => Self::EnvHyoui,
            17 => Self::TimeMsec,
            18 => Self::NetTryTransmit,
            19 => Self::NetTryReceive,
            20 => Self::NetMac,
            _ => return Err(()),
        })
    }
}

/// Negative error codes a handler may return to the caller.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    Inval = -1,
    BadEnv = -2,
    NoMem = -3,
    NoFree = -4,
    IpcNotRecv = -5,
}

impl From<KernelError> for SyscallError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::BadEnv => Self::BadEnv,
            KernelError::NoFreeEnv => Self::NoFree,
            KernelError::OutOfMemory => Self::NoMem,
            KernelError::IpcNotRecv => Self::IpcNotRecv,
            KernelError::InvalidAddress { .. }
            | KernelError::InvalidPermission { .. }
            | KernelError::Unmapped { .. }
            | KernelError::WriteEscalation
            | KernelError::InvalidStatus { .. } => Self::Inval,
        }
    }
}

/// A handler either reports an ordinary [`KernelError`] or discovers the
/// caller handed it a bad pointer -- a different class of failure (§7):
/// the caller is destroyed, not given a return code.
enum HandlerError {
    Kernel(KernelError),
    Fault,
}

impl From<KernelError> for HandlerError {
    fn from(err: KernelError) -> Self {
        Self::Kernel(err)
    }
}

impl From<user_validation::UserPtrFault> for HandlerError {
    fn from(_: user_validation::UserPtrFault) -> Self {
        Self::Fault
    }
}

/// What the dispatcher's caller should do with a completed syscall.
pub enum Outcome {
    /// Write `i32` into the caller's saved `eax` and resume it normally.
    Return(i32),
    /// Resume a (possibly different) environment with this trapframe --
    /// produced only by a successful `env_hyoui`.
    Resume(Trapframe),
    /// Control has already been handed to the scheduler (`yield`,
    /// `ipc_recv`, or a fatal user-pointer fault that destroyed the
    /// caller); the dispatcher's caller must not touch any trapframe.
    Reschedule,
}

/// The kernel-wide collaborators every handler is driven against.
///
/// Mirrors §9's "encapsulate behind an explicit kernel-context structure"
/// design note: no free-floating globals, even though the individual
/// collaborators (`EnvTable`, `FrameAllocator`) are internally lockable on
/// their own so they can be shared via `&Kernel` rather than `&mut`.
pub struct Kernel {
    pub envs: EnvTable,
    pub frames: FrameAllocator,
    pub scheduler: spin::Mutex<Scheduler>,
}

impl Kernel {
    pub fn new() -> Self {
        Self {
            envs: EnvTable::new(),
            frames: FrameAllocator::new(),
            scheduler: spin::Mutex::new(Scheduler::new()),
        }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

pub fn init() {
    crate::println!("[SYSCALL] dispatcher ready");
}

/// Entry point: route `(number, a1..a5)` to a handler.
///
/// Unknown syscall numbers return `-EINVAL`; everything else composes a
/// handler over `kernel` with `caller` as the invoking environment.
pub fn syscall(
    kernel: &Kernel,
    caller: EnvId,
    number: usize,
    a1: u64,
    a2: u64,
    a3: u64,
    a4: u64,
    a5: u64,
) -> Outcome {
    let Ok(call) = Syscall::try_from(number) else {
        return Outcome::Return(SyscallError::Inval as i32);
    };

    match call {
        Syscall::Yield => {
            let _ = kernel
                .envs
                .with_env_mut(caller, |env| env.trapframe.set_return_value(0));
            kernel.scheduler.lock().yield_now(&kernel.envs);
            Outcome::Reschedule
        }
        Syscall::IpcRecv => match ipc::recv(&kernel.envs, caller, a1 as usize) {
            Ok(()) => Outcome::Reschedule,
            Err(e) => Outcome::Return(SyscallError::from(e) as i32),
        },
        Syscall::EnvHyoui => match sys_env_hyoui(kernel, caller, a1 as u32) {
            Ok(tf) => Outcome::Resume(tf),
            Err(HandlerError::Kernel(e)) => Outcome::Return(SyscallError::from(e) as i32),
            Err(HandlerError::Fault) => {
                destroy_faulting(kernel, caller);
                Outcome::Reschedule
            }
        },
        other => match dispatch_returning(kernel, caller, other, a1, a2, a3, a4, a5) {
            Ok(value) => Outcome::Return(value),
            Err(HandlerError::Kernel(e)) => Outcome::Return(SyscallError::from(e) as i32),
            Err(HandlerError::Fault) => {
                destroy_faulting(kernel, caller);
                Outcome::Reschedule
            }
        },
    }
}

/// All handlers that produce an ordinary `i32` (or fatally fault) rather
/// than a suspension; split out of [`syscall`] to keep the yield/recv/
/// possession suspension points visible at the top level.
fn dispatch_returning(
    kernel: &Kernel,
    caller: EnvId,
    call: Syscall,
    a1: u64,
    a2: u64,
    a3: u64,
    a4: u64,
    a5: u64,
) -> Result<i32, HandlerError> {
    match call {
        Syscall::Cputs => sys_cputs(kernel, caller, a1 as usize, a2 as usize).map(|()| 0),
        Syscall::Cgetc => Ok(sys_cgetc()),
        Syscall::Getenvid => Ok(caller.raw() as i32),
        Syscall::EnvDestroy => sys_env_destroy(kernel, caller, a1 as u32).map_err(Into::into),
        // Debug/bootstrap primitive deliberately not reimplemented (open
        // question, §9) -- registered for ABI completeness only.
        Syscall::MapKernelPage => Err(KernelError::InvalidAddress { addr: a2 as usize }.into()),
        Syscall::Sbrk => sys_sbrk(kernel, caller, a1 as usize).map_err(Into::into),
        Syscall::Exofork => sys_exofork(kernel, caller).map_err(Into::into),
        Syscall::EnvSetStatus => {
            sys_env_set_status(kernel, caller, a1 as u32, a2).map_err(Into::into)
        }
        Syscall::PageAlloc => {
            sys_page_alloc(kernel, caller, a1 as u32, a2 as usize, a3).map_err(Into::into)
        }
        Syscall::PageMap => {
            sys_page_map(kernel, caller, a1 as u32, a2 as usize, a3 as u32, a4 as usize, a5)
                .map_err(Into::into)
        }
        Syscall::PageUnmap => sys_page_unmap(kernel, caller, a1 as u32, a2 as usize).map_err(Into::into),
        Syscall::EnvSetPgfaultUpcall => {
            sys_env_set_pgfault_upcall(kernel, caller, a1 as u32, a2 as usize).map_err(Into::into)
        }
        Syscall::IpcTrySend => {
            sys_ipc_try_send(kernel, caller, a1 as u32, a2 as u32, a3 as usize, a4).map_err(Into::into)
        }
        Syscall::EnvSetTrapframe => {
            sys_env_set_trapframe(kernel, caller, a1 as u32, a2 as usize)
        }
        Syscall::TimeMsec => Ok(timer::get_uptime_ms() as i32),
        Syscall::NetTryTransmit => sys_net_try_transmit(kernel, caller, a1 as usize, a2 as usize),
        Syscall::NetTryReceive => sys_net_try_receive(kernel, caller, a1 as usize),
        Syscall::NetMac => sys_net_mac(kernel, caller, a1 as usize),
        Syscall::Yield | Syscall::IpcRecv | Syscall::EnvHyoui => {
            unreachable!("suspension points are handled in `syscall` before reaching here")
        }
    }
}

/// Destroy a caller that handed the kernel a bad pointer. A different
/// failure mode than an ordinary error return (§7): the environment never
/// sees a result at all.
fn destroy_faulting(kernel: &Kernel, caller: EnvId) {
    log::warn!("env {:?} destroyed: invalid user pointer in syscall", caller);
    let _ = kernel.envs.destroy(caller);
}

/// Resolve `raw` against `caller`'s view of the world: `0` names the
/// caller itself (the convention every envid-taking syscall shares),
/// otherwise the id must exist and pass `checkperm`.
fn resolve_checkperm(kernel: &Kernel, caller: EnvId, raw: u32) -> Result<EnvId, KernelError> {
    let target = if raw == 0 {
        caller
    } else {
        EnvId::from_raw(raw)
    };
    if !kernel.envs.exists(target) || !kernel.envs.checkperm(caller, target) {
        return Err(KernelError::BadEnv);
    }
    Ok(target)
}

fn sys_cputs(kernel: &Kernel, caller: EnvId, s: usize, len: usize) -> Result<(), HandlerError> {
    let bytes = kernel.envs.with_env(caller, |env| {
        user_validation::validate_readable(&env.address_space, s, len)
            .map(|()| user_validation::read_user_bytes(&env.address_space, &kernel.frames, s, len))
    })??;
    crate::drivers::get_console_driver()
        .lock()
        .write_to_all(&alloc::string::String::from_utf8_lossy(&bytes));
    Ok(())
}

fn sys_cgetc() -> i32 {
    crate::drivers::get_console_driver()
        .lock()
        .read_byte()
        .map(i32::from)
        .unwrap_or(0)
}

fn sys_env_destroy(kernel: &Kernel, caller: EnvId, envid: u32) -> Result<i32, KernelError> {
    let target = resolve_checkperm(kernel, caller, envid)?;
    log::info!("env {:?} destroying env {:?}", caller, target);
    kernel.envs.destroy(target)?;
    Ok(0)
}

fn sys_exofork(kernel: &Kernel, caller: EnvId) -> Result<i32, KernelError> {
    let child = kernel.envs.alloc(caller)?;
    let mut tf = kernel.envs.with_env(caller, |env| env.trapframe)?;
    tf.set_return_value(0);
    kernel.envs.with_env_mut(child, |env| {
        env.trapframe = tf;
        env.status = EnvStatus::NotRunnable;
    })?;
    log::debug!("env {:?} exoforked env {:?}", caller, child);
    Ok(child.raw() as i32)
}

fn sys_env_set_status(
    kernel: &Kernel,
    caller: EnvId,
    envid: u32,
    status: u64,
) -> Result<i32, KernelError> {
    let target = resolve_checkperm(kernel, caller, envid)?;
    let new_status = match status {
        0 => EnvStatus::Runnable,
        1 => EnvStatus::NotRunnable,
        other => return Err(KernelError::InvalidStatus { value: other }),
    };
    kernel.envs.with_env_mut(target, |env| env.status = new_status)?;
    Ok(0)
}

fn sys_env_set_pgfault_upcall(
    kernel: &Kernel,
    caller: EnvId,
    envid: u32,
    func: usize,
) -> Result<i32, KernelError> {
    let target = resolve_checkperm(kernel, caller, envid)?;
    kernel.envs.with_env_mut(target, |env| env.pgfault_upcall = func)?;
    Ok(0)
}

fn sys_sbrk(kernel: &Kernel, caller: EnvId, inc: usize) -> Result<i32, KernelError> {
    let rounded = page_round_up(inc);
    let brk = kernel.envs.with_env(caller, |env| env.brk)?;

    let mut va = brk;
    while va < brk + rounded {
        // OOM in the region allocator is fatal and out of scope for this
        // syscall's error surface (§4.3) -- the modeled frame arena never
        // actually runs out, so this never fires in practice.
        let frame = kernel
            .frames
            .alloc()
            .expect("sbrk: physical frame allocator exhausted");
        kernel
            .envs
            .with_env_mut(caller, |env| {
                env.address_space.insert(
                    &kernel.frames,
                    va,
                    frame,
                    PagePerm::PRESENT | PagePerm::USER | PagePerm::WRITABLE,
                )
            })
            .expect("caller resolved moments ago");
        va += PAGE_SIZE;
    }

    let new_brk = brk + rounded;
    kernel.envs.with_env_mut(caller, |env| env.brk = new_brk)?;
    Ok(new_brk as i32)
}

fn sys_page_alloc(
    kernel: &Kernel,
    caller: EnvId,
    envid: u32,
    va: usize,
    perm_word: u64,
) -> Result<i32, KernelError> {
    let target = resolve_checkperm(kernel, caller, envid)?;
    check_user_va(va)?;
    let perm = PagePerm::from_syscall_word(perm_word)?;

    let frame = kernel.frames.alloc()?;
    // `target` was already resolved by `resolve_checkperm` above, so `with_env_mut`
    // cannot fail here; `insert` itself is infallible. If this ever did fail, `frame`
    // was never `incref`'d (the closure never ran) and must not be `decref`'d --
    // it's simply an unreferenced, allocated frame rather than a leak.
    kernel
        .envs
        .with_env_mut(target, |env| env.address_space.insert(&kernel.frames, va, frame, perm))?;
    Ok(0)
}

fn sys_page_map(
    kernel: &Kernel,
    caller: EnvId,
    srcenvid: u32,
    srcva: usize,
    dstenvid: u32,
    dstva: usize,
    perm_word: u64,
) -> Result<i32, KernelError> {
    let src = resolve_checkperm(kernel, caller, srcenvid)?;
    let dst = resolve_checkperm(kernel, caller, dstenvid)?;
    check_user_va(srcva)?;
    check_user_va(dstva)?;
    let perm = PagePerm::from_syscall_word(perm_word)?;

    let (frame, src_perm) = kernel
        .envs
        .with_env(src, |env| env.address_space.lookup(srcva))?
        .ok_or(KernelError::Unmapped { addr: srcva })?;
    if perm.contains(PagePerm::WRITABLE) && !src_perm.contains(PagePerm::WRITABLE) {
        return Err(KernelError::WriteEscalation);
    }

    kernel
        .envs
        .with_env_mut(dst, |env| env.address_space.insert(&kernel.frames, dstva, frame, perm))?;
    Ok(0)
}

fn sys_page_unmap(kernel: &Kernel, caller: EnvId, envid: u32, va: usize) -> Result<i32, KernelError> {
    let target = resolve_checkperm(kernel, caller, envid)?;
    check_user_va(va)?;
    kernel
        .envs
        .with_env_mut(target, |env| env.address_space.remove(&kernel.frames, va))?;
    Ok(0)
}

fn sys_ipc_try_send(
    kernel: &Kernel,
    caller: EnvId,
    envid: u32,
    value: u32,
    srcva: usize,
    perm_word: u64,
) -> Result<i32, KernelError> {
    let target = if envid == 0 { caller } else { EnvId::from_raw(envid) };
    ipc::try_send(&kernel.envs, &kernel.frames, caller, target, value, srcva, perm_word)?;
    Ok(0)
}

fn sys_env_set_trapframe(
    kernel: &Kernel,
    caller: EnvId,
    envid: u32,
    tf_va: usize,
) -> Result<i32, HandlerError> {
    let target = resolve_checkperm(kernel, caller, envid)?;
    let frame_size = size_of::<Trapframe>();

    let bytes = kernel.envs.with_env(caller, |env| {
        user_validation::validate_readable(&env.address_space, tf_va, frame_size)
            .map(|()| user_validation::read_user_bytes(&env.address_space, &kernel.frames, tf_va, frame_size))
    })??;

    let mut tf = Trapframe::zeroed();
    // SAFETY: `bytes.len() == size_of::<Trapframe>()` (just validated
    // above) and `Trapframe` is `repr(C)` plain data, so a byte-for-byte
    // copy is a valid (if possibly nonsensical, see `harden_for_user_mode`
    // below) initializer.
    unsafe {
        core::ptr::copy_nonoverlapping(bytes.as_ptr(), (&mut tf as *mut Trapframe).cast::<u8>(), frame_size);
    }
    // Never trust a caller-submitted trapframe's privilege bits (§4.3):
    // the kernel stamps CPL3 selectors and IF itself, regardless of input.
    tf.harden_for_user_mode();

    kernel.envs.with_env_mut(target, |env| env.trapframe = tf)?;
    Ok(0)
}

/// Swap trapframe and address space with `envid`, destroy it, and hand
/// back the (new) caller's trapframe for the dispatcher to resume.
fn sys_env_hyoui(kernel: &Kernel, caller: EnvId, envid: u32) -> Result<Trapframe, HandlerError> {
    let target = resolve_checkperm(kernel, caller, envid)?;
    if target == caller {
        return Err(HandlerError::Kernel(KernelError::BadEnv));
    }

    kernel.envs.swap_bodies(caller, target)?;
    log::info!("env {:?} possessed env {:?}", caller, target);
    // `target` now holds the caller's pre-swap body; destroying it is what
    // frees the caller's old identity (§4.6 step 3).
    kernel.envs.destroy(target)?;

    let new_tf = kernel.envs.with_env(caller, |env| env.trapframe)?;
    kernel.envs.with_env(caller, |env| env.address_space.activate())?;
    Ok(new_tf)
}

fn sys_net_try_transmit(
    kernel: &Kernel,
    caller: EnvId,
    buf: usize,
    len: usize,
) -> Result<i32, HandlerError> {
    let bytes = kernel.envs.with_env(caller, |env| {
        user_validation::validate_readable(&env.address_space, buf, len)
            .map(|()| user_validation::read_user_bytes(&env.address_space, &kernel.frames, buf, len))
    })??;
    match net::device::transmit(Packet::from_bytes(&bytes)) {
        Ok(()) => Ok(0),
        Err(()) => Ok(SyscallError::NoFree as i32),
    }
}

fn sys_net_try_receive(kernel: &Kernel, caller: EnvId, buf: usize) -> Result<i32, HandlerError> {
    kernel.envs.with_env(caller, |env| {
        user_validation::validate_writable(&env.address_space, buf, NET_PACKET_SIZE)
    })??;
    match net::device::receive() {
        Some(packet) => {
            kernel.envs.with_env(caller, |env| {
                user_validation::write_user_bytes(&env.address_space, &kernel.frames, buf, packet.data())
            })?;
            Ok(packet.len() as i32)
        }
        None => Ok(SyscallError::NoFree as i32),
    }
}

fn sys_net_mac(kernel: &Kernel, caller: EnvId, buf: usize) -> Result<i32, HandlerError> {
    kernel.envs.with_env(caller, |env| {
        user_validation::validate_writable(&env.address_space, buf, 6)
    })??;
    let mac = net::device::mac_address();
    kernel
        .envs
        .with_env(caller, |env| user_validation::write_user_bytes(&env.address_space, &kernel.frames, buf, &mac.0))?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::UTOP, mm::check_user_va};

    fn boot() -> (Kernel, EnvId) {
        let kernel = Kernel::new();
        let root = kernel.envs.alloc(EnvId::from_raw(0)).unwrap();
        (kernel, root)
    }

    #[test]
    fn unknown_syscall_is_invalid() {
        let (kernel, root) = boot();
        match syscall(&kernel, root, 999, 0, 0, 0, 0, 0) {
            Outcome::Return(code) => assert_eq!(code, SyscallError::Inval as i32),
            _ => panic!("expected Return"),
        }
    }

    #[test]
    fn getenvid_returns_caller() {
        let (kernel, root) = boot();
        match syscall(&kernel, root, Syscall::Getenvid as usize, 0, 0, 0, 0, 0) {
            Outcome::Return(id) => assert_eq!(id as u32, root.raw()),
            _ => panic!("expected Return"),
        }
    }

    #[test]
    fn exofork_then_set_status_runnable() {
        let (kernel, root) = boot();
        let child = match syscall(&kernel, root, Syscall::Exofork as usize, 0, 0, 0, 0, 0) {
            Outcome::Return(id) => EnvId::from_raw(id as u32),
            _ => panic!("expected Return"),
        };
        kernel
            .envs
            .with_env(child, |env| assert_eq!(env.status, EnvStatus::NotRunnable))
            .unwrap();

        match syscall(
            &kernel,
            root,
            Syscall::EnvSetStatus as usize,
            child.raw() as u64,
            0,
            0,
            0,
            0,
        ) {
            Outcome::Return(0) => {}
            _ => panic!("expected success"),
        }
        kernel
            .envs
            .with_env(child, |env| assert_eq!(env.status, EnvStatus::Runnable))
            .unwrap();
    }

    #[test]
    fn env_set_status_rejects_bad_value() {
        let (kernel, root) = boot();
        match syscall(
            &kernel,
            root,
            Syscall::EnvSetStatus as usize,
            0,
            7,
            0,
            0,
            0,
        ) {
            Outcome::Return(code) => assert_eq!(code, SyscallError::Inval as i32),
            _ => panic!("expected Return"),
        }
    }

    #[test]
    fn non_child_non_self_target_is_bad_env() {
        let (kernel, root) = boot();
        let stranger = kernel.envs.alloc(EnvId::from_raw(0)).unwrap();
        match syscall(
            &kernel,
            root,
            Syscall::EnvDestroy as usize,
            stranger.raw() as u64,
            0,
            0,
            0,
            0,
        ) {
            Outcome::Return(code) => assert_eq!(code, SyscallError::BadEnv as i32),
            _ => panic!("expected Return"),
        }
    }

    #[test]
    fn page_alloc_then_unmap_round_trips() {
        let (kernel, root) = boot();
        let perm = (PagePerm::WRITABLE | PagePerm::USER | PagePerm::PRESENT).bits();
        match syscall(
            &kernel,
            root,
            Syscall::PageAlloc as usize,
            0,
            0x4000,
            perm,
            0,
            0,
        ) {
            Outcome::Return(0) => {}
            _ => panic!("expected success"),
        }
        kernel
            .envs
            .with_env(root, |env| assert!(env.address_space.lookup(0x4000).is_some()))
            .unwrap();

        syscall(&kernel, root, Syscall::PageUnmap as usize, 0, 0x4000, 0, 0, 0);
        kernel
            .envs
            .with_env(root, |env| assert!(env.address_space.lookup(0x4000).is_none()))
            .unwrap();
    }

    #[test]
    fn page_alloc_rejects_bad_permission_bits() {
        let (kernel, root) = boot();
        match syscall(
            &kernel,
            root,
            Syscall::PageAlloc as usize,
            0,
            0x4000,
            1 << 31,
            0,
            0,
        ) {
            Outcome::Return(code) => assert_eq!(code, SyscallError::Inval as i32),
            _ => panic!("expected Return"),
        }
    }

    #[test]
    fn page_alloc_rejects_unaligned_and_utop_addresses() {
        assert!(check_user_va(1).is_err());
        assert!(check_user_va(UTOP).is_err());
    }

    #[test]
    fn fork_style_page_sharing_end_to_end() {
        let (kernel, parent) = boot();
        let child = match syscall(&kernel, parent, Syscall::Exofork as usize, 0, 0, 0, 0, 0) {
            Outcome::Return(id) => EnvId::from_raw(id as u32),
            _ => panic!(),
        };

        let rw = (PagePerm::WRITABLE | PagePerm::USER | PagePerm::PRESENT).bits();
        syscall(&kernel, parent, Syscall::PageAlloc as usize, 0, 0x400000, rw, 0, 0);
        kernel
            .envs
            .with_env_mut(parent, |env| {
                let (frame, _) = env.address_space.lookup(0x400000).unwrap();
                kernel.frames.write(frame, 0, &[0x42]);
            })
            .unwrap();

        let ro = (PagePerm::USER | PagePerm::PRESENT).bits();
        match syscall(
            &kernel,
            parent,
            Syscall::PageMap as usize,
            0,
            0x400000,
            child.raw() as u64,
            0x400000,
            ro,
        ) {
            Outcome::Return(0) => {}
            _ => panic!("expected success"),
        }

        kernel.envs.with_env(child, |env| {
            let (frame, _) = env.address_space.lookup(0x400000).unwrap();
            let mut buf = [0u8; 1];
            kernel.frames.read(frame, 0, &mut buf);
            assert_eq!(buf[0], 0x42);
        }).unwrap();

        // Write escalation from the (read-only) child mapping is refused.
        match syscall(
            &kernel,
            child,
            Syscall::PageMap as usize,
            0,
            0x400000,
            child.raw() as u64,
            0x500000,
            rw,
        ) {
            Outcome::Return(code) => assert_eq!(code, SyscallError::Inval as i32),
            _ => panic!("expected Return"),
        }
    }

    #[test]
    fn ipc_race_second_sender_loses() {
        let (kernel, _) = boot();
        let a = kernel.envs.alloc(EnvId::from_raw(0)).unwrap();
        let b = kernel.envs.alloc(EnvId::from_raw(0)).unwrap();
        let c = kernel.envs.alloc(EnvId::from_raw(0)).unwrap();

        match syscall(&kernel, c, Syscall::IpcRecv as usize, UTOP as u64, 0, 0, 0, 0) {
            Outcome::Reschedule => {}
            _ => panic!("expected Reschedule"),
        }

        match syscall(
            &kernel,
            a,
            Syscall::IpcTrySend as usize,
            c.raw() as u64,
            1,
            UTOP as u64,
            0,
            0,
        ) {
            Outcome::Return(0) => {}
            _ => panic!("expected success"),
        }
        match syscall(
            &kernel,
            b,
            Syscall::IpcTrySend as usize,
            c.raw() as u64,
            2,
            UTOP as u64,
            0,
            0,
        ) {
            Outcome::Return(code) => assert_eq!(code, SyscallError::IpcNotRecv as i32),
            _ => panic!("expected Return"),
        }
    }

    #[test]
    fn ipc_try_send_bad_perm_against_dead_target_reports_bad_env() {
        let (kernel, _) = boot();
        let a = kernel.envs.alloc(EnvId::from_raw(0)).unwrap();

        // A garbage permission word (bit 31 is outside SYSCALL_MASK) must not
        // be validated before the target-existence check: envid 999 names no
        // live environment, so this must fail with BadEnv, not Inval.
        match syscall(
            &kernel,
            a,
            Syscall::IpcTrySend as usize,
            999,
            1,
            0x1000,
            1 << 31,
            0,
        ) {
            Outcome::Return(code) => assert_eq!(code, SyscallError::BadEnv as i32),
            _ => panic!("expected Return"),
        }
    }

    #[test]
    fn ipc_try_send_bad_perm_against_non_recving_target_reports_not_recv() {
        let (kernel, _) = boot();
        let a = kernel.envs.alloc(EnvId::from_raw(0)).unwrap();
        let b = kernel.envs.alloc(EnvId::from_raw(0)).unwrap();

        // b exists but never called ipc_recv, so the garbage perm word must
        // still be validated only after the recving check, surfacing
        // IpcNotRecv rather than Inval.
        match syscall(
            &kernel,
            a,
            Syscall::IpcTrySend as usize,
            b.raw() as u64,
            1,
            0x1000,
            1 << 31,
            0,
        ) {
            Outcome::Return(code) => assert_eq!(code, SyscallError::IpcNotRecv as i32),
            _ => panic!("expected Return"),
        }
    }

    #[test]
    fn ipc_try_send_envid_zero_means_caller() {
        let (kernel, _) = boot();
        let a = kernel.envs.alloc(EnvId::from_raw(0)).unwrap();

        match syscall(&kernel, a, Syscall::IpcRecv as usize, UTOP as u64, 0, 0, 0, 0) {
            Outcome::Reschedule => {}
            _ => panic!("expected Reschedule"),
        }

        // envid 0 must resolve to the caller itself, matching the documented
        // "raw 0 means self" convention -- not BadEnv (no live env has id 0).
        match syscall(&kernel, a, Syscall::IpcTrySend as usize, 0, 7, UTOP as u64, 0, 0) {
            Outcome::Return(0) => {}
            _ => panic!("expected success"),
        }
        kernel
            .envs
            .with_env(a, |env| {
                assert_eq!(env.ipc.value, 7);
                assert_eq!(env.ipc.from, a);
            })
            .unwrap();
    }

    #[test]
    fn env_set_trapframe_hardens_privilege_bits() {
        let (kernel, root) = boot();
        let target = kernel.envs.alloc(root).unwrap();

        let mut submitted = Trapframe::zeroed();
        submitted.cs = 0x08; // kernel code selector
        submitted.rflags = 0; // IF clear

        let va = 0x9000usize;
        let frame = kernel.frames.alloc().unwrap();
        kernel
            .envs
            .with_env_mut(root, |env| {
                env.address_space
                    .insert(&kernel.frames, va, frame, PagePerm::PRESENT | PagePerm::USER);
                let bytes = unsafe {
                    core::slice::from_raw_parts(
                        (&submitted as *const Trapframe).cast::<u8>(),
                        size_of::<Trapframe>(),
                    )
                };
                user_validation::write_user_bytes(&env.address_space, &kernel.frames, va, bytes);
            })
            .unwrap();

        match syscall(
            &kernel,
            root,
            Syscall::EnvSetTrapframe as usize,
            target.raw() as u64,
            va as u64,
            0,
            0,
            0,
        ) {
            Outcome::Return(0) => {}
            _ => panic!("expected success"),
        }

        kernel
            .envs
            .with_env(target, |env| {
                assert_ne!(env.trapframe.cs, 0x08);
                assert_ne!(env.trapframe.rflags & 0x200, 0);
            })
            .unwrap();
    }

    #[test]
    fn env_hyoui_possesses_and_destroys_target() {
        let (kernel, caller) = boot();
        let target = kernel.envs.alloc(caller).unwrap();
        kernel
            .envs
            .with_env_mut(target, |env| env.trapframe.rip = 0xdead_beef)
            .unwrap();

        match syscall(
            &kernel,
            caller,
            Syscall::EnvHyoui as usize,
            target.raw() as u64,
            0,
            0,
            0,
            0,
        ) {
            Outcome::Resume(tf) => assert_eq!(tf.rip, 0xdead_beef),
            _ => panic!("expected Resume"),
        }
        assert!(!kernel.envs.exists(target));
        assert!(kernel.envs.exists(caller));
    }

    #[test]
    fn time_msec_is_monotonic_counter() {
        let (kernel, root) = boot();
        timer::timer_tick(10);
        match syscall(&kernel, root, Syscall::TimeMsec as usize, 0, 0, 0, 0, 0) {
            Outcome::Return(ms) => assert!(ms >= 10),
            _ => panic!("expected Return"),
        }
    }

    #[test]
    fn net_mac_writes_six_bytes_to_caller() {
        let (kernel, root) = boot();
        let va = 0xA000usize;
        let frame = kernel.frames.alloc().unwrap();
        kernel
            .envs
            .with_env_mut(root, |env| {
                env.address_space.insert(
                    &kernel.frames,
                    va,
                    frame,
                    PagePerm::PRESENT | PagePerm::USER | PagePerm::WRITABLE,
                )
            })
            .unwrap();

        match syscall(&kernel, root, Syscall::NetMac as usize, va as u64, 0, 0, 0, 0) {
            Outcome::Return(0) => {}
            _ => panic!("expected success"),
        }

        let mac = kernel
            .envs
            .with_env(root, |env| {
                user_validation::read_user_bytes(&env.address_space, &kernel.frames, va, 6)
            })
            .unwrap();
        assert_eq!(mac, net::device::mac_address().0);
    }

    #[test]
    fn cputs_destroys_caller_on_bad_pointer() {
        let (kernel, root) = boot();
        match syscall(&kernel, root, Syscall::Cputs as usize, 0x1000, 4, 0, 0, 0) {
            Outcome::Reschedule => {}
            _ => panic!("expected Reschedule"),
        }
        assert!(!kernel.envs.exists(root));
    }

    #[test]
    fn map_kernel_page_is_unimplemented_stub() {
        let (kernel, root) = boot();
        match syscall(&kernel, root, Syscall::MapKernelPage as usize, 0, 0, 0, 0, 0) {
            Outcome::Return(code) => assert_eq!(code, SyscallError::Inval as i32),
            _ => panic!("expected Return"),
        }
    }
}
