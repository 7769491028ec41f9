//! Synchronization primitives shared across kernel subsystems.

use spin::Once;

/// Lazily-initialized global, for statics whose constructor isn't `const`.
///
/// Mirrors the upstream crate's `once_lock::GlobalState` wrapper: callers
/// call [`GlobalState::get_or_init`] instead of reaching for `unsafe`
/// mutable statics.
pub struct GlobalState<T> {
    inner: Once<T>,
}

impl<T> GlobalState<T> {
    pub const fn new() -> Self {
        Self { inner: Once::new() }
    }

    pub fn get_or_init(&self, f: impl FnOnce() -> T) -> &T {
        self.inner.call_once(f)
    }

    pub fn get(&self) -> Option<&T> {
        self.inner.get()
    }
}

impl<T> Default for GlobalState<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The kernel's single big lock.
///
/// Every syscall dispatch and every trap acquires [`KernelLock`] before
/// touching environment/address-space/scheduler state and releases it
/// before returning to user mode (or, for a blocking `ipc_recv`/`yield`,
/// before handing control to the scheduler). There is no finer-grained
/// locking inside the kernel; collaborators (`EnvTable`, `FrameAllocator`)
/// use their own internal `spin::Mutex` only to stay sound under the
/// `&EnvTable`-everywhere API shape, not to allow real concurrent access.
pub struct KernelLock {
    inner: spin::Mutex<()>,
}

impl KernelLock {
    pub const fn new() -> Self {
        Self {
            inner: spin::Mutex::new(()),
        }
    }

    pub fn lock(&self) -> KernelLockGuard<'_> {
        KernelLockGuard {
            _guard: self.inner.lock(),
        }
    }
}

impl Default for KernelLock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct KernelLockGuard<'a> {
    _guard: spin::MutexGuard<'a, ()>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_state_initializes_once() {
        let state: GlobalState<u32> = GlobalState::new();
        assert_eq!(*state.get_or_init(|| 42), 42);
        assert_eq!(*state.get_or_init(|| 7), 42);
    }

    #[test]
    fn kernel_lock_excludes() {
        let lock = KernelLock::new();
        let guard = lock.lock();
        drop(guard);
        let _guard2 = lock.lock();
    }
}
