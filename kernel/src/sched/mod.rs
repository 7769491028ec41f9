//! Cooperative round-robin scheduler.
//!
//! There is no timer-driven preemption: an environment keeps the CPU until
//! it calls `yield`, blocks in `ipc_recv`, or is destroyed. [`Scheduler`]
//! only decides *which* runnable environment goes next -- the actual
//! register-state switch is the dispatcher's job (see
//! [`crate::syscall::Outcome::Resume`]).

use crate::process::{EnvId, EnvTable};

pub struct Scheduler {
    current: EnvId,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            current: EnvId::from_raw(0),
        }
    }

    pub fn current(&self) -> EnvId {
        self.current
    }

    pub fn set_current(&mut self, id: EnvId) {
        self.current = id;
    }

    /// Pick the next runnable environment after the current one, advancing
    /// `self.current` if one is found.
    pub fn yield_now(&mut self, envs: &EnvTable) -> Option<EnvId> {
        let next = envs.next_runnable_after(self.current)?;
        self.current = next;
        Some(next)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(dead_code)]
pub fn init() {
    println!("[SCHED] Initializing scheduler...");
    println!("[SCHED] Scheduler initialized");
}

#[allow(dead_code)]
pub fn run() -> ! {
    println!("[SCHED] Entering scheduler main loop");
    loop {
        crate::arch::idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yield_now_round_robins_over_runnable_envs() {
        let envs = EnvTable::new();
        let a = envs.alloc(EnvId::from_raw(0)).unwrap();
        let b = envs.alloc(EnvId::from_raw(0)).unwrap();

        let mut sched = Scheduler::new();
        sched.set_current(a);
        assert_eq!(sched.yield_now(&envs), Some(b));
        assert_eq!(sched.yield_now(&envs), Some(a));
    }

    #[test]
    fn yield_now_skips_not_runnable() {
        let envs = EnvTable::new();
        let a = envs.alloc(EnvId::from_raw(0)).unwrap();
        let b = envs.alloc(EnvId::from_raw(0)).unwrap();
        envs.with_env_mut(b, |env| env.status = crate::process::EnvStatus::NotRunnable)
            .unwrap();

        let mut sched = Scheduler::new();
        sched.set_current(a);
        assert_eq!(sched.yield_now(&envs), Some(a));
    }
}
