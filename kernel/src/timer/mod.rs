//! Software timer wheel sitting above the hardware tick source.
//!
//! Drives [`crate::syscall`]'s `time_msec` via [`get_uptime_ms`]; the wheel
//! itself is otherwise independent of the syscall surface and could back
//! scheduler-internal sleeps if the cooperative scheduler grows them.

use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::sync::GlobalState;

const TIMER_WHEEL_SLOTS: usize = 256;
const MAX_TIMERS: usize = 1024;

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);
static TIMER_WHEEL: GlobalState<Mutex<TimerWheel>> = GlobalState::new();
static UPTIME_MS: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a registered timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

impl TimerId {
    fn next() -> Self {
        Self(NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Timer firing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    OneShot,
    Periodic,
}

/// Function pointers only (not closures) so timers live in static data
/// without requiring `alloc`.
pub type TimerCallback = fn(TimerId);

#[derive(Debug, Clone, Copy)]
struct Timer {
    id: TimerId,
    mode: TimerMode,
    interval_ms: u64,
    remaining_ms: u64,
    callback: TimerCallback,
}

struct TimerWheel {
    timers: [Option<Timer>; MAX_TIMERS],
    current_slot: usize,
    active_count: usize,
}

impl TimerWheel {
    fn new() -> Self {
        const NONE_TIMER: Option<Timer> = None;
        Self {
            timers: [NONE_TIMER; MAX_TIMERS],
            current_slot: 0,
            active_count: 0,
        }
    }

    fn add_timer(
        &mut self,
        mode: TimerMode,
        interval_ms: u64,
        callback: TimerCallback,
    ) -> Option<TimerId> {
        if interval_ms == 0 {
            return None;
        }
        let slot = self.timers.iter().position(|t| t.is_none())?;
        let id = TimerId::next();
        self.timers[slot] = Some(Timer {
            id,
            mode,
            interval_ms,
            remaining_ms: interval_ms,
            callback,
        });
        self.active_count += 1;
        Some(id)
    }

    fn cancel_timer(&mut self, id: TimerId) -> bool {
        for entry in self.timers.iter_mut() {
            if matches!(entry, Some(t) if t.id == id) {
                *entry = None;
                self.active_count = self.active_count.saturating_sub(1);
                return true;
            }
        }
        false
    }

    fn tick(&mut self, elapsed_ms: u64) {
        self.current_slot = (self.current_slot + elapsed_ms as usize) % TIMER_WHEEL_SLOTS;

        let mut fired: [(TimerId, TimerCallback); 64] = [(TimerId(0), noop_callback); 64];
        let mut fired_count = 0usize;

        for entry in self.timers.iter_mut() {
            if let Some(timer) = entry {
                if timer.remaining_ms <= elapsed_ms {
                    if fired_count < fired.len() {
                        fired[fired_count] = (timer.id, timer.callback);
                        fired_count += 1;
                    }
                    match timer.mode {
                        TimerMode::OneShot => {
                            *entry = None;
                            self.active_count = self.active_count.saturating_sub(1);
                        }
                        TimerMode::Periodic => {
                            let overshoot = elapsed_ms.saturating_sub(timer.remaining_ms);
                            timer.remaining_ms = timer
                                .interval_ms
                                .saturating_sub(overshoot % timer.interval_ms);
                        }
                    }
                } else {
                    timer.remaining_ms -= elapsed_ms;
                }
            }
        }

        for &(id, cb) in fired.iter().take(fired_count) {
            (cb)(id);
        }
    }

    fn pending_count(&self) -> usize {
        self.active_count
    }
}

fn noop_callback(_id: TimerId) {}

fn wheel() -> &'static Mutex<TimerWheel> {
    TIMER_WHEEL.get_or_init(|| Mutex::new(TimerWheel::new()))
}

/// Initialize the timer subsystem. Idempotent.
pub fn init() {
    wheel();
}

pub fn create_timer(mode: TimerMode, interval_ms: u64, callback: TimerCallback) -> Option<TimerId> {
    wheel().lock().add_timer(mode, interval_ms, callback)
}

pub fn cancel_timer(id: TimerId) -> bool {
    wheel().lock().cancel_timer(id)
}

/// Advance all timers by `elapsed_ms` and fire expired ones.
pub fn timer_tick(elapsed_ms: u64) {
    UPTIME_MS.fetch_add(elapsed_ms, Ordering::Relaxed);
    wheel().lock().tick(elapsed_ms);
}

/// Monotonic milliseconds since boot; backs the `time_msec` syscall.
pub fn get_uptime_ms() -> u64 {
    UPTIME_MS.load(Ordering::Relaxed)
}

pub fn pending_timer_count() -> usize {
    wheel().lock().pending_count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_callback(_id: TimerId) {}

    #[test]
    fn timer_wheel_add_and_cancel() {
        let mut wheel = TimerWheel::new();
        let id = wheel.add_timer(TimerMode::OneShot, 100, test_callback).unwrap();
        assert_eq!(wheel.pending_count(), 1);
        assert!(wheel.cancel_timer(id));
        assert_eq!(wheel.pending_count(), 0);
    }

    #[test]
    fn timer_wheel_cancel_nonexistent() {
        let mut wheel = TimerWheel::new();
        assert!(!wheel.cancel_timer(TimerId(999)));
    }

    #[test]
    fn timer_wheel_one_shot_fires_and_removes() {
        let mut wheel = TimerWheel::new();
        wheel.add_timer(TimerMode::OneShot, 50, test_callback).unwrap();
        wheel.tick(60);
        assert_eq!(wheel.pending_count(), 0);
    }

    #[test]
    fn timer_wheel_periodic_reloads() {
        let mut wheel = TimerWheel::new();
        wheel.add_timer(TimerMode::Periodic, 100, test_callback).unwrap();
        wheel.tick(110);
        assert_eq!(wheel.pending_count(), 1);
    }

    #[test]
    fn timer_wheel_zero_interval_rejected() {
        let mut wheel = TimerWheel::new();
        assert!(wheel.add_timer(TimerMode::OneShot, 0, test_callback).is_none());
    }

    #[test]
    fn timer_id_uniqueness() {
        assert_ne!(TimerId::next(), TimerId::next());
    }

    #[test]
    fn uptime_counter_advances() {
        let before = get_uptime_ms();
        timer_tick(42);
        assert_eq!(get_uptime_ms(), before + 42);
    }
}
