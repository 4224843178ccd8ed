//! Interruptible wait primitive.
//!
//! A blocking delay that a concurrent [`Interrupt::interrupt`] call can cut
//! short, reporting how much of the requested duration was left unused. This
//! is the only primitive in the crate allowed to block a task's executor
//! thread for a bounded amount of time; everything else is either
//! instantaneous or an explicit `join()`.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// A handle that can cancel an in-flight [`wait`] from any thread.
///
/// Cloning shares the same underlying signal: interrupting any clone wakes
/// every `wait()` call parked on it. `interrupt()` never touches a task's
/// state mutex, so a stop arriving while the executor holds that lock can't
/// deadlock.
#[derive(Clone)]
pub struct Interrupt {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupt {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Signals the next (or in-flight) `wait()` to return immediately.
    ///
    /// Idempotent until the next `wait()` begins: calling this twice before
    /// anyone waits has the same effect as calling it once.
    pub fn interrupt(&self) {
        let (flag, cvar) = &*self.inner;
        let mut signalled = flag.lock().unwrap_or_else(|e| e.into_inner());
        *signalled = true;
        cvar.notify_all();
    }

    /// Blocks for up to `duration`, returning the unused remainder.
    ///
    /// Returns `Duration::ZERO` if the full duration elapsed undisturbed, or
    /// a positive remainder if [`interrupt`](Self::interrupt) cut the wait
    /// short — including the case where `interrupt()` was already pending
    /// when this call began, in which case it returns immediately with the
    /// entire `duration` as the remainder.
    ///
    /// Uses a steady clock ([`Instant`]) so wall-clock adjustments never
    /// perturb the timing.
    pub fn wait(&self, duration: Duration) -> Duration {
        let (flag, cvar) = &*self.inner;
        let deadline = Instant::now() + duration;
        let mut signalled = flag.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if *signalled {
                *signalled = false;
                let now = Instant::now();
                return if now >= deadline {
                    Duration::ZERO
                } else {
                    deadline - now
                };
            }
            let now = Instant::now();
            if now >= deadline {
                return Duration::ZERO;
            }
            let (guard, timeout_result) = cvar
                .wait_timeout(signalled, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            signalled = guard;
            if timeout_result.timed_out() && !*signalled {
                return Duration::ZERO;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_wait_returns_zero_remaining() {
        let interrupt = Interrupt::new();
        let remaining = interrupt.wait(Duration::from_millis(20));
        assert_eq!(remaining, Duration::ZERO);
    }

    #[test]
    fn pre_armed_interrupt_returns_full_duration() {
        let interrupt = Interrupt::new();
        interrupt.interrupt();
        let remaining = interrupt.wait(Duration::from_millis(200));
        assert_eq!(remaining, Duration::from_millis(200));
    }

    #[test]
    fn interrupt_during_wait_returns_positive_remainder() {
        let interrupt = Interrupt::new();
        let signal = interrupt.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            signal.interrupt();
        });
        let remaining = interrupt.wait(Duration::from_millis(500));
        handle.join().unwrap();
        assert!(remaining > Duration::ZERO);
        assert!(remaining < Duration::from_millis(500));
    }

    #[test]
    fn interrupt_is_idempotent_until_next_wait() {
        let interrupt = Interrupt::new();
        interrupt.interrupt();
        interrupt.interrupt();
        // Only one pending signal should be consumed.
        let first = interrupt.wait(Duration::from_millis(50));
        assert_eq!(first, Duration::from_millis(50));
        let second = interrupt.wait(Duration::from_millis(20));
        assert_eq!(second, Duration::ZERO);
    }
}
