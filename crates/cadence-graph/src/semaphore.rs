//! Counting semaphore that spins briefly before sleeping.
//!
//! The count lives in one atomic. `signal` and an uncontended `wait` are a
//! single atomic operation each; a waiter that finds no permit spins with
//! exponential backoff and only then parks on a `parking_lot` condition
//! variable. Waking a sleeper therefore costs a mutex round trip, but a worker
//! that is signalled while still spinning never sleeps at all.

use std::sync::atomic::{AtomicIsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam::utils::Backoff;
use parking_lot::{Condvar, Mutex};

/// Counting semaphore with a lock-free fast path.
#[derive(Debug, Default)]
pub struct LightweightSemaphore {
    /// Permits available, or minus the number of sleeping waiters.
    count: AtomicIsize,
    wakeups: Mutex<usize>,
    condvar: Condvar,
}

impl LightweightSemaphore {
    /// Creates a semaphore holding `initial` permits.
    pub fn new(initial: usize) -> Self {
        Self {
            count: AtomicIsize::new(initial as isize),
            wakeups: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    /// Takes a permit if one is available, without blocking.
    pub fn try_wait(&self) -> bool {
        let mut current = self.count.load(Ordering::Relaxed);
        while current > 0 {
            match self.count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }

    fn spin(&self) -> bool {
        let backoff = Backoff::new();
        while !backoff.is_completed() {
            if self.try_wait() {
                return true;
            }
            backoff.snooze();
        }
        false
    }

    /// Blocks until a permit is available and takes it.
    pub fn wait(&self) {
        if self.spin() {
            return;
        }
        if self.count.fetch_sub(1, Ordering::Acquire) > 0 {
            return;
        }
        let mut wakeups = self.wakeups.lock();
        while *wakeups == 0 {
            self.condvar.wait(&mut wakeups);
        }
        *wakeups -= 1;
    }

    /// Waits up to `timeout` for a permit. Returns true if one was taken.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.spin() {
            return true;
        }
        if self.count.fetch_sub(1, Ordering::Acquire) > 0 {
            return true;
        }

        let deadline = Instant::now() + timeout;
        let mut wakeups = self.wakeups.lock();
        while *wakeups == 0 {
            if self.condvar.wait_until(&mut wakeups, deadline).timed_out() {
                break;
            }
        }
        if *wakeups > 0 {
            *wakeups -= 1;
            return true;
        }

        // Timed out: give back the slot we reserved, unless a signal raced in
        // and already counted us as a sleeper, in which case consume its wakeup.
        loop {
            let current = self.count.load(Ordering::Relaxed);
            if current < 0 {
                if self
                    .count
                    .compare_exchange_weak(current, current + 1, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    return false;
                }
            } else {
                while *wakeups == 0 {
                    self.condvar.wait(&mut wakeups);
                }
                *wakeups -= 1;
                return true;
            }
        }
    }

    /// Releases `permits` permits, waking up to that many sleeping waiters.
    pub fn signal(&self, permits: usize) {
        if permits == 0 {
            return;
        }
        let permits = permits as isize;
        let previous = self.count.fetch_add(permits, Ordering::Release);
        let sleepers = (-previous).clamp(0, permits) as usize;
        if sleepers > 0 {
            let mut wakeups = self.wakeups.lock();
            *wakeups += sleepers;
            if sleepers == 1 {
                self.condvar.notify_one();
            } else {
                self.condvar.notify_all();
            }
        }
    }

    /// Permits currently available; negative when threads are sleeping.
    pub fn available(&self) -> isize {
        self.count.load(Ordering::Relaxed)
    }
}
