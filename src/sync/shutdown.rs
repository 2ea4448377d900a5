//! Cooperative shutdown flag for the background services.
//!
//! The status and commission services sleep between ticks; a plain
//! `thread::sleep` would delay shutdown by up to one period. The flag pairs
//! the boolean with a condvar so `wait_timeout` returns as soon as stop is
//! requested.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Shared stop flag with early-wakeup sleeping.
#[derive(Debug, Default)]
pub struct ShutdownFlag {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown and wake every sleeper.
    pub fn request_stop(&self) {
        let mut stopped = self.stopped.lock().unwrap();
        *stopped = true;
        self.wake.notify_all();
    }

    /// Whether shutdown has been requested.
    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock().unwrap()
    }

    /// Sleep for `period` or until shutdown is requested, whichever comes
    /// first. Returns true when shutdown has been requested.
    pub fn sleep_interruptibly(&self, period: Duration) -> bool {
        let mut stopped = self.stopped.lock().unwrap();
        let deadline = std::time::Instant::now() + period;
        loop {
            if *stopped {
                return true;
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _timeout) = self.wake.wait_timeout(stopped, deadline - now).unwrap();
            stopped = guard;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_sleep_runs_full_period_without_stop() {
        let flag = ShutdownFlag::new();
        let start = Instant::now();
        assert!(!flag.sleep_interruptibly(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_stop_interrupts_sleep() {
        let flag = Arc::new(ShutdownFlag::new());
        let sleeper = {
            let flag = Arc::clone(&flag);
            thread::spawn(move || {
                let start = Instant::now();
                let stopped = flag.sleep_interruptibly(Duration::from_secs(10));
                (stopped, start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(50));
        flag.request_stop();
        let (stopped, elapsed) = sleeper.join().unwrap();
        assert!(stopped);
        assert!(elapsed < Duration::from_secs(5));
        assert!(flag.is_stopped());
    }
}
