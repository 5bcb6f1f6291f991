use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

/// Shared stop flag that also wakes anybody waiting on it.
///
/// Engines poll [`is_stopped`](StopSignal::is_stopped) once per instruction
/// and park in [`wait_timeout`](StopSignal::wait_timeout) for PAUSE and ping
/// back-off, so a stop request ends those waits early.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: AtomicBool,
    lock: Mutex<()>,
    cv: Condvar,
}

impl StopSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.stopped.store(true, Ordering::Release);
        let _guard = self.lock.lock();
        self.cv.notify_all();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Waits up to `duration`. Returns `true` if a stop was requested.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut guard = self.lock.lock();
        loop {
            if self.is_stopped() {
                return true;
            }
            if self.cv.wait_until(&mut guard, deadline).timed_out() {
                return self.is_stopped();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn test_wait_times_out() {
        let signal = StopSignal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_stop_wakes_waiter() {
        let signal = Arc::new(StopSignal::new());
        let waiter = Arc::clone(&signal);
        let handle =
            thread::spawn(move || waiter.wait_timeout(Duration::from_secs(30)));

        thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        signal.request_stop();
        assert!(handle.join().unwrap());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_stop_before_wait_returns_immediately() {
        let signal = StopSignal::new();
        signal.request_stop();
        assert!(signal.is_stopped());
        assert!(signal.wait_timeout(Duration::from_secs(30)));
    }
}
