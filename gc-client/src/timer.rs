//! Cancellable one-shot timers.
//!
//! Each [`Timer`] arms a background thread that sleeps for a fixed
//! duration and then, unless cancelled first, invokes a callback exactly
//! once. Firing is idempotent against cancellation: a `cancel()` that
//! loses the race with the sleep simply means the callback still runs,
//! but a `cancel()` that wins means it never does.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// A handle to an armed timer. Dropping the handle does not cancel the
/// timer; call [`Timer::cancel`] explicitly.
pub struct Timer {
    cancelled: Arc<AtomicBool>,
}

impl Timer {
    /// Arm a timer that calls `on_fire` after `duration`, unless
    /// [`cancel`](Self::cancel) is called first. `duration` of zero still
    /// runs `on_fire` on the background thread rather than inline, so
    /// callers never observe re-entrant firing.
    pub fn arm<F>(duration: Duration, on_fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        thread::spawn(move || {
            thread::sleep(duration);
            if !flag.swap(true, Ordering::SeqCst) {
                on_fire();
            }
        });
        Self { cancelled }
    }

    /// Cancel the timer. Returns `true` if this call prevented the
    /// callback from running, `false` if it had already fired (or is
    /// firing concurrently).
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::SeqCst)
    }

    pub fn is_armed(&self) -> bool {
        !self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn fires_after_duration() {
        let (tx, rx) = mpsc::channel();
        let _timer = Timer::arm(Duration::from_millis(20), move || {
            let _ = tx.send(());
        });
        rx.recv_timeout(Duration::from_millis(500)).unwrap();
    }

    #[test]
    fn cancel_prevents_fire() {
        let (tx, rx) = mpsc::channel::<()>();
        let timer = Timer::arm(Duration::from_millis(50), move || {
            let _ = tx.send(());
        });
        assert!(timer.cancel());
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
    }

    #[test]
    fn cancel_after_fire_is_a_no_op() {
        let (tx, rx) = mpsc::channel();
        let timer = Timer::arm(Duration::from_millis(10), move || {
            let _ = tx.send(());
        });
        rx.recv_timeout(Duration::from_millis(500)).unwrap();
        // The flag has already been set by the firing thread; cancel()
        // truthfully reports it did not prevent anything.
        assert!(!timer.cancel());
    }
}
