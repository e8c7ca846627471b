// src/stop.rs - Cooperative stop flag with interruptible sleep
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Stop flag shared between a loop thread and its owner.
///
/// Loops check it once per cycle and sleep through [`StopSignal::wait_timeout`]
/// so that a stop request wakes them immediately instead of after the
/// remaining interval.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock() = true;
        cvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleep up to `timeout`. Returns true if stopped.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut stopped = flag.lock();
        while !*stopped {
            if cvar.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }

    pub fn reset(&self) {
        *self.inner.0.lock() = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_trigger_wakes_sleeper() {
        let stop = StopSignal::new();
        let sleeper = stop.clone();
        let started = Instant::now();
        let handle = thread::spawn(move || sleeper.wait_timeout(Duration::from_secs(10)));
        thread::sleep(Duration::from_millis(20));
        stop.trigger();
        assert!(handle.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_timeout_without_trigger() {
        let stop = StopSignal::new();
        assert!(!stop.wait_timeout(Duration::from_millis(5)));
        stop.trigger();
        assert!(stop.is_stopped());
        stop.reset();
        assert!(!stop.is_stopped());
    }
}
