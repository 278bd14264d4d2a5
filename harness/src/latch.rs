//! One-shot startup handshake between the RPC handler and the test driver

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{HarnessError, HarnessResult};

/// Monotonic flag that is set once by `signal` and waited on by `wait`
#[derive(Debug, Default)]
pub struct StartupLatch {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl StartupLatch {
    pub fn new() -> Self {
        Self::default()
    }

    // The guarded value is a plain bool, so a poisoned lock is still usable.
    fn lock_unpoisoned(&self) -> MutexGuard<'_, bool> {
        self.flag.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the flag and wake every waiter. Repeated calls are no-ops.
    pub fn signal(&self) {
        let mut flag = self.lock_unpoisoned();
        *flag = true;
        self.cond.notify_all();
    }

    pub fn is_signaled(&self) -> bool {
        *self.lock_unpoisoned()
    }

    /// Block the calling thread until the flag is set.
    ///
    /// With a deadline, fails with `Timeout` if the flag is still unset when it
    /// expires.
    pub fn wait(&self, deadline: Option<Duration>) -> HarnessResult<()> {
        let guard = self.lock_unpoisoned();
        match deadline {
            None => {
                let _guard = self
                    .cond
                    .wait_while(guard, |signaled| !*signaled)
                    .unwrap_or_else(PoisonError::into_inner);
                Ok(())
            }
            Some(timeout) => {
                let (_guard, result) = self
                    .cond
                    .wait_timeout_while(guard, timeout, |signaled| !*signaled)
                    .unwrap_or_else(PoisonError::into_inner);
                if result.timed_out() {
                    Err(HarnessError::timeout("client start notification", timeout))
                } else {
                    Ok(())
                }
            }
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
    fn test_signal_before_wait_returns_immediately() {
        let latch = StartupLatch::new();
        latch.signal();

        assert!(latch.is_signaled());
        assert!(latch.wait(Some(Duration::from_millis(10))).is_ok());
    }

    #[test]
    fn test_repeated_signals_are_idempotent() {
        let latch = StartupLatch::new();
        for _ in 0..5 {
            latch.signal();
        }

        assert!(latch.is_signaled());
        assert!(latch.wait(None).is_ok());
    }

    #[test]
    fn test_wait_blocks_until_signal_from_other_thread() {
        let latch = Arc::new(StartupLatch::new());
        let signaller = latch.clone();

        let started = Instant::now();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            signaller.signal();
        });

        latch.wait(Some(Duration::from_secs(5))).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_times_out_without_signal() {
        let latch = StartupLatch::new();

        let result = latch.wait(Some(Duration::from_millis(20)));
        assert!(matches!(result, Err(HarnessError::Timeout { .. })));
        assert!(!latch.is_signaled());
    }

    #[test]
    fn test_all_waiters_are_released() {
        let latch = Arc::new(StartupLatch::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let latch = latch.clone();
                thread::spawn(move || latch.wait(Some(Duration::from_secs(5))))
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        latch.signal();

        for waiter in waiters {
            assert!(waiter.join().unwrap().is_ok());
        }
    }
}
