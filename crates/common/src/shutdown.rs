//! Cross-thread stop primitives
//!
//! [`StopToken`] is a one-way flag that a sleeping thread can wait on with a
//! timeout. [`Shutdown`] collects the stop actions of every long-lived
//! component and runs them once, from whichever thread asks first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// One-way stop flag with interruptible waiting
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake every waiter
    pub fn stop(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for up to `timeout`
    ///
    /// Returns `true` as soon as the token is stopped, `false` if the full
    /// timeout elapsed without a stop.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut stopped = lock.lock().unwrap_or_else(PoisonError::into_inner);

        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            stopped = cvar
                .wait_timeout(stopped, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

type StopAction = Box<dyn Fn() + Send + Sync>;

struct ShutdownInner {
    triggered: AtomicBool,
    actions: Mutex<Vec<(String, StopAction)>>,
}

/// Idempotent shutdown coordinator
///
/// Actions must not block: they run on whatever thread triggers the
/// shutdown, which may be a signal handler thread.
#[derive(Clone)]
pub struct Shutdown {
    inner: Arc<ShutdownInner>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ShutdownInner {
                triggered: AtomicBool::new(false),
                actions: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a stop action, run in registration order
    pub fn on_shutdown<F>(&self, name: impl Into<String>, action: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner
            .actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name.into(), Box::new(action)));
    }

    /// Run every stop action, unless a previous call already did
    ///
    /// Returns `true` for the call that actually performed the shutdown.
    pub fn trigger(&self, reason: &str) -> bool {
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already in progress, ignoring: {}", reason);
            return false;
        }

        info!("Shutting down: {}", reason);
        let actions = self
            .inner
            .actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (name, action) in actions.iter() {
            debug!("Stopping {}", name);
            action();
        }
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_wait_timeout_elapses() {
        let token = StopToken::new();
        assert!(!token.wait_timeout(Duration::from_millis(20)));
        assert!(!token.is_stopped());
    }

    #[test]
    fn test_stop_before_wait() {
        let token = StopToken::new();
        token.stop();
        assert!(token.wait_timeout(Duration::from_secs(3600)));
    }

    #[test]
    fn test_trigger_runs_actions_once() {
        let shutdown = Shutdown::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        shutdown.on_shutdown("counter", move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(shutdown.trigger("first"));
        assert!(!shutdown.trigger("second"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(shutdown.is_triggered());
    }
}
