//! Periodic self-check
//!
//! The [`HealthMonitor`] wakes every `interval`, asks each component whether
//! it is healthy and, on the first failure, records exit status 1 and fires
//! its termination hook. By default the hook sends SIGTERM to the process,
//! so an unhealthy exporter goes through the same shutdown path as one
//! stopped by its supervisor, then exits non-zero and gets restarted.

use common::StopToken;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::Duration;
use tracing::{debug, error, info};

/// Default time between checks
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// A component that can report whether it still works
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;
    fn healthy(&self) -> bool;
}

type Hook = Box<dyn Fn() + Send + Sync>;

pub struct HealthMonitor {
    checks: Vec<Arc<dyn HealthCheck>>,
    interval: Duration,
    stop: StopToken,
    exit_status: AtomicI32,
    terminated: AtomicBool,
    on_failure: Hook,
    heartbeat: Option<Hook>,
}

impl HealthMonitor {
    pub fn new(checks: Vec<Arc<dyn HealthCheck>>, interval: Duration) -> Self {
        Self {
            checks,
            interval,
            stop: StopToken::new(),
            exit_status: AtomicI32::new(0),
            terminated: AtomicBool::new(false),
            on_failure: Box::new(signal_self),
            heartbeat: None,
        }
    }

    /// Replace the default SIGTERM-to-self termination hook
    pub fn with_termination_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_failure = Box::new(hook);
        self
    }

    /// Run `hook` after every round in which all checks passed
    pub fn with_heartbeat<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.heartbeat = Some(Box::new(hook));
        self
    }

    /// Token that ends [`HealthMonitor::run`] when stopped
    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    pub fn send_stop(&self) {
        self.stop.stop();
    }

    /// 0 unless a check failed
    pub fn exit_status(&self) -> i32 {
        self.exit_status.load(Ordering::SeqCst)
    }

    /// Query every component; a panicking check counts as unhealthy
    pub fn check_all(&self) -> bool {
        self.checks.iter().all(|check| {
            match panic::catch_unwind(AssertUnwindSafe(|| check.healthy())) {
                Ok(true) => true,
                Ok(false) => {
                    error!("Health check failed: {}", check.name());
                    false
                }
                Err(e) => {
                    error!(
                        "Health check {} panicked: {}",
                        check.name(),
                        panic_message(e.as_ref())
                    );
                    false
                }
            }
        })
    }

    /// Check loop; returns when stopped or after the first failure
    pub fn run(&self) {
        info!(
            "Health monitor started ({} check(s), every {}s)",
            self.checks.len(),
            self.interval.as_secs()
        );

        while !self.stop.wait_timeout(self.interval) {
            if self.check_all() {
                debug!("All health checks passed");
                if let Some(heartbeat) = &self.heartbeat {
                    heartbeat();
                }
                continue;
            }

            self.exit_status.store(1, Ordering::SeqCst);
            self.terminate();
            break;
        }

        info!("Health monitor stopped");
    }

    fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        error!("Unhealthy, requesting shutdown");
        (self.on_failure)();
    }
}

/// Text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

fn signal_self() {
    if let Err(e) = kill(Pid::this(), Signal::SIGTERM) {
        error!("Failed to send SIGTERM to self: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Fixed(bool);

    impl HealthCheck for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn healthy(&self) -> bool {
            self.0
        }
    }

    struct Panics;

    impl HealthCheck for Panics {
        fn name(&self) -> &str {
            "panics"
        }

        fn healthy(&self) -> bool {
            panic!("probe exploded")
        }
    }

    #[test]
    fn test_all_good() {
        let monitor = HealthMonitor::new(
            vec![Arc::new(Fixed(true)), Arc::new(Fixed(true))],
            DEFAULT_INTERVAL,
        );
        assert!(monitor.check_all());
    }

    #[test]
    fn test_bad_if_any_component_bad() {
        let monitor = HealthMonitor::new(
            vec![Arc::new(Fixed(true)), Arc::new(Fixed(false))],
            DEFAULT_INTERVAL,
        );
        assert!(!monitor.check_all());
    }

    #[test]
    fn test_bad_if_any_component_panics() {
        let monitor = HealthMonitor::new(
            vec![Arc::new(Fixed(true)), Arc::new(Panics)],
            DEFAULT_INTERVAL,
        );
        assert!(!monitor.check_all());
    }

    #[test]
    fn test_failure_fires_hook_once_and_sets_status() {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let monitor = HealthMonitor::new(vec![Arc::new(Fixed(false))], Duration::from_millis(10))
            .with_termination_hook(move || {
                f.fetch_add(1, Ordering::SeqCst);
            });

        monitor.run();
        monitor.terminate();

        assert_eq!(monitor.exit_status(), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_before_failure_keeps_status_zero() {
        let beats = Arc::new(AtomicUsize::new(0));
        let b = beats.clone();
        let monitor = HealthMonitor::new(vec![Arc::new(Fixed(true))], Duration::from_millis(5))
            .with_termination_hook(|| panic!("must not terminate"))
            .with_heartbeat(move || {
                b.fetch_add(1, Ordering::SeqCst);
            });

        std::thread::scope(|s| {
            s.spawn(|| monitor.run());
            std::thread::sleep(Duration::from_millis(100));
            monitor.send_stop();
        });

        assert_eq!(monitor.exit_status(), 0);
        assert!(beats.load(Ordering::SeqCst) > 0);
    }
}
