//! Cross-thread behaviour of the stop primitives

use common::{Shutdown, StopToken};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_stop_wakes_waiting_thread() {
    let token = StopToken::new();
    let waiter = token.clone();

    let start = Instant::now();
    let handle = thread::spawn(move || waiter.wait_timeout(Duration::from_secs(60)));
    thread::sleep(Duration::from_millis(50));
    token.stop();

    assert!(handle.join().unwrap());
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_concurrent_triggers_run_actions_once() {
    let shutdown = Shutdown::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let token = StopToken::new();

    let r = runs.clone();
    shutdown.on_shutdown("counter", move || {
        r.fetch_add(1, Ordering::SeqCst);
    });
    let t = token.clone();
    shutdown.on_shutdown("token", move || t.stop());

    let winners: usize = (0..8)
        .map(|i| {
            let shutdown = shutdown.clone();
            thread::spawn(move || shutdown.trigger(&format!("thread {i}")))
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| usize::from(h.join().unwrap()))
        .sum();

    assert_eq!(winners, 1);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(token.is_stopped());
}

#[test]
fn test_actions_run_in_registration_order() {
    let shutdown = Shutdown::new();
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));

    for name in ["health", "server", "hotplug"] {
        let order = order.clone();
        shutdown.on_shutdown(name, move || order.lock().unwrap().push(name));
    }
    shutdown.trigger("test");

    assert_eq!(*order.lock().unwrap(), vec!["health", "server", "hotplug"]);
}
