// OS signal handling for a running manager
//
// Signals are process-wide, so this binary holds a single test; sharing a
// process with the other integration tests would let a raised SIGTERM reach
// managers it was not meant for.
//
// Run with: cargo test -p workhorse --test signal_integration_test

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{raise, Signal};
use parking_lot::Mutex;
use tokio::time::Instant;
use workhorse::{InMemoryQueue, LifecycleEvent, LifecycleState, Manager, ManagerConfig};

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[test_log::test(tokio::test)]
async fn test_tstp_quiets_then_term_shuts_down() {
    let queue = InMemoryQueue::with_fetch_timeout(Duration::from_millis(20));
    let config = ManagerConfig::new()
        .with_worker_id("signals")
        .with_concurrency(2)
        .with_startup_jitter(Duration::ZERO)
        .with_heartbeat_interval(Duration::from_secs(5));
    let mut manager = Manager::new(queue.clone(), config);

    let events = Arc::new(Mutex::new(Vec::new()));
    for event in [
        LifecycleEvent::Startup,
        LifecycleEvent::Quiet,
        LifecycleEvent::Shutdown,
    ] {
        let events = Arc::clone(&events);
        manager.on(event, move || events.lock().push(event));
    }

    let handle = manager.handle();
    let run = tokio::spawn(manager.run_until_terminated());

    // Handlers are installed before any unit is spawned
    eventually("units to start", || handle.active_units() == 3).await;
    eventually("a fetch", || queue.fetch_calls() > 0).await;

    raise(Signal::SIGTSTP).unwrap();
    eventually("quiet", || handle.state() == LifecycleState::Quiet).await;
    eventually("workers to stop", || handle.active_units() == 1).await;

    raise(Signal::SIGTERM).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("manager did not stop after SIGTERM")
        .unwrap();

    assert!(result.is_ok());
    assert_eq!(
        *events.lock(),
        vec![
            LifecycleEvent::Startup,
            LifecycleEvent::Quiet,
            LifecycleEvent::Shutdown
        ]
    );
    assert_eq!(handle.state(), LifecycleState::Terminated);
    assert_eq!(handle.active_units(), 0);
    assert!(queue.opened() > 0);
    assert_eq!(queue.opened(), queue.closed());
}
