//! Integration tests for the single-owner scheduler.
//!
//! Time-dependent tests run with `start_paused = true`, so tokio's clock
//! only moves when every task is idle and jumps straight to the next
//! timer. Intervals of whole seconds therefore cost nothing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use wvs_scheduler::{Scheduler, SchedulerConfig, SchedulerError, SchedulerHandle};

// =========================================================================
// Helpers
// =========================================================================

#[derive(Default)]
struct Log {
    entries: Vec<String>,
    fired_at: Vec<Instant>,
}

fn spawn_log() -> Scheduler<Log> {
    Scheduler::spawn(Log::default(), SchedulerConfig::default())
}

/// Enqueues a marker and waits for it, proving everything queued before
/// it has run.
async fn barrier(handle: &SchedulerHandle<Log>) {
    let (tx, rx) = oneshot::channel();
    handle
        .enqueue("barrier", move |_, _| {
            let _ = tx.send(());
        })
        .unwrap();
    rx.await.unwrap();
}

// =========================================================================
// FIFO
// =========================================================================

#[tokio::test]
async fn test_enqueue_runs_in_fifo_order() {
    let scheduler = spawn_log();
    let handle = scheduler.handle();

    for i in 0..100 {
        handle
            .enqueue("push", move |log: &mut Log, _| log.entries.push(i.to_string()))
            .unwrap();
    }
    barrier(&handle).await;

    let log = scheduler.shutdown().await.unwrap();
    let expected: Vec<String> = (0..100).map(|i| i.to_string()).collect();
    assert_eq!(log.entries, expected);
}

#[tokio::test]
async fn test_enqueue_from_inside_action_is_appended_not_nested() {
    let scheduler = spawn_log();
    let handle = scheduler.handle();

    handle
        .enqueue("outer", |log: &mut Log, h| {
            log.entries.push("outer-start".into());
            h.enqueue("inner", |log: &mut Log, _| log.entries.push("inner".into()))
                .unwrap();
            log.entries.push("outer-end".into());
        })
        .unwrap();
    handle
        .enqueue("second", |log: &mut Log, _| log.entries.push("second".into()))
        .unwrap();
    barrier(&handle).await;

    let log = scheduler.shutdown().await.unwrap();
    assert_eq!(log.entries, ["outer-start", "outer-end", "second", "inner"]);
}

// =========================================================================
// Error boundary
// =========================================================================

#[tokio::test]
async fn test_panicking_action_does_not_stop_the_loop() {
    let scheduler = spawn_log();
    let handle = scheduler.handle();

    handle
        .enqueue("boom", |_: &mut Log, _| panic!("handler exploded"))
        .unwrap();
    handle
        .enqueue("after", |log: &mut Log, _| log.entries.push("after".into()))
        .unwrap();
    barrier(&handle).await;

    let metrics = handle.metrics();
    assert_eq!(metrics.panicked, 1);
    assert_eq!(metrics.executed, 3);
    let log = scheduler.shutdown().await.unwrap();
    assert_eq!(log.entries, ["after"]);
}

#[tokio::test]
async fn test_slow_action_is_counted() {
    let scheduler = Scheduler::spawn(
        Log::default(),
        SchedulerConfig {
            slow_callback: Duration::from_millis(10),
            ..SchedulerConfig::default()
        },
    );
    let handle = scheduler.handle();

    handle
        .enqueue("sleepy", |_: &mut Log, _| std::thread::sleep(Duration::from_millis(30)))
        .unwrap();
    barrier(&handle).await;

    assert_eq!(handle.metrics().slow, 1);
    scheduler.shutdown().await.unwrap();
}

// =========================================================================
// Shutdown
// =========================================================================

#[tokio::test]
async fn test_enqueue_after_shutdown_is_closed() {
    let scheduler = spawn_log();
    let handle = scheduler.handle();

    scheduler.shutdown().await.unwrap();

    let err = handle.enqueue("late", |_: &mut Log, _| {}).unwrap_err();
    assert_eq!(err, SchedulerError::Closed);
}

// =========================================================================
// Repeating actions
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_repeating_action_respects_interval_floor() {
    let scheduler = spawn_log();
    let handle = scheduler.handle();
    let interval = Duration::from_secs(5);

    let timer = handle.start_repeating("tick", Duration::ZERO, interval, |log: &mut Log, _| {
        log.fired_at.push(Instant::now());
    });
    tokio::time::sleep(Duration::from_secs(31)).await;
    timer.stop();
    barrier(&handle).await;

    let log = scheduler.shutdown().await.unwrap();
    assert!(log.fired_at.len() >= 6, "fired {} times", log.fired_at.len());
    for pair in log.fired_at.windows(2) {
        assert!(pair[1] - pair[0] >= interval);
    }
}

#[tokio::test(start_paused = true)]
async fn test_zero_interval_fires_once() {
    let scheduler = spawn_log();
    let handle = scheduler.handle();

    let timer = handle.start_repeating(
        "once",
        Duration::from_secs(1),
        Duration::ZERO,
        |log: &mut Log, _| log.entries.push("once".into()),
    );
    tokio::time::sleep(Duration::from_secs(10)).await;
    barrier(&handle).await;

    assert!(!timer.is_active());
    let log = scheduler.shutdown().await.unwrap();
    assert_eq!(log.entries, ["once"]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_before_first_fire_suppresses_everything() {
    let scheduler = spawn_log();
    let handle = scheduler.handle();

    let timer = handle.start_repeating(
        "never",
        Duration::from_secs(5),
        Duration::from_secs(5),
        |log: &mut Log, _| log.entries.push("fired".into()),
    );
    timer.stop();
    timer.stop();
    tokio::time::sleep(Duration::from_secs(30)).await;
    barrier(&handle).await;

    assert!(!timer.is_active());
    let log = scheduler.shutdown().await.unwrap();
    assert!(log.entries.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_from_inside_the_action_ends_the_timer() {
    let scheduler = spawn_log();
    let handle = scheduler.handle();
    let runs = Arc::new(AtomicUsize::new(0));
    let slot: Arc<std::sync::Mutex<Option<wvs_scheduler::RepeatingAction>>> =
        Arc::new(std::sync::Mutex::new(None));

    let counted = Arc::clone(&runs);
    let own = Arc::clone(&slot);
    let timer = handle.start_repeating(
        "self-stop",
        Duration::from_secs(1),
        Duration::from_secs(1),
        move |_: &mut Log, _| {
            if counted.fetch_add(1, Ordering::SeqCst) == 2 {
                if let Some(timer) = own.lock().unwrap().as_ref() {
                    timer.stop();
                }
            }
        },
    );
    *slot.lock().unwrap() = Some(timer.clone());
    tokio::time::sleep(Duration::from_secs(20)).await;
    barrier(&handle).await;

    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert!(!timer.is_active());
    scheduler.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_panicking_timer_keeps_firing() {
    let scheduler = spawn_log();
    let handle = scheduler.handle();
    let runs = Arc::new(AtomicUsize::new(0));

    let counted = Arc::clone(&runs);
    let timer = handle.start_repeating(
        "flaky",
        Duration::ZERO,
        Duration::from_secs(1),
        move |_: &mut Log, _| {
            counted.fetch_add(1, Ordering::SeqCst);
            panic!("always fails");
        },
    );
    tokio::time::sleep(Duration::from_millis(3500)).await;
    timer.stop();
    barrier(&handle).await;

    assert!(runs.load(Ordering::SeqCst) >= 3);
    scheduler.shutdown().await.unwrap();
}

// =========================================================================
// Clock
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_clock_advances_with_time() {
    let scheduler = spawn_log();
    let handle = scheduler.handle();

    let before = handle.now();
    tokio::time::sleep(Duration::from_millis(500)).await;
    let after = handle.now();

    assert!(after >= before + Duration::from_millis(490));
    scheduler.shutdown().await.unwrap();
}
