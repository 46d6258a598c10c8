//! Concurrency-oriented tests for the run-queue scheduler and retry
//! schedule (spec §9, §4.4), exercised with real tokio tasks rather
//! than single-threaded unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dirsync_node::retry::{RetryOutcome, RetrySchedule, RetryStep};
use dirsync_node::scheduler::Scheduler;

#[tokio::test]
async fn refresh_arbitration_wakes_exactly_one_concurrent_waiter() {
    use dirsync_core::cookie_state::{CookieState, RefreshGrant};
    use dirsync_core::ShutdownFlag;
    use dirsync_primitives::ServerId;

    let state = Arc::new(CookieState::new(1, ServerId::new(1).unwrap(), ShutdownFlag::new()));
    assert_eq!(state.try_begin_refresh(1), RefreshGrant::Granted);

    let granted_count = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for source in 2..=5_u64 {
        let state = Arc::clone(&state);
        let granted_count = Arc::clone(&granted_count);
        handles.push(tokio::spawn(async move {
            if state.try_begin_refresh(source) == RefreshGrant::Granted {
                granted_count.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Every concurrent waiter was denied while source 1 held the latch.
    assert_eq!(granted_count.load(Ordering::SeqCst), 0);

    let outcome = state.end_refresh(1, true);
    assert!(outcome.released);
    assert!(outcome.woken.is_some());
}

#[tokio::test]
async fn scheduler_operations_are_safe_under_concurrent_access() {
    let scheduler = Arc::new(Scheduler::new());
    for task in 0..16 {
        scheduler.insert(task, Duration::from_millis(10));
    }

    let mut handles = Vec::new();
    for task in 0..16 {
        let scheduler = Arc::clone(&scheduler);
        handles.push(tokio::spawn(async move {
            scheduler.stop(task);
            scheduler.resched(task, false);
            scheduler.is_running(task)
        }));
    }

    for handle in handles {
        assert!(handle.await.unwrap());
    }
}

#[tokio::test]
async fn retry_schedule_exhausts_and_resets_across_await_points() {
    let mut schedule = RetrySchedule::new(vec![
        RetryStep::new(Duration::from_millis(1), Some(1)),
        RetryStep::new(Duration::from_millis(2), Some(1)),
    ]);

    assert_eq!(
        schedule.on_failure(),
        RetryOutcome::Retry(Duration::from_millis(1))
    );
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(
        schedule.on_failure(),
        RetryOutcome::Retry(Duration::from_millis(2))
    );
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(schedule.on_failure(), RetryOutcome::Exhausted);

    schedule.reset();
    assert_eq!(
        schedule.on_failure(),
        RetryOutcome::Retry(Duration::from_millis(1))
    );
}
