//! Architectural Contract Test: Single Flight
//!
//! This test verifies that a source never has two runs at once.
//!
//! Constraints verified:
//! - A trigger while a run is in flight is refused and logged
//! - The refusal does not disturb the running collection
//! - A trigger after the run finished is accepted
//! - Different sources run independently
//! - A caller that stops waiting on trigger() does not free the slot
//!
//! If this test fails, someone has:
//! - Removed the per-source slot
//! - Queued triggers instead of refusing them
//! - Tied a run's slot to the lifetime of the caller's future

mod common;

use common::*;
use ipfeed_core::error::Error;
use ipfeed_core::run_log::RunAction;
use ipfeed_core::scheduler::{CollectionScheduler, ScheduleState};
use std::sync::Arc;

#[tokio::test]
async fn trigger_while_running_is_refused() {
    let task = Arc::new(GatedTask::new(true));
    let scheduler = CollectionScheduler::new(fast_scheduler_config());
    scheduler
        .register_callback("portal", 24, true, task.clone())
        .unwrap();

    assert!(scheduler.trigger_immediate("portal"));
    task.wait_started().await;
    assert_eq!(scheduler.entry("portal").unwrap().state, ScheduleState::Running);

    assert!(!scheduler.trigger_immediate("portal"), "second trigger must be refused");
    assert!(matches!(
        scheduler.trigger("portal").await,
        Err(Error::RunInProgress(_))
    ));

    task.release();
    wait_until_idle(&scheduler, "portal").await;

    assert_eq!(task.runs(), 1);
    let rejected = scheduler
        .run_log()
        .iter()
        .filter(|e| e.action == RunAction::CollectionRejected)
        .count();
    assert_eq!(rejected, 2);
}

#[tokio::test]
async fn trigger_after_completion_is_accepted() {
    let task = Arc::new(GatedTask::new(true));
    let scheduler = CollectionScheduler::new(fast_scheduler_config());
    scheduler
        .register_callback("portal", 24, true, task.clone())
        .unwrap();

    assert!(scheduler.trigger_immediate("portal"));
    task.wait_started().await;
    task.release();
    wait_until_idle(&scheduler, "portal").await;

    assert!(scheduler.trigger_immediate("portal"));
    task.wait_started().await;
    task.release();
    wait_until_idle(&scheduler, "portal").await;

    assert_eq!(task.runs(), 2);
    assert_eq!(scheduler.entry("portal").unwrap().success_count, 2);
}

#[tokio::test]
async fn sources_do_not_block_each_other() {
    let slow = Arc::new(GatedTask::new(true));
    let fast = Arc::new(InstantTask::succeeding());
    let scheduler = CollectionScheduler::new(fast_scheduler_config());
    scheduler.register_callback("slow", 24, true, slow.clone()).unwrap();
    scheduler.register_callback("fast", 24, true, fast.clone()).unwrap();

    assert!(scheduler.trigger_immediate("slow"));
    slow.wait_started().await;

    let outcome = scheduler.trigger("fast").await.unwrap();
    assert!(outcome.success);
    assert_eq!(fast.runs(), 1);

    slow.release();
    wait_until_idle(&scheduler, "slow").await;
}

#[tokio::test]
async fn unknown_source_is_refused() {
    let scheduler = CollectionScheduler::new(fast_scheduler_config());

    assert!(!scheduler.trigger_immediate("ghost"));
    assert!(matches!(scheduler.trigger("ghost").await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn abandoned_trigger_keeps_the_slot() {
    let task = Arc::new(GatedTask::new(true));
    let scheduler = CollectionScheduler::new(fast_scheduler_config());
    scheduler
        .register_callback("portal", 24, true, task.clone())
        .unwrap();

    // The caller gives up while the run is still gated
    let waited = tokio::time::timeout(
        std::time::Duration::from_millis(100),
        scheduler.trigger("portal"),
    )
    .await;
    assert!(waited.is_err());
    assert_eq!(task.runs(), 1);
    assert_eq!(scheduler.entry("portal").unwrap().state, ScheduleState::Running);

    assert!(
        !scheduler.trigger_immediate("portal"),
        "the abandoned run still owns the slot"
    );
    assert_eq!(task.runs(), 1);

    task.release();
    wait_until_idle(&scheduler, "portal").await;

    let entry = scheduler.entry("portal").unwrap();
    assert_eq!(entry.state, ScheduleState::Idle);
    assert_eq!(entry.success_count, 1);
    assert_eq!(scheduler.run_history().len(), 1);
    assert!(scheduler.trigger_immediate("portal"));
    task.wait_started().await;
    task.release();
    wait_until_idle(&scheduler, "portal").await;
    assert_eq!(scheduler.run_history().len(), 2);
}
