//! Architectural Contract Test: Schedule Interval
//!
//! This test verifies how the scheduler computes the next run.
//!
//! Constraints verified:
//! - `next_run = finished_at + interval_hours` after success
//! - The same rule applies after failure (no backoff, no retry storm)
//! - Intervals outside 1..=168 hours are rejected
//! - Schedule changes are written to the run log
//!
//! If this test fails, someone has:
//! - Added failure backoff or immediate retries to the scheduler
//! - Relaxed interval validation

mod common;

use chrono::Duration;
use common::*;
use ipfeed_core::error::Error;
use ipfeed_core::run_log::RunAction;
use ipfeed_core::scheduler::CollectionScheduler;
use std::sync::Arc;

#[tokio::test]
async fn next_run_follows_successful_run() {
    let scheduler = CollectionScheduler::new(fast_scheduler_config());
    scheduler
        .register_callback("portal", 6, true, Arc::new(InstantTask::succeeding()))
        .unwrap();

    let outcome = scheduler.trigger("portal").await.unwrap();
    assert!(outcome.success);

    let history = scheduler.run_history();
    let finished_at = history[0].finished_at.unwrap();
    let entry = scheduler.entry("portal").unwrap();

    assert_eq!(entry.last_run, Some(finished_at));
    assert_eq!(entry.next_run, Some(finished_at + Duration::hours(6)));
    assert_eq!(entry.success_count, 1);
}

#[tokio::test]
async fn next_run_follows_failed_run() {
    let scheduler = CollectionScheduler::new(fast_scheduler_config());
    scheduler
        .register_callback("portal", 24, true, Arc::new(InstantTask::failing("login page changed")))
        .unwrap();

    let outcome = scheduler.trigger("portal").await.unwrap();
    assert!(!outcome.success);

    let finished_at = scheduler.run_history()[0].finished_at.unwrap();
    let entry = scheduler.entry("portal").unwrap();

    assert_eq!(entry.next_run, Some(finished_at + Duration::hours(24)));
    assert_eq!(entry.failure_count, 1);
    assert_eq!(entry.consecutive_failures, 1);
    assert_eq!(entry.last_error.as_deref(), Some("login page changed"));
}

#[tokio::test]
async fn interval_bounds_are_enforced() {
    let scheduler = CollectionScheduler::new(fast_scheduler_config());
    scheduler
        .register_callback("portal", 24, true, Arc::new(InstantTask::succeeding()))
        .unwrap();

    assert!(matches!(
        scheduler.update_schedule("portal", None, Some(0)),
        Err(Error::ScheduleConfig(_))
    ));
    assert!(matches!(
        scheduler.update_schedule("portal", None, Some(200)),
        Err(Error::ScheduleConfig(_))
    ));

    let entry = scheduler.update_schedule("portal", None, Some(24)).unwrap();
    assert_eq!(entry.interval_hours, 24);
    let entry = scheduler.update_schedule("portal", None, Some(168)).unwrap();
    assert_eq!(entry.interval_hours, 168);
}

#[tokio::test]
async fn interval_change_reschedules_from_last_run() {
    let scheduler = CollectionScheduler::new(fast_scheduler_config());
    scheduler
        .register_callback("portal", 24, true, Arc::new(InstantTask::succeeding()))
        .unwrap();
    scheduler.trigger("portal").await.unwrap();
    let last_run = scheduler.entry("portal").unwrap().last_run.unwrap();

    let entry = scheduler.update_schedule("portal", None, Some(2)).unwrap();

    assert_eq!(entry.next_run, Some(last_run + Duration::hours(2)));
    let updates: Vec<_> = scheduler
        .run_log()
        .into_iter()
        .filter(|e| e.action == RunAction::ScheduleUpdated)
        .collect();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].details["interval_hours"], 2);
}

#[tokio::test]
async fn disabled_source_is_not_dispatched_by_ticks() {
    let task = Arc::new(InstantTask::succeeding());
    let scheduler = CollectionScheduler::new(fast_scheduler_config());
    scheduler
        .register_callback("portal", 24, false, task.clone())
        .unwrap();

    assert_eq!(scheduler.run_due(), 0);

    scheduler.update_schedule("portal", Some(true), None).unwrap();
    assert_eq!(scheduler.run_due(), 1, "zero initial delay makes it due at once");
    wait_until_idle(&scheduler, "portal").await;
    assert_eq!(task.runs(), 1);
    assert_eq!(scheduler.run_due(), 0, "next run is a full interval away");
}
