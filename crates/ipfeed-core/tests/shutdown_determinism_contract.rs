//! Architectural Contract Test: Shutdown Determinism
//!
//! This test verifies that stopping the scheduler is deterministic.
//!
//! Constraints verified:
//! - stop() terminates the background loop
//! - In-flight runs observe cancellation and finish as failures
//! - stop() returns within the grace period even if a task hangs
//! - The scheduler can be started again after stop()
//!
//! If this test fails, someone has added:
//! - Detached background tasks
//! - Tasks that ignore cancellation
//! - Blocking operations in the shutdown path

mod common;

use common::*;
use ipfeed_core::config::SchedulerConfig;
use ipfeed_core::scheduler::CollectionScheduler;
use std::sync::Arc;

#[tokio::test]
async fn stop_terminates_idle_scheduler() {
    let scheduler = CollectionScheduler::new(fast_scheduler_config());
    scheduler
        .register_callback("portal", 24, false, Arc::new(InstantTask::succeeding()))
        .unwrap();

    scheduler.start().unwrap();
    assert!(scheduler.is_running());

    let result = tokio::time::timeout(std::time::Duration::from_secs(5), scheduler.stop()).await;

    assert!(result.is_ok(), "Scheduler should stop within 5 seconds");
    assert!(!scheduler.is_running());
}

#[tokio::test]
async fn stop_cancels_in_flight_run() {
    let task = Arc::new(GatedTask::new(true));
    let scheduler = CollectionScheduler::new(fast_scheduler_config());
    scheduler
        .register_callback("portal", 24, false, task.clone())
        .unwrap();
    scheduler.start().unwrap();

    assert!(scheduler.trigger_immediate("portal"));
    task.wait_started().await;

    scheduler.stop().await;

    let history = scheduler.run_history();
    assert_eq!(history.len(), 1);
    assert!(!history[0].success, "cancelled run is recorded as failed");
    assert!(scheduler.entry("portal").unwrap().next_run.is_some());
}

#[tokio::test]
async fn stop_respects_grace_period_for_hanging_tasks() {
    let config = SchedulerConfig {
        shutdown_grace_secs: 1,
        ..fast_scheduler_config()
    };
    let scheduler = CollectionScheduler::new(config);
    scheduler
        .register_callback("portal", 24, false, Arc::new(HangingTask))
        .unwrap();
    scheduler.start().unwrap();
    assert!(scheduler.trigger_immediate("portal"));

    let result = tokio::time::timeout(std::time::Duration::from_secs(5), scheduler.stop()).await;

    assert!(result.is_ok(), "stop() must not wait for a hanging task forever");
}

#[tokio::test]
async fn scheduler_restarts_after_stop() {
    let scheduler = CollectionScheduler::new(fast_scheduler_config());
    scheduler.start().unwrap();
    assert!(scheduler.start().is_err(), "double start is rejected");
    scheduler.stop().await;

    scheduler.start().unwrap();
    assert!(scheduler.is_running());
    scheduler.stop().await;
}
