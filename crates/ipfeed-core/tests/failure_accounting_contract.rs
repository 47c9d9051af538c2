//! Architectural Contract Test: Failure Accounting
//!
//! This test verifies that failed runs are recorded, not swallowed.
//!
//! Constraints verified:
//! - An authentication failure ends the run with success=false, nothing collected
//! - The run log carries collection_triggered then collection_failed
//! - The next run is still scheduled
//! - A later success resets the consecutive failure counter
//! - A run where every strategy errored is a failure
//! - A session dropped mid-run is invalidated before logout and fails the run
//! - A run that outlives run_timeout_secs is recorded as a failure
//!
//! If this test fails, someone has:
//! - Let an authentication failure proceed to extraction
//! - Stopped scheduling a source after it failed
//! - Reported a run as successful when nothing could be extracted

mod common;

use chrono::Duration;
use common::*;
use ipfeed_core::config::{ExtractionConfig, SchedulerConfig};
use ipfeed_core::model::StrategyKind;
use ipfeed_core::run_log::RunAction;
use ipfeed_core::scheduler::CollectionScheduler;
use ipfeed_core::store::MemoryRecordStore;
use ipfeed_core::traits::{ExtractionStrategy, RecordStore};
use ipfeed_core::SourceCollector;
use std::sync::Arc;
use std::sync::atomic::Ordering;

fn collector(
    authenticator: MockAuthenticator,
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    store: Arc<MemoryRecordStore>,
) -> SourceCollector {
    let config = ExtractionConfig {
        strategy_retries: 0,
        ..ExtractionConfig::default()
    };
    SourceCollector::new(
        "portal",
        test_credential(),
        Arc::new(authenticator),
        runner_with(strategies, config),
        store,
        7,
    )
}

#[tokio::test]
async fn authentication_failure_is_a_failed_run() {
    let store = Arc::new(MemoryRecordStore::new(90));
    let listing = FixedStrategy::new(StrategyKind::Listing, &["8.8.8.8"]);
    let listing_calls = listing.calls();
    let authenticator = MockAuthenticator::failing();
    let counters = MockAuthenticator::sharing_counters_with(&authenticator);

    let scheduler = CollectionScheduler::new(fast_scheduler_config());
    scheduler
        .register_callback(
            "portal",
            12,
            true,
            Arc::new(collector(authenticator, vec![Box::new(listing)], store.clone())),
        )
        .unwrap();

    let outcome = scheduler.trigger("portal").await.unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.collected, 0);
    assert!(outcome.error.unwrap().contains("Authentication failed"));
    assert_eq!(counters.authenticate_count(), 1);
    assert_eq!(listing_calls.load(Ordering::SeqCst), 0, "no extraction without a session");
    assert_eq!(store.count_active().await.unwrap(), 0);

    let actions: Vec<RunAction> = scheduler.run_log().into_iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![RunAction::CollectionTriggered, RunAction::CollectionFailed]);

    let entry = scheduler.entry("portal").unwrap();
    let finished_at = scheduler.run_history()[0].finished_at.unwrap();
    assert_eq!(entry.next_run, Some(finished_at + Duration::hours(12)));
}

#[tokio::test]
async fn every_strategy_failing_is_a_failed_run() {
    let store = Arc::new(MemoryRecordStore::new(90));
    let authenticator = MockAuthenticator::succeeding();
    let counters = MockAuthenticator::sharing_counters_with(&authenticator);
    let strategies: Vec<Box<dyn ExtractionStrategy>> = vec![
        Box::new(FailingStrategy::new(StrategyKind::Listing)),
        Box::new(FailingStrategy::new(StrategyKind::Export)),
    ];

    let outcome = collector(authenticator, strategies, store)
        .collect(&tokio_util::sync::CancellationToken::new())
        .await;

    assert!(!outcome.success);
    assert_eq!(counters.logout_count(), 1, "session is closed even when extraction fails");
}

#[tokio::test]
async fn dropped_session_is_a_failed_run() {
    let store = Arc::new(MemoryRecordStore::new(90));
    let authenticator = MockAuthenticator::succeeding();
    let counters = MockAuthenticator::sharing_counters_with(&authenticator);
    let strategies: Vec<Box<dyn ExtractionStrategy>> = vec![
        Box::new(FailingStrategy::session_expired(StrategyKind::Listing)),
        Box::new(FixedStrategy::new(StrategyKind::Export, &["8.8.8.8"])),
    ];

    let outcome = collector(authenticator, strategies, store.clone())
        .collect(&tokio_util::sync::CancellationToken::new())
        .await;

    assert!(!outcome.success);
    assert_eq!(counters.logout_count(), 1);
    assert_eq!(counters.invalid_logout_count(), 1);
    assert_eq!(store.count_active().await.unwrap(), 0);
}

#[tokio::test]
async fn cancelled_before_start_never_authenticates() {
    let authenticator = MockAuthenticator::succeeding();
    let counters = MockAuthenticator::sharing_counters_with(&authenticator);
    let cancel = tokio_util::sync::CancellationToken::new();
    cancel.cancel();

    let outcome = collector(authenticator, Vec::new(), Arc::new(MemoryRecordStore::new(90)))
        .collect(&cancel)
        .await;

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().starts_with("Cancelled"));
    assert_eq!(counters.authenticate_count(), 0);
}

#[tokio::test]
async fn empty_extraction_is_a_successful_run() {
    let store = Arc::new(MemoryRecordStore::new(90));
    let strategies: Vec<Box<dyn ExtractionStrategy>> =
        vec![Box::new(FixedStrategy::empty(StrategyKind::Listing))];

    let outcome = collector(MockAuthenticator::succeeding(), strategies, store)
        .collect(&tokio_util::sync::CancellationToken::new())
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.collected, 0);
}

#[tokio::test]
async fn success_resets_consecutive_failures() {
    let scheduler = CollectionScheduler::new(fast_scheduler_config());
    scheduler
        .register_callback("portal", 24, true, Arc::new(InstantTask::failing("timeout")))
        .unwrap();
    scheduler.trigger("portal").await.unwrap();
    scheduler.trigger("portal").await.unwrap();
    assert_eq!(scheduler.entry("portal").unwrap().consecutive_failures, 2);

    scheduler
        .register_callback("portal", 24, true, Arc::new(InstantTask::succeeding()))
        .unwrap();
    scheduler.trigger("portal").await.unwrap();

    let entry = scheduler.entry("portal").unwrap();
    assert_eq!(entry.consecutive_failures, 0);
    assert_eq!(entry.failure_count, 2);
    assert_eq!(entry.success_count, 1);
    assert!(entry.last_error.is_none());
    assert_eq!(scheduler.run_history().len(), 3);
}

#[tokio::test]
async fn run_exceeding_timeout_is_a_failed_run() {
    let config = SchedulerConfig {
        run_timeout_secs: 1,
        ..fast_scheduler_config()
    };
    let scheduler = CollectionScheduler::new(config);
    scheduler
        .register_callback("portal", 24, true, Arc::new(HangingTask))
        .unwrap();

    let before = chrono::Utc::now();
    let outcome = tokio::time::timeout(std::time::Duration::from_secs(5), scheduler.trigger("portal"))
        .await
        .expect("timeout must end the run")
        .unwrap();

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("timed out"));

    let entry = scheduler.entry("portal").unwrap();
    assert_eq!(entry.failure_count, 1);
    assert_eq!(entry.consecutive_failures, 1);
    assert!(entry.next_run.unwrap() >= before + Duration::hours(24));
    assert!(scheduler
        .run_log()
        .iter()
        .any(|e| e.action == RunAction::CollectionFailed));
    assert!(scheduler.trigger_immediate("portal"), "slot is free again");
}
