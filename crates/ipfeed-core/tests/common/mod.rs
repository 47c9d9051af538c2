//! Test doubles and common utilities for architecture contract tests
//!
//! These doubles stand in for portals and collection tasks. They count
//! calls so tests can assert on what the pipeline did, not only on what it
//! returned.

#![allow(dead_code)]

use chrono::Duration;
use ipfeed_core::config::{Credential, ExtractionConfig, SchedulerConfig, StoreConfig};
use ipfeed_core::error::{Error, Result};
use ipfeed_core::model::{CollectionOutcome, DateRange, RawRecord, StrategyKind};
use ipfeed_core::runner::{ExtractionRunner, RecordDefaults};
use ipfeed_core::scheduler::{CollectionScheduler, ScheduleState};
use ipfeed_core::traits::{CollectionTask, ExtractionStrategy, Session, SessionAuthenticator};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// An authenticator that either always succeeds or always fails
pub struct MockAuthenticator {
    fail: bool,
    authenticate_count: Arc<AtomicUsize>,
    logout_count: Arc<AtomicUsize>,
    invalid_logout_count: Arc<AtomicUsize>,
}

impl MockAuthenticator {
    pub fn succeeding() -> Self {
        Self {
            fail: false,
            authenticate_count: Arc::new(AtomicUsize::new(0)),
            logout_count: Arc::new(AtomicUsize::new(0)),
            invalid_logout_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::succeeding()
        }
    }

    /// Create a new MockAuthenticator that shares counters with an existing one
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            fail: other.fail,
            authenticate_count: Arc::clone(&other.authenticate_count),
            logout_count: Arc::clone(&other.logout_count),
            invalid_logout_count: Arc::clone(&other.invalid_logout_count),
        }
    }

    pub fn authenticate_count(&self) -> usize {
        self.authenticate_count.load(Ordering::SeqCst)
    }

    pub fn logout_count(&self) -> usize {
        self.logout_count.load(Ordering::SeqCst)
    }

    /// Logouts that received an invalidated session
    pub fn invalid_logout_count(&self) -> usize {
        self.invalid_logout_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SessionAuthenticator for MockAuthenticator {
    async fn authenticate(&self, _credential: &Credential) -> Result<Session> {
        self.authenticate_count.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::auth("portal rejected credentials"));
        }
        Ok(test_session())
    }

    async fn logout(&self, session: Session) {
        self.logout_count.fetch_add(1, Ordering::SeqCst);
        if !session.is_valid() {
            self.invalid_logout_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn portal_name(&self) -> &str {
        "mock-portal"
    }
}

/// A strategy that returns a fixed list of candidates
pub struct FixedStrategy {
    kind: StrategyKind,
    candidates: Vec<String>,
    calls: Arc<AtomicUsize>,
}

impl FixedStrategy {
    pub fn new(kind: StrategyKind, candidates: &[&str]) -> Self {
        Self {
            kind,
            candidates: candidates.iter().map(|c| c.to_string()).collect(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn empty(kind: StrategyKind) -> Self {
        Self::new(kind, &[])
    }

    /// Counter handle that stays readable after the strategy is boxed
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait::async_trait]
impl ExtractionStrategy for FixedStrategy {
    async fn extract(&self, _session: &Session, _range: &DateRange) -> Result<Vec<RawRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .candidates
            .iter()
            .map(|candidate| RawRecord::new(candidate.clone(), self.kind))
            .collect())
    }

    fn kind(&self) -> StrategyKind {
        self.kind
    }
}

/// A strategy that errors on every call
pub struct FailingStrategy {
    kind: StrategyKind,
    session_expired: bool,
    calls: Arc<AtomicUsize>,
}

impl FailingStrategy {
    pub fn new(kind: StrategyKind) -> Self {
        Self {
            kind,
            session_expired: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fails the way a portal does after dropping the session
    pub fn session_expired(kind: StrategyKind) -> Self {
        Self {
            session_expired: true,
            ..Self::new(kind)
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait::async_trait]
impl ExtractionStrategy for FailingStrategy {
    async fn extract(&self, _session: &Session, _range: &DateRange) -> Result<Vec<RawRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.session_expired {
            return Err(Error::auth("Session expired: portal returned its login page"));
        }
        Err(Error::network("connection reset"))
    }

    fn kind(&self) -> StrategyKind {
        self.kind
    }
}

/// A task that blocks until released or cancelled
///
/// `started` is notified when a run begins; `release()` lets it finish.
pub struct GatedTask {
    gate: Arc<Notify>,
    started: Arc<Notify>,
    runs: Arc<AtomicUsize>,
    success: bool,
}

impl GatedTask {
    pub fn new(success: bool) -> Self {
        Self {
            gate: Arc::new(Notify::new()),
            started: Arc::new(Notify::new()),
            runs: Arc::new(AtomicUsize::new(0)),
            success,
        }
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CollectionTask for GatedTask {
    async fn run(&self, cancel: CancellationToken) -> CollectionOutcome {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();

        tokio::select! {
            _ = self.gate.notified() => {}
            _ = cancel.cancelled() => return CollectionOutcome::failure("cancelled"),
        }

        if self.success {
            CollectionOutcome {
                success: true,
                collected: 1,
                stored: 1,
                ..CollectionOutcome::default()
            }
        } else {
            CollectionOutcome::failure("portal unavailable")
        }
    }
}

/// A task that finishes immediately with a fixed outcome
pub struct InstantTask {
    outcome: CollectionOutcome,
    runs: Arc<AtomicUsize>,
}

impl InstantTask {
    pub fn succeeding() -> Self {
        Self {
            outcome: CollectionOutcome {
                success: true,
                ..CollectionOutcome::default()
            },
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(error: &str) -> Self {
        Self {
            outcome: CollectionOutcome::failure(error),
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CollectionTask for InstantTask {
    async fn run(&self, _cancel: CancellationToken) -> CollectionOutcome {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

/// A task that ignores cancellation entirely
pub struct HangingTask;

#[async_trait::async_trait]
impl CollectionTask for HangingTask {
    async fn run(&self, _cancel: CancellationToken) -> CollectionOutcome {
        std::future::pending::<()>().await;
        CollectionOutcome::default()
    }
}

/// Session against a portal that is never contacted
pub fn test_session() -> Session {
    Session::new(
        "test-portal",
        "https://portal.invalid",
        reqwest::Client::new(),
        Duration::minutes(60),
    )
}

pub fn test_credential() -> Credential {
    Credential::new("analyst", "hunter2")
}

/// Runner with no retry delay
pub fn runner_with(
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    config: ExtractionConfig,
) -> ExtractionRunner {
    let config = ExtractionConfig {
        retry_delay_secs: 0,
        ..config
    };
    ExtractionRunner::new(
        strategies,
        &config,
        RecordDefaults::new("test-portal", &StoreConfig::default()),
    )
}

/// Scheduler settings that keep tests fast
pub fn fast_scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        tick_secs: 1,
        initial_delay_secs: 0,
        run_timeout_secs: 5,
        shutdown_grace_secs: 2,
        ..SchedulerConfig::default()
    }
}

/// Poll until `source` is no longer running
pub async fn wait_until_idle(scheduler: &CollectionScheduler, source: &str) {
    for _ in 0..200 {
        if scheduler
            .entry(source)
            .is_some_and(|entry| entry.state != ScheduleState::Running)
        {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("source {} did not finish in time", source);
}
