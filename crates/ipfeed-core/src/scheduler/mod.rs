//! Collection scheduler
//!
//! The scheduler owns every [`ScheduleEntry`] and is responsible for:
//! - Running each enabled source every `interval_hours`
//! - Immediate triggers from collaborators (HTTP endpoints, CLI)
//! - Success/failure bookkeeping and the run log
//! - Guaranteeing at most one in-flight run per source
//!
//! ## Architecture
//!
//! ```text
//!   tick loop ──┐                     ┌──────────────┐
//!               ├──▶ claim slot ─────▶│ worker task  │──▶ CollectionTask::run
//!   trigger() ──┘   (Semaphore(1))    └──────────────┘          │
//!                         ▲                                     ▼
//!                         └──────── permit released ◀── entry/counters updated
//! ```
//!
//! ## Per-source state
//!
//! `Disabled` ⇄ `Idle` → `Running` → `Idle`. Every finished run, successful
//! or not, sets `next_run = finished_at + interval_hours`.
//!
//! ## Shutdown
//!
//! `stop()` cancels the loop and signals workers through their cancellation
//! token (checked between pipeline stages), then waits up to
//! `shutdown_grace_secs` for them to finish.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::{SchedulerConfig, validate_interval_hours};
use crate::error::{Error, Result};
use crate::model::{CollectionOutcome, CollectionRun};
use crate::run_log::{RunAction, RunLog, RunLogEntry};
use crate::traits::CollectionTask;

/// Lifecycle state of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleState {
    Disabled,
    /// Waiting for `next_run`
    Idle,
    Running,
}

/// Schedule and counters for one source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub source: String,
    pub enabled: bool,
    pub interval_hours: u32,
    pub state: ScheduleState,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl ScheduleEntry {
    fn new(source: String, interval_hours: u32, enabled: bool, next_run: Option<DateTime<Utc>>) -> Self {
        Self {
            source,
            enabled,
            interval_hours,
            state: if enabled { ScheduleState::Idle } else { ScheduleState::Disabled },
            last_run: None,
            next_run,
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            last_error: None,
        }
    }

    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled
            && self.state == ScheduleState::Idle
            && self.next_run.is_some_and(|next| next <= now)
    }

    fn resting_state(&self) -> ScheduleState {
        if self.enabled { ScheduleState::Idle } else { ScheduleState::Disabled }
    }
}

/// What started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TriggerKind {
    Scheduled,
    Immediate,
}

impl TriggerKind {
    fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Scheduled => "scheduled",
            TriggerKind::Immediate => "immediate",
        }
    }
}

/// Registered task plus its single-slot guard
struct SourceSlot {
    task: Arc<dyn CollectionTask>,
    permit: Arc<Semaphore>,
}

struct Inner {
    config: SchedulerConfig,
    entries: Mutex<HashMap<String, ScheduleEntry>>,
    slots: Mutex<HashMap<String, SourceSlot>>,
    run_log: RunLog,
    history: Mutex<VecDeque<CollectionRun>>,
    shutdown: Mutex<CancellationToken>,
    tracker: TaskTracker,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

// Guarded sections never await or call out, so a poisoned lock still
// holds consistent data.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Per-source collection scheduler
///
/// Cheap to clone; clones share state.
///
/// ## Lifecycle
///
/// 1. Create with [`CollectionScheduler::new()`]
/// 2. Register sources with [`register_callback()`](Self::register_callback)
/// 3. [`start()`](Self::start) the background loop
/// 4. [`stop()`](Self::stop) before exit
#[derive(Clone)]
pub struct CollectionScheduler {
    inner: Arc<Inner>,
}

impl CollectionScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let run_log = RunLog::new(config.run_log_capacity, config.run_log_retention_hours);
        Self {
            inner: Arc::new(Inner {
                config,
                entries: Mutex::new(HashMap::new()),
                slots: Mutex::new(HashMap::new()),
                run_log,
                history: Mutex::new(VecDeque::new()),
                shutdown: Mutex::new(CancellationToken::new()),
                tracker: TaskTracker::new(),
                loop_handle: Mutex::new(None),
            }),
        }
    }

    /// Register the collection task for `source`
    ///
    /// Re-registering a source replaces its task and schedule but keeps its
    /// counters.
    ///
    /// # Errors
    ///
    /// `Error::ScheduleConfig` if `interval_hours` is outside `1..=168`.
    pub fn register_callback(
        &self,
        source: impl Into<String>,
        interval_hours: u32,
        enabled: bool,
        task: Arc<dyn CollectionTask>,
    ) -> Result<()> {
        validate_interval_hours(interval_hours)?;
        let source = source.into();
        let next_run = enabled.then(|| self.after_initial_delay(Utc::now()));

        {
            let mut entries = lock(&self.inner.entries);
            entries
                .entry(source.clone())
                .and_modify(|entry| {
                    entry.enabled = enabled;
                    entry.interval_hours = interval_hours;
                    entry.next_run = next_run;
                    if entry.state != ScheduleState::Running {
                        entry.state = entry.resting_state();
                    }
                })
                .or_insert_with(|| ScheduleEntry::new(source.clone(), interval_hours, enabled, next_run));
        }

        let mut slots = lock(&self.inner.slots);
        match slots.get_mut(&source) {
            Some(slot) => slot.task = task,
            None => {
                slots.insert(
                    source.clone(),
                    SourceSlot {
                        task,
                        permit: Arc::new(Semaphore::new(1)),
                    },
                );
            }
        }

        info!("Registered source {} (every {}h, enabled={})", source, interval_hours, enabled);
        Ok(())
    }

    /// Start the background loop
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut handle = lock(&self.inner.loop_handle);
        if handle.is_some() {
            return Err(Error::config("Scheduler already started"));
        }

        let token = {
            let mut shutdown = lock(&self.inner.shutdown);
            if shutdown.is_cancelled() {
                *shutdown = CancellationToken::new();
            }
            shutdown.clone()
        };
        self.inner.tracker.reopen();

        let scheduler = self.clone();
        let tick = std::time::Duration::from_secs(self.inner.config.tick_secs);
        *handle = Some(tokio::spawn(async move {
            scheduler.run_loop(tick, token).await;
        }));

        info!("Scheduler started (tick every {:?})", tick);
        Ok(())
    }

    /// Stop the loop and wait briefly for in-flight runs
    pub async fn stop(&self) {
        lock(&self.inner.shutdown).cancel();

        let handle = lock(&self.inner.loop_handle).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Scheduler loop ended abnormally: {}", e);
            }
        }

        self.inner.tracker.close();
        let grace = std::time::Duration::from_secs(self.inner.config.shutdown_grace_secs);
        if tokio::time::timeout(grace, self.inner.tracker.wait()).await.is_err() {
            warn!(
                "{} collection run(s) still in flight after {:?}",
                self.inner.tracker.len(),
                grace
            );
        }
        self.inner.tracker.reopen();
        info!("Scheduler stopped");
    }

    /// Whether the background loop is running
    pub fn is_running(&self) -> bool {
        lock(&self.inner.loop_handle).is_some()
    }

    /// Start a run for `source` in the background
    ///
    /// # Returns
    ///
    /// `false` if the source is unknown or a run for it is already in flight.
    /// Must be called from within a tokio runtime.
    pub fn trigger_immediate(&self, source: &str) -> bool {
        match self.claim(source) {
            Ok((task, permit)) => {
                let scheduler = self.clone();
                let source = source.to_string();
                self.inner.tracker.spawn(async move {
                    scheduler
                        .execute(source, task, permit, TriggerKind::Immediate)
                        .await;
                });
                true
            }
            Err(e) => {
                self.note_rejection(source, &e);
                false
            }
        }
    }

    /// Run `source` now and wait for the outcome
    ///
    /// The run and its bookkeeping happen in a tracked background task, so
    /// dropping the returned future only stops the wait. The run still
    /// holds the source's slot and still lands in history.
    ///
    /// # Errors
    ///
    /// - `Error::NotFound`: Unknown source
    /// - `Error::RunInProgress`: A run for this source is in flight
    pub async fn trigger(&self, source: &str) -> Result<CollectionOutcome> {
        let (task, permit) = match self.claim(source) {
            Ok(claimed) => claimed,
            Err(e) => {
                self.note_rejection(source, &e);
                return Err(e);
            }
        };

        let scheduler = self.clone();
        let owned = source.to_string();
        let handle = self.inner.tracker.spawn(async move {
            scheduler
                .execute(owned, task, permit, TriggerKind::Immediate)
                .await
        });

        match handle.await {
            Ok(outcome) => Ok(outcome),
            Err(join_error) => {
                error!("Collection run for {} ended abnormally: {}", source, join_error);
                Ok(CollectionOutcome::failure(format!(
                    "Collection run aborted: {}",
                    join_error
                )))
            }
        }
    }

    /// Change whether and how often `source` runs
    ///
    /// Enabling a disabled source schedules it after the initial delay.
    /// Changing the interval reschedules from the last run, if any.
    ///
    /// # Errors
    ///
    /// - `Error::ScheduleConfig`: Interval outside `1..=168`
    /// - `Error::NotFound`: Unknown source
    pub fn update_schedule(
        &self,
        source: &str,
        enabled: Option<bool>,
        interval_hours: Option<u32>,
    ) -> Result<ScheduleEntry> {
        if let Some(hours) = interval_hours {
            validate_interval_hours(hours)?;
        }

        let now = Utc::now();
        let updated = {
            let mut entries = lock(&self.inner.entries);
            let entry = entries
                .get_mut(source)
                .ok_or_else(|| Error::not_found(format!("Unknown source: {}", source)))?;

            if let Some(hours) = interval_hours {
                entry.interval_hours = hours;
                if let Some(last) = entry.last_run {
                    entry.next_run = Some(last + Duration::hours(i64::from(hours)));
                }
            }

            if let Some(enabled) = enabled {
                if enabled && !entry.enabled {
                    entry.next_run = Some(self.after_initial_delay(now));
                }
                entry.enabled = enabled;
                if entry.state != ScheduleState::Running {
                    entry.state = entry.resting_state();
                }
            }

            entry.clone()
        };

        self.inner.run_log.record(
            source,
            RunAction::ScheduleUpdated,
            json!({
                "enabled": updated.enabled,
                "interval_hours": updated.interval_hours,
                "next_run": updated.next_run,
            }),
        );
        info!(
            "Schedule for {} updated: enabled={}, every {}h",
            source, updated.enabled, updated.interval_hours
        );
        Ok(updated)
    }

    /// Snapshot of every source's schedule
    pub fn status(&self) -> HashMap<String, ScheduleEntry> {
        lock(&self.inner.entries).clone()
    }

    /// Snapshot of one source's schedule
    pub fn entry(&self, source: &str) -> Option<ScheduleEntry> {
        lock(&self.inner.entries).get(source).cloned()
    }

    /// Retained run log entries, oldest first
    pub fn run_log(&self) -> Vec<RunLogEntry> {
        self.inner.run_log.entries()
    }

    /// Finished runs, oldest first
    pub fn run_history(&self) -> Vec<CollectionRun> {
        lock(&self.inner.history).iter().cloned().collect()
    }

    /// Dispatch every due source once; this is what a loop tick does
    ///
    /// # Returns
    ///
    /// Number of runs started
    pub fn run_due(&self) -> usize {
        let now = Utc::now();
        let due: Vec<String> = lock(&self.inner.entries)
            .values()
            .filter(|entry| entry.is_due(now))
            .map(|entry| entry.source.clone())
            .collect();

        let mut started = 0;
        for source in due {
            match self.claim(&source) {
                Ok((task, permit)) => {
                    let scheduler = self.clone();
                    self.inner.tracker.spawn(async move {
                        scheduler
                            .execute(source, task, permit, TriggerKind::Scheduled)
                            .await;
                    });
                    started += 1;
                }
                Err(e) => debug!("Skipping due source {}: {}", source, e),
            }
        }
        started
    }

    async fn run_loop(&self, tick: std::time::Duration, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Scheduler loop received shutdown");
                    break;
                }
                _ = interval.tick() => {
                    let started = self.run_due();
                    if started > 0 {
                        debug!("Tick started {} run(s)", started);
                    }
                }
            }
        }
    }

    /// Take the source's single slot and mark it running
    fn claim(&self, source: &str) -> Result<(Arc<dyn CollectionTask>, OwnedSemaphorePermit)> {
        let (task, permit) = {
            let slots = lock(&self.inner.slots);
            let slot = slots
                .get(source)
                .ok_or_else(|| Error::not_found(format!("Unknown source: {}", source)))?;
            let permit = Arc::clone(&slot.permit)
                .try_acquire_owned()
                .map_err(|_| Error::RunInProgress(source.to_string()))?;
            (Arc::clone(&slot.task), permit)
        };

        if let Some(entry) = lock(&self.inner.entries).get_mut(source) {
            entry.state = ScheduleState::Running;
        }
        Ok((task, permit))
    }

    fn note_rejection(&self, source: &str, error: &Error) {
        if matches!(error, Error::RunInProgress(_)) {
            warn!("Rejected trigger for {}: run already in flight", source);
            self.inner.run_log.record(
                source,
                RunAction::CollectionRejected,
                json!({ "reason": error.to_string() }),
            );
        } else {
            warn!("Rejected trigger for {}: {}", source, error);
        }
    }

    /// Run one claimed source to completion and do the bookkeeping
    ///
    /// History and run log are written before the entry leaves `Running`,
    /// so callers polling the entry see the finished run everywhere.
    async fn execute(
        &self,
        source: String,
        task: Arc<dyn CollectionTask>,
        permit: OwnedSemaphorePermit,
        kind: TriggerKind,
    ) -> CollectionOutcome {
        let started_at = Utc::now();
        let mut run = CollectionRun::begin(source.clone(), started_at);
        self.inner.run_log.record(
            &source,
            RunAction::CollectionTriggered,
            json!({ "trigger": kind.as_str(), "run_id": run.id }),
        );
        info!("Collection for {} started ({})", source, kind.as_str());

        let cancel = lock(&self.inner.shutdown).child_token();
        let run_timeout = std::time::Duration::from_secs(self.inner.config.run_timeout_secs);

        // The task runs in its own tokio task so a panic becomes a failed
        // run instead of a stuck entry.
        let mut worker = tokio::spawn(async move { task.run(cancel).await });
        let outcome = match tokio::time::timeout(run_timeout, &mut worker).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_error)) => CollectionOutcome::failure(format!("Collection task aborted: {}", join_error)),
            Err(_) => {
                worker.abort();
                CollectionOutcome::failure(format!("Run timed out after {:?}", run_timeout))
            }
        };

        let finished_at = Utc::now();
        run.finish(&outcome, finished_at);
        self.push_history(run.clone());

        if outcome.success {
            info!(
                "Collection for {} completed: {} collected, {} stored, {} duplicates",
                source, outcome.collected, outcome.stored, outcome.duplicates
            );
            self.inner.run_log.record(
                &source,
                RunAction::CollectionCompleted,
                json!({
                    "run_id": run.id,
                    "collected": outcome.collected,
                    "stored": outcome.stored,
                    "duplicates": outcome.duplicates,
                    "failed": outcome.failed,
                }),
            );
        } else {
            error!(
                "Collection for {} failed: {}",
                source,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
            self.inner.run_log.record(
                &source,
                RunAction::CollectionFailed,
                json!({
                    "run_id": run.id,
                    "collected": outcome.collected,
                    "error": outcome.error,
                }),
            );
        }

        self.complete(&source, &outcome, finished_at, permit);
        outcome
    }

    /// Counters and next run; always advances `next_run`
    ///
    /// The permit is released under the entries lock. A claim racing with
    /// this call therefore marks the entry `Running` after it went `Idle`.
    fn complete(
        &self,
        source: &str,
        outcome: &CollectionOutcome,
        finished_at: DateTime<Utc>,
        permit: OwnedSemaphorePermit,
    ) {
        let mut entries = lock(&self.inner.entries);
        let Some(entry) = entries.get_mut(source) else {
            return;
        };

        entry.last_run = Some(finished_at);
        entry.next_run = Some(finished_at + Duration::hours(i64::from(entry.interval_hours)));
        entry.state = entry.resting_state();

        if outcome.success {
            entry.success_count += 1;
            entry.consecutive_failures = 0;
            entry.last_error = None;
        } else {
            entry.failure_count += 1;
            entry.consecutive_failures += 1;
            entry.last_error = outcome.error.clone();
        }
        drop(permit);
    }

    fn push_history(&self, run: CollectionRun) {
        let mut history = lock(&self.inner.history);
        history.push_back(run);
        while history.len() > self.inner.config.run_history_capacity {
            history.pop_front();
        }
    }

    /// `now + initial_delay_secs`, saturating at the latest representable time
    fn after_initial_delay(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        i64::try_from(self.inner.config.initial_delay_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
