//! Bounded, append-only log of collection events
//!
//! Collaborators (status endpoints, dashboards) read it; only the scheduler
//! writes. Entries are dropped when the log exceeds its capacity or when they
//! fall out of the retention window, whichever comes first.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Kind of logged event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunAction {
    CollectionTriggered,
    CollectionCompleted,
    CollectionFailed,
    /// Trigger refused because a run was in flight
    CollectionRejected,
    ScheduleUpdated,
}

impl RunAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunAction::CollectionTriggered => "collection_triggered",
            RunAction::CollectionCompleted => "collection_completed",
            RunAction::CollectionFailed => "collection_failed",
            RunAction::CollectionRejected => "collection_rejected",
            RunAction::ScheduleUpdated => "schedule_updated",
        }
    }
}

/// One log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub action: RunAction,
    pub details: serde_json::Value,
}

/// Thread-safe bounded event log
#[derive(Debug)]
pub struct RunLog {
    entries: Mutex<VecDeque<RunLogEntry>>,
    capacity: usize,
    retention: Duration,
}

impl RunLog {
    pub fn new(capacity: usize, retention_hours: u32) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            retention: Duration::hours(i64::from(retention_hours)),
        }
    }

    /// Append an entry stamped with the current time
    pub fn record(&self, source: &str, action: RunAction, details: serde_json::Value) {
        self.record_at(Utc::now(), source, action, details);
    }

    /// Append an entry with an explicit timestamp
    pub fn record_at(
        &self,
        timestamp: DateTime<Utc>,
        source: &str,
        action: RunAction,
        details: serde_json::Value,
    ) {
        tracing::debug!(source, action = action.as_str(), %details, "run log");

        let mut entries = self.lock();
        entries.push_back(RunLogEntry {
            timestamp,
            source: source.to_string(),
            action,
            details,
        });
        Self::prune(&mut entries, self.capacity, timestamp - self.retention);
    }

    /// Snapshot of retained entries, oldest first
    pub fn entries(&self) -> Vec<RunLogEntry> {
        let mut entries = self.lock();
        Self::prune(&mut entries, self.capacity, Utc::now() - self.retention);
        entries.iter().cloned().collect()
    }

    /// Entries for one source, oldest first
    pub fn entries_for(&self, source: &str) -> Vec<RunLogEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.source == source)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn prune(entries: &mut VecDeque<RunLogEntry>, capacity: usize, cutoff: DateTime<Utc>) {
        while entries.len() > capacity {
            entries.pop_front();
        }
        while entries.front().is_some_and(|entry| entry.timestamp < cutoff) {
            entries.pop_front();
        }
    }

    // A panic while holding the lock leaves the deque itself intact.
    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<RunLogEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
