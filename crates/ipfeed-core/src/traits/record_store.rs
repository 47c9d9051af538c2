// # Record Store Trait
//
// Defines the interface for persisting validated addresses.
//
// ## Purpose
//
// The record store is the single owner of persisted record state:
// - One row per address (unique key), whichever source reported it
// - Re-reporting an address updates it and counts as a duplicate
// - Removal is soft: rows are marked inactive, never deleted
//
// Under concurrent sources writing overlapping address sets, the store's
// uniqueness constraint is the authority for insert-vs-update.
//
// ## Implementations
//
// - In-memory: tests and dry runs
// - Postgres (sqlx): production

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ValidatedIpRecord;

/// Per-batch accounting returned by [`RecordStore::upsert`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertSummary {
    /// Addresses that were not present before
    pub imported: usize,
    /// Addresses that already existed and were updated
    pub duplicates: usize,
    /// Records rejected individually; the rest of the batch still went through
    pub failed: usize,
}

impl UpsertSummary {
    /// Records that ended up in the store
    pub fn stored(&self) -> usize {
        self.imported + self.duplicates
    }
}

/// Trait for record store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple runs.
///
/// # Failure Semantics
///
/// A bad record is counted in `UpsertSummary::failed` and skipped. Losing
/// the connection is an `Error::Storage` that aborts the batch.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert-or-update each record keyed by address
    ///
    /// # Parameters
    ///
    /// - `records`: Validated records of one batch
    /// - `source`: Source that reported them
    async fn upsert(&self, records: &[ValidatedIpRecord], source: &str) -> crate::Result<UpsertSummary>;

    /// Mark every active record of `source` inactive
    ///
    /// # Returns
    ///
    /// Number of records deactivated
    async fn clear_source(&self, source: &str) -> crate::Result<usize>;

    /// Number of active, unexpired records
    async fn count_active(&self) -> crate::Result<usize>;

    /// Active, unexpired records, most recently detected first
    async fn list_active(&self, limit: usize) -> crate::Result<Vec<ValidatedIpRecord>>;

    /// Mark records whose expiry is at or before `now` inactive
    ///
    /// # Returns
    ///
    /// Number of records deactivated
    async fn deactivate_expired(&self, now: DateTime<Utc>) -> crate::Result<usize>;
}
