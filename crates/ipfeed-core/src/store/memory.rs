// # Memory Record Store
//
// In-memory implementation of RecordStore.
//
// ## Purpose
//
// Provides a simple, fast store that doesn't persist across restarts.
// Useful for testing and for dry runs against a real portal where nothing
// should reach the database.
//
// ## Semantics
//
// Mirrors the Postgres store: unique address key, soft delete, expiry
// computed as `detection_date + retention_days`. A re-report only ever
// pushes expiry later.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::model::ValidatedIpRecord;
use crate::traits::record_store::{RecordStore, UpsertSummary};
use crate::validator;

/// Row as kept by the store
#[derive(Debug, Clone)]
struct StoredRecord {
    record: ValidatedIpRecord,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl StoredRecord {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.record.expiry_date > now
    }
}

/// In-memory record store implementation
///
/// All rows live in a HashMap keyed by address, protected by a RwLock.
///
/// # Example
///
/// ```rust,no_run
/// use ipfeed_core::store::MemoryRecordStore;
/// use ipfeed_core::traits::RecordStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryRecordStore::new(90);
///     let summary = store.upsert(&[], "portal").await?;
///     assert_eq!(summary.imported, 0);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryRecordStore {
    inner: Arc<RwLock<HashMap<Ipv4Addr, StoredRecord>>>,
    retention: Duration,
}

impl MemoryRecordStore {
    /// Create a new empty store
    pub fn new(retention_days: u32) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            retention: Duration::days(i64::from(retention_days)),
        }
    }

    /// Number of rows, active or not
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Look up one address, active or not
    pub async fn get(&self, address: Ipv4Addr) -> Option<(ValidatedIpRecord, bool)> {
        let guard = self.inner.read().await;
        guard
            .get(&address)
            .map(|stored| (stored.record.clone(), stored.is_active))
    }

    /// First insertion time of one address
    pub async fn created_at(&self, address: Ipv4Addr) -> Option<DateTime<Utc>> {
        let guard = self.inner.read().await;
        guard.get(&address).map(|stored| stored.created_at)
    }

    /// Last modification time of one address
    pub async fn updated_at(&self, address: Ipv4Addr) -> Option<DateTime<Utc>> {
        let guard = self.inner.read().await;
        guard.get(&address).map(|stored| stored.updated_at)
    }

    fn check(record: &ValidatedIpRecord) -> Result<(), Error> {
        if validator::is_reserved(record.address) {
            return Err(Error::parse(format!("Reserved address: {}", record.address)));
        }
        if record.confidence > 100 {
            return Err(Error::parse(format!(
                "Confidence out of range for {}: {}",
                record.address, record.confidence
            )));
        }
        Ok(())
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new(90)
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn upsert(&self, records: &[ValidatedIpRecord], source: &str) -> Result<UpsertSummary, Error> {
        let mut summary = UpsertSummary::default();
        let now = Utc::now();
        let mut guard = self.inner.write().await;

        for record in records {
            if let Err(e) = Self::check(record) {
                tracing::warn!("Skipping record from {}: {}", source, e);
                summary.failed += 1;
                continue;
            }

            match guard.get_mut(&record.address) {
                Some(existing) => {
                    existing.record.source = source.to_string();
                    existing.record.threat_level = record.threat_level;
                    existing.record.confidence = record.confidence;
                    existing.record.detection_date =
                        existing.record.detection_date.max(record.detection_date);
                    existing.record.expiry_date = existing
                        .record
                        .expiry_date
                        .max(record.detection_date + self.retention);
                    existing.is_active = true;
                    existing.updated_at = now;
                    summary.duplicates += 1;
                }
                None => {
                    let mut stored = record.clone();
                    stored.source = source.to_string();
                    stored.expiry_date = record.detection_date + self.retention;
                    guard.insert(
                        record.address,
                        StoredRecord {
                            record: stored,
                            is_active: true,
                            created_at: now,
                            updated_at: now,
                        },
                    );
                    summary.imported += 1;
                }
            }
        }

        Ok(summary)
    }

    async fn clear_source(&self, source: &str) -> Result<usize, Error> {
        let now = Utc::now();
        let mut guard = self.inner.write().await;
        let mut cleared = 0;
        for stored in guard.values_mut() {
            if stored.is_active && stored.record.source == source {
                stored.is_active = false;
                stored.updated_at = now;
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn count_active(&self) -> Result<usize, Error> {
        let now = Utc::now();
        let guard = self.inner.read().await;
        Ok(guard.values().filter(|stored| stored.is_live(now)).count())
    }

    async fn list_active(&self, limit: usize) -> Result<Vec<ValidatedIpRecord>, Error> {
        let now = Utc::now();
        let guard = self.inner.read().await;
        let mut active: Vec<ValidatedIpRecord> = guard
            .values()
            .filter(|stored| stored.is_live(now))
            .map(|stored| stored.record.clone())
            .collect();
        active.sort_by(|a, b| {
            b.detection_date
                .cmp(&a.detection_date)
                .then_with(|| a.address.cmp(&b.address))
        });
        active.truncate(limit);
        Ok(active)
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<usize, Error> {
        let mut guard = self.inner.write().await;
        let mut expired = 0;
        for stored in guard.values_mut() {
            if stored.is_active && stored.record.expiry_date <= now {
                stored.is_active = false;
                stored.updated_at = now;
                expired += 1;
            }
        }
        Ok(expired)
    }
}
