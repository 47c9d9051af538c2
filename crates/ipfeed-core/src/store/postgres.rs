// # Postgres Record Store
//
// sqlx-backed implementation of RecordStore.
//
// ## Schema
//
// ```sql
// CREATE TABLE threat_ips (
//     address        TEXT PRIMARY KEY,      -- unique per address
//     source         TEXT NOT NULL,
//     detection_date TIMESTAMPTZ NOT NULL,
//     threat_level   TEXT NOT NULL,
//     confidence     SMALLINT NOT NULL,
//     expiry_date    TIMESTAMPTZ NOT NULL,
//     is_active      BOOLEAN NOT NULL DEFAULT TRUE,
//     created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//     updated_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
// );
// CREATE INDEX threat_ips_active_expiry ON threat_ips (is_active, expiry_date);
// ```
//
// Insert-vs-update is decided by `ON CONFLICT (address)`, so concurrent
// sources writing the same address never produce two rows. `xmax = 0` in the
// RETURNING clause tells a fresh insert from an update.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::net::Ipv4Addr;

use crate::Error;
use crate::model::{ThreatLevel, ValidatedIpRecord};
use crate::traits::record_store::{RecordStore, UpsertSummary};
use crate::validator;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS threat_ips (
    address        TEXT PRIMARY KEY,
    source         TEXT NOT NULL,
    detection_date TIMESTAMPTZ NOT NULL,
    threat_level   TEXT NOT NULL,
    confidence     SMALLINT NOT NULL,
    expiry_date    TIMESTAMPTZ NOT NULL,
    is_active      BOOLEAN NOT NULL DEFAULT TRUE,
    created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_ACTIVE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS threat_ips_active_expiry
    ON threat_ips (is_active, expiry_date)
"#;

const UPSERT: &str = r#"
INSERT INTO threat_ips (
    address, source, detection_date, threat_level, confidence, expiry_date,
    is_active, created_at, updated_at
)
VALUES ($1, $2, $3, $4, $5, $6, TRUE, NOW(), NOW())
ON CONFLICT (address) DO UPDATE SET
    source = EXCLUDED.source,
    detection_date = GREATEST(threat_ips.detection_date, EXCLUDED.detection_date),
    threat_level = EXCLUDED.threat_level,
    confidence = EXCLUDED.confidence,
    expiry_date = GREATEST(threat_ips.expiry_date, EXCLUDED.expiry_date),
    is_active = TRUE,
    updated_at = NOW()
RETURNING (xmax = 0) AS inserted
"#;

/// Postgres-backed record store
///
/// # Example
///
/// ```rust,no_run
/// use ipfeed_core::store::PgRecordStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = PgRecordStore::connect("postgres://localhost/ipfeed", 90).await?;
///     store.ensure_schema().await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
    retention: Duration,
}

impl PgRecordStore {
    /// Wrap an existing pool
    pub fn new(pool: PgPool, retention_days: u32) -> Self {
        Self {
            pool,
            retention: Duration::days(i64::from(retention_days)),
        }
    }

    /// Open a pool for `database_url`
    pub async fn connect(database_url: &str, retention_days: u32) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| Error::storage(format!("Failed to connect to database: {}", e)))?;
        Ok(Self::new(pool, retention_days))
    }

    /// Create the table and indexes when absent
    pub async fn ensure_schema(&self) -> Result<(), Error> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_ACTIVE_INDEX).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn upsert_one(&self, record: &ValidatedIpRecord, source: &str) -> Result<bool, sqlx::Error> {
        let row = sqlx::query(UPSERT)
            .bind(record.address.to_string())
            .bind(source)
            .bind(record.detection_date)
            .bind(record.threat_level.as_str())
            .bind(i16::from(record.confidence))
            .bind(record.detection_date + self.retention)
            .fetch_one(&self.pool)
            .await?;
        row.try_get::<bool, _>("inserted")
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<ValidatedIpRecord, Error> {
        let address: String = row.try_get("address")?;
        let address: Ipv4Addr = address
            .parse()
            .map_err(|_| Error::parse(format!("Invalid address in store: {}", address)))?;
        let threat_level: String = row.try_get("threat_level")?;
        let confidence: i16 = row.try_get("confidence")?;

        Ok(ValidatedIpRecord {
            address,
            source: row.try_get("source")?,
            detection_date: row.try_get("detection_date")?,
            threat_level: threat_level.parse().unwrap_or(ThreatLevel::Medium),
            confidence: u8::try_from(confidence.clamp(0, 100)).unwrap_or(0),
            expiry_date: row.try_get("expiry_date")?,
        })
    }
}

/// Whether a per-record failure should abort the batch.
///
/// Constraint and data errors reported by the database concern one row;
/// anything else (pool closed, I/O, protocol) means the store is unusable.
fn is_row_level(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(_) | sqlx::Error::ColumnDecode { .. })
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn upsert(&self, records: &[ValidatedIpRecord], source: &str) -> Result<UpsertSummary, Error> {
        let mut summary = UpsertSummary::default();

        for record in records {
            if validator::is_reserved(record.address) || record.confidence > 100 {
                tracing::warn!("Skipping invalid record from {}: {}", source, record.address);
                summary.failed += 1;
                continue;
            }

            match self.upsert_one(record, source).await {
                Ok(true) => summary.imported += 1,
                Ok(false) => summary.duplicates += 1,
                Err(e) if is_row_level(&e) => {
                    tracing::warn!("Failed to upsert {} from {}: {}", record.address, source, e);
                    summary.failed += 1;
                }
                Err(e) => {
                    tracing::error!("Aborting batch from {}: {}", source, e);
                    return Err(Error::storage(format!("Upsert aborted: {}", e)));
                }
            }
        }

        tracing::debug!(
            "Upserted batch from {}: {} imported, {} duplicates, {} failed",
            source,
            summary.imported,
            summary.duplicates,
            summary.failed
        );
        Ok(summary)
    }

    async fn clear_source(&self, source: &str) -> Result<usize, Error> {
        let result = sqlx::query(
            "UPDATE threat_ips SET is_active = FALSE, updated_at = NOW() \
             WHERE source = $1 AND is_active",
        )
        .bind(source)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn count_active(&self) -> Result<usize, Error> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM threat_ips WHERE is_active AND expiry_date > NOW()",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as usize)
    }

    async fn list_active(&self, limit: usize) -> Result<Vec<ValidatedIpRecord>, Error> {
        let rows = sqlx::query(
            "SELECT address, source, detection_date, threat_level, confidence, expiry_date \
             FROM threat_ips WHERE is_active AND expiry_date > NOW() \
             ORDER BY detection_date DESC, address ASC LIMIT $1",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<usize, Error> {
        let result = sqlx::query(
            "UPDATE threat_ips SET is_active = FALSE, updated_at = NOW() \
             WHERE is_active AND expiry_date <= $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }
}
