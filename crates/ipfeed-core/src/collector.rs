//! Per-source collection pipeline
//!
//! One [`SourceCollector`] per configured source. Each run:
//!
//! 1. Authenticates (failure ends the run)
//! 2. Runs the extraction strategies over the lookback window
//! 3. Logs out, whatever happened in step 2 (a session the portal already
//!    dropped is invalidated first)
//! 4. Upserts the validated records (storage failure ends the run)
//!
//! The session never outlives the run that created it.

use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Credential;
use crate::error::Error;
use crate::model::{CollectionOutcome, DateRange};
use crate::runner::{AttemptOutcome, ExtractionRunner};
use crate::traits::{CollectionTask, RecordStore, SessionAuthenticator};

/// Collection pipeline for one source
pub struct SourceCollector {
    source: String,
    credential: Credential,
    authenticator: Arc<dyn SessionAuthenticator>,
    runner: ExtractionRunner,
    store: Arc<dyn RecordStore>,
    lookback_days: u32,
}

impl SourceCollector {
    pub fn new(
        source: impl Into<String>,
        credential: Credential,
        authenticator: Arc<dyn SessionAuthenticator>,
        runner: ExtractionRunner,
        store: Arc<dyn RecordStore>,
        lookback_days: u32,
    ) -> Self {
        Self {
            source: source.into(),
            credential,
            authenticator,
            runner,
            store,
            lookback_days,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Run the pipeline once
    pub async fn collect(&self, cancel: &CancellationToken) -> CollectionOutcome {
        if cancel.is_cancelled() {
            return CollectionOutcome::failure(Error::cancelled("before authentication").to_string());
        }

        let mut session = match self.authenticator.authenticate(&self.credential).await {
            Ok(session) => session,
            Err(e) => {
                error!(
                    "Authentication against {} failed for {}: {}",
                    self.authenticator.portal_name(),
                    self.source,
                    e
                );
                return CollectionOutcome::failure(e.to_string());
            }
        };
        info!("Authenticated to {} (session {})", self.source, session.id());

        let range = DateRange::last_days(self.lookback_days, Utc::now().date_naive());
        let report = self.runner.collect_with_cancel(&session, &range, cancel).await;

        if report.session_lost {
            warn!("{} dropped the session during extraction", self.source);
            session.invalidate();
        }
        self.authenticator.logout(session).await;

        let all_failed = !report.attempts.is_empty()
            && report
                .attempts
                .iter()
                .all(|attempt| matches!(attempt.outcome, AttemptOutcome::Failed(_)));
        if all_failed {
            warn!("Every strategy failed for {}", self.source);
            return CollectionOutcome::failure("All extraction strategies failed");
        }

        if report.session_lost && report.records.is_empty() {
            return CollectionOutcome::failure("Portal dropped the session before any data was read");
        }

        if report.cancelled && report.records.is_empty() {
            return CollectionOutcome::failure(Error::cancelled("during extraction").to_string());
        }

        let collected = report.records.len();
        match self.store.upsert(&report.records, &self.source).await {
            Ok(summary) => {
                info!(
                    "Collected {} addresses from {}: {} new, {} duplicates, {} failed",
                    collected, self.source, summary.imported, summary.duplicates, summary.failed
                );
                CollectionOutcome {
                    success: true,
                    collected,
                    stored: summary.imported,
                    duplicates: summary.duplicates,
                    failed: summary.failed,
                    error: None,
                }
            }
            Err(e) => {
                error!("Storing records from {} failed: {}", self.source, e);
                CollectionOutcome {
                    collected,
                    ..CollectionOutcome::failure(e.to_string())
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl CollectionTask for SourceCollector {
    async fn run(&self, cancel: CancellationToken) -> CollectionOutcome {
        self.collect(&cancel).await
    }
}
