//! Extraction runner
//!
//! The runner is responsible for:
//! - Running strategies in priority order (listing, export, API probe)
//! - Retrying a strategy that errors, up to the configured limit
//! - Falling back to the next strategy when one yields nothing usable
//! - Validating and deduplicating the surviving candidates
//!
//! ## Modes
//!
//! ```text
//! FirstSuccess:  listing ──empty──▶ export ──empty──▶ api_probe
//!                   │                  │                  │
//!                   └──── valid ───────┴──── valid ───────┴──▶ validate + dedupe
//!
//! MergeAll:      listing ──▶ export ──▶ api_probe ──▶ validate + dedupe
//! ```
//!
//! A strategy counts as productive only if at least one of its candidates
//! survives validation; a page full of private addresses falls through.
//!
//! Errors that are fatal for the run (see [`Error::is_fatal_for_run`]) are
//! not retried. An authentication error means the portal dropped the
//! session, so the remaining strategies are skipped and the report is
//! marked `session_lost`.

use chrono::{Duration, Utc};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ExtractionConfig, ExtractionMode, StoreConfig};
use crate::error::{Error, Result};
use crate::model::{DateRange, RawRecord, StrategyKind, ThreatLevel, ValidatedIpRecord};
use crate::traits::{ExtractionStrategy, Session};
use crate::validator;

/// Values applied to records whose strategy could not infer them
#[derive(Debug, Clone)]
pub struct RecordDefaults {
    pub source: String,
    pub threat_level: ThreatLevel,
    pub confidence: u8,
    pub retention: Duration,
}

impl RecordDefaults {
    pub fn new(source: impl Into<String>, store: &StoreConfig) -> Self {
        Self {
            source: source.into(),
            threat_level: store.default_threat_level,
            confidence: store.default_confidence,
            retention: Duration::days(i64::from(store.retention_days)),
        }
    }
}

/// What one strategy contributed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Returned candidates; `valid` of them passed validation
    Yielded { raw: usize, valid: usize },
    /// Returned no candidates
    Empty,
    /// Errored on every attempt
    Failed(String),
    /// Not run (earlier success, lost session or cancellation)
    Skipped,
}

/// Report line for one strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyAttempt {
    pub strategy: String,
    pub kind: StrategyKind,
    /// Number of calls made (0 when skipped)
    pub attempts: usize,
    pub outcome: AttemptOutcome,
}

/// Result of [`ExtractionRunner::collect`]
#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    /// Validated, deduplicated records in first-seen order
    pub records: Vec<ValidatedIpRecord>,
    /// One line per configured strategy, in priority order
    pub attempts: Vec<StrategyAttempt>,
    /// Candidates returned by the strategies that were used
    pub raw_count: usize,
    /// Stopped at a cancellation checkpoint
    pub cancelled: bool,
    /// A strategy was refused by the portal mid-run
    pub session_lost: bool,
}

impl ExtractionReport {
    /// Strategy whose output was used, in first-success mode
    pub fn productive_strategy(&self) -> Option<StrategyKind> {
        self.attempts.iter().find_map(|attempt| match attempt.outcome {
            AttemptOutcome::Yielded { valid, .. } if valid > 0 => Some(attempt.kind),
            _ => None,
        })
    }
}

/// Orchestrates strategies for one source
pub struct ExtractionRunner {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    mode: ExtractionMode,
    strategy_retries: usize,
    retry_delay: std::time::Duration,
    defaults: RecordDefaults,
}

impl ExtractionRunner {
    /// Create a runner
    ///
    /// # Parameters
    ///
    /// - `strategies`: In priority order
    /// - `config`: Mode and retry policy
    /// - `defaults`: Source name and fallback record fields
    pub fn new(
        strategies: Vec<Box<dyn ExtractionStrategy>>,
        config: &ExtractionConfig,
        defaults: RecordDefaults,
    ) -> Self {
        Self {
            strategies,
            mode: config.mode,
            strategy_retries: config.strategy_retries,
            retry_delay: std::time::Duration::from_secs(config.retry_delay_secs),
            defaults,
        }
    }

    pub fn mode(&self) -> ExtractionMode {
        self.mode
    }

    pub fn strategy_count(&self) -> usize {
        self.strategies.len()
    }

    /// Run the strategies and return validated records
    pub async fn collect(&self, session: &Session, range: &DateRange) -> ExtractionReport {
        self.collect_with_cancel(session, range, &CancellationToken::new())
            .await
    }

    /// Like [`collect`](Self::collect), checking `cancel` before each
    /// strategy and between retries
    pub async fn collect_with_cancel(
        &self,
        session: &Session,
        range: &DateRange,
        cancel: &CancellationToken,
    ) -> ExtractionReport {
        let mut report = ExtractionReport::default();
        let mut merged: Vec<RawRecord> = Vec::new();
        let mut done = false;

        for strategy in &self.strategies {
            if done || report.session_lost || cancel.is_cancelled() {
                if cancel.is_cancelled() && !done {
                    report.cancelled = true;
                }
                report.attempts.push(StrategyAttempt {
                    strategy: strategy.name().to_string(),
                    kind: strategy.kind(),
                    attempts: 0,
                    outcome: AttemptOutcome::Skipped,
                });
                continue;
            }

            let (result, attempts) = self
                .run_with_retry(strategy.as_ref(), session, range, cancel)
                .await;

            let outcome = match result {
                Ok(raw) if raw.is_empty() => {
                    debug!("Strategy {} returned nothing for {}", strategy.name(), self.defaults.source);
                    AttemptOutcome::Empty
                }
                Ok(raw) => {
                    let valid = self.validate(&raw).len();
                    info!(
                        "Strategy {} yielded {} candidates ({} valid) for {}",
                        strategy.name(),
                        raw.len(),
                        valid,
                        self.defaults.source
                    );
                    let raw_len = raw.len();
                    match self.mode {
                        ExtractionMode::FirstSuccess if valid > 0 => {
                            report.raw_count = raw_len;
                            merged = raw;
                            done = true;
                        }
                        ExtractionMode::FirstSuccess => {}
                        ExtractionMode::MergeAll => {
                            report.raw_count += raw_len;
                            merged.extend(raw);
                        }
                    }
                    AttemptOutcome::Yielded { raw: raw_len, valid }
                }
                Err(e) => {
                    warn!("Strategy {} failed for {}: {}", strategy.name(), self.defaults.source, e);
                    match &e {
                        Error::Authentication(_) => report.session_lost = true,
                        Error::Cancelled(_) => report.cancelled = true,
                        _ => {}
                    }
                    AttemptOutcome::Failed(e.to_string())
                }
            };

            report.attempts.push(StrategyAttempt {
                strategy: strategy.name().to_string(),
                kind: strategy.kind(),
                attempts,
                outcome,
            });
        }

        report.records = self.validate(&merged);
        report
    }

    /// Call a strategy, retrying on error
    ///
    /// An empty result is an answer, not a failure, and is never retried.
    /// Neither is an error that is fatal for the run.
    async fn run_with_retry(
        &self,
        strategy: &dyn ExtractionStrategy,
        session: &Session,
        range: &DateRange,
        cancel: &CancellationToken,
    ) -> (Result<Vec<RawRecord>>, usize) {
        let mut last_error = None;
        let mut attempts = 0;

        for attempt in 0..=self.strategy_retries {
            attempts += 1;
            match strategy.extract(session, range).await {
                Ok(records) => return (Ok(records), attempts),
                Err(e) => {
                    warn!("Strategy {} attempt {} failed: {}", strategy.name(), attempt, e);
                    let fatal = e.is_fatal_for_run();
                    last_error = Some(e);
                    if fatal {
                        break;
                    }

                    if attempt < self.strategy_retries {
                        tokio::select! {
                            _ = tokio::time::sleep(self.retry_delay) => {}
                            _ = cancel.cancelled() => {
                                last_error = Some(Error::cancelled(format!(
                                    "{} interrupted between retries",
                                    strategy.name()
                                )));
                                break;
                            }
                        }
                    }
                }
            }
        }

        let error = last_error
            .unwrap_or_else(|| Error::Other("Strategy did not run".to_string()));
        (Err(error), attempts)
    }

    /// Validate, deduplicate and complete raw candidates
    pub fn validate(&self, raw: &[RawRecord]) -> Vec<ValidatedIpRecord> {
        let now = Utc::now();
        let mut seen = HashSet::new();

        raw.iter()
            .filter_map(|record| {
                let address = validator::parse_valid(&record.candidate)?;
                if !seen.insert(address) {
                    return None;
                }
                let detection_date = record.context.detection_date.unwrap_or(now);
                Some(ValidatedIpRecord {
                    address,
                    source: self.defaults.source.clone(),
                    detection_date,
                    threat_level: record
                        .context
                        .threat_level
                        .unwrap_or(self.defaults.threat_level),
                    confidence: self.defaults.confidence,
                    expiry_date: detection_date + self.defaults.retention,
                })
            })
            .collect()
    }
}
