//! Data model shared by every stage of the pipeline
//!
//! ```text
//! strategy ── RawRecord ──▶ runner ── ValidatedIpRecord ──▶ store
//!                                                          │
//! scheduler ◀──────────── CollectionOutcome ───────────────┘
//! ```

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use uuid::Uuid;

/// Which extraction method produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Paginated structured listing pages
    Listing,
    /// Downloadable spreadsheet export
    Export,
    /// Ad-hoc REST endpoint probing
    ApiProbe,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Listing => "listing",
            StrategyKind::Export => "export",
            StrategyKind::ApiProbe => "api_probe",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Threat level attached to a collected address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Low => "low",
            ThreatLevel::Medium => "medium",
            ThreatLevel::High => "high",
            ThreatLevel::Critical => "critical",
        }
    }

    /// Best-effort inference from a free-form cell or JSON value.
    ///
    /// Accepts level names (any case, a few common synonyms) and the numeric
    /// scale 1..=4 used by several portals.
    pub fn infer(text: &str) -> Option<Self> {
        let lowered = text.trim().to_ascii_lowercase();
        if lowered.is_empty() {
            return None;
        }

        match lowered.as_str() {
            "1" => return Some(ThreatLevel::Low),
            "2" => return Some(ThreatLevel::Medium),
            "3" => return Some(ThreatLevel::High),
            "4" | "5" => return Some(ThreatLevel::Critical),
            _ => {}
        }

        if lowered.contains("critical") || lowered.contains("severe") {
            Some(ThreatLevel::Critical)
        } else if lowered.contains("high") || lowered.contains("danger") {
            Some(ThreatLevel::High)
        } else if lowered.contains("medium") || lowered.contains("mid") || lowered.contains("moderate") {
            Some(ThreatLevel::Medium)
        } else if lowered.contains("low") || lowered.contains("info") {
            Some(ThreatLevel::Low)
        } else {
            None
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThreatLevel {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::infer(s).ok_or_else(|| crate::Error::parse(format!("Unknown threat level: {}", s)))
    }
}

/// Inclusive date window passed to every strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> crate::Result<Self> {
        if start > end {
            return Err(crate::Error::config(format!(
                "Date range start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// The `days`-day window ending on `today`
    pub fn last_days(days: u32, today: NaiveDate) -> Self {
        let start = today - Duration::days(i64::from(days));
        Self { start, end: today }
    }

    /// Start date in the `YYYY-MM-DD` form portals expect
    pub fn start_param(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }

    /// End date in the `YYYY-MM-DD` form portals expect
    pub fn end_param(&self) -> String {
        self.end.format("%Y-%m-%d").to_string()
    }
}

/// Per-row context a strategy may have been able to infer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawContext {
    pub detection_date: Option<DateTime<Utc>>,
    pub threat_level: Option<ThreatLevel>,
    /// Surrounding text, kept for debugging only
    pub snippet: Option<String>,
}

impl RawContext {
    /// Parse the date formats seen in listing cells, spreadsheet cells and
    /// JSON fields. Dates without a time are taken as midnight UTC.
    pub fn parse_date(text: &str) -> Option<DateTime<Utc>> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Some(dt.with_timezone(&Utc));
        }

        const DATETIME_FORMATS: &[&str] = &[
            "%Y-%m-%d %H:%M:%S",
            "%Y-%m-%dT%H:%M:%S",
            "%Y-%m-%d %H:%M",
            "%Y/%m/%d %H:%M:%S",
            "%Y.%m.%d %H:%M:%S",
        ];
        for format in DATETIME_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
                return Some(naive.and_utc());
            }
        }

        const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%Y%m%d"];
        for format in DATE_FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(text, format) {
                return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
            }
        }

        None
    }
}

/// One candidate address as produced by a strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Unvalidated address text
    pub candidate: String,
    pub origin: StrategyKind,
    pub context: RawContext,
}

impl RawRecord {
    pub fn new(candidate: impl Into<String>, origin: StrategyKind) -> Self {
        Self {
            candidate: candidate.into(),
            origin,
            context: RawContext::default(),
        }
    }

    pub fn with_context(mut self, context: RawContext) -> Self {
        self.context = context;
        self
    }
}

/// An address that passed validation, ready for the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedIpRecord {
    pub address: Ipv4Addr,
    pub source: String,
    pub detection_date: DateTime<Utc>,
    pub threat_level: ThreatLevel,
    /// 0..=100
    pub confidence: u8,
    pub expiry_date: DateTime<Utc>,
}

/// Result of one run, as reported to the scheduler and to trigger callers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionOutcome {
    pub success: bool,
    pub collected: usize,
    pub stored: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub error: Option<String>,
}

impl CollectionOutcome {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// One execution of the pipeline for a single source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRun {
    pub id: Uuid,
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub success: bool,
    pub collected_count: usize,
    pub stored_count: usize,
    pub duplicate_count: usize,
    pub error: Option<String>,
}

impl CollectionRun {
    /// Open a run record at `started_at`
    pub fn begin(source: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            started_at,
            finished_at: None,
            success: false,
            collected_count: 0,
            stored_count: 0,
            duplicate_count: 0,
            error: None,
        }
    }

    /// Close the run with the pipeline's outcome
    pub fn finish(&mut self, outcome: &CollectionOutcome, finished_at: DateTime<Utc>) {
        self.finished_at = Some(finished_at);
        self.success = outcome.success;
        self.collected_count = outcome.collected;
        self.stored_count = outcome.stored;
        self.duplicate_count = outcome.duplicates;
        self.error = outcome.error.clone();
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threat_level_inference() {
        assert_eq!(ThreatLevel::infer("HIGH"), Some(ThreatLevel::High));
        assert_eq!(ThreatLevel::infer(" Critical risk "), Some(ThreatLevel::Critical));
        assert_eq!(ThreatLevel::infer("moderate"), Some(ThreatLevel::Medium));
        assert_eq!(ThreatLevel::infer("3"), Some(ThreatLevel::High));
        assert_eq!(ThreatLevel::infer("unknown"), None);
        assert_eq!(ThreatLevel::infer(""), None);
        assert!("nonsense".parse::<ThreatLevel>().is_err());
    }

    #[test]
    fn parse_date_accepts_portal_formats() {
        let midnight = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();

        assert_eq!(RawContext::parse_date("2024-03-05"), Some(midnight));
        assert_eq!(RawContext::parse_date("2024/03/05"), Some(midnight));
        assert_eq!(RawContext::parse_date("2024.03.05"), Some(midnight));
        assert_eq!(
            RawContext::parse_date("2024-03-05 10:20:30"),
            Some(midnight + Duration::seconds(10 * 3600 + 20 * 60 + 30))
        );
        assert!(RawContext::parse_date("2024-03-05T10:20:30+00:00").is_some());
        assert_eq!(RawContext::parse_date("yesterday"), None);
    }

    #[test]
    fn date_range_rejects_inverted_bounds() {
        let a = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let b = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert!(DateRange::new(a, b).is_err());

        let range = DateRange::last_days(7, a);
        assert_eq!(range.start_param(), "2024-02-27");
        assert_eq!(range.end_param(), "2024-03-05");
    }

    #[test]
    fn run_finish_copies_outcome() {
        let now = Utc::now();
        let mut run = CollectionRun::begin("portal", now);
        assert!(!run.is_finished());

        let outcome = CollectionOutcome {
            success: true,
            collected: 4,
            stored: 3,
            duplicates: 1,
            failed: 0,
            error: None,
        };
        run.finish(&outcome, now + Duration::seconds(5));

        assert!(run.is_finished());
        assert!(run.success);
        assert_eq!(run.collected_count, 4);
        assert_eq!(run.stored_count, 3);
        assert_eq!(run.duplicate_count, 1);
    }
}
