// # Extraction strategies
//
// Three independent ways of pulling addresses out of a portal session, in
// the order the runner tries them:
//
// 1. `ListingStrategy`: paginated HTML listing
// 2. `ExportStrategy`: spreadsheet download for the date range
// 3. `ApiProbeStrategy`: undocumented JSON endpoints
//
// Strategies return unvalidated candidates; validation and deduplication
// happen once, in the runner.

pub mod api;
pub mod export;
pub mod listing;

pub use api::ApiProbeStrategy;
pub use export::ExportStrategy;
pub use listing::ListingStrategy;

use ipfeed_core::config::{ExtractionConfig, SourceConfig};
use ipfeed_core::model::{RawContext, RawRecord, StrategyKind, ThreatLevel};
use ipfeed_core::traits::ExtractionStrategy;
use ipfeed_core::validator;

/// Longest row excerpt kept as a record snippet
const SNIPPET_CHARS: usize = 160;

/// Strategies for a source, in priority order
pub fn build_strategies(source: &SourceConfig, extraction: &ExtractionConfig) -> Vec<Box<dyn ExtractionStrategy>> {
    vec![
        Box::new(ListingStrategy::new(&source.portal, extraction)),
        Box::new(ExportStrategy::new(&source.portal)),
        Box::new(ApiProbeStrategy::new(&source.portal, extraction)),
    ]
}

/// Column positions recognised from a header row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnMap {
    pub address: Option<usize>,
    pub date: Option<usize>,
    pub threat: Option<usize>,
}

impl ColumnMap {
    /// Match header labels (English and Korean portal wording)
    pub fn from_headers<S: AsRef<str>>(headers: &[S]) -> Self {
        let mut map = ColumnMap::default();
        for (index, header) in headers.iter().enumerate() {
            let label = header.as_ref().trim().to_lowercase();
            if label.is_empty() {
                continue;
            }
            if map.address.is_none() && is_address_label(&label) {
                map.address = Some(index);
            } else if map.date.is_none() && is_date_label(&label) {
                map.date = Some(index);
            } else if map.threat.is_none() && is_threat_label(&label) {
                map.threat = Some(index);
            }
        }
        map
    }

    pub fn is_empty(&self) -> bool {
        self.address.is_none() && self.date.is_none() && self.threat.is_none()
    }

    /// Candidates from one data row
    ///
    /// With a known address column only that cell is scanned; otherwise
    /// every cell is.
    pub fn records_from_row<S: AsRef<str>>(&self, cells: &[S], origin: StrategyKind) -> Vec<RawRecord> {
        let cell = |index: Option<usize>| index.and_then(|i| cells.get(i)).map(|c| c.as_ref());

        let joined = cells.iter().map(|c| c.as_ref().trim()).collect::<Vec<_>>().join(" | ");
        let scan_text = match cell(self.address) {
            Some(text) => text.to_string(),
            None => joined.clone(),
        };

        let context = RawContext {
            detection_date: cell(self.date).and_then(parse_cell_date),
            threat_level: cell(self.threat).and_then(ThreatLevel::infer),
            snippet: Some(joined.chars().take(SNIPPET_CHARS).collect()),
        };

        candidate_records(&scan_text, origin, &context)
    }
}

fn is_address_label(label: &str) -> bool {
    label == "ip"
        || label.starts_with("ip ")
        || label.starts_with("ip_")
        || label.starts_with("ip주소")
        || label.contains("ip address")
        || label.contains("ipaddress")
        || label.contains("source ip")
        || label.contains("아이피")
        || label == "address"
}

fn is_date_label(label: &str) -> bool {
    ["date", "time", "detected", "일시", "날짜", "탐지일", "등록일"]
        .iter()
        .any(|needle| label.contains(needle))
}

fn is_threat_label(label: &str) -> bool {
    ["threat", "level", "risk", "severity", "위험", "등급"]
        .iter()
        .any(|needle| label.contains(needle))
}

/// Dates as they appear in cells, including spreadsheet day serials
pub fn parse_cell_date(text: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    if let Some(date) = RawContext::parse_date(text) {
        return Some(date);
    }
    let serial: f64 = text.trim().parse().ok()?;
    // Plausible serials only: 1954..2119
    if !(20_000.0..80_000.0).contains(&serial) {
        return None;
    }
    let epoch = chrono::NaiveDate::from_ymd_opt(1899, 12, 30)?;
    let date = epoch.checked_add_signed(chrono::Duration::days(serial.trunc() as i64))?;
    date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc())
}

/// Every dotted quad in `text` as a record sharing `context`
pub fn candidate_records(text: &str, origin: StrategyKind, context: &RawContext) -> Vec<RawRecord> {
    validator::candidates(text)
        .map(|candidate| RawRecord::new(candidate, origin).with_context(context.clone()))
        .collect()
}
