//! Tabular export
//!
//! Requests the portal's spreadsheet export for the date range. The
//! artifact is written to a temporary file (deleted on drop) and read with
//! calamine on the blocking pool. Portals also answer this endpoint with
//! CSV, or with an HTML table served under a spreadsheet name; both are
//! handled.

use async_trait::async_trait;
use calamine::{Data, Reader, open_workbook_auto};
use ipfeed_core::config::PortalEndpoints;
use ipfeed_core::model::{DateRange, RawRecord, StrategyKind};
use ipfeed_core::traits::{ExtractionStrategy, Session};
use ipfeed_core::{Error, Result};
use reqwest::header::CONTENT_TYPE;
use std::io::Write;
use tracing::debug;

use super::ColumnMap;
use super::listing::parse_listing_page;
use crate::client;

/// Rows searched for a header before treating the sheet as headerless
const HEADER_SEARCH_ROWS: usize = 10;

/// What the export endpoint actually sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Xlsx,
    Xls,
    Csv,
    Html,
    Unknown,
}

/// Classify by magic bytes first, then by content type
pub fn detect_artifact(content_type: &str, bytes: &[u8]) -> ArtifactKind {
    if bytes.starts_with(b"PK\x03\x04") {
        return ArtifactKind::Xlsx;
    }
    if bytes.starts_with(&[0xD0, 0xCF, 0x11, 0xE0]) {
        return ArtifactKind::Xls;
    }

    let content_type = content_type.to_ascii_lowercase();
    if content_type.contains("csv") {
        ArtifactKind::Csv
    } else if content_type.contains("html")
        || bytes.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'<')
    {
        ArtifactKind::Html
    } else {
        ArtifactKind::Unknown
    }
}

pub struct ExportStrategy {
    endpoints: PortalEndpoints,
}

impl ExportStrategy {
    pub fn new(endpoints: &PortalEndpoints) -> Self {
        Self {
            endpoints: endpoints.clone(),
        }
    }
}

#[async_trait]
impl ExtractionStrategy for ExportStrategy {
    async fn extract(&self, session: &Session, range: &DateRange) -> Result<Vec<RawRecord>> {
        let response = session
            .client()
            .post(session.url(&self.endpoints.export))
            .form(&[("startDate", range.start_param()), ("endDate", range.end_param())])
            .send()
            .await
            .map_err(|e| Error::network(format!("Export request failed: {}", e)))?;

        let status = response.status();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::network(format!("Export download failed: {}", e)))?;

        if !status.is_success() {
            return Err(client::status_error(status, "Export", &String::from_utf8_lossy(&bytes)));
        }

        let kind = detect_artifact(&content_type, &bytes);
        debug!("Export returned {} bytes as {:?} ({})", bytes.len(), kind, content_type);

        match kind {
            ArtifactKind::Xlsx | ArtifactKind::Xls => {
                let data = bytes.to_vec();
                let rows = tokio::task::spawn_blocking(move || read_workbook(&data, kind))
                    .await
                    .map_err(|e| Error::Other(format!("Export parser did not finish: {}", e)))??;
                Ok(parse_sheet_rows(&rows))
            }
            ArtifactKind::Csv => Ok(parse_sheet_rows(&parse_csv(&bytes)?)),
            ArtifactKind::Html => {
                let text = String::from_utf8_lossy(&bytes);
                client::ensure_not_login_page(&final_url, &text, &self.endpoints)?;
                let page = parse_listing_page(&text)?;
                Ok(page
                    .records
                    .into_iter()
                    .map(|mut record| {
                        record.origin = StrategyKind::Export;
                        record
                    })
                    .collect())
            }
            ArtifactKind::Unknown => Err(Error::parse(format!(
                "Unexpected export content type: {}",
                content_type
            ))),
        }
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Export
    }
}

/// Rows of the first worksheet, as text
fn read_workbook(bytes: &[u8], kind: ArtifactKind) -> Result<Vec<Vec<String>>> {
    let suffix = if kind == ArtifactKind::Xls { ".xls" } else { ".xlsx" };
    let mut artifact = tempfile::Builder::new()
        .prefix("ipfeed-export-")
        .suffix(suffix)
        .tempfile()?;
    artifact.write_all(bytes)?;
    artifact.flush()?;

    let mut workbook = open_workbook_auto(artifact.path())
        .map_err(|e| Error::parse(format!("Unreadable export workbook: {}", e)))?;
    let sheet = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| Error::parse("Export workbook has no sheets"))?
        .map_err(|e| Error::parse(format!("Unreadable export sheet: {}", e)))?;

    Ok(sheet
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect())
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        Data::DateTime(serial) => serial.as_f64().to_string(),
        other => other.to_string(),
    }
}

/// Rows of a CSV export, as text
///
/// Rows may differ in length. Fields that are not valid UTF-8 are decoded
/// lossily, since some portals still export in a legacy code page.
pub fn parse_csv(bytes: &[u8]) -> Result<Vec<Vec<String>>> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut rows = Vec::new();
    for record in reader.byte_records() {
        let record = record.map_err(|e| Error::parse(format!("Malformed CSV export: {}", e)))?;
        let row: Vec<String> = record
            .iter()
            .map(|field| String::from_utf8_lossy(field).trim().to_string())
            .collect();
        if row.iter().any(|field| !field.is_empty()) {
            rows.push(row);
        }
    }
    Ok(rows)
}

/// Candidates from sheet rows
///
/// The first row (of the first few) naming an address column is the
/// header; rows above it are titles and are skipped. Without such a row
/// every cell of every row is scanned.
pub fn parse_sheet_rows(rows: &[Vec<String>]) -> Vec<RawRecord> {
    let header = rows
        .iter()
        .take(HEADER_SEARCH_ROWS)
        .position(|row| ColumnMap::from_headers(row).address.is_some());

    match header {
        Some(index) => {
            let columns = ColumnMap::from_headers(&rows[index]);
            rows[index + 1..]
                .iter()
                .flat_map(|row| columns.records_from_row(row, StrategyKind::Export))
                .collect()
        }
        None => rows
            .iter()
            .flat_map(|row| ColumnMap::default().records_from_row(row, StrategyKind::Export))
            .collect(),
    }
}
