//! Listing-page scrape
//!
//! Walks the portal's paginated HTML listing for the date range. Rows are
//! read through their table headers when the headers are recognisable, so
//! detection date and threat level come along with the address. A page
//! without a usable table falls back to scanning its visible text.
//!
//! Pagination stops at the first page with no candidate rows, a short page
//! (fewer data rows than the page size, counting rows with a masked or blank
//! address), a page identical to the previous one (portals that ignore the
//! page parameter), or the page cap.

use async_trait::async_trait;
use ipfeed_core::config::{ExtractionConfig, PortalEndpoints};
use ipfeed_core::model::{DateRange, RawContext, RawRecord, StrategyKind};
use ipfeed_core::traits::{ExtractionStrategy, Session};
use ipfeed_core::{Error, Result};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::{ColumnMap, candidate_records};
use crate::client;

/// What one listing page contained
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    /// Table rows that carried at least one candidate
    pub rows: usize,
    /// Table rows with data cells, candidate or not
    pub data_rows: usize,
    pub records: Vec<RawRecord>,
}

pub struct ListingStrategy {
    endpoints: PortalEndpoints,
    page_size: usize,
    max_pages: usize,
}

impl ListingStrategy {
    pub fn new(endpoints: &PortalEndpoints, extraction: &ExtractionConfig) -> Self {
        Self {
            endpoints: endpoints.clone(),
            page_size: extraction.page_size as usize,
            max_pages: extraction.max_pages as usize,
        }
    }

    async fn fetch_page(&self, session: &Session, range: &DateRange, page: usize) -> Result<String> {
        let response = session
            .client()
            .get(session.url(&self.endpoints.listing))
            .query(&[
                ("startDate", range.start_param()),
                ("endDate", range.end_param()),
                ("page", page.to_string()),
                ("pageSize", self.page_size.to_string()),
            ])
            .send()
            .await
            .map_err(|e| Error::network(format!("Listing page {} failed: {}", page, e)))?;

        let (final_url, body) = client::read_text(response, "Listing page").await?;
        client::ensure_not_login_page(&final_url, &body, &self.endpoints)?;
        Ok(body)
    }
}

#[async_trait]
impl ExtractionStrategy for ListingStrategy {
    async fn extract(&self, session: &Session, range: &DateRange) -> Result<Vec<RawRecord>> {
        let mut records = Vec::new();
        let mut previous: Vec<String> = Vec::new();

        for page in 1..=self.max_pages {
            let body = self.fetch_page(session, range, page).await?;
            let parsed = parse_listing_page(&body)?;
            debug!("Listing page {}: {} rows, {} candidates", page, parsed.rows, parsed.records.len());

            if parsed.rows == 0 {
                if page == 1 {
                    records.extend(parsed.records);
                }
                break;
            }

            let current: Vec<String> = parsed.records.iter().map(|r| r.candidate.clone()).collect();
            if current == previous {
                debug!("Listing page {} repeats the previous page", page);
                break;
            }

            let short_page = parsed.data_rows < self.page_size;
            records.extend(parsed.records);
            previous = current;

            if short_page {
                break;
            }
        }

        Ok(records)
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Listing
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| Error::parse(format!("Bad selector {}: {:?}", css, e)))
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse one listing page
///
/// Header rows (`th` only) set the column map for the rows after them.
/// When no table row carries a candidate, the page's visible text is
/// scanned instead and `rows` stays 0.
pub fn parse_listing_page(html: &str) -> Result<ListingPage> {
    let document = Html::parse_document(html);
    let table = selector("table")?;
    let row = selector("tr")?;
    let header_cell = selector("th")?;
    let data_cell = selector("td")?;

    let mut page = ListingPage::default();

    for table in document.select(&table) {
        let mut columns = ColumnMap::default();
        for tr in table.select(&row) {
            let cells: Vec<String> = tr.select(&data_cell).map(element_text).collect();
            if cells.is_empty() {
                let headers: Vec<String> = tr.select(&header_cell).map(element_text).collect();
                if !headers.is_empty() {
                    columns = ColumnMap::from_headers(&headers);
                }
                continue;
            }

            page.data_rows += 1;
            let found = columns.records_from_row(&cells, StrategyKind::Listing);
            if !found.is_empty() {
                page.rows += 1;
                page.records.extend(found);
            }
        }
    }

    if page.rows == 0 {
        let body = selector("body")?;
        let text = document
            .select(&body)
            .next()
            .map(element_text)
            .unwrap_or_default();
        page.records = candidate_records(&text, StrategyKind::Listing, &RawContext::default());
    }

    Ok(page)
}
