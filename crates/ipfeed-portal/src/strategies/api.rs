//! API probe
//!
//! Tries the portal's undocumented data endpoints with a few common
//! request shapes and stops at the first answer with a valid address. An
//! answer holding only reserved addresses (a status document naming
//! `127.0.0.1`, say) does not end the probe.
//! JSON answers are walked recursively; objects with an address key keep
//! their sibling date and level fields as context. Non-JSON answers are
//! parsed like a listing page.

use async_trait::async_trait;
use ipfeed_core::config::{ExtractionConfig, PortalEndpoints};
use ipfeed_core::model::{DateRange, RawContext, RawRecord, StrategyKind, ThreatLevel};
use ipfeed_core::traits::{ExtractionStrategy, Session};
use ipfeed_core::{Error, Result, validator};
use serde_json::{Map, Value, json};
use tracing::debug;

use super::listing::parse_listing_page;
use super::{candidate_records, parse_cell_date};
use crate::client;

const ADDRESS_KEYS: &[&str] = &["ip", "ipAddress", "ip_address", "ipAddr", "address", "srcIp", "src_ip"];
const DATE_KEYS: &[&str] = &["detectionDate", "detectDate", "detection_date", "date", "regDate", "createdAt", "created_at"];
const LEVEL_KEYS: &[&str] = &["threatLevel", "threat_level", "level", "risk", "severity", "grade"];

/// How a probe request is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestShape {
    GetQuery,
    PostForm,
    PostJson,
}

impl RequestShape {
    pub const ALL: [RequestShape; 3] = [RequestShape::GetQuery, RequestShape::PostForm, RequestShape::PostJson];
}

pub struct ApiProbeStrategy {
    endpoints: PortalEndpoints,
    page_size: usize,
}

impl ApiProbeStrategy {
    pub fn new(endpoints: &PortalEndpoints, extraction: &ExtractionConfig) -> Self {
        Self {
            endpoints: endpoints.clone(),
            page_size: extraction.page_size as usize,
        }
    }

    async fn probe(
        &self,
        session: &Session,
        path: &str,
        shape: RequestShape,
        range: &DateRange,
    ) -> Result<Vec<RawRecord>> {
        let url = session.url(path);
        let params = [
            ("startDate", range.start_param()),
            ("endDate", range.end_param()),
            ("page", "1".to_string()),
            ("size", self.page_size.to_string()),
        ];
        let request = match shape {
            RequestShape::GetQuery => session.client().get(&url).query(&params),
            RequestShape::PostForm => session.client().post(&url).form(&params),
            RequestShape::PostJson => session.client().post(&url).json(&json!({
                "startDate": range.start_param(),
                "endDate": range.end_param(),
                "page": 1,
                "size": self.page_size,
            })),
        };

        let response = request
            .send()
            .await
            .map_err(|e| Error::network(format!("API probe {} failed: {}", path, e)))?;
        let (final_url, body) = client::read_text(response, "API probe").await?;
        client::ensure_not_login_page(&final_url, &body, &self.endpoints)?;

        match serde_json::from_str::<Value>(&body) {
            Ok(value) => Ok(scan_json(&value)),
            Err(_) => Ok(parse_listing_page(&body)?
                .records
                .into_iter()
                .map(|mut record| {
                    record.origin = StrategyKind::ApiProbe;
                    record
                })
                .collect()),
        }
    }
}

#[async_trait]
impl ExtractionStrategy for ApiProbeStrategy {
    async fn extract(&self, session: &Session, range: &DateRange) -> Result<Vec<RawRecord>> {
        let mut last_error = None;
        let mut failures = 0;
        let mut attempts = 0;

        for path in &self.endpoints.api_candidates {
            for shape in RequestShape::ALL {
                attempts += 1;
                match self.probe(session, path, shape, range).await {
                    Ok(records) if records.iter().any(|r| validator::is_valid(&r.candidate)) => {
                        debug!("API probe {} ({:?}) returned {} candidates", path, shape, records.len());
                        return Ok(records);
                    }
                    Ok(records) => debug!(
                        "API probe {} ({:?}) returned {} candidates, none usable",
                        path,
                        shape,
                        records.len()
                    ),
                    // Session loss ends the probe; every other endpoint would bounce too.
                    Err(e @ Error::Authentication(_)) => return Err(e),
                    Err(e) => {
                        debug!("API probe {} ({:?}) failed: {}", path, shape, e);
                        failures += 1;
                        last_error = Some(e);
                    }
                }
            }
        }

        // An endpoint that answered with nothing is an answer
        match last_error {
            Some(e) if failures == attempts => Err(e),
            _ => Ok(Vec::new()),
        }
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::ApiProbe
    }
}

/// Candidates anywhere in a JSON document
///
/// Arrays keep their order; object members are visited in key order.
pub fn scan_json(value: &Value) -> Vec<RawRecord> {
    let mut records = Vec::new();
    walk(value, &mut records);
    records
}

fn walk(value: &Value, records: &mut Vec<RawRecord>) {
    match value {
        Value::String(text) => {
            records.extend(candidate_records(text, StrategyKind::ApiProbe, &RawContext::default()));
        }
        Value::Array(items) => items.iter().for_each(|item| walk(item, records)),
        Value::Object(object) => match address_field(object) {
            Some(address) => {
                let context = object_context(object);
                records.extend(candidate_records(address, StrategyKind::ApiProbe, &context));
                object
                    .values()
                    .filter(|child| child.is_array() || child.is_object())
                    .for_each(|child| walk(child, records));
            }
            None => object.values().for_each(|child| walk(child, records)),
        },
        _ => {}
    }
}

fn address_field(object: &Map<String, Value>) -> Option<&str> {
    ADDRESS_KEYS
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
}

fn object_context(object: &Map<String, Value>) -> RawContext {
    let text_of = |keys: &[&str]| {
        keys.iter().find_map(|key| match object.get(*key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    };

    RawContext {
        detection_date: text_of(DATE_KEYS).as_deref().and_then(parse_cell_date),
        threat_level: text_of(LEVEL_KEYS).as_deref().and_then(ThreatLevel::infer),
        snippet: None,
    }
}
