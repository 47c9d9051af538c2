// # Extraction Strategy Trait
//
// One way of pulling candidate addresses out of an authenticated session.
//
// ## Implementations
//
// - Listing scrape, tabular export, API probe: `ipfeed-portal` crate
//
// ## Contract
//
// - Strategies are independent: none may assume another already ran.
// - Strategies are stateless between calls so the runner can retry them.
// - Network and format problems are returned as `Err`; the runner turns
//   them into an empty contribution. A strategy never aborts a run.

use async_trait::async_trait;

use crate::model::{DateRange, RawRecord, StrategyKind};
use crate::traits::authenticator::Session;

/// Trait for extraction strategies
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    /// Extract raw candidates for `range`
    ///
    /// # Returns
    ///
    /// - `Ok(records)`: Possibly empty list of unvalidated candidates
    /// - `Err(Error::Network | Error::Parse)`: Strategy-level failure
    async fn extract(&self, session: &Session, range: &DateRange) -> crate::Result<Vec<RawRecord>>;

    /// Which strategy this is
    fn kind(&self) -> StrategyKind;

    /// Name used in logs and attempt reports
    fn name(&self) -> &str {
        self.kind().as_str()
    }
}
