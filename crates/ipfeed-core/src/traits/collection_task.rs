// # Collection Task Trait
//
// What the scheduler runs for a source. The production implementation is
// `SourceCollector`; tests register their own.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::model::CollectionOutcome;

/// One runnable collection for a source
///
/// Implementations report every failure through the returned outcome; the
/// scheduler never sees an `Err` or a panic from a well-behaved task.
#[async_trait]
pub trait CollectionTask: Send + Sync {
    /// Run once
    ///
    /// # Parameters
    ///
    /// - `cancel`: Fires when the scheduler stops. Checked between stages;
    ///   in-flight requests are allowed to finish.
    async fn run(&self, cancel: CancellationToken) -> CollectionOutcome;
}
