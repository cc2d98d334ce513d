use std::collections::HashMap;

use async_trait::async_trait;

use crate::errors::VenueResult;

/// A venue that can price multiple tokens in a single round trip, used by
/// the Price Monitor (§4.6). `max_batch` bounds a single call's token list.
#[async_trait]
pub trait QuoteClient: Send + Sync {
    const MAX_BATCH: usize = 100;

    async fn batch_prices(&self, tokens: &[String]) -> VenueResult<HashMap<String, f64>>;

    /// Object-safe mirror of `MAX_BATCH` — the Price Monitor holds clients
    /// as `Arc<dyn QuoteClient>`, and an associated const isn't reachable
    /// through a trait object. Implementors that override `MAX_BATCH` get
    /// this for free.
    fn max_batch(&self) -> usize {
        Self::MAX_BATCH
    }
}
