use std::collections::HashSet;

use async_trait::async_trait;

use crate::errors::VenueResult;

/// Maintains the single upstream monitoring subscription (§4.8). The core
/// never issues a per-wallet subscribe/unsubscribe call — only full-set
/// replacement, so drift cannot accumulate across partial failures.
#[async_trait]
pub trait MonitorClient: Send + Sync {
    async fn replace_addresses(&self, addresses: HashSet<String>) -> VenueResult<()>;
}
