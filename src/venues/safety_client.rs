use async_trait::async_trait;

use crate::domain::token::SafetyChecks;
use crate::errors::VenueResult;

/// A single source's verdict. `None` on a check means the source doesn't
/// cover it (§4.2 partial-data reproportioning).
#[derive(Debug, Clone, Default)]
pub struct SafetyReport {
    pub checks: SafetyChecks,
    pub liquidity_usd: Option<f64>,
    pub top10_concentration_pct: Option<f64>,
    pub age_hours: Option<u32>,
    pub symbol: Option<String>,
}

/// One tier of the primary/secondary/tertiary fallback chain (§4.2).
#[async_trait]
pub trait SafetyClient: Send + Sync {
    async fn analyze(&self, token_address: &str) -> VenueResult<SafetyReport>;
}
