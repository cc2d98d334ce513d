use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which safety source (if any) produced the current score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SafetySource {
    Primary,
    Secondary,
    Tertiary,
    None,
}

/// Per-check results behind a token's aggregate `safety_score`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SafetyChecks {
    pub liquidity: Option<bool>,
    pub holders: Option<bool>,
    pub contract: Option<bool>,
    pub age: Option<bool>,
}

/// Cached safety verdict for a token address. Upserted by the Safety
/// Evaluator; stale after `token_ttl` (default 1h, see `runtime_config`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub address: String,
    pub symbol: String,
    pub safety_score: f64,
    pub analyzed_at: DateTime<Utc>,
    pub source: SafetySource,
    pub checks: SafetyChecks,
}

impl Token {
    pub fn is_stale(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.analyzed_at > ttl
    }
}
