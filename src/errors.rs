// =============================================================================
// Error taxonomy (§7) — the core's typed error kinds. `anyhow` is still used
// at the composition root (config load/save, venue construction, main) for
// anywhere the caller only logs and moves on; `EngineError` is for paths
// where the caller dispatches on the kind (retry, escalate, filter).
// =============================================================================

use thiserror::Error;

/// Errors surfaced by venue trait implementations (`QuoteClient`,
/// `SwapClient`, `SafetyClient`, `MonitorClient`). Deliberately smaller than
/// `EngineError` — callers map these into policy decisions.
#[derive(Debug, Error)]
pub enum VenueError {
    #[error("transient venue error: {0}")]
    Transient(String),
    #[error("rate limited by venue")]
    RateLimited,
    #[error("permanent venue error: {0}")]
    Permanent(String),
}

impl VenueError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited)
    }
}

/// The core's own error kinds, covering every path named in §7.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("duplicate signal for tx_signature {0}")]
    Duplicate(String),

    #[error("unknown entity: {0}")]
    Unknown(String),

    #[error("inactive entity: {0}")]
    Inactive(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("transient failure (attempt {attempt}): {message}")]
    Transient { attempt: u32, message: String },

    #[error("rate limited, retry without consuming budget")]
    RateLimited,

    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("stale data: {0}")]
    StaleData(String),

    #[error("circuit breaker open")]
    BreakerOpen,

    #[error("catastrophic failure, pipeline stage quiesced: {0}")]
    Catastrophic(String),
}

impl From<VenueError> for EngineError {
    fn from(e: VenueError) -> Self {
        match e {
            VenueError::Transient(msg) => EngineError::Transient { attempt: 0, message: msg },
            VenueError::RateLimited => EngineError::RateLimited,
            VenueError::Permanent(msg) => EngineError::Permanent(msg),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
pub type VenueResult<T> = Result<T, VenueError>;
