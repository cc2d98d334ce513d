use async_trait::async_trait;

use crate::errors::VenueResult;
use crate::venues::signer::Signer;

#[derive(Debug, Clone)]
pub struct Quote {
    pub in_token: String,
    pub out_token: String,
    pub amount_in: f64,
    pub amount_out_expected: f64,
    pub slippage_pct: f64,
}

#[derive(Debug, Clone)]
pub struct SwapResult {
    pub tx_signature: String,
    pub amount_out: f64,
    pub slippage_actual: f64,
}

/// The Execution Queue holds exclusive logical access to this trait (§5) —
/// no other component may call it directly.
#[async_trait]
pub trait SwapClient: Send + Sync {
    async fn quote(&self, in_token: &str, out_token: &str, amount: f64) -> VenueResult<Quote>;

    async fn execute(&self, quote: &Quote, signer: &dyn Signer) -> VenueResult<SwapResult>;
}
