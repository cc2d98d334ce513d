// =============================================================================
// Paper/simulation venue implementations — used in demo mode. Adapted from
// the teacher's `execute_demo` path in `execution.rs`: no network calls, a
// deterministic fill at the requested price, immediate success.
// =============================================================================

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::domain::token::SafetyChecks;
use crate::errors::VenueResult;
use crate::venues::safety_client::SafetyReport;
use crate::venues::signer::Signer;
use crate::venues::swap::{Quote, SwapResult};
use crate::venues::{MonitorClient, QuoteClient, SafetyClient, SwapClient};

/// Seeded, externally-nudgeable price table. Tests and the paper run loop
/// call `set_price` to move the market; `batch_prices` just reads it back.
#[derive(Default)]
pub struct PaperQuoteClient {
    prices: RwLock<HashMap<String, f64>>,
}

impl PaperQuoteClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, token: &str, price: f64) {
        self.prices.write().insert(token.to_string(), price);
    }
}

#[async_trait]
impl QuoteClient for PaperQuoteClient {
    async fn batch_prices(&self, tokens: &[String]) -> VenueResult<HashMap<String, f64>> {
        let prices = self.prices.read();
        Ok(tokens
            .iter()
            .filter_map(|t| prices.get(t).map(|p| (t.clone(), *p)))
            .collect())
    }
}

#[derive(Default)]
pub struct PaperSwapClient;

impl PaperSwapClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SwapClient for PaperSwapClient {
    async fn quote(&self, in_token: &str, out_token: &str, amount: f64) -> VenueResult<Quote> {
        Ok(Quote {
            in_token: in_token.to_string(),
            out_token: out_token.to_string(),
            amount_in: amount,
            amount_out_expected: amount,
            slippage_pct: 0.0,
        })
    }

    async fn execute(&self, quote: &Quote, _signer: &dyn Signer) -> VenueResult<SwapResult> {
        Ok(SwapResult {
            tx_signature: format!("paper-{}", Uuid::new_v4()),
            amount_out: quote.amount_out_expected,
            slippage_actual: 0.0,
        })
    }
}

/// Always passes all four checks — useful as the primary source in demo
/// mode, or as a stand-in `secondary`/`tertiary` tier in tests.
pub struct PaperSafetyClient {
    pub pass: bool,
}

impl PaperSafetyClient {
    pub fn always_pass() -> Self {
        Self { pass: true }
    }

    pub fn always_fail() -> Self {
        Self { pass: false }
    }
}

#[async_trait]
impl SafetyClient for PaperSafetyClient {
    async fn analyze(&self, _token_address: &str) -> VenueResult<SafetyReport> {
        Ok(SafetyReport {
            checks: SafetyChecks {
                liquidity: Some(self.pass),
                holders: Some(self.pass),
                contract: Some(self.pass),
                age: Some(self.pass),
            },
            liquidity_usd: Some(if self.pass { 100_000.0 } else { 1_000.0 }),
            top10_concentration_pct: Some(if self.pass { 30.0 } else { 95.0 }),
            age_hours: Some(if self.pass { 48 } else { 1 }),
            symbol: Some("PAPER".to_string()),
        })
    }
}

#[derive(Default)]
pub struct PaperMonitorClient {
    pub last_set: RwLock<HashSet<String>>,
}

#[async_trait]
impl MonitorClient for PaperMonitorClient {
    async fn replace_addresses(&self, addresses: HashSet<String>) -> VenueResult<()> {
        *self.last_set.write() = addresses;
        Ok(())
    }
}

pub struct PaperSigner {
    pub address: String,
}

impl Signer for PaperSigner {
    fn sign(&self, _payload: &[u8]) -> String {
        format!("paper-sig-{}", Uuid::new_v4())
    }

    fn public_address(&self) -> &str {
        &self.address
    }
}
