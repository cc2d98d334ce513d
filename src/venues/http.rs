// =============================================================================
// HTTP signed swap-aggregator client — adapted from the teacher's
// `binance/client.rs` HMAC-SHA256 signing idiom, retargeted at a generic
// Solana swap-aggregator HTTP API (quote + execute) instead of an exchange
// REST API. SECURITY: the API secret is used only to sign requests; it is
// never logged or serialized (the `Debug` impl below redacts it).
// =============================================================================

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use tracing::{debug, instrument, warn};

use crate::errors::VenueError;
use crate::venues::quote::QuoteClient;
use crate::venues::signer::Signer;
use crate::venues::swap::{Quote, SwapClient, SwapResult};

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW_MS: u64 = 5000;

/// Signed HTTP client for a generic swap-aggregator API. One instance backs
/// both `QuoteClient` and `SwapClient` in live mode.
#[derive(Clone)]
pub struct HttpSwapClient {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpSwapClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>, base_url: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-API-KEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self { api_key, secret, base_url: base_url.into(), client }
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts any key size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    fn signed_body(&self, params: &str) -> (String, String) {
        let ts = Self::timestamp_ms();
        let base = format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW_MS}");
        let sig = self.sign(&base);
        (base, sig)
    }

    fn map_status(status: reqwest::StatusCode, body: &str) -> VenueError {
        if status.as_u16() == 429 {
            VenueError::RateLimited
        } else if status.is_server_error() || status == reqwest::StatusCode::REQUEST_TIMEOUT {
            VenueError::Transient(format!("{status}: {body}"))
        } else {
            VenueError::Permanent(format!("{status}: {body}"))
        }
    }
}

impl std::fmt::Debug for HttpSwapClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSwapClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[async_trait]
impl QuoteClient for HttpSwapClient {
    #[instrument(skip(self), name = "http_swap::batch_prices")]
    async fn batch_prices(&self, tokens: &[String]) -> Result<HashMap<String, f64>, VenueError> {
        let joined = tokens.join(",");
        let url = format!("{}/v1/prices?tokens={}", self.base_url, joined);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| VenueError::Transient(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            warn!(%status, "batch_prices request failed");
            return Err(Self::map_status(status, &body));
        }

        serde_json::from_str::<HashMap<String, f64>>(&body)
            .map_err(|e| VenueError::Permanent(format!("malformed price response: {e}")))
    }
}

#[async_trait]
impl SwapClient for HttpSwapClient {
    #[instrument(skip(self), name = "http_swap::quote")]
    async fn quote(&self, in_token: &str, out_token: &str, amount: f64) -> Result<Quote, VenueError> {
        let url = format!(
            "{}/v1/quote?in={in_token}&out={out_token}&amount={amount}",
            self.base_url
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| VenueError::Transient(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Self::map_status(status, &body));
        }

        #[derive(serde::Deserialize)]
        struct QuoteResponse {
            amount_out_expected: f64,
            slippage_pct: f64,
        }

        let parsed: QuoteResponse = serde_json::from_str(&body)
            .map_err(|e| VenueError::Permanent(format!("malformed quote response: {e}")))?;

        debug!(amount_out = parsed.amount_out_expected, "quote received");

        Ok(Quote {
            in_token: in_token.to_string(),
            out_token: out_token.to_string(),
            amount_in: amount,
            amount_out_expected: parsed.amount_out_expected,
            slippage_pct: parsed.slippage_pct,
        })
    }

    #[instrument(skip(self, quote, signer), name = "http_swap::execute")]
    async fn execute(&self, quote: &Quote, signer: &dyn Signer) -> Result<SwapResult, VenueError> {
        let params = format!(
            "in={}&out={}&amount={}&signer={}",
            quote.in_token,
            quote.out_token,
            quote.amount_in,
            signer.public_address()
        );
        let (base, signature) = self.signed_body(&params);
        let tx_signature = signer.sign(base.as_bytes());

        let url = format!("{}/v1/execute", self.base_url);
        let resp = self
            .client
            .post(&url)
            .body(format!("{base}&signature={signature}&tx_signature={tx_signature}"))
            .send()
            .await
            .map_err(|e| VenueError::Transient(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Self::map_status(status, &body));
        }

        #[derive(serde::Deserialize)]
        struct ExecuteResponse {
            tx_signature: String,
            amount_out: f64,
            slippage_actual: f64,
        }

        let parsed: ExecuteResponse = serde_json::from_str(&body)
            .map_err(|e| VenueError::Permanent(format!("malformed execute response: {e}")))?;

        Ok(SwapResult {
            tx_signature: parsed.tx_signature,
            amount_out: parsed.amount_out,
            slippage_actual: parsed.slippage_actual,
        })
    }
}
