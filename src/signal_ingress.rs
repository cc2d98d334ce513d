// =============================================================================
// Signal Ingress (§4.1) — deduplicates webhook events and turns them into
// typed signals, routed to sharded lanes for per-wallet causal ordering.
// Generalizes the teacher's per-symbol task-per-stream spawn loop in
// `main.rs` into per-lane consumer workers.
// =============================================================================

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::domain::{Signal, SignalKind, WalletId};
use crate::repositories::{SignalRepo, WalletRepo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Ack,
    Retry,
    Duplicate,
}

/// Fields the transport layer has already extracted from the raw webhook
/// body. Ingress trusts that the signature has been verified by the caller
/// (§4.1 precondition) — it does not re-verify authenticity.
#[derive(Debug, Clone)]
pub struct RawSwapEvent {
    pub tx_signature: String,
    pub source_wallet_address: String,
    pub token_in: String,
    pub token_out: String,
    pub amount_in: f64,
    pub amount_out: f64,
    pub raw_payload: Value,
}

/// The base-quote token set used to classify buy vs sell. In production
/// this would be wSOL/USDC/USDT; kept configurable rather than hard-coded
/// so tests can use a synthetic quote token.
#[derive(Debug, Clone)]
pub struct QuoteTokenSet {
    pub quote_tokens: std::collections::HashSet<String>,
}

impl QuoteTokenSet {
    pub fn classify(&self, token_in: &str, token_out: &str) -> Option<(SignalKind, String)> {
        let in_is_quote = self.quote_tokens.contains(token_in);
        let out_is_quote = self.quote_tokens.contains(token_out);
        match (in_is_quote, out_is_quote) {
            (true, false) => Some((SignalKind::Buy, token_out.to_string())),
            (false, true) => Some((SignalKind::Sell, token_in.to_string())),
            _ => None,
        }
    }
}

/// What ingress hands downstream per lane: a signal ready for the Safety
/// Evaluator (buys) or the mirror-exit path (sells).
#[derive(Debug, Clone)]
pub struct RoutedSignal {
    pub signal: Signal,
}

pub struct SignalIngress {
    wallets: Arc<dyn WalletRepo>,
    signals: Arc<dyn SignalRepo>,
    quote_tokens: QuoteTokenSet,
    lanes: Vec<mpsc::Sender<RoutedSignal>>,
}

impl SignalIngress {
    pub fn new(
        wallets: Arc<dyn WalletRepo>,
        signals: Arc<dyn SignalRepo>,
        quote_tokens: QuoteTokenSet,
        lanes: Vec<mpsc::Sender<RoutedSignal>>,
    ) -> Self {
        Self { wallets, signals, quote_tokens, lanes }
    }

    fn lane_for(&self, wallet_id: WalletId) -> &mpsc::Sender<RoutedSignal> {
        let n = self.lanes.len().max(1) as u128;
        let idx = (wallet_id.0.as_u128() % n) as usize;
        &self.lanes[idx]
    }

    /// `ingest(raw_event) -> Ack` (§4.1). Step 1 dedups on `tx_signature`
    /// unconditionally, before any wallet lookup: a webhook from an
    /// unknown or inactive wallet still gets its dedup row inserted first,
    /// so a replay of that same event hits the conflict branch and returns
    /// `Duplicate` — without this ordering, an unknown-wallet signal could
    /// never insert a row to dedup against and would retry forever.
    pub async fn ingest(&self, event: RawSwapEvent) -> Ack {
        let mut signal = Signal {
            id: crate::domain::SignalId::new(),
            wallet_id: WalletId(uuid::Uuid::nil()),
            tx_signature: event.tx_signature.clone(),
            kind: SignalKind::Buy,
            token_address: event.token_out.clone(),
            amount_in: event.amount_in,
            amount_out: event.amount_out,
            received_at: chrono::Utc::now(),
            processed_at: None,
            filtered: false,
            filter_reason: None,
            position_id: None,
            raw_payload: event.raw_payload.clone(),
        };

        match self.signals.insert_if_absent(signal.clone()).await {
            Ok(Some(id)) => signal.id = id,
            Ok(None) => {
                info!(tx_signature = %event.tx_signature, "ingress: duplicate signal");
                return Ack::Duplicate;
            }
            Err(e) => {
                warn!(error = %e, "ingress: persistence failure before wallet resolution");
                return Ack::Retry;
            }
        }

        // Step 2 (§4.1): resolve the wallet now that the dedup row exists.
        let wallet = match self.wallets.get_by_address(&event.source_wallet_address).await {
            Ok(Some(w)) if w.active => w,
            Ok(Some(w)) => {
                warn!(wallet = %event.source_wallet_address, "ingress: inactive wallet");
                return self.finalize_filtered(signal, w.id, "inactive_wallet").await;
            }
            Ok(None) => {
                warn!(wallet = %event.source_wallet_address, "ingress: unknown wallet");
                let nil_wallet = signal.wallet_id;
                return self.finalize_filtered(signal, nil_wallet, "unknown_wallet").await;
            }
            Err(e) => {
                warn!(error = %e, "ingress: wallet lookup failed");
                return Ack::Retry;
            }
        };

        let Some((kind, token_address)) = self.quote_tokens.classify(&event.token_in, &event.token_out)
        else {
            return self.finalize_filtered(signal, wallet.id, "not_a_base_quote_swap").await;
        };

        signal.wallet_id = wallet.id;
        signal.kind = kind;
        signal.token_address = token_address;

        if let Err(e) = self.signals.update(signal.clone()).await {
            warn!(error = %e, "ingress: failed to finalize signal wallet binding");
            return Ack::Retry;
        }

        let lane = self.lane_for(wallet.id);
        match lane.try_send(RoutedSignal { signal }) {
            Ok(()) => Ack::Ack,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(wallet = %wallet.address, "ingress: lane full, backpressure");
                Ack::Retry
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(wallet = %wallet.address, "ingress: lane closed");
                Ack::Retry
            }
        }
    }

    /// Marks the already-inserted dedup row as filtered and persists it in
    /// place — the signal exists from step 1 regardless of what the wallet
    /// lookup found, so there's no "no row to persist against" case left.
    async fn finalize_filtered(&self, mut signal: Signal, wallet_id: WalletId, reason: &str) -> Ack {
        signal.wallet_id = wallet_id;
        signal.mark_filtered(reason);
        match self.signals.update(signal).await {
            Ok(()) => Ack::Ack,
            Err(e) => {
                warn!(error = %e, "ingress: failed to persist filtered signal");
                Ack::Retry
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::wallet::AccountMode;
    use crate::domain::{StrategyId, Wallet};
    use crate::repositories::memory::{InMemorySignalRepo, InMemoryWalletRepo};
    use crate::repositories::WalletRepo as _;

    fn quote_set() -> QuoteTokenSet {
        let mut s = std::collections::HashSet::new();
        s.insert("USDC".to_string());
        QuoteTokenSet { quote_tokens: s }
    }

    async fn setup() -> (SignalIngress, mpsc::Receiver<RoutedSignal>, WalletId) {
        let wallets: Arc<dyn WalletRepo> = Arc::new(InMemoryWalletRepo::default());
        let signals: Arc<dyn SignalRepo> = Arc::new(InMemorySignalRepo::default());
        let wallet = Wallet::new(
            "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA".to_string(),
            "w1".into(),
            AccountMode::Simulation,
            StrategyId::new(),
        )
        .unwrap();
        let wallet_id = wallet.id;
        wallets.upsert(wallet).await.unwrap();
        let (tx, rx) = mpsc::channel(8);
        let ingress = SignalIngress::new(wallets, signals, quote_set(), vec![tx]);
        (ingress, rx, wallet_id)
    }

    fn buy_event(tx_sig: &str) -> RawSwapEvent {
        RawSwapEvent {
            tx_signature: tx_sig.to_string(),
            source_wallet_address: "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA".to_string(),
            token_in: "USDC".to_string(),
            token_out: "MEME".to_string(),
            amount_in: 100.0,
            amount_out: 1000.0,
            raw_payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn duplicate_signal_is_rejected_second_time() {
        let (ingress, mut rx, _wallet_id) = setup().await;
        let ack1 = ingress.ingest(buy_event("AAA")).await;
        let ack2 = ingress.ingest(buy_event("AAA")).await;
        assert_eq!(ack1, Ack::Ack);
        assert_eq!(ack2, Ack::Duplicate);
        let routed = rx.recv().await.unwrap();
        assert_eq!(routed.signal.tx_signature, "AAA");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_wallet_is_filtered_but_still_dedups_on_replay() {
        let (ingress, mut rx, _wallet_id) = setup().await;
        let mut event = buy_event("BBB");
        event.source_wallet_address = "unknownaddressxxxxxxxxxxxxxxxxxxxxxxxxxx".to_string();

        // First delivery persists the dedup row (filtered) and acks.
        let ack = ingress.ingest(event.clone()).await;
        assert_eq!(ack, Ack::Ack);
        assert!(rx.try_recv().is_err());

        // A replay of the exact same webhook must dedup, not retry forever.
        let ack2 = ingress.ingest(event).await;
        assert_eq!(ack2, Ack::Duplicate);
    }

    #[tokio::test]
    async fn inactive_wallet_signal_is_persisted_filtered_and_not_routed() {
        let wallets: Arc<dyn WalletRepo> = Arc::new(InMemoryWalletRepo::default());
        let signals: Arc<dyn SignalRepo> = Arc::new(InMemorySignalRepo::default());
        let mut wallet = Wallet::new(
            "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA".to_string(),
            "w1".into(),
            AccountMode::Simulation,
            StrategyId::new(),
        )
        .unwrap();
        wallet.active = false;
        wallets.upsert(wallet).await.unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let ingress = SignalIngress::new(wallets, signals, quote_set(), vec![tx]);

        // Inactive wallet: filtered, Ack (not Retry) since a row was
        // persisted, and never routed to a lane.
        let ack = ingress.ingest(buy_event("CCC")).await;
        assert_eq!(ack, Ack::Ack);
        assert!(rx.try_recv().is_err());

        // A second identical event now collides on tx_signature.
        let ack2 = ingress.ingest(buy_event("CCC")).await;
        assert_eq!(ack2, Ack::Duplicate);
    }
}
