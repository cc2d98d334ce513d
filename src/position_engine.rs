// =============================================================================
// Position Lifecycle Engine (§4.4) — the sole mutator of `Position` state
// (§3 ownership rule; every other component only observes via repositories
// or immutable snapshots). Directly generalizes the teacher's
// `PositionManager`: `open`, `apply_mark`, `apply_fill` replace
// `open_position`, `update_price`, `close_position`/the inline TP1
// partial-close block.
// =============================================================================

use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::strategy::ExitStrategy;
use crate::domain::{ExitReason, Order, OrderId, OrderKind, Position, PositionId, Signal, Wallet};
use crate::errors::{EngineError, EngineResult};
use crate::execution_queue::{ExecutionQueue, OrderOutcome, Rejected, SwapRequest};
use crate::repositories::{OrderRepo, PositionRepo, TradeStore};
use crate::venues::SwapClient;

pub struct PositionEngine {
    store: Arc<dyn TradeStore>,
    execution_queue: Arc<ExecutionQueue>,
    swap_client: Arc<dyn SwapClient>,
    quote_token: String,
}

impl PositionEngine {
    pub fn new(
        store: Arc<dyn TradeStore>,
        execution_queue: Arc<ExecutionQueue>,
        swap_client: Arc<dyn SwapClient>,
        quote_token: String,
    ) -> Self {
        Self { store, execution_queue, swap_client, quote_token }
    }

    /// `open(wallet, signal, strategy) -> Position` (§4.4 steps 1-3).
    /// `amount_in` is already sized to `capital * per_trade_pct` by the
    /// caller. Quotes the entry swap, submits it at `NORMAL` priority, and
    /// on fill persists the position with `entry_price` derived from the
    /// actual amount received — never the quoted estimate.
    pub async fn open(
        &self,
        wallet: &Wallet,
        signal: &Signal,
        strategy_snapshot: ExitStrategy,
        amount_in: f64,
        slippage_req_pct: f64,
    ) -> EngineResult<Position> {
        let quote = self
            .swap_client
            .quote(&self.quote_token, &signal.token_address, amount_in)
            .await?;

        // The position doesn't exist yet (entry_price is only known once
        // the fill lands), but the order still needs a position_id to
        // reference. Pre-allocate it and stamp it onto the Position row
        // once the fill confirms.
        let position_id = PositionId::new();
        let order = Order::new_pending(
            position_id,
            OrderKind::Entry,
            wallet.mode,
            amount_in,
            quote.amount_out_expected,
            slippage_req_pct,
        );
        self.persist_order(&order).await?;

        let request = SwapRequest { order, quote };
        let (_order_id, rx) = self
            .execution_queue
            .submit(request)
            .map_err(|Rejected::BreakerOpen| EngineError::BreakerOpen)?;

        let outcome = rx
            .await
            .map_err(|_| EngineError::Catastrophic("execution queue dropped entry order".into()))?;

        match outcome {
            OrderOutcome::Filled { amount_out, tx_signature, order, .. } => {
                let entry_price = if amount_out > 0.0 { amount_in / amount_out } else { 0.0 };
                let mut position = Position::open(
                    wallet.id,
                    signal.token_address.clone(),
                    wallet.mode,
                    entry_price,
                    amount_out,
                    strategy_snapshot,
                );
                position.id = position_id;
                // Position creation and the order's terminal `Filled` row
                // land in one transaction (§4.4) — never two independent
                // writes a crash could land between.
                self.store
                    .commit(position.clone(), order)
                    .await
                    .map_err(|e| EngineError::Unknown(e.to_string()))?;
                info!(
                    position = %position.id,
                    token = %position.token_address,
                    entry_price,
                    amount_out,
                    tx_signature,
                    "position opened"
                );
                Ok(position)
            }
            OrderOutcome::Failed { reason } => {
                warn!(
                    wallet = %wallet.address,
                    token = %signal.token_address,
                    reason,
                    "entry order failed, no position opened"
                );
                Err(EngineError::Permanent(reason))
            }
            OrderOutcome::Cancelled => {
                info!(wallet = %wallet.address, token = %signal.token_address, "entry order cancelled, no position opened");
                Err(EngineError::Permanent("order cancelled".into()))
            }
        }
    }

    /// `apply_mark(position_id, price)` (§4.4 step 4). Updates
    /// `current_price`/`peak_price` in place; never touches
    /// `current_amount` (P2).
    pub async fn apply_mark(&self, position_id: PositionId, price: f64) -> EngineResult<Position> {
        let mut position = self.fetch(position_id).await?;
        position.apply_mark(price);
        self.persist_position(&position).await?;
        Ok(position)
    }

    /// Submits an exit order sized by `amount` for `position`, awaits the
    /// fill, and applies it. Returns `true` if the fill closed the
    /// position. The exit monitor and the mirror-sell fast path both go
    /// through this so every exit flows through the same
    /// quote-submit-apply sequence.
    pub async fn submit_exit(
        &self,
        position: &Position,
        reason: ExitReason,
        amount: f64,
        slippage_req_pct: f64,
    ) -> EngineResult<bool> {
        if amount <= 0.0 {
            return Ok(false);
        }

        let quote = self
            .swap_client
            .quote(&position.token_address, &self.quote_token, amount)
            .await?;

        let kind = order_kind_for(reason);
        let order = Order::new_pending(
            position.id,
            kind,
            position.mode,
            amount,
            quote.amount_out_expected,
            slippage_req_pct,
        );
        self.persist_order(&order).await?;

        let request = SwapRequest { order: order.clone(), quote };
        let (_order_id, rx) = match self.execution_queue.submit(request) {
            Ok(v) => v,
            Err(Rejected::BreakerOpen) => return Err(EngineError::BreakerOpen),
        };

        let outcome = rx
            .await
            .map_err(|_| EngineError::Catastrophic("execution queue dropped exit order".into()))?;

        match outcome {
            OrderOutcome::Filled { amount_out, order, .. } => self.apply_fill(&order, amount_out).await,
            OrderOutcome::Failed { reason: msg } => {
                warn!(position = %position.id, exit_reason = %reason, error = msg, "exit order failed");
                Err(EngineError::Permanent(msg))
            }
            OrderOutcome::Cancelled => {
                info!(position = %position.id, exit_reason = %reason, "exit order cancelled");
                Ok(false)
            }
        }
    }

    /// Cancels a not-yet-dispatched entry or exit order (§4.3, §5). No-op
    /// from the engine's side beyond the queue call: there is no position
    /// row yet for a pending entry, and a pending exit hasn't touched
    /// `current_amount`, so nothing here needs to be rolled back.
    pub async fn cancel_order(&self, order_id: OrderId) -> bool {
        self.execution_queue.cancel(order_id).await
    }

    /// `apply_fill(order_id, actual_amount_out, actual_price)` (§4.4 step
    /// 5) — applies a confirmed exit fill to the owning position, clamping
    /// the sell amount to whatever remains so a fill racing a prior
    /// priority exit never drives the amount negative (P2, P3).
    pub async fn apply_fill(&self, order: &Order, actual_amount_out: f64) -> EngineResult<bool> {
        let reason = match order.kind {
            OrderKind::ExitStop => ExitReason::StopLoss,
            OrderKind::ExitTrail => ExitReason::TrailingStop,
            OrderKind::ExitScale(k) => ExitReason::ScalingOut(k),
            OrderKind::ExitMirror => ExitReason::MirrorExit,
            OrderKind::ExitManual => ExitReason::Manual,
            OrderKind::Entry => {
                return Err(EngineError::Validation(
                    "apply_fill called with an Entry order".into(),
                ))
            }
        };

        let mut position = self.fetch(order.position_id).await?;
        let requested_amount = order.amount_in;
        let fill_price = if requested_amount > 0.0 {
            actual_amount_out / requested_amount
        } else {
            position.current_price
        };

        let closed = position.apply_exit_fill(requested_amount, fill_price, reason);
        // Same transactional pairing as `open()`: the position mutation and
        // the order's terminal row commit together (§4.4).
        self.store
            .commit(position.clone(), order.clone())
            .await
            .map_err(|e| EngineError::Unknown(e.to_string()))?;
        info!(
            position = %order.position_id,
            exit_reason = %reason,
            fill_price,
            closed,
            realized_pnl = position.realized_pnl,
            "exit fill applied"
        );
        Ok(closed)
    }

    async fn fetch(&self, position_id: PositionId) -> EngineResult<Position> {
        PositionRepo::get(self.store.as_ref(), position_id)
            .await
            .map_err(|e| EngineError::Unknown(e.to_string()))?
            .ok_or_else(|| EngineError::Unknown(format!("position {position_id} not found")))
    }

    /// Persists a position write with no accompanying order write (`apply_mark`
    /// only — no transaction needed since nothing else changes alongside it).
    async fn persist_position(&self, position: &Position) -> EngineResult<()> {
        PositionRepo::upsert(self.store.as_ref(), position.clone())
            .await
            .map_err(|e| EngineError::Unknown(e.to_string()))
    }

    /// Persists the initial `Pending` order row before it's handed to the
    /// execution queue. No position exists yet at this point, so there's
    /// nothing to transact it against.
    async fn persist_order(&self, order: &Order) -> EngineResult<()> {
        OrderRepo::upsert(self.store.as_ref(), order.clone())
            .await
            .map_err(|e| EngineError::Unknown(e.to_string()))
    }
}

fn order_kind_for(reason: ExitReason) -> OrderKind {
    match reason {
        ExitReason::StopLoss => OrderKind::ExitStop,
        ExitReason::MirrorExit => OrderKind::ExitMirror,
        ExitReason::TrailingStop => OrderKind::ExitTrail,
        ExitReason::ScalingOut(k) => OrderKind::ExitScale(k),
        ExitReason::Manual => OrderKind::ExitManual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::strategy::ScalingLevel;
    use crate::domain::wallet::AccountMode;
    use crate::domain::{SignalKind, StrategyId, WalletId};
    use crate::execution_queue::BreakerGate;
    use crate::repositories::memory::InMemoryTradeStore;
    use crate::runtime_config::ExecutionParams;
    use crate::venues::paper::PaperSwapClient;

    fn wallet() -> Wallet {
        Wallet::new(
            "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA".into(),
            "w1".into(),
            AccountMode::Simulation,
            StrategyId::new(),
        )
        .unwrap()
    }

    fn signal(wallet_id: WalletId) -> Signal {
        Signal {
            id: crate::domain::SignalId::new(),
            wallet_id,
            tx_signature: "SIG1".into(),
            kind: SignalKind::Buy,
            token_address: "MEME".into(),
            amount_in: 100.0,
            amount_out: 1000.0,
            received_at: chrono::Utc::now(),
            processed_at: None,
            filtered: false,
            filter_reason: None,
            position_id: None,
            raw_payload: serde_json::json!({}),
        }
    }

    fn strategy() -> ExitStrategy {
        ExitStrategy::new(
            StrategyId::new(),
            "default".into(),
            Some(20.0),
            Some(10.0),
            Some(15.0),
            vec![ScalingLevel { trigger_pct: 100.0, fraction_of_original: 0.5 }],
            true,
        )
        .unwrap()
    }

    fn engine() -> (PositionEngine, Arc<InMemoryTradeStore>) {
        let store = Arc::new(InMemoryTradeStore::default());
        let breaker = Arc::new(BreakerGate::default());
        let swap: Arc<dyn SwapClient> = Arc::new(PaperSwapClient::new());
        let mut params = ExecutionParams::default();
        params.min_spacing_ms = 0;
        let signer: Arc<dyn crate::venues::Signer> = Arc::new(crate::venues::paper::PaperSigner { address: "paper".into() });
        let queue = ExecutionQueue::new(breaker, swap.clone(), store.clone(), signer, params);
        let runner = queue.clone();
        let (_tx, rx) = tokio::sync::watch::channel(false);
        tokio::spawn(async move { runner.run(rx, true).await });
        let engine = PositionEngine::new(store.clone(), queue, swap, "USDC".into());
        (engine, store)
    }

    #[tokio::test]
    async fn open_persists_position_with_fill_derived_entry_price() {
        let (engine, _store) = engine();
        let w = wallet();
        let sig = signal(w.id);
        let position = engine.open(&w, &sig, strategy(), 100.0, 1.0).await.unwrap();
        // PaperSwapClient fills 1:1, so amount_out == amount_in == 100.0.
        assert_eq!(position.entry_amount, 100.0);
        assert_eq!(position.entry_price, 1.0);
    }

    #[tokio::test]
    async fn apply_mark_updates_price_without_touching_amount() {
        let (engine, _store) = engine();
        let w = wallet();
        let sig = signal(w.id);
        let position = engine.open(&w, &sig, strategy(), 100.0, 1.0).await.unwrap();
        let marked = engine.apply_mark(position.id, 1.5).await.unwrap();
        assert_eq!(marked.current_price, 1.5);
        assert_eq!(marked.current_amount, position.current_amount);
    }

    #[tokio::test]
    async fn submit_exit_closes_position_on_full_fill() {
        let (engine, _store) = engine();
        let w = wallet();
        let sig = signal(w.id);
        let position = engine.open(&w, &sig, strategy(), 100.0, 1.0).await.unwrap();
        let closed = engine
            .submit_exit(&position, ExitReason::Manual, position.current_amount, 1.0)
            .await
            .unwrap();
        assert!(closed);
    }
}
