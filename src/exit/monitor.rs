// =============================================================================
// Exit Monitor (§4.5 / §4.6 tie-in) — periodic mark + evaluate + dispatch
// loop plus an immediate mirror-sell fast path. Grounded on the teacher's
// `run_exit_monitor` loop shape (wake on an interval, iterate open
// positions, evaluate, close triggered ones, log every exit with its
// reason) generalized from the teacher's in-memory `BarrierState`/
// `MicroTrailState` maps to the stateless `exit::evaluator::evaluate` plus
// `PriceMonitor` for marks.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::domain::{Position, WalletId};
use crate::exit::evaluator::{evaluate, ExitContext, ExitDecision};
use crate::position_engine::PositionEngine;
use crate::price_monitor::{classify, PriceMonitor, PriceOutcome, Tier};
use crate::repositories::PositionRepo;
use crate::runtime_config::PriceMonitorParams;

const TICK_SECS: u64 = 5;

/// Tracks wallet/token pairs that have had a mirror sell observed since the
/// position opened, so a tick that runs before the fast path fires still
/// sees `mirror_sell_observed = true` if the fast path's own exit attempt
/// failed or raced a breaker trip.
#[derive(Default)]
struct MirrorSellTracker {
    observed: RwLock<HashSet<(WalletId, String)>>,
}

impl MirrorSellTracker {
    fn mark(&self, wallet: WalletId, token_address: &str) {
        self.observed.write().insert((wallet, token_address.to_string()));
    }

    fn clear(&self, wallet: WalletId, token_address: &str) {
        self.observed.write().remove(&(wallet, token_address.to_string()));
    }

    fn has_observed(&self, wallet: WalletId, token_address: &str) -> bool {
        self.observed.read().contains(&(wallet, token_address.to_string()))
    }
}

pub struct ExitMonitor {
    positions: Arc<dyn PositionRepo>,
    engine: Arc<PositionEngine>,
    price_monitor: Arc<PriceMonitor>,
    params: PriceMonitorParams,
    slippage_req_pct: f64,
    mirror_tracker: MirrorSellTracker,
}

impl ExitMonitor {
    pub fn new(
        positions: Arc<dyn PositionRepo>,
        engine: Arc<PositionEngine>,
        price_monitor: Arc<PriceMonitor>,
        params: PriceMonitorParams,
        slippage_req_pct: f64,
    ) -> Self {
        Self {
            positions,
            engine,
            price_monitor,
            params,
            slippage_req_pct,
            mirror_tracker: MirrorSellTracker::default(),
        }
    }

    /// Background loop: spawn exactly one of these per process. Wakes every
    /// `TICK_SECS`, marks every open position against a freshly polled
    /// price, evaluates the exit rules, and dispatches any decision.
    pub async fn run(self: Arc<Self>) {
        info!(interval_secs = TICK_SECS, "exit monitor started");
        let mut ticker = interval(Duration::from_secs(TICK_SECS));
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                warn!(error = %e, "exit monitor: tick failed");
            }
        }
    }

    async fn tick(&self) -> anyhow::Result<()> {
        let open = self.positions.all_open().await?;
        if open.is_empty() {
            debug!("exit monitor: no open positions");
            return Ok(());
        }

        let tokens: Vec<String> = open.iter().map(|p| p.token_address.clone()).collect();
        let tiers: HashMap<String, Tier> = open
            .iter()
            .map(|p| (p.token_address.clone(), classify(p, self.params.urgent_threshold_pct)))
            .collect();
        let due = self.price_monitor.due_tokens(&tokens);
        let prices = self.price_monitor.poll_and_cache(&due, &tiers).await;

        for position in open {
            let price = match prices.get(&position.token_address) {
                Some(PriceOutcome::Fresh(p)) | Some(PriceOutcome::Stale(p)) => Some(*p),
                Some(PriceOutcome::Unavailable) | None => None,
            };
            let Some(price) = price else {
                debug!(token = %position.token_address, "exit monitor: no price available, skipping mark");
                continue;
            };

            let marked = match self.engine.apply_mark(position.id, price).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(position = %position.id, error = %e, "exit monitor: failed to apply mark");
                    continue;
                }
            };

            let ctx = ExitContext {
                mirror_sell_observed: self.mirror_tracker.has_observed(marked.wallet_id, &marked.token_address),
            };
            if let Some(decision) = evaluate(&marked, &ctx) {
                self.dispatch(&marked, decision).await;
            }
        }

        Ok(())
    }

    /// Immediate fast path for a mirror sell: called the moment a sell
    /// signal is observed for a tracked wallet, rather than waiting for the
    /// next tick. `OrderKind::ExitMirror` already carries `Priority::Critical`
    /// through the execution queue, so this only needs to get the decision
    /// in flight as soon as possible.
    pub async fn on_mirror_sell(&self, wallet: WalletId, token_address: &str) {
        self.mirror_tracker.mark(wallet, token_address);

        let matches = match self.positions.open_by_wallet_token(wallet, token_address).await {
            Ok(v) => v,
            Err(e) => {
                warn!(wallet = %wallet, token = token_address, error = %e, "exit monitor: failed to look up position for mirror sell");
                return;
            }
        };

        for position in matches {
            if !position.exit_strategy_snapshot.mirror_exit {
                continue;
            }
            let decision = ExitDecision {
                reason: crate::domain::ExitReason::MirrorExit,
                amount: position.current_amount,
            };
            self.dispatch(&position, decision).await;
        }
    }

    async fn dispatch(&self, position: &Position, decision: ExitDecision) {
        info!(
            position = %position.id,
            reason = %decision.reason,
            amount = decision.amount,
            "exit triggered"
        );
        match self.engine.submit_exit(position, decision.reason, decision.amount, self.slippage_req_pct).await {
            Ok(closed) => {
                if closed {
                    self.mirror_tracker.clear(position.wallet_id, &position.token_address);
                }
            }
            Err(e) => {
                warn!(position = %position.id, reason = %decision.reason, error = %e, "exit monitor: submit_exit failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::strategy::{ExitStrategy, ScalingLevel};
    use crate::domain::wallet::AccountMode;
    use crate::domain::StrategyId;
    use crate::execution_queue::{BreakerGate, ExecutionQueue};
    use crate::repositories::memory::InMemoryTradeStore;
    use crate::runtime_config::ExecutionParams;
    use crate::venues::paper::{PaperQuoteClient, PaperSwapClient};
    use crate::venues::SwapClient;

    fn strategy(mirror_exit: bool) -> ExitStrategy {
        ExitStrategy::new(
            StrategyId::new(),
            "t".into(),
            Some(10.0),
            None,
            None,
            vec![ScalingLevel { trigger_pct: 999.0, fraction_of_original: 0.1 }],
            mirror_exit,
        )
        .unwrap()
    }

    fn harness() -> (Arc<ExitMonitor>, Arc<InMemoryTradeStore>, Arc<PaperQuoteClient>) {
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

        let engine = Arc::new(PositionEngine::new(store.clone(), store.clone(), queue, swap, "USDC".into()));
        let quote_client = Arc::new(PaperQuoteClient::new());
        let quote: Arc<dyn crate::venues::QuoteClient> = quote_client.clone();
        let price_monitor = Arc::new(PriceMonitor::new(quote, None, PriceMonitorParams::default()));
        let monitor = Arc::new(ExitMonitor::new(
            store.clone() as Arc<dyn PositionRepo>,
            engine,
            price_monitor,
            PriceMonitorParams::default(),
            1.0,
        ));
        (monitor, store, quote_client)
    }

    #[tokio::test]
    async fn tick_closes_position_once_stop_loss_breached() {
        let (monitor, store, quote_client) = harness();
        let wallet_id = WalletId::new();
        let position = Position::open(wallet_id, "MEME".into(), AccountMode::Simulation, 100.0, 10.0, strategy(false));
        store.upsert(position.clone()).await.unwrap();
        quote_client.set_price("MEME", 85.0); // -15%, past the 10% stop-loss

        monitor.tick().await.unwrap();

        let reloaded = store.get(position.id).await.unwrap().unwrap();
        assert!(reloaded.current_amount <= crate::domain::position::AMOUNT_EPSILON);
    }

    #[tokio::test]
    async fn mirror_sell_fast_path_exits_matching_position() {
        let (monitor, store, _engine) = harness();
        let wallet_id = WalletId::new();
        let position = Position::open(wallet_id, "MEME".into(), AccountMode::Simulation, 100.0, 10.0, strategy(true));
        store.upsert(position.clone()).await.unwrap();

        monitor.on_mirror_sell(wallet_id, "MEME").await;
        let remaining = store.open_by_wallet_token(wallet_id, "MEME").await.unwrap();
        assert!(remaining.is_empty() || remaining[0].current_amount < position.current_amount);
    }
}
