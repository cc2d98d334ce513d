// =============================================================================
// Price Monitor (§4.6) — tiered, batched polling with primary/secondary
// fallback and staleness handling. Grounded on the teacher's
// `market_data/trade_stream.rs` reconnect-loop idiom (retry, log, continue)
// and `reconcile.rs`'s primary/secondary fallback shape, adapted from a
// push-stream consumer to a poll-and-batch client since `QuoteClient` is a
// batch request/response trait, not a subscription.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::warn;

use crate::domain::Position;
use crate::runtime_config::PriceMonitorParams;
use crate::venues::QuoteClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Urgent,
    Active,
    Stable,
}

impl Tier {
    fn poll_interval(self, params: &PriceMonitorParams) -> Duration {
        let secs = match self {
            Tier::Urgent => params.urgent_poll_secs,
            Tier::Active => params.active_poll_secs,
            Tier::Stable => params.stable_poll_secs,
        };
        Duration::from_secs(secs)
    }
}

/// Classifies a position's urgency from its own exit-strategy snapshot and
/// current mark, so the monitor polls positions near a trigger more
/// aggressively than ones far from any (§4.6 tiering rule).
pub fn classify(position: &Position, urgent_threshold_pct: f64) -> Tier {
    let strategy = &position.exit_strategy_snapshot;
    let pnl_pct = position.pnl_pct();
    let mut nearest_trigger_distance_pct: Option<f64> = None;
    let mut trailing_armed = false;

    if let Some(stop_loss_pct) = strategy.stop_loss_pct {
        let distance = (pnl_pct - (-stop_loss_pct)).abs();
        nearest_trigger_distance_pct = Some(nearest_trigger_distance_pct.map_or(distance, |d| d.min(distance)));
    }

    if let (Some(trail_pct), Some(activation_pct)) =
        (strategy.trailing_stop_pct, strategy.trailing_activation_pct)
    {
        if position.peak_pnl_pct() >= activation_pct {
            trailing_armed = true;
            let drawdown_from_peak_pct =
                (position.peak_price - position.current_price) / position.peak_price * 100.0;
            let distance = (trail_pct - drawdown_from_peak_pct).abs();
            nearest_trigger_distance_pct = Some(nearest_trigger_distance_pct.map_or(distance, |d| d.min(distance)));
        }
    }

    if let Some(distance) = nearest_trigger_distance_pct {
        if distance <= urgent_threshold_pct {
            return Tier::Urgent;
        }
    }

    if trailing_armed {
        Tier::Active
    } else {
        Tier::Stable
    }
}

#[derive(Debug, Clone, Copy)]
pub enum PriceOutcome {
    Fresh(f64),
    Stale(f64),
    Unavailable,
}

struct CachedPrice {
    price: f64,
    at: DateTime<Utc>,
}

/// Owns the price cache and per-token poll schedule. A single request
/// carries up to `max_batch_size` token addresses; tokens are grouped by
/// next poll deadline, not tier, so a mixed batch of urgent and stable
/// tokens that happen to come due together still rides one round trip.
pub struct PriceMonitor {
    primary: Arc<dyn QuoteClient>,
    secondary: Option<Arc<dyn QuoteClient>>,
    params: PriceMonitorParams,
    cache: RwLock<HashMap<String, CachedPrice>>,
    next_due: RwLock<HashMap<String, Instant>>,
}

impl PriceMonitor {
    pub fn new(
        primary: Arc<dyn QuoteClient>,
        secondary: Option<Arc<dyn QuoteClient>>,
        params: PriceMonitorParams,
    ) -> Self {
        Self {
            primary,
            secondary,
            params,
            cache: RwLock::new(HashMap::new()),
            next_due: RwLock::new(HashMap::new()),
        }
    }

    /// The cap actually enforced for a single round trip: the
    /// runtime-configurable `max_batch_size`, clamped to the primary
    /// client's own `MAX_BATCH` so a misconfigured (too-large) value can
    /// never exceed what the venue trait itself promises to accept.
    fn effective_batch_size(&self) -> usize {
        self.params.max_batch_size.min(self.primary.max_batch())
    }

    /// Returns up to the effective batch size of tokens from `tracked`
    /// whose next poll deadline has passed, soonest-due first. A token with
    /// no recorded deadline yet is treated as due immediately.
    pub fn due_tokens(&self, tracked: &[String]) -> Vec<String> {
        let now = Instant::now();
        let due = self.next_due.read();
        let mut candidates: Vec<(String, Instant)> = tracked
            .iter()
            .map(|t| (t.clone(), due.get(t).copied().unwrap_or(now)))
            .filter(|(_, deadline)| *deadline <= now)
            .collect();
        candidates.sort_by_key(|(_, deadline)| *deadline);
        candidates.truncate(self.effective_batch_size());
        candidates.into_iter().map(|(t, _)| t).collect()
    }

    /// Polls `tokens` through the primary client, falling back to the
    /// secondary on failure. Tokens the fallback chain still can't price
    /// fall back further to the cache if it isn't past `max_staleness_secs`.
    /// Reschedules every requested token's next deadline according to
    /// `tiers`.
    pub async fn poll_and_cache(
        &self,
        tokens: &[String],
        tiers: &HashMap<String, Tier>,
    ) -> HashMap<String, PriceOutcome> {
        let mut results = HashMap::with_capacity(tokens.len());

        for batch in tokens.chunks(self.effective_batch_size()) {
            let fetched = match self.primary.batch_prices(batch).await {
                Ok(prices) => Some(prices),
                Err(e) => {
                    warn!(error = %e, "price monitor: primary quote source failed, falling back");
                    match &self.secondary {
                        Some(secondary) => match secondary.batch_prices(batch).await {
                            Ok(prices) => Some(prices),
                            Err(e2) => {
                                warn!(error = %e2, "price monitor: secondary quote source also failed");
                                None
                            }
                        },
                        None => None,
                    }
                }
            };

            let now = Utc::now();
            for token in batch {
                let outcome = match fetched.as_ref().and_then(|p| p.get(token)) {
                    Some(price) => {
                        self.cache.write().insert(token.clone(), CachedPrice { price: *price, at: now });
                        PriceOutcome::Fresh(*price)
                    }
                    None => self.stale_or_unavailable(token, now),
                };
                results.insert(token.clone(), outcome);

                let tier = tiers.get(token).copied().unwrap_or(Tier::Stable);
                self.next_due.write().insert(token.clone(), Instant::now() + tier.poll_interval(&self.params));
            }
        }

        results
    }

    fn stale_or_unavailable(&self, token: &str, now: DateTime<Utc>) -> PriceOutcome {
        let cache = self.cache.read();
        match cache.get(token) {
            Some(entry) if (now - entry.at).num_seconds() as u64 <= self.params.max_staleness_secs => {
                warn!(token, "price monitor: using stale cached price");
                PriceOutcome::Stale(entry.price)
            }
            _ => PriceOutcome::Unavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::strategy::ScalingLevel;
    use crate::domain::wallet::AccountMode;
    use crate::domain::{StrategyId, WalletId};
    use crate::errors::VenueResult;
    use crate::venues::paper::PaperQuoteClient;
    use async_trait::async_trait;

    fn strategy(stop_loss_pct: Option<f64>, trailing: Option<(f64, f64)>) -> crate::domain::strategy::ExitStrategy {
        let (trail, activation) = trailing.map_or((None, None), |(t, a)| (Some(t), Some(a)));
        crate::domain::strategy::ExitStrategy::new(
            StrategyId::new(),
            "t".into(),
            stop_loss_pct,
            trail,
            activation,
            vec![ScalingLevel { trigger_pct: 999.0, fraction_of_original: 0.1 }],
            false,
        )
        .unwrap()
    }

    fn position(strategy: crate::domain::strategy::ExitStrategy) -> Position {
        Position::open(WalletId::new(), "T1".into(), AccountMode::Simulation, 100.0, 10.0, strategy)
    }

    #[test]
    fn classify_urgent_near_stop_loss() {
        let mut p = position(strategy(Some(10.0), None));
        p.apply_mark(91.0); // -9%, within 5% of -10% trigger
        assert_eq!(classify(&p, 5.0), Tier::Urgent);
    }

    #[test]
    fn classify_stable_far_from_any_trigger() {
        let mut p = position(strategy(Some(10.0), None));
        p.apply_mark(102.0);
        assert_eq!(classify(&p, 5.0), Tier::Stable);
    }

    #[test]
    fn classify_active_once_trailing_armed() {
        let mut p = position(strategy(None, Some((50.0, 15.0))));
        p.apply_mark(120.0); // +20%, past activation, far from a 50% drawdown
        assert_eq!(classify(&p, 5.0), Tier::Active);
    }

    struct FailingQuoteClient;
    #[async_trait]
    impl QuoteClient for FailingQuoteClient {
        async fn batch_prices(&self, _tokens: &[String]) -> VenueResult<HashMap<String, f64>> {
            Err(crate::errors::VenueError::Transient("down".into()))
        }
    }

    #[tokio::test]
    async fn falls_back_to_secondary_on_primary_failure() {
        let secondary = Arc::new(PaperQuoteClient::new());
        secondary.set_price("T1", 42.0);
        let monitor = PriceMonitor::new(Arc::new(FailingQuoteClient), Some(secondary), PriceMonitorParams::default());
        let tiers = HashMap::from([("T1".to_string(), Tier::Urgent)]);
        let results = monitor.poll_and_cache(&["T1".to_string()], &tiers).await;
        assert!(matches!(results["T1"], PriceOutcome::Fresh(p) if p == 42.0));
    }

    #[tokio::test]
    async fn falls_back_to_stale_cache_when_all_sources_fail() {
        let primary = Arc::new(PaperQuoteClient::new());
        primary.set_price("T1", 10.0);
        let monitor = PriceMonitor::new(primary.clone(), None, PriceMonitorParams::default());
        let tiers = HashMap::from([("T1".to_string(), Tier::Stable)]);
        monitor.poll_and_cache(&["T1".to_string()], &tiers).await;

        // Token disappears from the source (e.g. delisted); the monitor
        // should fall back to the last cached value rather than drop it.
        let empty_primary: Arc<dyn QuoteClient> = Arc::new(PaperQuoteClient::new());
        let monitor2 = PriceMonitor::new(empty_primary, None, PriceMonitorParams::default());
        monitor2.cache.write().insert("T1".into(), CachedPrice { price: 10.0, at: Utc::now() });
        let results = monitor2.poll_and_cache(&["T1".to_string()], &tiers).await;
        assert!(matches!(results["T1"], PriceOutcome::Stale(p) if p == 10.0));
    }

    #[tokio::test]
    async fn due_tokens_respects_batch_cap_and_deadline_order() {
        let mut params = PriceMonitorParams::default();
        params.max_batch_size = 2;
        let monitor = PriceMonitor::new(Arc::new(PaperQuoteClient::new()), None, params);
        let tracked = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let due = monitor.due_tokens(&tracked);
        assert_eq!(due.len(), 2);
    }

    struct TinyBatchQuoteClient(PaperQuoteClient);
    #[async_trait]
    impl QuoteClient for TinyBatchQuoteClient {
        const MAX_BATCH: usize = 1;

        async fn batch_prices(&self, tokens: &[String]) -> VenueResult<HashMap<String, f64>> {
            self.0.batch_prices(tokens).await
        }

        fn max_batch(&self) -> usize {
            Self::MAX_BATCH
        }
    }

    #[tokio::test]
    async fn due_tokens_clamps_a_too_large_configured_batch_to_the_clients_max_batch() {
        let mut params = PriceMonitorParams::default();
        params.max_batch_size = 100; // larger than the client's own MAX_BATCH
        let monitor = PriceMonitor::new(Arc::new(TinyBatchQuoteClient(PaperQuoteClient::new())), None, params);
        let tracked = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let due = monitor.due_tokens(&tracked);
        assert_eq!(due.len(), 1);
    }
}
