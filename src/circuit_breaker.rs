// =============================================================================
// Circuit Breaker (§4.7) — periodic drawdown/loss evaluation flipping the
// execution queue's shared admission gate. Generalizes the teacher's
// `RiskEngine`: one daily-loss/drawdown pair of breakers instead of four,
// against `PositionRepo::closed_today` instead of an in-process trade tally,
// with state changes persisted through `BreakerRepo` as an append-only log
// rather than returned from a `get_state()` snapshot.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use tokio::time::interval;
use tracing::{info, warn};

use crate::domain::breaker_event::{BreakerSnapshot, BreakerThresholds};
use crate::domain::{CircuitBreakerEvent, Position};
use crate::errors::EngineResult;
use crate::execution_queue::BreakerGate;
use crate::repositories::{BreakerRepo, PositionRepo};
use crate::runtime_config::BreakerParams;

struct Inner {
    peak_equity: f64,
    current_date: DateTime<Utc>,
}

pub struct CircuitBreaker {
    positions: Arc<dyn PositionRepo>,
    events: Arc<dyn BreakerRepo>,
    gate: Arc<BreakerGate>,
    params: BreakerParams,
    capital: f64,
    inner: RwLock<Inner>,
}

impl CircuitBreaker {
    pub fn new(
        positions: Arc<dyn PositionRepo>,
        events: Arc<dyn BreakerRepo>,
        gate: Arc<BreakerGate>,
        params: BreakerParams,
        capital: f64,
    ) -> Self {
        Self {
            positions,
            events,
            gate,
            params,
            capital,
            inner: RwLock::new(Inner { peak_equity: capital, current_date: start_of_day(Utc::now()) }),
        }
    }

    /// Background loop: spawn exactly one of these per process, waking every
    /// `BreakerParams::eval_interval_secs` to recompute today's drawdown and
    /// loss figures and flip the gate accordingly.
    pub async fn run(self: Arc<Self>) {
        info!(interval_secs = self.params.eval_interval_secs, "circuit breaker started");
        let mut ticker = interval(Duration::from_secs(self.params.eval_interval_secs));
        loop {
            ticker.tick().await;
            if let Err(e) = self.evaluate_once().await {
                warn!(error = %e, "circuit breaker: evaluation failed");
            }
        }
    }

    pub async fn evaluate_once(&self) -> EngineResult<()> {
        self.maybe_reset_daily();

        let since = { self.inner.read().current_date };
        let closed = self
            .positions
            .closed_today(since)
            .await
            .map_err(|e| crate::errors::EngineError::Unknown(e.to_string()))?;

        let snapshot = self.snapshot(&closed);
        let thresholds = BreakerThresholds {
            daily_loss_limit_usd: self.params.daily_loss_limit_usd,
            max_drawdown_pct: self.params.max_drawdown_pct,
        };

        let total_pnl: f64 = closed.iter().map(|p| p.realized_pnl).sum();
        let daily_loss_usd = -total_pnl;
        // Strict inequality (§4.7): trip only once a figure *exceeds* its
        // limit, not the instant it reaches it.
        let should_trip = daily_loss_usd > self.params.daily_loss_limit_usd
            || snapshot.drawdown_pct > self.params.max_drawdown_pct;

        let was_open = self.gate.is_open();
        if should_trip && !was_open {
            self.gate.set(true);
            let reason = format!(
                "daily_loss_usd={:.2} (limit {:.2}), drawdown_pct={:.2} (limit {:.2})",
                daily_loss_usd, self.params.daily_loss_limit_usd, snapshot.drawdown_pct, self.params.max_drawdown_pct
            );
            warn!(reason, "circuit breaker tripped");
            self.events
                .append(CircuitBreakerEvent::tripped(reason, snapshot, thresholds))
                .await
                .map_err(|e| crate::errors::EngineError::Unknown(e.to_string()))?;
        } else if !should_trip && was_open {
            self.gate.set(false);
            info!("circuit breaker reset: conditions cleared");
            self.events
                .append(CircuitBreakerEvent::reset("conditions cleared".into(), snapshot, thresholds))
                .await
                .map_err(|e| crate::errors::EngineError::Unknown(e.to_string()))?;
        }

        Ok(())
    }

    /// Forces the gate closed regardless of current figures (an operator
    /// override), still recorded in the append-only log.
    pub async fn manual_reset(&self) -> EngineResult<()> {
        self.gate.set(false);
        let closed = self
            .positions
            .closed_today(self.inner.read().current_date)
            .await
            .map_err(|e| crate::errors::EngineError::Unknown(e.to_string()))?;
        let snapshot = self.snapshot(&closed);
        let thresholds = BreakerThresholds {
            daily_loss_limit_usd: self.params.daily_loss_limit_usd,
            max_drawdown_pct: self.params.max_drawdown_pct,
        };
        info!("circuit breaker manually reset");
        self.events
            .append(CircuitBreakerEvent::reset("manual reset".into(), snapshot, thresholds))
            .await
            .map_err(|e| crate::errors::EngineError::Unknown(e.to_string()))
    }

    fn snapshot(&self, closed: &[Position]) -> BreakerSnapshot {
        let total_pnl: f64 = closed.iter().map(|p| p.realized_pnl).sum();
        let equity = self.capital + total_pnl;

        let mut inner = self.inner.write();
        if equity > inner.peak_equity {
            inner.peak_equity = equity;
        }
        let drawdown_pct = if inner.peak_equity > 0.0 {
            (inner.peak_equity - equity) / inner.peak_equity * 100.0
        } else {
            0.0
        };

        let win_rate = if closed.is_empty() {
            0.0
        } else {
            closed.iter().filter(|p| p.realized_pnl >= 0.0).count() as f64 / closed.len() as f64
        };

        let mut by_time = closed.to_vec();
        by_time.sort_by_key(|p| p.closed_at);
        let consecutive_losses = by_time
            .iter()
            .rev()
            .take_while(|p| p.realized_pnl < 0.0)
            .count() as u32;

        BreakerSnapshot { drawdown_pct, win_rate, consecutive_losses }
    }

    fn maybe_reset_daily(&self) {
        let today = start_of_day(Utc::now());
        let needs_reset = { self.inner.read().current_date != today };
        if needs_reset {
            let mut inner = self.inner.write();
            if inner.current_date != today {
                info!(date = %today, "circuit breaker: daily counters rolled over");
                inner.current_date = today;
                inner.peak_equity = self.capital;
            }
        }
    }
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&now.date_naive().and_hms_opt(0, 0, 0).unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::strategy::{ExitStrategy, ScalingLevel};
    use crate::domain::wallet::AccountMode;
    use crate::domain::{ExitReason, StrategyId, WalletId};
    use crate::repositories::memory::{InMemoryBreakerRepo, InMemoryTradeStore};

    fn closed_position(realized_pnl: f64) -> Position {
        let strategy = ExitStrategy::new(
            StrategyId::new(),
            "t".into(),
            Some(10.0),
            None,
            None,
            vec![ScalingLevel { trigger_pct: 999.0, fraction_of_original: 0.1 }],
            false,
        )
        .unwrap();
        let mut p = Position::open(WalletId::new(), "T".into(), AccountMode::Simulation, 100.0, 10.0, strategy);
        p.apply_exit_fill(10.0, 100.0 + realized_pnl / 10.0, ExitReason::Manual);
        p
    }

    #[tokio::test]
    async fn trips_when_daily_loss_exceeds_limit() {
        let store = Arc::new(InMemoryTradeStore::default());
        let breaker_repo: Arc<dyn BreakerRepo> = Arc::new(InMemoryBreakerRepo::default());
        let gate = Arc::new(BreakerGate::default());
        store.upsert(closed_position(-600.0)).await.unwrap();

        let mut params = BreakerParams::default();
        params.daily_loss_limit_usd = 500.0;
        let breaker = CircuitBreaker::new(store, breaker_repo.clone(), gate.clone(), params, 10_000.0);

        breaker.evaluate_once().await.unwrap();
        assert!(gate.is_open());
        assert!(breaker_repo.latest().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stays_closed_when_within_limits() {
        let store = Arc::new(InMemoryTradeStore::default());
        let breaker_repo: Arc<dyn BreakerRepo> = Arc::new(InMemoryBreakerRepo::default());
        let gate = Arc::new(BreakerGate::default());
        store.upsert(closed_position(50.0)).await.unwrap();

        let breaker = CircuitBreaker::new(store, breaker_repo, gate.clone(), BreakerParams::default(), 10_000.0);
        breaker.evaluate_once().await.unwrap();
        assert!(!gate.is_open());
    }

    #[tokio::test]
    async fn manual_reset_closes_gate_and_logs_event() {
        let store = Arc::new(InMemoryTradeStore::default());
        let breaker_repo: Arc<dyn BreakerRepo> = Arc::new(InMemoryBreakerRepo::default());
        let gate = Arc::new(BreakerGate::default());
        gate.set(true);

        let breaker = CircuitBreaker::new(store, breaker_repo.clone(), gate.clone(), BreakerParams::default(), 10_000.0);
        breaker.manual_reset().await.unwrap();
        assert!(!gate.is_open());
        assert!(breaker_repo.latest().await.unwrap().is_some());
    }
}
