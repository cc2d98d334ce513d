use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::wallet::AccountMode;
use super::{PositionId, WalletId};
use crate::domain::strategy::ExitStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    MirrorExit,
    TrailingStop,
    ScalingOut(u8),
    Manual,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "stop_loss"),
            Self::MirrorExit => write!(f, "mirror_exit"),
            Self::TrailingStop => write!(f, "trailing_stop"),
            Self::ScalingOut(k) => write!(f, "scaling_out[{k}]"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Smallest quote-unit delta below which `current_amount` is treated as
/// zero. Guards against floating-point residue after a sequence of partial
/// fills leaving e.g. `1e-13` instead of exactly `0.0`.
pub const AMOUNT_EPSILON: f64 = 1e-9;

/// An open or closed mirror trade. The Position Engine is the sole mutator
/// (§3 ownership rule); every other component observes via repositories or
/// immutable snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub wallet_id: WalletId,
    pub token_address: String,
    pub mode: AccountMode,
    pub entry_price: f64,
    pub entry_amount: f64,
    pub current_amount: f64,
    pub peak_price: f64,
    pub current_price: f64,
    pub realized_pnl: f64,
    pub status: PositionStatus,
    pub exit_strategy_snapshot: ExitStrategy,
    /// Bit `k` set once scaling level `k` has fired.
    pub scaling_levels_hit: u32,
    pub opened_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exit_reason: Option<ExitReason>,
}

impl Position {
    pub fn open(
        wallet_id: WalletId,
        token_address: String,
        mode: AccountMode,
        entry_price: f64,
        entry_amount: f64,
        exit_strategy_snapshot: ExitStrategy,
    ) -> Self {
        Self {
            id: PositionId::new(),
            wallet_id,
            token_address,
            mode,
            entry_price,
            entry_amount,
            current_amount: entry_amount,
            peak_price: entry_price,
            current_price: entry_price,
            realized_pnl: 0.0,
            status: PositionStatus::Open,
            exit_strategy_snapshot,
            scaling_levels_hit: 0,
            opened_at: Utc::now(),
            closed_at: None,
            exit_reason: None,
        }
    }

    /// `pnl_pct` off entry, used by the exit evaluator's stop-loss and
    /// scaling rules.
    pub fn pnl_pct(&self) -> f64 {
        (self.current_price - self.entry_price) / self.entry_price * 100.0
    }

    /// `peak_pnl_pct`, used to arm the trailing stop.
    pub fn peak_pnl_pct(&self) -> f64 {
        (self.peak_price - self.entry_price) / self.entry_price * 100.0
    }

    /// Derived, never stored (§3 invariant 5).
    pub fn unrealized_pnl(&self) -> f64 {
        (self.current_price - self.entry_price) * self.current_amount
    }

    pub fn scaling_level_hit(&self, k: u8) -> bool {
        self.scaling_levels_hit & (1 << k) != 0
    }

    pub fn mark_scaling_level_hit(&mut self, k: u8) {
        self.scaling_levels_hit |= 1 << k;
    }

    /// Applies a new price observation: updates `current_price` and
    /// `peak_price` (invariant 2: peak never decreases).
    pub fn apply_mark(&mut self, price: f64) {
        self.current_price = price;
        if price > self.peak_price {
            self.peak_price = price;
        }
    }

    /// Applies an exit fill. Returns `true` if this fill closed the
    /// position. `sell_amount` is clamped to `current_amount` so a fill
    /// racing a prior priority exit never drives the amount negative
    /// (§4.4 "clamp the partial amount to current_amount").
    pub fn apply_exit_fill(
        &mut self,
        requested_amount: f64,
        fill_price: f64,
        reason: ExitReason,
    ) -> bool {
        let sell_amount = requested_amount.min(self.current_amount);
        self.realized_pnl += (fill_price - self.entry_price) * sell_amount;
        self.current_amount -= sell_amount;
        if let ExitReason::ScalingOut(k) = reason {
            self.mark_scaling_level_hit(k);
        }
        if self.current_amount <= AMOUNT_EPSILON {
            self.current_amount = 0.0;
            self.status = PositionStatus::Closed;
            self.closed_at = Some(Utc::now());
            self.exit_reason = Some(reason);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{strategy::ScalingLevel, StrategyId};

    fn strategy() -> ExitStrategy {
        ExitStrategy::new(
            StrategyId::new(),
            "t".into(),
            Some(20.0),
            Some(10.0),
            Some(15.0),
            vec![ScalingLevel { trigger_pct: 100.0, fraction_of_original: 0.5 }],
            true,
        )
        .unwrap()
    }

    #[test]
    fn apply_mark_tracks_peak() {
        let mut p = Position::open(
            WalletId::new(),
            "T1".into(),
            AccountMode::Simulation,
            100.0,
            10.0,
            strategy(),
        );
        p.apply_mark(150.0);
        p.apply_mark(120.0);
        assert_eq!(p.peak_price, 150.0);
        assert_eq!(p.current_price, 120.0);
    }

    #[test]
    fn partial_fill_clamped_to_remaining() {
        let mut p = Position::open(
            WalletId::new(),
            "T1".into(),
            AccountMode::Simulation,
            100.0,
            10.0,
            strategy(),
        );
        // A prior full exit already drained the position to 2.0 remaining.
        p.current_amount = 2.0;
        let closed = p.apply_exit_fill(5.0, 200.0, ExitReason::ScalingOut(0));
        assert!(closed);
        assert_eq!(p.current_amount, 0.0);
        assert_eq!(p.realized_pnl, (200.0 - 100.0) * 2.0);
    }

    #[test]
    fn realized_pnl_accumulates_across_fills() {
        let mut p = Position::open(
            WalletId::new(),
            "T1".into(),
            AccountMode::Simulation,
            100.0,
            10.0,
            strategy(),
        );
        p.apply_exit_fill(5.0, 200.0, ExitReason::ScalingOut(0));
        let closed = p.apply_exit_fill(5.0, 250.0, ExitReason::MirrorExit);
        assert!(closed);
        let expected = 5.0 * (200.0 - 100.0) + 5.0 * (250.0 - 100.0);
        assert!((p.realized_pnl - expected).abs() < 1e-9);
        assert_eq!(p.status, PositionStatus::Closed);
    }
}
