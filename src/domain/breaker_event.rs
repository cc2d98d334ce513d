use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::BreakerEventId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerEventKind {
    Tripped,
    Reset,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub drawdown_pct: f64,
    pub win_rate: f64,
    pub consecutive_losses: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakerThresholds {
    pub daily_loss_limit_usd: f64,
    pub max_drawdown_pct: f64,
}

/// An append-only record of a circuit breaker state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerEvent {
    pub id: BreakerEventId,
    pub kind: BreakerEventKind,
    pub reason: String,
    pub snapshot: BreakerSnapshot,
    pub thresholds: BreakerThresholds,
    pub occurred_at: DateTime<Utc>,
}

impl CircuitBreakerEvent {
    pub fn tripped(reason: String, snapshot: BreakerSnapshot, thresholds: BreakerThresholds) -> Self {
        Self {
            id: BreakerEventId::new(),
            kind: BreakerEventKind::Tripped,
            reason,
            snapshot,
            thresholds,
            occurred_at: Utc::now(),
        }
    }

    pub fn reset(reason: String, snapshot: BreakerSnapshot, thresholds: BreakerThresholds) -> Self {
        Self {
            id: BreakerEventId::new(),
            kind: BreakerEventKind::Reset,
            reason,
            snapshot,
            thresholds,
            occurred_at: Utc::now(),
        }
    }
}
