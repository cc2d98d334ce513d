use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::wallet::AccountMode;
use super::{OrderId, PositionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Entry,
    ExitStop,
    ExitTrail,
    ExitScale(u8),
    ExitMirror,
    ExitManual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Submitted,
    Filled,
    Failed,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Failed | Self::Cancelled)
    }
}

/// An append-only command to a venue, tracked through its lifecycle.
/// `retry_count` increments in place rather than creating new rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub position_id: PositionId,
    pub kind: OrderKind,
    pub mode: AccountMode,
    pub amount_in: f64,
    pub amount_out_expected: f64,
    #[serde(default)]
    pub amount_out_actual: Option<f64>,
    pub slippage_req: f64,
    #[serde(default)]
    pub slippage_actual: Option<f64>,
    pub status: OrderStatus,
    #[serde(default)]
    pub tx_signature: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub scaling_level: Option<u8>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn new_pending(
        position_id: PositionId,
        kind: OrderKind,
        mode: AccountMode,
        amount_in: f64,
        amount_out_expected: f64,
        slippage_req: f64,
    ) -> Self {
        let scaling_level = match kind {
            OrderKind::ExitScale(k) => Some(k),
            _ => None,
        };
        Self {
            id: OrderId::new(),
            position_id,
            kind,
            mode,
            amount_in,
            amount_out_expected,
            amount_out_actual: None,
            slippage_req,
            slippage_actual: None,
            status: OrderStatus::Pending,
            tx_signature: None,
            retry_count: 0,
            last_error: None,
            scaling_level,
            created_at: Utc::now(),
        }
    }
}
