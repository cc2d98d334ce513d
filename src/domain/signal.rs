use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{PositionId, SignalId, WalletId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    Buy,
    Sell,
}

/// An append-only record of a source-wallet swap event. Rows are never
/// updated except to set the post-processing fields exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub wallet_id: WalletId,
    pub tx_signature: String,
    pub kind: SignalKind,
    pub token_address: String,
    pub amount_in: f64,
    pub amount_out: f64,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub filtered: bool,
    #[serde(default)]
    pub filter_reason: Option<String>,
    #[serde(default)]
    pub position_id: Option<PositionId>,
    pub raw_payload: Value,
}

impl Signal {
    pub fn mark_filtered(&mut self, reason: impl Into<String>) {
        self.filtered = true;
        self.filter_reason = Some(reason.into());
        self.processed_at = Some(Utc::now());
    }

    pub fn mark_routed(&mut self, position_id: Option<PositionId>) {
        self.filtered = false;
        self.position_id = position_id;
        self.processed_at = Some(Utc::now());
    }
}
