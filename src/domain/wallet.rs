use serde::{Deserialize, Serialize};

use super::{StrategyId, WalletId};

/// Whether a wallet's mirrored trades are simulated or sent to a live venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountMode {
    Simulation,
    Live,
}

impl Default for AccountMode {
    fn default() -> Self {
        Self::Simulation
    }
}

impl std::fmt::Display for AccountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simulation => write!(f, "simulation"),
            Self::Live => write!(f, "live"),
        }
    }
}

/// Reconciliation status of a wallet's address against the upstream
/// monitoring subscription (see `wallet_sync`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    Pending,
    Synced,
    Error,
}

impl Default for SyncState {
    fn default() -> Self {
        Self::Pending
    }
}

/// A monitored source wallet whose swaps are mirrored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub address: String,
    pub label: String,
    pub mode: AccountMode,
    pub exit_strategy_id: StrategyId,
    pub active: bool,
    #[serde(default)]
    pub sync_state: SyncState,
    #[serde(default)]
    pub last_synced_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Solana addresses are base58, 32-44 characters. This is a cheap structural
/// check, not a curve-point validation — the venue client rejects anything
/// that doesn't actually decode to a valid account.
pub fn validate_address(address: &str) -> Result<(), String> {
    if !(32..=44).contains(&address.len()) {
        return Err(format!(
            "address length {} outside [32,44]",
            address.len()
        ));
    }
    bs58::decode(address)
        .into_vec()
        .map(|_| ())
        .map_err(|e| format!("invalid base58 address: {e}"))
}

impl Wallet {
    pub fn new(
        address: String,
        label: String,
        mode: AccountMode,
        exit_strategy_id: StrategyId,
    ) -> Result<Self, String> {
        validate_address(&address)?;
        Ok(Self {
            id: WalletId::new(),
            address,
            label,
            mode,
            exit_strategy_id,
            active: true,
            sync_state: SyncState::Pending,
            last_synced_at: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_address_rejects_short_strings() {
        assert!(validate_address("abc").is_err());
    }

    #[test]
    fn validate_address_rejects_non_base58() {
        // '0', 'O', 'I', 'l' are excluded from the base58 alphabet.
        let candidate = "0".repeat(40);
        assert!(validate_address(&candidate).is_err());
    }

    #[test]
    fn validate_address_accepts_plausible_pubkey() {
        let candidate = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
        assert!(validate_address(candidate).is_ok());
    }
}
