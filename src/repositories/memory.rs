// =============================================================================
// In-memory repository implementations. Backs the paper run mode and the
// test suite. Grounded on the teacher's `PositionManager`
// (`RwLock<Vec<Position>>`) and `RiskEngine` (`RwLock<Inner>`) state shape —
// generalized here to one `RwLock<HashMap<Id, T>>` per entity.
// =============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::domain::strategy::ExitStrategy;
use crate::domain::wallet::SyncState;
use crate::domain::{
    BreakerEventId, CircuitBreakerEvent, Order, OrderId, Position, PositionId, Signal, SignalId,
    StrategyId, Token, Wallet, WalletId,
};
use crate::runtime_config::RuntimeConfig;

use super::{
    BreakerRepo, ConfigRepo, OrderRepo, PositionRepo, RepoResult, SignalRepo, StrategyRepo,
    TokenRepo, TradeStore, WalletRepo,
};

#[derive(Default)]
pub struct InMemoryWalletRepo {
    by_id: RwLock<HashMap<WalletId, Wallet>>,
}

#[async_trait]
impl WalletRepo for InMemoryWalletRepo {
    async fn get(&self, id: WalletId) -> RepoResult<Option<Wallet>> {
        Ok(self.by_id.read().get(&id).cloned())
    }

    async fn get_by_address(&self, address: &str) -> RepoResult<Option<Wallet>> {
        Ok(self.by_id.read().values().find(|w| w.address == address).cloned())
    }

    async fn upsert(&self, wallet: Wallet) -> RepoResult<()> {
        self.by_id.write().insert(wallet.id, wallet);
        Ok(())
    }

    async fn list_active(&self) -> RepoResult<Vec<Wallet>> {
        Ok(self.by_id.read().values().filter(|w| w.active).cloned().collect())
    }

    async fn set_sync_state(&self, id: WalletId, state: SyncState) -> RepoResult<()> {
        if let Some(w) = self.by_id.write().get_mut(&id) {
            w.sync_state = state;
            if state == SyncState::Synced {
                w.last_synced_at = Some(Utc::now());
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySignalRepo {
    by_tx_sig: RwLock<HashMap<String, SignalId>>,
    by_id: RwLock<HashMap<SignalId, Signal>>,
}

#[async_trait]
impl SignalRepo for InMemorySignalRepo {
    async fn insert_if_absent(&self, mut signal: Signal) -> RepoResult<Option<SignalId>> {
        let mut by_tx = self.by_tx_sig.write();
        let id = signal.id;
        if by_tx.contains_key(&signal.tx_signature) {
            // Still persist the conflicting attempt as its own row so the
            // duplicate shows up in the signals table, just filtered out.
            signal.mark_filtered("duplicate");
            self.by_id.write().insert(id, signal);
            return Ok(None);
        }
        by_tx.insert(signal.tx_signature.clone(), id);
        self.by_id.write().insert(id, signal);
        Ok(Some(id))
    }

    async fn update(&self, signal: Signal) -> RepoResult<()> {
        self.by_id.write().insert(signal.id, signal);
        Ok(())
    }

    async fn get(&self, id: SignalId) -> RepoResult<Option<Signal>> {
        Ok(self.by_id.read().get(&id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryStrategyRepo {
    by_id: RwLock<HashMap<StrategyId, ExitStrategy>>,
}

#[async_trait]
impl StrategyRepo for InMemoryStrategyRepo {
    async fn get(&self, id: StrategyId) -> RepoResult<Option<ExitStrategy>> {
        Ok(self.by_id.read().get(&id).cloned())
    }

    async fn upsert(&self, strategy: ExitStrategy) -> RepoResult<()> {
        self.by_id.write().insert(strategy.id, strategy);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryTokenRepo {
    by_address: RwLock<HashMap<String, Token>>,
}

#[async_trait]
impl TokenRepo for InMemoryTokenRepo {
    async fn get(&self, address: &str) -> RepoResult<Option<Token>> {
        Ok(self.by_address.read().get(address).cloned())
    }

    async fn upsert(&self, token: Token) -> RepoResult<()> {
        self.by_address.write().insert(token.address.clone(), token);
        Ok(())
    }
}

/// Backs both `PositionRepo` and `OrderRepo` behind a single lock, since §6
/// requires transactions spanning both — a single guard is the in-memory
/// analogue of a DB transaction here.
#[derive(Default)]
pub struct InMemoryTradeStore {
    inner: RwLock<TradeStoreInner>,
}

#[derive(Default)]
struct TradeStoreInner {
    positions: HashMap<PositionId, Position>,
    orders: HashMap<OrderId, Order>,
}

#[async_trait]
impl PositionRepo for InMemoryTradeStore {
    async fn get(&self, id: PositionId) -> RepoResult<Option<Position>> {
        Ok(self.inner.read().positions.get(&id).cloned())
    }

    async fn upsert(&self, position: Position) -> RepoResult<()> {
        self.inner.write().positions.insert(position.id, position);
        Ok(())
    }

    async fn open_by_wallet_token(
        &self,
        wallet: WalletId,
        token_address: &str,
    ) -> RepoResult<Vec<Position>> {
        use crate::domain::PositionStatus;
        Ok(self
            .inner
            .read()
            .positions
            .values()
            .filter(|p| {
                p.wallet_id == wallet
                    && p.token_address == token_address
                    && p.status == PositionStatus::Open
            })
            .cloned()
            .collect())
    }

    async fn all_open(&self) -> RepoResult<Vec<Position>> {
        use crate::domain::PositionStatus;
        Ok(self
            .inner
            .read()
            .positions
            .values()
            .filter(|p| p.status == PositionStatus::Open)
            .cloned()
            .collect())
    }

    async fn closed_today(&self, since: DateTime<Utc>) -> RepoResult<Vec<Position>> {
        use crate::domain::PositionStatus;
        Ok(self
            .inner
            .read()
            .positions
            .values()
            .filter(|p| {
                p.status == PositionStatus::Closed && p.closed_at.map(|t| t >= since).unwrap_or(false)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl OrderRepo for InMemoryTradeStore {
    async fn get(&self, id: OrderId) -> RepoResult<Option<Order>> {
        Ok(self.inner.read().orders.get(&id).cloned())
    }

    async fn upsert(&self, order: Order) -> RepoResult<()> {
        self.inner.write().orders.insert(order.id, order);
        Ok(())
    }

    async fn by_position(&self, position_id: PositionId) -> RepoResult<Vec<Order>> {
        Ok(self
            .inner
            .read()
            .orders
            .values()
            .filter(|o| o.position_id == position_id)
            .cloned()
            .collect())
    }
}

impl InMemoryTradeStore {
    /// Applies a position write and one or more order writes as a single
    /// locked section — the in-memory stand-in for a DB transaction spanning
    /// both tables (§6).
    pub fn with_transaction<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&mut HashMap<PositionId, Position>, &mut HashMap<OrderId, Order>) -> T,
    {
        let mut guard = self.inner.write();
        let TradeStoreInner { positions, orders } = &mut *guard;
        f(positions, orders)
    }
}

#[async_trait]
impl TradeStore for InMemoryTradeStore {
    async fn commit(&self, position: Position, order: Order) -> RepoResult<()> {
        self.with_transaction(|positions, orders| {
            positions.insert(position.id, position);
            orders.insert(order.id, order);
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryBreakerRepo {
    events: RwLock<Vec<CircuitBreakerEvent>>,
}

#[async_trait]
impl BreakerRepo for InMemoryBreakerRepo {
    async fn append(&self, event: CircuitBreakerEvent) -> RepoResult<()> {
        self.events.write().push(event);
        Ok(())
    }

    async fn latest(&self) -> RepoResult<Option<CircuitBreakerEvent>> {
        Ok(self.events.read().last().cloned())
    }

    async fn get(&self, id: BreakerEventId) -> RepoResult<Option<CircuitBreakerEvent>> {
        Ok(self.events.read().iter().find(|e| e.id == id).cloned())
    }
}

#[cfg(test)]
mod signal_repo_tests {
    use super::*;
    use crate::domain::{SignalId, SignalKind, WalletId};

    fn signal(tx_signature: &str) -> Signal {
        Signal {
            id: SignalId::new(),
            wallet_id: WalletId::new(),
            tx_signature: tx_signature.to_string(),
            kind: SignalKind::Buy,
            token_address: "MEME".into(),
            amount_in: 1.0,
            amount_out: 1.0,
            received_at: Utc::now(),
            processed_at: None,
            filtered: false,
            filter_reason: None,
            position_id: None,
            raw_payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn duplicate_tx_signature_is_still_persisted_as_a_filtered_row() {
        let repo = InMemorySignalRepo::default();
        let first = signal("DUP");
        let second = signal("DUP");
        let second_id = second.id;

        assert!(repo.insert_if_absent(first).await.unwrap().is_some());
        assert!(repo.insert_if_absent(second).await.unwrap().is_none());

        let persisted = repo.get(second_id).await.unwrap().unwrap();
        assert!(persisted.filtered);
        assert_eq!(persisted.filter_reason.as_deref(), Some("duplicate"));
    }
}

pub struct FileConfigRepo {
    pub path: std::path::PathBuf,
}

#[async_trait]
impl ConfigRepo for FileConfigRepo {
    async fn load(&self) -> RepoResult<Option<RuntimeConfig>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, config: &RuntimeConfig) -> RepoResult<()> {
        config.save(&self.path)
    }
}
