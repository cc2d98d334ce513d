// =============================================================================
// Repository traits (§6) — the persistence boundary. The core never touches
// a SQL driver directly; it depends on these traits and an in-memory
// implementation (`memory`) backs the paper run mode and the test suite.
// A production deployment would back these with a relational store; the
// in-memory implementation's `with_transaction` helper (see `memory.rs`) is
// the seam a real implementation would open a DB transaction around (§6
// "the core requires transactions spanning positions and orders").
// =============================================================================

pub mod memory;

use async_trait::async_trait;

use crate::domain::strategy::ExitStrategy;
use crate::domain::{
    BreakerEventId, CircuitBreakerEvent, Order, OrderId, Position, PositionId, Signal, SignalId,
    StrategyId, Token, Wallet, WalletId,
};

pub type RepoResult<T> = anyhow::Result<T>;

#[async_trait]
pub trait WalletRepo: Send + Sync {
    async fn get(&self, id: WalletId) -> RepoResult<Option<Wallet>>;
    async fn get_by_address(&self, address: &str) -> RepoResult<Option<Wallet>>;
    async fn upsert(&self, wallet: Wallet) -> RepoResult<()>;
    async fn list_active(&self) -> RepoResult<Vec<Wallet>>;
    async fn set_sync_state(
        &self,
        id: WalletId,
        state: crate::domain::wallet::SyncState,
    ) -> RepoResult<()>;
}

#[async_trait]
pub trait SignalRepo: Send + Sync {
    /// Returns `Ok(None)` if a row with this `tx_signature` already exists
    /// (caller must treat as duplicate per §4.1). The conflicting signal is
    /// still persisted as its own row, marked `filtered=true` with
    /// `filter_reason="duplicate"`, so the duplicate attempt itself shows up
    /// in the `signals` table (§8 scenario 1).
    async fn insert_if_absent(&self, signal: Signal) -> RepoResult<Option<SignalId>>;
    async fn update(&self, signal: Signal) -> RepoResult<()>;
    async fn get(&self, id: SignalId) -> RepoResult<Option<Signal>>;
}

#[async_trait]
pub trait StrategyRepo: Send + Sync {
    async fn get(&self, id: StrategyId) -> RepoResult<Option<ExitStrategy>>;
    async fn upsert(&self, strategy: ExitStrategy) -> RepoResult<()>;
}

#[async_trait]
pub trait TokenRepo: Send + Sync {
    async fn get(&self, address: &str) -> RepoResult<Option<Token>>;
    async fn upsert(&self, token: Token) -> RepoResult<()>;
}

#[async_trait]
pub trait PositionRepo: Send + Sync {
    async fn get(&self, id: PositionId) -> RepoResult<Option<Position>>;
    async fn upsert(&self, position: Position) -> RepoResult<()>;
    async fn open_by_wallet_token(
        &self,
        wallet: WalletId,
        token_address: &str,
    ) -> RepoResult<Vec<Position>>;
    async fn all_open(&self) -> RepoResult<Vec<Position>>;
    async fn closed_today(&self, since: chrono::DateTime<chrono::Utc>) -> RepoResult<Vec<Position>>;
}

#[async_trait]
pub trait OrderRepo: Send + Sync {
    async fn get(&self, id: OrderId) -> RepoResult<Option<Order>>;
    async fn upsert(&self, order: Order) -> RepoResult<()>;
    async fn by_position(&self, position_id: PositionId) -> RepoResult<Vec<Order>>;
}

/// The transactional seam `PositionEngine` actually holds (§4.4: "open/
/// apply_fill MUST be transactional across position + orders"). A plain
/// `Arc<dyn PositionRepo>` plus `Arc<dyn OrderRepo>` can't satisfy that —
/// neither trait exposes a method spanning both tables, so the two upserts
/// would always be two independent writes. A real backend implements
/// `commit` by opening one DB transaction around both statements; the
/// in-memory implementation takes one write lock across both maps.
#[async_trait]
pub trait TradeStore: PositionRepo + OrderRepo {
    async fn commit(&self, position: Position, order: Order) -> RepoResult<()>;
}

#[async_trait]
pub trait BreakerRepo: Send + Sync {
    async fn append(&self, event: CircuitBreakerEvent) -> RepoResult<()>;
    async fn latest(&self) -> RepoResult<Option<CircuitBreakerEvent>>;
    async fn get(&self, id: BreakerEventId) -> RepoResult<Option<CircuitBreakerEvent>>;
}

#[async_trait]
pub trait ConfigRepo: Send + Sync {
    async fn load(&self) -> RepoResult<Option<crate::runtime_config::RuntimeConfig>>;
    async fn save(&self, config: &crate::runtime_config::RuntimeConfig) -> RepoResult<()>;
}
