// =============================================================================
// Domain model — wallets, strategies, tokens, signals, orders, positions,
// and circuit-breaker events. One aggregate per file, per §3.
// =============================================================================

pub mod breaker_event;
pub mod order;
pub mod position;
pub mod signal;
pub mod strategy;
pub mod token;
pub mod wallet;

pub use breaker_event::CircuitBreakerEvent;
pub use order::{Order, OrderKind, OrderStatus};
pub use position::{ExitReason, Position, PositionStatus};
pub use signal::{Signal, SignalKind};
pub use strategy::ExitStrategy;
pub use token::Token;
pub use wallet::{AccountMode, SyncState, Wallet};

use uuid::Uuid;

macro_rules! newtype_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

newtype_id!(WalletId);
newtype_id!(SignalId);
newtype_id!(OrderId);
newtype_id!(PositionId);
newtype_id!(StrategyId);
newtype_id!(BreakerEventId);
