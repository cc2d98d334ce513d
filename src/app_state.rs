// =============================================================================
// Central Application State — WallTrack Core
// =============================================================================
//
// The single source of truth the HTTP layer and background loops share. All
// subsystems hold their own interior mutability; AppState just ties their
// `Arc` handles together so a handler can reach any of them through one
// `State<Arc<AppState>>` extractor. Generalizes the teacher's `AppState`,
// trimmed to drop the dashboard-snapshot surface (no WebSocket feed, no
// `build_snapshot`) since this core exposes a webhook ingress and an admin
// surface, not a trading dashboard.
//
// Thread safety:
//   - An atomic counter for lock-free version tracking.
//   - parking_lot::RwLock for the few small mutable fields owned directly
//     here (config, recent errors, last webhook time).
//   - Arc wrappers for every subsystem engine, which manage their own
//     interior mutability.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::api::auth::SignatureVerifier;
use crate::circuit_breaker::CircuitBreaker;
use crate::exit::monitor::ExitMonitor;
use crate::execution_queue::{BreakerGate, ExecutionQueue};
use crate::position_engine::PositionEngine;
use crate::price_monitor::PriceMonitor;
use crate::repositories::{
    BreakerRepo, ConfigRepo, OrderRepo, PositionRepo, SignalRepo, StrategyRepo, TokenRepo, WalletRepo,
};
use crate::runtime_config::RuntimeConfig;
use crate::safety::SafetyEvaluator;
use crate::signal_ingress::SignalIngress;
use crate::wallet_sync::WalletSyncController;

/// Maximum number of recent errors to retain for `/health` diagnostics.
const MAX_RECENT_ERRORS: usize = 50;

/// A recorded error event, kept for operator visibility via `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Central application state shared across all async tasks via
/// `Arc<AppState>`.
pub struct AppState {
    /// Monotonically increasing version counter, bumped on every meaningful
    /// state mutation (config reload, breaker flip, wallet change).
    pub state_version: AtomicU64,

    pub runtime_config: Arc<RwLock<RuntimeConfig>>,
    pub config_repo: Arc<dyn ConfigRepo>,

    pub wallets: Arc<dyn WalletRepo>,
    pub signals: Arc<dyn SignalRepo>,
    pub strategies: Arc<dyn StrategyRepo>,
    pub tokens: Arc<dyn TokenRepo>,
    pub positions: Arc<dyn PositionRepo>,
    pub orders: Arc<dyn OrderRepo>,
    pub breaker_events: Arc<dyn BreakerRepo>,

    pub safety: Arc<SafetyEvaluator>,
    pub execution_queue: Arc<ExecutionQueue>,
    pub breaker_gate: Arc<BreakerGate>,
    pub position_engine: Arc<PositionEngine>,
    pub circuit_breaker: Arc<CircuitBreaker>,
    pub price_monitor: Arc<PriceMonitor>,
    pub exit_monitor: Arc<ExitMonitor>,
    pub wallet_sync: Arc<WalletSyncController>,
    pub signal_ingress: Arc<SignalIngress>,

    pub signature_verifier: Arc<dyn SignatureVerifier>,

    /// Capital basis for position sizing (§4.4 step 1) and the circuit
    /// breaker's drawdown baseline (§4.7). A single operator-configured
    /// figure rather than a live balance query, since reconciling against
    /// an actual wallet balance is delegated to key management (Non-goal).
    pub capital_usd: f64,

    pub last_webhook_at: RwLock<Option<DateTime<Utc>>>,
    pub recent_errors: RwLock<Vec<ErrorRecord>>,
    pub start_time: DateTime<Utc>,
}

/// Every long-lived handle `AppState` ties together, assembled by `main`
/// once the venue clients and repositories have been wired up.
pub struct AppStateDeps {
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,
    pub config_repo: Arc<dyn ConfigRepo>,
    pub wallets: Arc<dyn WalletRepo>,
    pub signals: Arc<dyn SignalRepo>,
    pub strategies: Arc<dyn StrategyRepo>,
    pub tokens: Arc<dyn TokenRepo>,
    pub positions: Arc<dyn PositionRepo>,
    pub orders: Arc<dyn OrderRepo>,
    pub breaker_events: Arc<dyn BreakerRepo>,
    pub safety: Arc<SafetyEvaluator>,
    pub execution_queue: Arc<ExecutionQueue>,
    pub breaker_gate: Arc<BreakerGate>,
    pub position_engine: Arc<PositionEngine>,
    pub circuit_breaker: Arc<CircuitBreaker>,
    pub price_monitor: Arc<PriceMonitor>,
    pub exit_monitor: Arc<ExitMonitor>,
    pub wallet_sync: Arc<WalletSyncController>,
    pub signal_ingress: Arc<SignalIngress>,
    pub signature_verifier: Arc<dyn SignatureVerifier>,
    pub capital_usd: f64,
}

impl AppState {
    pub fn new(deps: AppStateDeps) -> Self {
        Self {
            state_version: AtomicU64::new(0),
            runtime_config: deps.runtime_config,
            config_repo: deps.config_repo,
            wallets: deps.wallets,
            signals: deps.signals,
            strategies: deps.strategies,
            tokens: deps.tokens,
            positions: deps.positions,
            orders: deps.orders,
            breaker_events: deps.breaker_events,
            safety: deps.safety,
            execution_queue: deps.execution_queue,
            breaker_gate: deps.breaker_gate,
            position_engine: deps.position_engine,
            circuit_breaker: deps.circuit_breaker,
            price_monitor: deps.price_monitor,
            exit_monitor: deps.exit_monitor,
            wallet_sync: deps.wallet_sync,
            signal_ingress: deps.signal_ingress,
            signature_verifier: deps.signature_verifier,
            capital_usd: deps.capital_usd,
            last_webhook_at: RwLock::new(None),
            recent_errors: RwLock::new(Vec::new()),
            start_time: Utc::now(),
        }
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn current_version(&self) -> u64 {
        self.state_version.load(Ordering::Acquire)
    }

    pub fn record_webhook_received(&self) {
        *self.last_webhook_at.write() = Some(Utc::now());
    }

    pub fn push_error(&self, message: impl Into<String>) {
        let mut errors = self.recent_errors.write();
        errors.push(ErrorRecord { message: message.into(), at: Utc::now() });
        if errors.len() > MAX_RECENT_ERRORS {
            let excess = errors.len() - MAX_RECENT_ERRORS;
            errors.drain(0..excess);
        }
    }
}
