// =============================================================================
// WallTrack Core — Main Entry Point
// =============================================================================
//
// The engine starts in whatever `account_mode`/`entries_enabled` the saved
// runtime config specifies — there is no forced-safe override here, unlike
// a dashboard-driven trading bot, because entries are already gated by the
// Safety Evaluator and the circuit breaker regardless of mode.
// =============================================================================

mod api;
mod app_state;
mod circuit_breaker;
mod domain;
mod errors;
mod execution_queue;
mod exit;
mod position_engine;
mod price_monitor;
mod repositories;
mod runtime_config;
mod safety;
mod signal_ingress;
mod supervisor;
mod venues;
mod wallet_sync;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::auth::HmacSignatureVerifier;
use crate::app_state::{AppState, AppStateDeps};
use crate::circuit_breaker::CircuitBreaker;
use crate::domain::wallet::AccountMode;
use crate::domain::SignalKind;
use crate::execution_queue::{BreakerGate, ExecutionQueue};
use crate::exit::monitor::ExitMonitor;
use crate::position_engine::PositionEngine;
use crate::price_monitor::PriceMonitor;
use crate::repositories::memory::{
    FileConfigRepo, InMemoryBreakerRepo, InMemorySignalRepo, InMemoryStrategyRepo,
    InMemoryTokenRepo, InMemoryTradeStore, InMemoryWalletRepo,
};
use crate::repositories::{
    BreakerRepo, ConfigRepo, OrderRepo, PositionRepo, SignalRepo, StrategyRepo, TokenRepo,
    TradeStore, WalletRepo,
};
use crate::runtime_config::RuntimeConfig;
use crate::safety::SafetyEvaluator;
use crate::signal_ingress::{QuoteTokenSet, RoutedSignal, SignalIngress};
use crate::supervisor::Supervisor;
use crate::venues::http::HttpSwapClient;
use crate::venues::paper::{PaperMonitorClient, PaperQuoteClient, PaperSafetyClient, PaperSigner, PaperSwapClient};
use crate::venues::signer::EnvSigner;
use crate::venues::{MonitorClient, QuoteClient, SafetyClient, SwapClient, Signer};
use crate::wallet_sync::WalletSyncController;

const CONFIG_PATH: &str = "runtime_config.json";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

/// wSOL and USDC mints — the base/quote side of a mirrored swap, per §4.1's
/// buy/sell classification.
fn default_quote_tokens() -> QuoteTokenSet {
    let mut quote_tokens = HashSet::new();
    quote_tokens.insert("So11111111111111111111111111111111111111112".to_string());
    quote_tokens.insert("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".to_string());
    QuoteTokenSet { quote_tokens }
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("walltrack-core starting up");

    let runtime_config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load runtime config, using defaults");
        RuntimeConfig::default()
    });
    info!(
        account_mode = %runtime_config.account_mode,
        entries_enabled = runtime_config.entries_enabled,
        ingress_lanes = runtime_config.ingress_lanes,
        "runtime config loaded"
    );

    let account_mode = runtime_config.account_mode;
    let capital_usd = env_f64("WALLTRACK_CAPITAL_USD", 10_000.0);

    // ── Repositories ─────────────────────────────────────────────────────
    let wallets: Arc<dyn WalletRepo> = Arc::new(InMemoryWalletRepo::default());
    let signals: Arc<dyn SignalRepo> = Arc::new(InMemorySignalRepo::default());
    let strategies: Arc<dyn StrategyRepo> = Arc::new(InMemoryStrategyRepo::default());
    let tokens: Arc<dyn TokenRepo> = Arc::new(InMemoryTokenRepo::default());
    let trade_store = Arc::new(InMemoryTradeStore::default());
    let positions: Arc<dyn PositionRepo> = trade_store.clone();
    let orders: Arc<dyn OrderRepo> = trade_store.clone();
    let trade_store_dyn: Arc<dyn TradeStore> = trade_store.clone();
    let breaker_events: Arc<dyn BreakerRepo> = Arc::new(InMemoryBreakerRepo::default());
    let config_repo: Arc<dyn ConfigRepo> = Arc::new(FileConfigRepo { path: CONFIG_PATH.into() });

    // ── Venue clients — paper by default, HTTP when live creds are set ──
    let (quote_client, swap_client): (Arc<dyn QuoteClient>, Arc<dyn SwapClient>) =
        if account_mode == AccountMode::Live {
            let api_key = std::env::var("WALLTRACK_VENUE_API_KEY").unwrap_or_default();
            let api_secret = std::env::var("WALLTRACK_VENUE_API_SECRET").unwrap_or_default();
            let base_url = std::env::var("WALLTRACK_VENUE_BASE_URL")
                .unwrap_or_else(|_| "https://api.example-aggregator.invalid".into());
            let http = Arc::new(HttpSwapClient::new(api_key, api_secret, base_url));
            (http.clone(), http)
        } else {
            (Arc::new(PaperQuoteClient::new()), Arc::new(PaperSwapClient::new()))
        };
    let safety_primary: Arc<dyn SafetyClient> = Arc::new(PaperSafetyClient::always_pass());
    let monitor_client: Arc<dyn MonitorClient> = Arc::new(PaperMonitorClient::default());

    // Signing boundary (§6): live mode loads key material from the
    // environment once and never exposes it past this point; paper mode
    // never touches a real key at all.
    let signer: Arc<dyn Signer> = if account_mode == AccountMode::Live {
        Arc::new(EnvSigner::from_env().expect(
            "WALLTRACK_SIGNER_KEY and WALLTRACK_SIGNER_ADDRESS must be set in live mode",
        ))
    } else {
        Arc::new(PaperSigner { address: "paper-signer".to_string() })
    };

    // ── Core components ──────────────────────────────────────────────────
    let breaker_gate = Arc::new(BreakerGate::default());

    let execution_queue = ExecutionQueue::new(
        breaker_gate.clone(),
        swap_client.clone(),
        orders.clone(),
        signer.clone(),
        runtime_config.execution.clone(),
    );

    let position_engine = Arc::new(PositionEngine::new(
        trade_store_dyn,
        execution_queue.clone(),
        swap_client.clone(),
        "USDC".to_string(),
    ));

    let safety = Arc::new(SafetyEvaluator::new(
        tokens.clone(),
        safety_primary,
        None,
        None,
        runtime_config.safety.clone(),
    ));

    let price_monitor = Arc::new(PriceMonitor::new(quote_client, None, runtime_config.price_monitor.clone()));

    let exit_monitor = Arc::new(ExitMonitor::new(
        positions.clone(),
        position_engine.clone(),
        price_monitor.clone(),
        runtime_config.price_monitor.clone(),
        runtime_config.slippage_req_pct,
    ));

    let circuit_breaker = Arc::new(CircuitBreaker::new(
        positions.clone(),
        breaker_events.clone(),
        breaker_gate.clone(),
        runtime_config.breaker.clone(),
        capital_usd,
    ));

    let wallet_sync = Arc::new(WalletSyncController::new(
        wallets.clone(),
        monitor_client,
        runtime_config.sync.clone(),
    ));

    let num_lanes = runtime_config.ingress_lanes.max(1) as usize;
    let mut lane_senders = Vec::with_capacity(num_lanes);
    let mut lane_receivers = Vec::with_capacity(num_lanes);
    for _ in 0..num_lanes {
        let (tx, rx) = mpsc::channel::<RoutedSignal>(256);
        lane_senders.push(tx);
        lane_receivers.push(rx);
    }

    let signal_ingress = Arc::new(SignalIngress::new(
        wallets.clone(),
        signals.clone(),
        default_quote_tokens(),
        lane_senders,
    ));

    let signature_secret = std::env::var("WALLTRACK_WEBHOOK_SECRET").unwrap_or_else(|_| {
        warn!("WALLTRACK_WEBHOOK_SECRET not set — all webhook signatures will be rejected");
        String::new()
    });
    let signature_verifier = Arc::new(HmacSignatureVerifier::new(signature_secret.into_bytes()));

    let state = Arc::new(AppState::new(AppStateDeps {
        runtime_config: Arc::new(parking_lot::RwLock::new(runtime_config)),
        config_repo,
        wallets,
        signals,
        strategies: strategies.clone(),
        tokens,
        positions,
        orders,
        breaker_events,
        safety,
        execution_queue: execution_queue.clone(),
        breaker_gate,
        position_engine: position_engine.clone(),
        circuit_breaker: circuit_breaker.clone(),
        price_monitor,
        exit_monitor: exit_monitor.clone(),
        wallet_sync: wallet_sync.clone(),
        signal_ingress,
        signature_verifier,
        capital_usd,
    }));

    // ── Spawn background loops ───────────────────────────────────────────
    let supervisor = Supervisor::new();

    {
        let queue = execution_queue.clone();
        let shutdown = supervisor.shutdown_signal();
        let simulation = account_mode != AccountMode::Live;
        supervisor.spawn("execution_queue", async move {
            queue.run(shutdown, simulation).await;
        });
    }

    {
        let monitor = exit_monitor.clone();
        supervisor.spawn("exit_monitor", async move {
            monitor.run().await;
        });
    }

    {
        let breaker = circuit_breaker.clone();
        supervisor.spawn("circuit_breaker", async move {
            breaker.run().await;
        });
    }

    // `wallet_sync_trigger` has no current caller — wallet activation/
    // deactivation is out of scope without a wallet admin endpoint — but is
    // kept alive for the process lifetime so the controller's on-demand arm
    // doesn't see a closed channel and exit early; it still runs on its
    // fixed cadence.
    let wallet_sync_trigger = {
        let sync = wallet_sync.clone();
        let (trigger_tx, trigger_rx) = mpsc::channel(8);
        supervisor.spawn("wallet_sync", async move {
            sync.run(trigger_rx).await;
        });
        trigger_tx
    };

    for (lane_index, rx) in lane_receivers.into_iter().enumerate() {
        let state = state.clone();
        supervisor.spawn("signal_lane", async move {
            run_signal_lane(lane_index, rx, state).await;
        });
    }

    // ── HTTP server ───────────────────────────────────────────────────────
    let bind_addr = std::env::var("WALLTRACK_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let router = api::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "HTTP server listening");

    let server_shutdown = supervisor.shutdown_signal();
    let server = tokio::spawn(async move {
        let mut server_shutdown = server_shutdown;
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.changed().await;
            })
            .await
    });

    info!("all subsystems running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, draining");

    supervisor.shutdown(SHUTDOWN_GRACE).await;
    match server.await {
        Ok(Ok(())) => info!("HTTP server stopped cleanly"),
        Ok(Err(e)) => error!(error = %e, "HTTP server exited with an error"),
        Err(e) => error!(error = %e, "HTTP server task panicked during shutdown"),
    }
    drop(wallet_sync_trigger);

    if let Err(e) = state.runtime_config.read().save(CONFIG_PATH) {
        error!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("walltrack-core shut down complete");
    Ok(())
}

/// One consumer per sharded lane (§4.1's "routing on hash(wallet_id) mod N"
/// read the other way round): buys go through the Safety Evaluator and, on
/// a pass, open a position; sells feed the exit monitor's mirror-sell fast
/// path directly. Per-wallet causal order is preserved because ingress
/// routes every signal from the same wallet to the same lane.
async fn run_signal_lane(lane_index: usize, mut rx: mpsc::Receiver<RoutedSignal>, state: Arc<AppState>) {
    info!(lane = lane_index, "signal lane consumer started");
    while let Some(routed) = rx.recv().await {
        let mut signal = routed.signal;

        match signal.kind {
            SignalKind::Sell => {
                state.exit_monitor.on_mirror_sell(signal.wallet_id, &signal.token_address).await;
                signal.mark_routed(None);
                if let Err(e) = state.signals.update(signal).await {
                    warn!(error = %e, "signal lane: failed to persist sell signal");
                }
            }
            SignalKind::Buy => {
                if !state.runtime_config.read().entries_enabled {
                    info!(token = %signal.token_address, "signal lane: entries disabled, skipping buy");
                    signal.mark_filtered("entries_disabled");
                    let _ = state.signals.update(signal).await;
                    continue;
                }

                let wallet = match state.wallets.get(signal.wallet_id).await {
                    Ok(Some(w)) => w,
                    Ok(None) => {
                        warn!(wallet = %signal.wallet_id, "signal lane: wallet disappeared after routing");
                        continue;
                    }
                    Err(e) => {
                        warn!(error = %e, "signal lane: wallet lookup failed");
                        continue;
                    }
                };

                let verdict = state.safety.evaluate(&signal.token_address).await;
                if !verdict.passed {
                    info!(token = %signal.token_address, "signal lane: token failed safety evaluation");
                    signal.mark_filtered("failed_safety_evaluation");
                    let _ = state.signals.update(signal).await;
                    continue;
                }

                let strategy = match state.strategies.get(wallet.exit_strategy_id).await {
                    Ok(Some(s)) => s,
                    Ok(None) => {
                        warn!(wallet = %wallet.id, strategy = %wallet.exit_strategy_id, "signal lane: no exit strategy configured");
                        signal.mark_filtered("missing_exit_strategy");
                        let _ = state.signals.update(signal).await;
                        continue;
                    }
                    Err(e) => {
                        warn!(error = %e, "signal lane: strategy lookup failed");
                        continue;
                    }
                };

                let config = state.runtime_config.read().clone();
                let amount_in = state.capital_usd * config.per_trade_pct / 100.0;

                match state
                    .position_engine
                    .open(&wallet, &signal, strategy, amount_in, config.slippage_req_pct)
                    .await
                {
                    Ok(position) => {
                        signal.mark_routed(Some(position.id));
                        if let Err(e) = state.signals.update(signal).await {
                            warn!(error = %e, "signal lane: failed to persist routed signal");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, wallet = %wallet.id, token = %signal.token_address, "signal lane: failed to open position");
                        signal.mark_filtered(format!("open_failed: {e}"));
                        let _ = state.signals.update(signal).await;
                    }
                }
            }
        }
    }
    info!(lane = lane_index, "signal lane consumer exiting (channel closed)");
}
