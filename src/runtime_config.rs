// =============================================================================
// Runtime Configuration — Hot-reloadable engine settings with atomic save
// =============================================================================
//
// Central configuration hub for the WallTrack core. Every tunable threshold
// named in the component design lives here so the engine can be reconfigured
// without a restart.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default = "...")]` so that adding new
// fields never breaks loading an older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::wallet::AccountMode;

fn default_true() -> bool {
    true
}

// --- Safety Evaluator defaults (§4.2) ---------------------------------------

fn default_min_liquidity_usd() -> f64 {
    50_000.0
}

fn default_max_holder_concentration_pct() -> f64 {
    80.0
}

fn default_min_token_age_hours() -> u32 {
    24
}

fn default_safety_threshold() -> f64 {
    0.60
}

fn default_token_cache_ttl_secs() -> u64 {
    3600
}

// --- Execution Queue defaults (§4.3) -----------------------------------------

fn default_min_spacing_ms() -> u64 {
    2000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_base_secs() -> u64 {
    5
}

fn default_rate_limit_backoff_ms() -> u64 {
    2000
}

// --- Price Monitor defaults (§4.6) -------------------------------------------

fn default_urgent_poll_secs() -> u64 {
    20
}

fn default_active_poll_secs() -> u64 {
    30
}

fn default_stable_poll_secs() -> u64 {
    60
}

fn default_urgent_threshold_pct() -> f64 {
    5.0
}

fn default_max_batch_size() -> usize {
    100
}

fn default_max_price_staleness_secs() -> u64 {
    300
}

// --- Circuit Breaker defaults (§4.7) -----------------------------------------

fn default_daily_loss_limit_usd() -> f64 {
    500.0
}

fn default_max_drawdown_pct() -> f64 {
    10.0
}

fn default_breaker_eval_interval_secs() -> u64 {
    60
}

// --- Webhook Sync Controller defaults (§4.8) ---------------------------------

fn default_sync_cadence_secs() -> u64 {
    300
}

fn default_sync_backoff_caps_secs() -> Vec<u64> {
    vec![60, 120, 300]
}

// --- Position sizing ----------------------------------------------------------

fn default_per_trade_pct() -> f64 {
    2.0
}

fn default_slippage_req_pct() -> f64 {
    1.0
}

/// Configuration for the Safety Evaluator's four weighted checks (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyParams {
    #[serde(default = "default_min_liquidity_usd")]
    pub min_liquidity_usd: f64,
    #[serde(default = "default_max_holder_concentration_pct")]
    pub max_holder_concentration_pct: f64,
    #[serde(default = "default_min_token_age_hours")]
    pub min_token_age_hours: u32,
    #[serde(default = "default_safety_threshold")]
    pub safety_threshold: f64,
    #[serde(default = "default_token_cache_ttl_secs")]
    pub token_cache_ttl_secs: u64,
}

impl Default for SafetyParams {
    fn default() -> Self {
        Self {
            min_liquidity_usd: default_min_liquidity_usd(),
            max_holder_concentration_pct: default_max_holder_concentration_pct(),
            min_token_age_hours: default_min_token_age_hours(),
            safety_threshold: default_safety_threshold(),
            token_cache_ttl_secs: default_token_cache_ttl_secs(),
        }
    }
}

/// Execution Queue scheduling parameters (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionParams {
    #[serde(default = "default_min_spacing_ms")]
    pub min_spacing_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_base_secs")]
    pub retry_backoff_base_secs: u64,
    #[serde(default = "default_rate_limit_backoff_ms")]
    pub rate_limit_backoff_ms: u64,
}

impl Default for ExecutionParams {
    fn default() -> Self {
        Self {
            min_spacing_ms: default_min_spacing_ms(),
            max_retries: default_max_retries(),
            retry_backoff_base_secs: default_retry_backoff_base_secs(),
            rate_limit_backoff_ms: default_rate_limit_backoff_ms(),
        }
    }
}

/// Price Monitor tiering/batching parameters (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceMonitorParams {
    #[serde(default = "default_urgent_poll_secs")]
    pub urgent_poll_secs: u64,
    #[serde(default = "default_active_poll_secs")]
    pub active_poll_secs: u64,
    #[serde(default = "default_stable_poll_secs")]
    pub stable_poll_secs: u64,
    #[serde(default = "default_urgent_threshold_pct")]
    pub urgent_threshold_pct: f64,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_max_price_staleness_secs")]
    pub max_staleness_secs: u64,
}

impl Default for PriceMonitorParams {
    fn default() -> Self {
        Self {
            urgent_poll_secs: default_urgent_poll_secs(),
            active_poll_secs: default_active_poll_secs(),
            stable_poll_secs: default_stable_poll_secs(),
            urgent_threshold_pct: default_urgent_threshold_pct(),
            max_batch_size: default_max_batch_size(),
            max_staleness_secs: default_max_price_staleness_secs(),
        }
    }
}

/// Circuit Breaker thresholds (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerParams {
    #[serde(default = "default_daily_loss_limit_usd")]
    pub daily_loss_limit_usd: f64,
    #[serde(default = "default_max_drawdown_pct")]
    pub max_drawdown_pct: f64,
    #[serde(default = "default_breaker_eval_interval_secs")]
    pub eval_interval_secs: u64,
}

impl Default for BreakerParams {
    fn default() -> Self {
        Self {
            daily_loss_limit_usd: default_daily_loss_limit_usd(),
            max_drawdown_pct: default_max_drawdown_pct(),
            eval_interval_secs: default_breaker_eval_interval_secs(),
        }
    }
}

/// Webhook Sync Controller cadence/backoff (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncParams {
    #[serde(default = "default_sync_cadence_secs")]
    pub cadence_secs: u64,
    #[serde(default = "default_sync_backoff_caps_secs")]
    pub backoff_steps_secs: Vec<u64>,
}

impl Default for SyncParams {
    fn default() -> Self {
        Self {
            cadence_secs: default_sync_cadence_secs(),
            backoff_steps_secs: default_sync_backoff_caps_secs(),
        }
    }
}

/// Top-level runtime configuration for the WallTrack core.
///
/// Every field has a serde default so older JSON files missing new fields
/// still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Whether new positions default to simulated or live execution.
    #[serde(default)]
    pub account_mode: AccountMode,

    /// Whether the engine accepts new entries at all (kill switch); exits
    /// always continue to run regardless of this flag.
    #[serde(default = "default_true")]
    pub entries_enabled: bool,

    #[serde(default)]
    pub safety: SafetyParams,

    #[serde(default)]
    pub execution: ExecutionParams,

    #[serde(default)]
    pub price_monitor: PriceMonitorParams,

    #[serde(default)]
    pub breaker: BreakerParams,

    #[serde(default)]
    pub sync: SyncParams,

    /// Position size as a percentage of available capital (§4.4 step 1).
    #[serde(default = "default_per_trade_pct")]
    pub per_trade_pct: f64,

    /// Requested slippage tolerance on swap requests, percent.
    #[serde(default = "default_slippage_req_pct")]
    pub slippage_req_pct: f64,

    /// Number of signal-ingress lanes (§4.1 sharded ordering).
    #[serde(default = "default_ingress_lanes")]
    pub ingress_lanes: u32,
}

fn default_ingress_lanes() -> u32 {
    8
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            account_mode: AccountMode::Simulation,
            entries_enabled: true,
            safety: SafetyParams::default(),
            execution: ExecutionParams::default(),
            price_monitor: PriceMonitorParams::default(),
            breaker: BreakerParams::default(),
            sync: SyncParams::default(),
            per_trade_pct: default_per_trade_pct(),
            slippage_req_pct: default_slippage_req_pct(),
            ingress_lanes: default_ingress_lanes(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            account_mode = %config.account_mode,
            entries_enabled = config.entries_enabled,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename). Prevents corruption if the process
    /// crashes mid-write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.account_mode, AccountMode::Simulation);
        assert!(cfg.entries_enabled);
        assert_eq!(cfg.safety.min_liquidity_usd, 50_000.0);
        assert_eq!(cfg.safety.max_holder_concentration_pct, 80.0);
        assert_eq!(cfg.safety.min_token_age_hours, 24);
        assert!((cfg.safety.safety_threshold - 0.60).abs() < f64::EPSILON);
        assert_eq!(cfg.execution.min_spacing_ms, 2000);
        assert_eq!(cfg.execution.max_retries, 3);
        assert_eq!(cfg.breaker.daily_loss_limit_usd, 500.0);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.account_mode, AccountMode::Simulation);
        assert_eq!(cfg.price_monitor.urgent_poll_secs, 20);
        assert_eq!(cfg.sync.cadence_secs, 300);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "account_mode": "Live", "per_trade_pct": 5.0 }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.account_mode, AccountMode::Live);
        assert_eq!(cfg.per_trade_pct, 5.0);
        assert_eq!(cfg.execution.max_retries, 3);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.account_mode, cfg2.account_mode);
        assert_eq!(cfg.execution.min_spacing_ms, cfg2.execution.min_spacing_ms);
        assert_eq!(cfg.breaker.max_drawdown_pct, cfg2.breaker.max_drawdown_pct);
    }

    #[test]
    fn save_then_load_atomic_roundtrip() {
        let dir = std::env::temp_dir().join(format!("walltrack-cfg-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("runtime_config.json");
        let mut cfg = RuntimeConfig::default();
        cfg.per_trade_pct = 7.5;
        cfg.save(&path).unwrap();
        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.per_trade_pct, 7.5);
        std::fs::remove_dir_all(&dir).ok();
    }
}
