// =============================================================================
// External collaborator traits (§6) — the venue boundary. The core only
// depends on these traits; concrete implementations live in `paper` (demo
// simulation) and `http` (a signed HTTP client against a generic swap
// aggregator, adapted from the teacher's `binance/client.rs`).
// =============================================================================

pub mod http;
pub mod monitor_client;
pub mod paper;
pub mod quote;
pub mod safety_client;
pub mod signer;
pub mod swap;

pub use monitor_client::MonitorClient;
pub use quote::QuoteClient;
pub use safety_client::{SafetyClient, SafetyReport};
pub use signer::Signer;
pub use swap::{Quote, SwapClient, SwapResult};
