// =============================================================================
// Safety Evaluator (§4.2) — scores tokens via a cached, single-flight,
// multi-source fallback chain. Cache/TTL idiom adapted from the teacher's
// `runtime_config.rs` load/save pattern; scoring arithmetic grounded on the
// weighted-mean shape in `signals/weighted_score.rs`.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::domain::token::{SafetyChecks, SafetySource};
use crate::domain::Token;
use crate::repositories::TokenRepo;
use crate::runtime_config::SafetyParams;
use crate::venues::safety_client::SafetyReport;
use crate::venues::SafetyClient;

/// The outcome the caller needs: a pass/fail decision plus the record that
/// was cached, so callers that only care about `passed` don't need to
/// re-derive the threshold comparison.
#[derive(Debug, Clone)]
pub struct SafetyVerdict {
    pub token: Token,
    pub passed: bool,
}

struct CacheEntry {
    cell: Arc<OnceCell<Token>>,
    inserted_at: std::time::Instant,
}

pub struct SafetyEvaluator {
    cache: RwLock<HashMap<String, CacheEntry>>,
    repo: Arc<dyn TokenRepo>,
    primary: Arc<dyn SafetyClient>,
    secondary: Option<Arc<dyn SafetyClient>>,
    tertiary: Option<Arc<dyn SafetyClient>>,
    params: SafetyParams,
}

impl SafetyEvaluator {
    pub fn new(
        repo: Arc<dyn TokenRepo>,
        primary: Arc<dyn SafetyClient>,
        secondary: Option<Arc<dyn SafetyClient>>,
        tertiary: Option<Arc<dyn SafetyClient>>,
        params: SafetyParams,
    ) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            repo,
            primary,
            secondary,
            tertiary,
            params,
        }
    }

    /// Scores `token_address`, coalescing concurrent callers for the same
    /// key into a single upstream fallback-chain call (§4.2, P10).
    pub async fn evaluate(&self, token_address: &str) -> SafetyVerdict {
        let ttl = chrono::Duration::seconds(self.params.token_cache_ttl_secs as i64);

        let cell = {
            let mut guard = self.cache.write();
            let stale = guard
                .get(token_address)
                .map(|e| e.inserted_at.elapsed() > std::time::Duration::from_secs(self.params.token_cache_ttl_secs))
                .unwrap_or(true);
            if stale {
                guard.insert(
                    token_address.to_string(),
                    CacheEntry { cell: Arc::new(OnceCell::new()), inserted_at: std::time::Instant::now() },
                );
            }
            guard.get(token_address).unwrap().cell.clone()
        };

        let token = cell
            .get_or_init(|| async { self.analyze_fresh(token_address).await })
            .await
            .clone();

        // A cached token could in principle still be TTL-stale if the
        // in-repo clock check differs from our Instant-based cache clock;
        // re-check against `analyzed_at` before trusting it (defense for
        // callers that read the repo directly between our cache writes).
        let token = if token.is_stale(ttl, Utc::now()) {
            cell.get().cloned().unwrap_or(token)
        } else {
            token
        };

        let passed = token.safety_score >= self.params.safety_threshold;
        SafetyVerdict { token, passed }
    }

    async fn analyze_fresh(&self, token_address: &str) -> Token {
        let chain: Vec<(&Arc<dyn SafetyClient>, SafetySource)> = std::iter::once((&self.primary, SafetySource::Primary))
            .chain(self.secondary.as_ref().map(|c| (c, SafetySource::Secondary)))
            .chain(self.tertiary.as_ref().map(|c| (c, SafetySource::Tertiary)))
            .collect();

        for (client, source) in chain {
            match client.analyze(token_address).await {
                Ok(report) => {
                    let token = self.score(token_address, &report, source);
                    if let Err(e) = self.repo.upsert(token.clone()).await {
                        warn!(error = %e, "safety evaluator: failed to persist token");
                    }
                    return token;
                }
                Err(e) => {
                    warn!(source = ?source, token = token_address, error = %e, "safety source failed, falling back");
                }
            }
        }

        warn!(token = token_address, "safety evaluator: all sources failed");
        let token = Token {
            address: token_address.to_string(),
            symbol: String::new(),
            safety_score: 0.0,
            analyzed_at: Utc::now(),
            source: SafetySource::None,
            checks: SafetyChecks::default(),
        };
        let _ = self.repo.upsert(token.clone()).await;
        token
    }

    /// Computes `safety_score` from whichever checks `report` actually
    /// covers, reproportioning weights so the denominator equals the number
    /// of checks the source reports (§4.2 partial-data rule).
    fn score(&self, token_address: &str, report: &SafetyReport, source: SafetySource) -> Token {
        let checks = SafetyChecks {
            liquidity: report.liquidity_usd.map(|l| l >= self.params.min_liquidity_usd),
            holders: report
                .top10_concentration_pct
                .map(|c| c < self.params.max_holder_concentration_pct),
            contract: report.checks.contract,
            age: report.age_hours.map(|a| a >= self.params.min_token_age_hours),
        };

        let passed: Vec<bool> = [checks.liquidity, checks.holders, checks.contract, checks.age]
            .into_iter()
            .flatten()
            .collect();
        let score = if passed.is_empty() {
            0.0
        } else {
            passed.iter().filter(|p| **p).count() as f64 / passed.len() as f64
        };

        info!(token = token_address, score, checks_covered = passed.len(), "safety score computed");

        Token {
            address: token_address.to_string(),
            symbol: report.symbol.clone().unwrap_or_default(),
            safety_score: score,
            analyzed_at: Utc::now(),
            source,
            checks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::memory::InMemoryTokenRepo;
    use crate::venues::paper::PaperSafetyClient;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingSafetyClient {
        inner: PaperSafetyClient,
        calls: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl SafetyClient for CountingSafetyClient {
        async fn analyze(&self, token_address: &str) -> crate::errors::VenueResult<SafetyReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            self.inner.analyze(token_address).await
        }
    }

    #[tokio::test]
    async fn passing_token_scores_above_threshold() {
        let repo: Arc<dyn TokenRepo> = Arc::new(InMemoryTokenRepo::default());
        let evaluator = SafetyEvaluator::new(
            repo,
            Arc::new(PaperSafetyClient::always_pass()),
            None,
            None,
            SafetyParams::default(),
        );
        let verdict = evaluator.evaluate("TOKEN1").await;
        assert!(verdict.passed);
        assert_eq!(verdict.token.safety_score, 1.0);
    }

    #[tokio::test]
    async fn failing_token_is_rejected() {
        let repo: Arc<dyn TokenRepo> = Arc::new(InMemoryTokenRepo::default());
        let evaluator = SafetyEvaluator::new(
            repo,
            Arc::new(PaperSafetyClient::always_fail()),
            None,
            None,
            SafetyParams::default(),
        );
        let verdict = evaluator.evaluate("TOKEN2").await;
        assert!(!verdict.passed);
    }

    #[tokio::test]
    async fn concurrent_requests_single_flight() {
        let repo: Arc<dyn TokenRepo> = Arc::new(InMemoryTokenRepo::default());
        let calls = Arc::new(AtomicU32::new(0));
        let client = Arc::new(CountingSafetyClient { inner: PaperSafetyClient::always_pass(), calls: calls.clone() });
        let evaluator = Arc::new(SafetyEvaluator::new(repo, client, None, None, SafetyParams::default()));

        let mut handles = vec![];
        for _ in 0..10 {
            let e = evaluator.clone();
            handles.push(tokio::spawn(async move { e.evaluate("SAME_TOKEN").await }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
