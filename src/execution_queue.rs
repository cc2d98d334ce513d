// =============================================================================
// Execution Queue (§4.3) — the central concurrency primitive. A single
// consumer task serializes every venue call, enforcing priority admission,
// minimum spacing, and exponential-backoff retries. Generalizes the
// teacher's `execution.rs` dispatch branching with the spacing/backoff
// discipline of `binance/rate_limit.rs`.
// =============================================================================

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tracing::{info, warn};

use crate::domain::wallet::AccountMode;
use crate::domain::{Order, OrderId, OrderKind, OrderStatus};
use crate::errors::VenueError;
use crate::repositories::OrderRepo;
use crate::runtime_config::ExecutionParams;
use crate::venues::swap::Quote;
use crate::venues::{Signer, SwapClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Critical = 0,
    Urgent = 1,
    Normal = 2,
    Low = 3,
}

impl Priority {
    pub fn from_order_kind(kind: OrderKind) -> Self {
        match kind {
            OrderKind::ExitMirror => Priority::Critical,
            OrderKind::ExitStop | OrderKind::ExitTrail => Priority::Urgent,
            OrderKind::Entry => Priority::Normal,
            OrderKind::ExitScale(_) => Priority::Low,
            OrderKind::ExitManual => Priority::Urgent,
        }
    }
}

#[derive(Debug)]
pub enum Rejected {
    BreakerOpen,
}

pub struct SwapRequest {
    pub order: Order,
    pub quote: Quote,
}

struct QueuedRequest {
    priority: Priority,
    enqueued_at: std::time::Instant,
    sequence: u64,
    request: SwapRequest,
    attempt: u32,
    completion: Option<oneshot::Sender<OrderOutcome>>,
}

#[derive(Debug, Clone)]
pub enum OrderOutcome {
    /// `order` carries the fully updated terminal-`Filled` row. The queue
    /// deliberately does NOT persist it itself — the caller commits it
    /// together with whatever position mutation it triggers, in one
    /// transaction (§4.4). `Failed`/`Cancelled` have no position on the
    /// other end, so the queue persists those terminal writes directly.
    Filled { amount_out: f64, price_slippage: f64, tx_signature: String, order: Order },
    Failed { reason: String },
    Cancelled,
}

/// Internal result of a single venue dispatch attempt, before the terminal
/// `Order` row is assembled. Kept separate from `OrderOutcome` so dispatch
/// doesn't need to know the order it's about to persist isn't persisted
/// here.
struct DispatchFilled {
    amount_out: f64,
    price_slippage: f64,
    tx_signature: String,
}

// Reverse ordering so `BinaryHeap` (a max-heap) pops the *lowest* priority
// number (highest urgency) first, FIFO (lowest sequence) within a tier.
impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl Eq for QueuedRequest {}
impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueuedRequest {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Shared breaker flag consulted only for `Priority::Normal` admission
/// (§4.3, §4.7). A single atomic boolean with a monotonic version, per §5.
#[derive(Default)]
pub struct BreakerGate {
    open: AtomicBool,
    version: AtomicU64,
}

impl BreakerGate {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn set(&self, open: bool) {
        self.open.store(open, Ordering::Release);
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

pub struct ExecutionQueue {
    heap: Mutex<BinaryHeap<QueuedRequest>>,
    notify: Notify,
    sequence: AtomicU64,
    breaker: Arc<BreakerGate>,
    swap_client: Arc<dyn SwapClient>,
    order_repo: Arc<dyn OrderRepo>,
    signer: Arc<dyn Signer>,
    params: ExecutionParams,
    last_dispatch: Mutex<Option<std::time::Instant>>,
}

impl ExecutionQueue {
    pub fn new(
        breaker: Arc<BreakerGate>,
        swap_client: Arc<dyn SwapClient>,
        order_repo: Arc<dyn OrderRepo>,
        signer: Arc<dyn Signer>,
        params: ExecutionParams,
    ) -> Arc<Self> {
        Arc::new(Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            sequence: AtomicU64::new(0),
            breaker,
            swap_client,
            order_repo,
            signer,
            params,
            last_dispatch: Mutex::new(None),
        })
    }

    /// `submit(SwapRequest) -> OrderId` (§4.3 contract). Returns
    /// `Err(Rejected::BreakerOpen)` only for `NORMAL`-priority requests
    /// while the breaker is tripped (§5 asymmetry, P5).
    pub fn submit(
        self: &Arc<Self>,
        request: SwapRequest,
    ) -> Result<(OrderId, oneshot::Receiver<OrderOutcome>), Rejected> {
        let priority = Priority::from_order_kind(request.order.kind);
        if priority == Priority::Normal && self.breaker.is_open() {
            return Err(Rejected::BreakerOpen);
        }
        let order_id = request.order.id;
        let (tx, rx) = oneshot::channel();
        self.push(priority, request, 0, Some(tx));
        Ok((order_id, rx))
    }

    fn push(
        self: &Arc<Self>,
        priority: Priority,
        request: SwapRequest,
        attempt: u32,
        completion: Option<oneshot::Sender<OrderOutcome>>,
    ) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.heap.lock().push(QueuedRequest {
            priority,
            enqueued_at: std::time::Instant::now(),
            sequence,
            request,
            attempt,
            completion,
        });
        self.notify.notify_one();
    }

    /// The single consumer loop. Spawn exactly one of these per process
    /// (§5: "Single consumer serializes all venue calls").
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>, simulation: bool) {
        let min_spacing = Duration::from_millis(self.params.min_spacing_ms);
        loop {
            let next = {
                let mut heap = self.heap.lock();
                heap.pop()
            };

            let Some(mut item) = next else {
                tokio::select! {
                    _ = self.notify.notified() => continue,
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() { return; }
                        continue;
                    }
                }
            };

            // P6 spacing invariant: never dispatch sooner than min_spacing
            // after the previous dispatch.
            {
                let last = *self.last_dispatch.lock();
                if let Some(last) = last {
                    let elapsed = last.elapsed();
                    if elapsed < min_spacing {
                        tokio::time::sleep(min_spacing - elapsed).await;
                    }
                }
            }
            *self.last_dispatch.lock() = Some(std::time::Instant::now());

            let outcome = self.dispatch(&mut item.request, simulation).await;
            self.handle_outcome(item, outcome).await;
        }
    }

    async fn dispatch(&self, request: &mut SwapRequest, simulation: bool) -> Result<DispatchFilled, VenueError> {
        // §4.3 state machine: pending -> submitted happens here, the moment
        // the request is handed off, before the venue call is even awaited.
        // This write has no position counterpart yet, so it stands alone.
        request.order.status = OrderStatus::Submitted;
        if let Err(e) = self.order_repo.upsert(request.order.clone()).await {
            warn!(error = %e, "execution queue: failed to persist submitted order");
        }

        if simulation || request.order.mode == AccountMode::Simulation {
            // Still passes through the queue to preserve priority
            // discipline and scheduling realism (§4.3).
            return Ok(DispatchFilled {
                amount_out: request.quote.amount_out_expected,
                price_slippage: 0.0,
                tx_signature: format!("sim-{}", request.order.id),
            });
        }

        match self.swap_client.execute(&request.quote, self.signer.as_ref()).await {
            Ok(result) => Ok(DispatchFilled {
                amount_out: result.amount_out,
                price_slippage: result.slippage_actual,
                tx_signature: result.tx_signature,
            }),
            Err(e) => Err(e),
        }
    }

    async fn handle_outcome(self: &Arc<Self>, mut item: QueuedRequest, outcome: Result<DispatchFilled, VenueError>) {
        match outcome {
            Ok(DispatchFilled { amount_out, price_slippage, tx_signature }) => {
                item.request.order.status = OrderStatus::Filled;
                item.request.order.amount_out_actual = Some(amount_out);
                item.request.order.slippage_actual = Some(price_slippage);
                item.request.order.tx_signature = Some(tx_signature.clone());

                // Deliberately not persisted here — the caller commits this
                // terminal row together with the position mutation it
                // triggers, atomically (§4.4).
                let order = item.request.order.clone();
                if let Some(tx) = item.completion.take() {
                    let _ = tx.send(OrderOutcome::Filled { amount_out, price_slippage, tx_signature, order });
                }
            }
            Err(VenueError::RateLimited) => {
                // Rate-limit errors do not consume retry budget; re-enqueue
                // with a dynamic backoff of at least `min_spacing` (§4.3).
                warn!(order = %item.request.order.id, "execution queue: rate limited, re-enqueueing");
                let delay = Duration::from_millis(self.params.rate_limit_backoff_ms.max(self.params.min_spacing_ms));
                let queue = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    queue.push(item.priority, item.request, item.attempt, item.completion);
                });
            }
            Err(VenueError::Transient(msg)) => {
                item.attempt += 1;
                if item.attempt > self.params.max_retries {
                    self.fail_order(item, msg).await;
                } else {
                    let backoff_secs = self.params.retry_backoff_base_secs * (1 << (item.attempt - 1));
                    warn!(order = %item.request.order.id, attempt = item.attempt, backoff_secs, "execution queue: transient failure, retrying");
                    let queue = self.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                        queue.push(item.priority, item.request, item.attempt, item.completion);
                    });
                }
            }
            Err(VenueError::Permanent(msg)) => {
                self.fail_order(item, msg).await;
            }
        }
    }

    async fn fail_order(&self, mut item: QueuedRequest, reason: String) {
        item.request.order.status = OrderStatus::Failed;
        item.request.order.last_error = Some(reason.clone());
        item.request.order.retry_count = item.attempt;
        if let Err(e) = self.order_repo.upsert(item.request.order.clone()).await {
            warn!(error = %e, "execution queue: failed to persist failed order");
        }
        info!(order = %item.request.order.id, reason, "execution queue: order failed terminally");
        if let Some(tx) = item.completion.take() {
            let _ = tx.send(OrderOutcome::Failed { reason });
        }
    }

    pub fn depth(&self) -> usize {
        self.heap.lock().len()
    }

    /// Cancels a still-queued, not-yet-dispatched order (§4.3: `cancelled`
    /// only reachable from `pending`, via explicit operator action). Returns
    /// `false` if no matching entry was found in the heap — it has already
    /// been popped for dispatch (or never existed) and must run to its own
    /// terminal outcome instead.
    pub async fn cancel(&self, order_id: OrderId) -> bool {
        let found = {
            let mut heap = self.heap.lock();
            let items = std::mem::take(&mut *heap).into_vec();
            let mut found = None;
            let mut kept = Vec::with_capacity(items.len());
            for item in items {
                if found.is_none() && item.request.order.id == order_id {
                    found = Some(item);
                } else {
                    kept.push(item);
                }
            }
            *heap = BinaryHeap::from(kept);
            found
        };

        let Some(mut item) = found else { return false };
        item.request.order.status = OrderStatus::Cancelled;
        if let Err(e) = self.order_repo.upsert(item.request.order.clone()).await {
            warn!(error = %e, "execution queue: failed to persist cancelled order");
        }
        info!(order = %order_id, "execution queue: order cancelled");
        if let Some(tx) = item.completion.take() {
            let _ = tx.send(OrderOutcome::Cancelled);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PositionId;
    use crate::repositories::memory::InMemoryTradeStore;
    use crate::venues::paper::PaperSwapClient;

    fn make_request(kind: OrderKind) -> SwapRequest {
        let order = Order::new_pending(PositionId::new(), kind, AccountMode::Simulation, 10.0, 10.0, 1.0);
        let quote = Quote {
            in_token: "A".into(),
            out_token: "B".into(),
            amount_in: 10.0,
            amount_out_expected: 10.0,
            slippage_pct: 0.0,
        };
        SwapRequest { order, quote }
    }

    #[tokio::test]
    async fn urgent_preempts_waiting_normals() {
        let store = Arc::new(InMemoryTradeStore::default());
        let breaker = Arc::new(BreakerGate::default());
        let swap: Arc<dyn SwapClient> = Arc::new(PaperSwapClient::new());
        let mut params = ExecutionParams::default();
        params.min_spacing_ms = 0;
        let signer: Arc<dyn crate::venues::Signer> = Arc::new(crate::venues::paper::PaperSigner { address: "paper".into() });
        let queue = ExecutionQueue::new(breaker, swap, store, signer, params);

        for _ in 0..5 {
            queue.submit(make_request(OrderKind::Entry)).unwrap();
        }
        let (_, urgent_rx) = queue.submit(make_request(OrderKind::ExitStop)).unwrap();

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let runner = queue.clone();
        let handle = tokio::spawn(async move { runner.run(shutdown_rx, true).await });

        let outcome = tokio::time::timeout(Duration::from_secs(2), urgent_rx).await.unwrap().unwrap();
        assert!(matches!(outcome, OrderOutcome::Filled { .. }));

        shutdown_tx.send(true).unwrap();
        handle.abort();
    }

    #[tokio::test]
    async fn breaker_open_rejects_normal_but_admits_urgent() {
        let store = Arc::new(InMemoryTradeStore::default());
        let breaker = Arc::new(BreakerGate::default());
        breaker.set(true);
        let swap: Arc<dyn SwapClient> = Arc::new(PaperSwapClient::new());
        let signer: Arc<dyn crate::venues::Signer> = Arc::new(crate::venues::paper::PaperSigner { address: "paper".into() });
        let queue = ExecutionQueue::new(breaker, swap, store, signer, ExecutionParams::default());

        let normal = queue.submit(make_request(OrderKind::Entry));
        assert!(matches!(normal, Err(Rejected::BreakerOpen)));

        let urgent = queue.submit(make_request(OrderKind::ExitStop));
        assert!(urgent.is_ok());

        let low = queue.submit(make_request(OrderKind::ExitScale(0)));
        assert!(low.is_ok());
    }

    #[tokio::test]
    async fn cancel_removes_a_still_queued_order_and_marks_it_cancelled() {
        let store = Arc::new(InMemoryTradeStore::default());
        let breaker = Arc::new(BreakerGate::default());
        let swap: Arc<dyn SwapClient> = Arc::new(PaperSwapClient::new());
        let signer: Arc<dyn crate::venues::Signer> = Arc::new(crate::venues::paper::PaperSigner { address: "paper".into() });
        let queue = ExecutionQueue::new(breaker, swap, store.clone(), signer, ExecutionParams::default());

        let request = make_request(OrderKind::ExitScale(0));
        let order_id = request.order.id;
        let (_, rx) = queue.submit(request).unwrap();
        assert_eq!(queue.depth(), 1);

        let cancelled = queue.cancel(order_id).await;
        assert!(cancelled);
        assert_eq!(queue.depth(), 0);

        let outcome = rx.await.unwrap();
        assert!(matches!(outcome, OrderOutcome::Cancelled));

        let persisted = store.get(order_id).await.unwrap().unwrap();
        assert_eq!(persisted.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_is_a_no_op_for_an_order_not_in_the_queue() {
        let store = Arc::new(InMemoryTradeStore::default());
        let breaker = Arc::new(BreakerGate::default());
        let swap: Arc<dyn SwapClient> = Arc::new(PaperSwapClient::new());
        let signer: Arc<dyn crate::venues::Signer> = Arc::new(crate::venues::paper::PaperSigner { address: "paper".into() });
        let queue = ExecutionQueue::new(breaker, swap, store, signer, ExecutionParams::default());

        assert!(!queue.cancel(OrderId::new()).await);
    }
}
