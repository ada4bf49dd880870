use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use shared::{
    domain::ProductId,
    protocol::{CartMutation, QueuedOperation},
};
use storage::{KeyValueStore, StoreResult};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::gateway::{upsert_item, GatewayError, GatewayResult, RemoteCartGateway};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub succeeded: usize,
    pub failed: usize,
    pub dropped: usize,
    /// Held back behind an earlier failure touching the same part of the cart.
    pub deferred: usize,
}

impl DrainReport {
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed + self.dropped + self.deferred
    }
}

/// What part of the remote cart a mutation touches.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Scope {
    Line(ProductId, Option<String>),
    Cart,
    Coupon,
}

impl Scope {
    fn of(mutation: &CartMutation) -> Self {
        match mutation {
            CartMutation::AddItem {
                product_id,
                variant,
                ..
            }
            | CartMutation::UpdateQuantity {
                product_id,
                variant,
                ..
            }
            | CartMutation::RemoveItem {
                product_id,
                variant,
            } => Self::Line(product_id.clone(), variant.clone()),
            CartMutation::Clear => Self::Cart,
            CartMutation::ApplyCoupon { .. } | CartMutation::RemoveCoupon => Self::Coupon,
        }
    }

    fn overlaps(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Cart, _) | (_, Self::Cart) => true,
            (Self::Coupon, Self::Coupon) => true,
            (Self::Line(..), Self::Line(..)) => self == other,
            _ => false,
        }
    }
}

/// Durable FIFO of remote mutations recorded while offline.
pub struct OfflineQueue {
    store: Arc<dyn KeyValueStore>,
    key: String,
    max_attempts: u32,
    entries: Mutex<VecDeque<QueuedOperation>>,
    draining: AtomicBool,
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl OfflineQueue {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        key: impl Into<String>,
        max_attempts: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            key: key.into(),
            max_attempts: max_attempts.max(1),
            entries: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
        })
    }

    /// Replaces the in-memory queue with whatever was persisted. A corrupt
    /// record is discarded.
    pub async fn restore(&self) -> usize {
        let restored = match self.store.get(&self.key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<Vec<QueuedOperation>>(&bytes) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!("queue: discarding unreadable queue record: {err}");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!("queue: failed to read queue record: {err}");
                Vec::new()
            }
        };
        let count = restored.len();
        *self.entries.lock().await = restored.into();
        if count > 0 {
            info!("queue: restored {count} pending operations");
        }
        count
    }

    /// Appends and persists. The entry stays queued in memory even when the
    /// write fails; the store error is returned for the caller to surface.
    pub async fn enqueue(&self, mutation: CartMutation) -> StoreResult<()> {
        let operation = QueuedOperation::new(mutation);
        debug!(
            "queue: enqueue {} id={}",
            operation.mutation.op_type(),
            operation.id
        );
        let mut entries = self.entries.lock().await;
        entries.push_back(operation);
        self.persist(&entries).await
    }

    pub async fn has_pending_operations(&self) -> bool {
        !self.entries.lock().await.is_empty()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn snapshot(&self) -> Vec<QueuedOperation> {
        self.entries.lock().await.iter().cloned().collect()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Replays every entry present when the drain starts, in order. Failures
    /// stay at the head of the queue with their attempt count bumped; entries
    /// enqueued meanwhile wait behind them. A later entry overlapping a failed
    /// one (same line, or either is a clear) is held back untouched so it
    /// never reaches the backend first. A concurrent call returns an empty report without touching the
    /// queue.
    pub async fn process_queue(&self, gateway: &dyn RemoteCartGateway) -> DrainReport {
        let mut report = DrainReport::default();
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("queue: drain already in progress");
            return report;
        }
        let _guard = DrainGuard(&self.draining);

        let batch = self.entries.lock().await.len();
        let mut cursor = 0;
        let mut blocked: Vec<Scope> = Vec::new();
        for _ in 0..batch {
            let Some(operation) = self.entries.lock().await.get(cursor).cloned() else {
                break;
            };
            let scope = Scope::of(&operation.mutation);
            if blocked.iter().any(|failed| failed.overlaps(&scope)) {
                debug!(
                    "queue: holding {} id={} behind an earlier failure",
                    operation.mutation.op_type(),
                    operation.id
                );
                blocked.push(scope);
                cursor += 1;
                report.deferred += 1;
                continue;
            }
            let result = replay(gateway, &operation.mutation).await;

            let mut entries = self.entries.lock().await;
            match result {
                Ok(()) => {
                    entries.remove(cursor);
                    report.succeeded += 1;
                }
                Err(err) => {
                    let Some(entry) = entries.get_mut(cursor) else {
                        break;
                    };
                    entry.attempts += 1;
                    if entry.attempts >= self.max_attempts {
                        warn!(
                            "queue: dropping {} id={} after {} attempts: {err}",
                            entry.mutation.op_type(),
                            entry.id,
                            entry.attempts
                        );
                        entries.remove(cursor);
                        report.dropped += 1;
                    } else {
                        warn!(
                            "queue: {} id={} failed (attempt {}): {err}",
                            entry.mutation.op_type(),
                            entry.id,
                            entry.attempts
                        );
                        blocked.push(scope);
                        cursor += 1;
                        report.failed += 1;
                    }
                }
            }
            if let Err(err) = self.persist(&entries).await {
                warn!("queue: failed to persist queue after replay: {err}");
            }
        }

        if report.processed() > 0 {
            info!(
                "queue: drained succeeded={} failed={} dropped={} deferred={}",
                report.succeeded, report.failed, report.dropped, report.deferred
            );
        }
        report
    }

    async fn persist(&self, entries: &VecDeque<QueuedOperation>) -> StoreResult<()> {
        let bytes = serde_json::to_vec(entries).map_err(std::io::Error::from)?;
        self.store.set(&self.key, &bytes).await
    }
}

/// Replays one queued mutation. Quantities are absolute, so replaying the
/// same entry twice leaves the backend where a single replay would.
pub(crate) async fn replay(
    gateway: &dyn RemoteCartGateway,
    mutation: &CartMutation,
) -> GatewayResult<()> {
    match mutation {
        CartMutation::AddItem {
            product_id,
            variant,
            quantity,
        }
        | CartMutation::UpdateQuantity {
            product_id,
            variant,
            quantity,
        } => upsert_item(gateway, product_id, *quantity, variant.as_deref()).await,
        CartMutation::RemoveItem {
            product_id,
            variant,
        } => match gateway
            .remove_cart_item(product_id, variant.as_deref())
            .await
        {
            Ok(_) | Err(GatewayError::NotFound) => Ok(()),
            Err(err) => Err(err),
        },
        CartMutation::Clear => gateway.clear_cart().await,
        CartMutation::ApplyCoupon { code } => gateway.apply_coupon(code).await,
        CartMutation::RemoveCoupon => gateway.remove_coupon().await,
    }
}

#[cfg(test)]
#[path = "tests/offline_queue_tests.rs"]
mod tests;
