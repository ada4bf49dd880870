//! Debounced, size-bounded cart snapshots over the app byte store.
//!
//! Durability here is best-effort. A snapshot that cannot be written, even
//! after trimming and freeing low-value keys, is skipped with a warning and
//! the in-memory cart stays authoritative for the session.

use std::{collections::HashSet, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::domain::{
    CartItem, EventBooking, ItemId, ItemMetadata, LockDiscount, ProductDetails, ProductId,
    ServiceBooking, UnitPrice,
};
use storage::{KeyValueStore, StoreError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SyncSettings;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistencePolicy {
    pub key: String,
    pub debounce: Duration,
    pub max_snapshot_bytes: usize,
    pub max_snapshot_items: usize,
    pub trim_to_items: usize,
    pub quota_retry_items: usize,
    pub low_value_keys: Vec<String>,
}

impl From<&SyncSettings> for PersistencePolicy {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            key: settings.snapshot_key.clone(),
            debounce: settings.persist_debounce(),
            max_snapshot_bytes: settings.max_snapshot_bytes,
            max_snapshot_items: settings.max_snapshot_items,
            trim_to_items: settings.trim_to_items,
            quota_retry_items: settings.quota_retry_items.min(settings.trim_to_items),
            low_value_keys: settings.low_value_keys.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Written { items: usize },
    Trimmed { kept: usize, dropped: usize },
    Skipped { reason: String },
}

#[derive(Debug, Deserialize)]
struct PersistedCart {
    version: u32,
    saved_at: DateTime<Utc>,
    items: Vec<PersistedItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedItem {
    id: ItemId,
    product_id: ProductId,
    quantity: u32,
    selected: bool,
    unit_price: UnitPrice,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    discount: Option<LockDiscount>,
    added_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    variant: Option<String>,
    metadata: PersistedMetadata,
}

/// Metadata reduced to what is needed to show and re-sync the item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum PersistedMetadata {
    Product {
        name: String,
    },
    ServiceBooking {
        service_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scheduled_for: Option<DateTime<Utc>>,
    },
    EventBooking {
        event_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ticket_tier: Option<String>,
    },
}

impl From<&ItemMetadata> for PersistedMetadata {
    fn from(metadata: &ItemMetadata) -> Self {
        match metadata {
            ItemMetadata::Product(details) => Self::Product {
                name: details.name.clone(),
            },
            ItemMetadata::ServiceBooking(booking) => Self::ServiceBooking {
                service_id: booking.service_id.clone(),
                scheduled_for: booking.scheduled_for,
            },
            ItemMetadata::EventBooking(booking) => Self::EventBooking {
                event_id: booking.event_id.clone(),
                ticket_tier: booking.ticket_tier.clone(),
            },
        }
    }
}

impl From<PersistedMetadata> for ItemMetadata {
    fn from(metadata: PersistedMetadata) -> Self {
        match metadata {
            PersistedMetadata::Product { name } => ItemMetadata::Product(ProductDetails {
                name,
                ..ProductDetails::default()
            }),
            PersistedMetadata::ServiceBooking {
                service_id,
                scheduled_for,
            } => ItemMetadata::ServiceBooking(ServiceBooking {
                service_id,
                provider_id: None,
                scheduled_for,
                duration_minutes: None,
                notes: None,
            }),
            PersistedMetadata::EventBooking {
                event_id,
                ticket_tier,
            } => ItemMetadata::EventBooking(EventBooking {
                event_id,
                ticket_tier,
                starts_at: None,
                attendees: Vec::new(),
            }),
        }
    }
}

impl From<&CartItem> for PersistedItem {
    fn from(item: &CartItem) -> Self {
        Self {
            id: item.id.clone(),
            product_id: item.product_id.clone(),
            quantity: item.quantity,
            selected: item.selected,
            unit_price: item.unit_price,
            discount: item.discount,
            added_at: item.added_at,
            updated_at: item.updated_at,
            variant: item.variant.clone(),
            metadata: PersistedMetadata::from(&item.metadata),
        }
    }
}

impl PersistedItem {
    fn is_valid(&self) -> bool {
        !self.id.as_str().is_empty()
            && !self.product_id.as_str().is_empty()
            && self.quantity >= 1
            && self.unit_price.original >= Decimal::ZERO
            && self.unit_price.discounted >= Decimal::ZERO
    }

    fn into_item(self) -> CartItem {
        CartItem {
            id: self.id,
            product_id: self.product_id,
            quantity: self.quantity,
            selected: self.selected,
            unit_price: self.unit_price,
            discount: self.discount,
            added_at: self.added_at,
            updated_at: self.updated_at,
            metadata: self.metadata.into(),
            variant: self.variant,
        }
    }
}

pub struct PersistenceLayer {
    store: Arc<dyn KeyValueStore>,
    policy: PersistencePolicy,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl PersistenceLayer {
    pub fn new(store: Arc<dyn KeyValueStore>, policy: PersistencePolicy) -> Arc<Self> {
        Arc::new(Self {
            store,
            policy,
            pending: Mutex::new(None),
        })
    }

    pub fn policy(&self) -> &PersistencePolicy {
        &self.policy
    }

    /// Trailing debounce: cancels any pending write and schedules a new one
    /// after the quiet window.
    pub fn schedule(self: &Arc<Self>, items: Vec<CartItem>) {
        let layer = Arc::clone(self);
        let debounce = self.policy.debounce;
        let mut pending = self.pending.lock();
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let outcome = layer.save(&items).await;
            debug!("persist: debounced snapshot {outcome:?}");
        }));
    }

    pub fn has_pending_write(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn cancel_pending(&self) {
        if let Some(handle) = self.pending.lock().take() {
            handle.abort();
        }
    }

    /// Writes immediately, superseding any scheduled write.
    pub async fn flush(&self, items: &[CartItem]) -> SaveOutcome {
        self.cancel_pending();
        self.save(items).await
    }

    pub async fn save(&self, items: &[CartItem]) -> SaveOutcome {
        let mut selected: Vec<PersistedItem> = items.iter().map(PersistedItem::from).collect();
        let total = selected.len();

        let mut bytes = match encode(&selected) {
            Ok(bytes) => bytes,
            Err(err) => return skipped(err),
        };
        if bytes.len() > self.policy.max_snapshot_bytes
            || selected.len() > self.policy.max_snapshot_items
        {
            info!(
                "persist: snapshot of {} items ({} bytes) over budget, keeping {} most recent",
                selected.len(),
                bytes.len(),
                self.policy.trim_to_items
            );
            selected = most_recent(selected, self.policy.trim_to_items);
            bytes = match encode(&selected) {
                Ok(bytes) => bytes,
                Err(err) => return skipped(err),
            };
        }

        match self.store.set(&self.policy.key, &bytes).await {
            Ok(()) => return outcome(total, selected.len()),
            Err(StoreError::QuotaExceeded {
                requested,
                available,
                ..
            }) => {
                warn!(
                    "persist: quota exceeded ({requested} bytes requested, {available} available), cleaning up"
                );
            }
            Err(err) => return skipped(err),
        }

        self.cleanup_low_value_keys().await;
        let retry_len = self.policy.quota_retry_items.min(selected.len());
        let retry = most_recent(selected, retry_len);
        let bytes = match encode(&retry) {
            Ok(bytes) => bytes,
            Err(err) => return skipped(err),
        };
        match self.store.set(&self.policy.key, &bytes).await {
            Ok(()) => outcome(total, retry.len()),
            Err(err) => skipped(err),
        }
    }

    /// The last snapshot, or an empty list. Invalid entries are dropped.
    pub async fn load(&self) -> Vec<CartItem> {
        let bytes = match self.store.get(&self.policy.key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Vec::new(),
            Err(err) => {
                warn!("persist: failed to read snapshot: {err}");
                return Vec::new();
            }
        };

        let snapshot: PersistedCart = match serde_json::from_slice(&bytes) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!("persist: discarding unreadable snapshot: {err}");
                return Vec::new();
            }
        };
        if snapshot.version != SNAPSHOT_VERSION {
            warn!(
                "persist: discarding snapshot with unsupported version {}",
                snapshot.version
            );
            return Vec::new();
        }
        debug!(
            "persist: restoring {} items saved at {}",
            snapshot.items.len(),
            snapshot.saved_at
        );

        let mut seen = HashSet::new();
        snapshot
            .items
            .into_iter()
            .filter(|item| item.is_valid() && seen.insert(item.id.clone()))
            .map(PersistedItem::into_item)
            .collect()
    }

    async fn cleanup_low_value_keys(&self) {
        for key in &self.policy.low_value_keys {
            if let Err(err) = self.store.remove(key).await {
                debug!("persist: failed to drop low-value key {key}: {err}");
            }
        }
    }
}

fn encode(items: &[PersistedItem]) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&PersistedCartRef {
        version: SNAPSHOT_VERSION,
        saved_at: Utc::now(),
        items,
    })
}

#[derive(Serialize)]
struct PersistedCartRef<'a> {
    version: u32,
    saved_at: DateTime<Utc>,
    items: &'a [PersistedItem],
}

fn skipped(err: impl std::fmt::Display) -> SaveOutcome {
    warn!("persist: skipping snapshot: {err}");
    SaveOutcome::Skipped {
        reason: err.to_string(),
    }
}

fn outcome(total: usize, kept: usize) -> SaveOutcome {
    if kept < total {
        SaveOutcome::Trimmed {
            kept,
            dropped: total - kept,
        }
    } else {
        SaveOutcome::Written { items: kept }
    }
}

/// Keeps the `limit` most recently touched items in their original order.
fn most_recent(items: Vec<PersistedItem>, limit: usize) -> Vec<PersistedItem> {
    if items.len() <= limit {
        return items;
    }
    let mut ranked: Vec<(usize, DateTime<Utc>)> = items
        .iter()
        .enumerate()
        .map(|(index, item)| (index, item.updated_at))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(b.0.cmp(&a.0)));
    let keep: HashSet<usize> = ranked.into_iter().take(limit).map(|(index, _)| index).collect();

    items
        .into_iter()
        .enumerate()
        .filter(|(index, _)| keep.contains(index))
        .map(|(_, item)| item)
        .collect()
}

#[cfg(test)]
#[path = "tests/persistence_tests.rs"]
mod tests;
