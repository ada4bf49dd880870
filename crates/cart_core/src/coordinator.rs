//! `CartSyncService`: optimistic apply, remote call, reconciliation.
//!
//! Each operation applies its reducer transition synchronously before its
//! first `.await`, so readers of [`CartSyncService::state`] observe the new
//! totals immediately. The state lock is never held across an `.await`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use shared::{
    domain::{CartItem, CartState, ItemId, RemoteIdentity},
    error::CartError,
    protocol::{CartMutation, RemoteCart},
};
use storage::KeyValueStore;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    config::SyncSettings,
    gateway::{
        create_item, AuthProvider, GatewayError, MissingRemoteCartGateway, RemoteCartGateway,
        StaticAuth,
    },
    network::{ConnectivityObserver, ConnectivitySource, NetworkMonitor},
    offline_queue::{DrainReport, OfflineQueue},
    persistence::{PersistenceLayer, PersistencePolicy, SaveOutcome},
    reducer::{CartAction, CartStateMachine, Transition},
};

#[derive(Debug, Clone, PartialEq)]
pub enum CartEvent {
    StateChanged(CartState),
}

/// How a cart operation ended. Operations never return errors; a failure is
/// also recorded in `CartState::error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The remote call succeeded and local state was replaced by the server cart.
    Reconciled,
    /// Offline: the mutation waits in the offline queue.
    Queued,
    /// Applied locally with no remote counterpart.
    Local,
    /// Refused before any I/O. State is unchanged apart from its error.
    Rejected(CartError),
    /// The remote side failed. Local state was reloaded where possible.
    Degraded(CartError),
}

impl MutationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Reconciled | Self::Queued | Self::Local)
    }
}

/// Which remote call an online mutation maps to.
enum RemoteCall {
    Create(RemoteIdentity),
    Mutate(CartMutation),
}

pub struct CartSyncService {
    gateway: Arc<dyn RemoteCartGateway>,
    auth: Arc<dyn AuthProvider>,
    persistence: Arc<PersistenceLayer>,
    queue: Arc<OfflineQueue>,
    machine: CartStateMachine,
    state: RwLock<CartState>,
    events: broadcast::Sender<CartEvent>,
    monitor: Mutex<Option<NetworkMonitor>>,
}

impl CartSyncService {
    pub fn new(store: Arc<dyn KeyValueStore>, settings: &SyncSettings) -> Arc<Self> {
        Self::new_with_dependencies(
            Arc::new(MissingRemoteCartGateway),
            Arc::new(StaticAuth::anonymous()),
            store,
            settings,
        )
    }

    pub fn new_with_dependencies(
        gateway: Arc<dyn RemoteCartGateway>,
        auth: Arc<dyn AuthProvider>,
        store: Arc<dyn KeyValueStore>,
        settings: &SyncSettings,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            gateway,
            auth,
            persistence: PersistenceLayer::new(
                Arc::clone(&store),
                PersistencePolicy::from(settings),
            ),
            queue: OfflineQueue::new(
                store,
                settings.queue_key.clone(),
                settings.max_queue_attempts,
            ),
            machine: CartStateMachine::new(settings.max_quantity_per_item),
            state: RwLock::new(CartState::default()),
            events,
            monitor: Mutex::new(None),
        })
    }

    pub fn state(&self) -> CartState {
        self.state.read().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CartEvent> {
        self.events.subscribe()
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    pub fn persistence(&self) -> &Arc<PersistenceLayer> {
        &self.persistence
    }

    /// Restores the offline queue and starts following connectivity. The
    /// initial connectivity is applied before this returns.
    pub async fn start(self: &Arc<Self>, connectivity: Arc<dyn ConnectivitySource>) {
        let restored = self.queue.restore().await;
        self.dispatch(CartAction::SetPendingSync(restored));

        let observer: Arc<dyn ConnectivityObserver> = Arc::clone(self) as _;
        let monitor = NetworkMonitor::start(connectivity, Arc::downgrade(&observer)).await;
        if let Some(previous) = self.monitor.lock().replace(monitor) {
            previous.stop();
        }
    }

    /// Writes the current items now instead of waiting for the debounce.
    pub async fn flush(&self) -> SaveOutcome {
        let items = self.state.read().items.clone();
        self.persistence.flush(&items).await
    }

    pub fn shutdown(&self) {
        if let Some(monitor) = self.monitor.lock().take() {
            monitor.stop();
        }
        self.persistence.cancel_pending();
        debug!("cart: service shut down");
    }

    pub async fn load(&self) -> MutationOutcome {
        if !self.is_authenticated() {
            debug!("cart: not authenticated, restoring local snapshot only");
            return self.restore_snapshot().await;
        }
        if !self.state.read().is_online {
            return self.restore_snapshot().await;
        }

        self.dispatch(CartAction::BeginLoad);
        match self.gateway.get_cart().await {
            Ok(remote) => {
                self.apply_remote(remote);
                MutationOutcome::Reconciled
            }
            Err(err) => {
                warn!("cart: load failed, falling back to snapshot: {err}");
                let error = CartError::from(err);
                let items = self.persistence.load().await;
                let coupon_code = self.state.read().coupon_code.clone();
                self.dispatch(CartAction::Load { items, coupon_code });
                self.dispatch(CartAction::Fail(error.clone()));
                MutationOutcome::Degraded(error)
            }
        }
    }

    pub async fn add(&self, item: CartItem) -> MutationOutcome {
        let identity = match item.remote_identity() {
            Ok(identity) => identity,
            Err(err) => return self.reject(err),
        };
        let id = item.id.clone();
        let transition = self.dispatch(CartAction::Add(item));
        if let Some(err) = transition.rejection {
            return MutationOutcome::Rejected(err);
        }
        self.schedule_persist(&transition.state);

        let quantity = transition
            .state
            .item(&id)
            .map(|item| item.quantity)
            .unwrap_or(1);
        if !transition.state.is_online {
            return self
                .enqueue(CartMutation::AddItem {
                    product_id: identity.product_id,
                    variant: identity.variant,
                    quantity,
                })
                .await;
        }

        let call = if quantity == 1 {
            RemoteCall::Create(identity)
        } else {
            RemoteCall::Mutate(CartMutation::UpdateQuantity {
                product_id: identity.product_id,
                variant: identity.variant,
                quantity,
            })
        };
        self.send(call).await
    }

    pub async fn remove(&self, id: &ItemId) -> MutationOutcome {
        let identity = match self.resolve(id) {
            Ok(identity) => identity,
            Err(err) => return self.reject(err),
        };
        let transition = self.dispatch(CartAction::Remove(id.clone()));
        self.schedule_persist(&transition.state);

        self.sync(
            transition.state.is_online,
            CartMutation::RemoveItem {
                product_id: identity.product_id,
                variant: identity.variant,
            },
        )
        .await
    }

    /// Sets an absolute quantity. Zero or below removes the item.
    pub async fn update_quantity(&self, id: &ItemId, quantity: i64) -> MutationOutcome {
        let identity = match self.resolve(id) {
            Ok(identity) => identity,
            Err(err) => return self.reject(err),
        };
        let transition = self.dispatch(CartAction::UpdateQuantity {
            id: id.clone(),
            quantity,
        });
        if let Some(err) = transition.rejection {
            return MutationOutcome::Rejected(err);
        }
        self.schedule_persist(&transition.state);

        let mutation = match transition.state.item(id) {
            Some(item) => CartMutation::UpdateQuantity {
                product_id: identity.product_id,
                variant: identity.variant,
                quantity: item.quantity,
            },
            None => CartMutation::RemoveItem {
                product_id: identity.product_id,
                variant: identity.variant,
            },
        };
        self.sync(transition.state.is_online, mutation).await
    }

    pub async fn clear(&self) -> MutationOutcome {
        let transition = self.dispatch(CartAction::Clear);
        self.schedule_persist(&transition.state);
        self.sync(transition.state.is_online, CartMutation::Clear)
            .await
    }

    pub async fn apply_coupon(&self, code: &str) -> MutationOutcome {
        let code = code.trim();
        if code.is_empty() {
            return self.reject(CartError::validation("coupon code is empty"));
        }
        let online = self.state.read().is_online;
        self.sync(
            online,
            CartMutation::ApplyCoupon {
                code: code.to_string(),
            },
        )
        .await
    }

    pub async fn remove_coupon(&self) -> MutationOutcome {
        let online = self.state.read().is_online;
        self.sync(online, CartMutation::RemoveCoupon).await
    }

    pub fn toggle_select(&self, id: &ItemId) -> MutationOutcome {
        self.local(CartAction::ToggleSelect(id.clone()))
    }

    pub fn select_all(&self, selected: bool) -> MutationOutcome {
        self.local(CartAction::SelectAll(selected))
    }

    pub fn clear_error(&self) {
        self.dispatch(CartAction::ClearError);
    }

    /// Drains the offline queue and reconciles when anything was replayed.
    pub async fn sync_pending(&self) -> DrainReport {
        if !self.queue.has_pending_operations().await {
            return DrainReport::default();
        }
        let report = self.queue.process_queue(self.gateway.as_ref()).await;
        let remaining = self.queue.len().await;
        self.dispatch(CartAction::SetPendingSync(remaining));
        if report.succeeded > 0 || report.dropped > 0 {
            self.reconcile().await;
        }
        report
    }

    fn is_authenticated(&self) -> bool {
        self.auth.is_authenticated() && self.auth.bearer_token().is_some()
    }

    fn dispatch(&self, action: CartAction) -> Transition {
        let transition = {
            let mut state = self.state.write();
            let transition = self.machine.reduce(&state, action);
            *state = transition.state.clone();
            transition
        };
        let _ = self
            .events
            .send(CartEvent::StateChanged(transition.state.clone()));
        transition
    }

    fn reject(&self, err: CartError) -> MutationOutcome {
        debug!("cart: rejected before apply: {err}");
        self.dispatch(CartAction::Fail(err.clone()));
        MutationOutcome::Rejected(err)
    }

    fn local(&self, action: CartAction) -> MutationOutcome {
        let transition = self.dispatch(action);
        if let Some(err) = transition.rejection {
            return MutationOutcome::Rejected(err);
        }
        self.schedule_persist(&transition.state);
        MutationOutcome::Local
    }

    /// Remote identity of an item in the cart, or of the bare id otherwise.
    fn resolve(&self, id: &ItemId) -> Result<RemoteIdentity, CartError> {
        match self.state.read().item(id) {
            Some(item) => item.remote_identity(),
            None => id.remote_identity(),
        }
    }

    fn schedule_persist(&self, state: &CartState) {
        self.persistence.schedule(state.items.clone());
    }

    async fn sync(&self, online: bool, mutation: CartMutation) -> MutationOutcome {
        if online {
            self.send(RemoteCall::Mutate(mutation)).await
        } else {
            self.enqueue(mutation).await
        }
    }

    async fn enqueue(&self, mutation: CartMutation) -> MutationOutcome {
        let op = mutation.op_type();
        let stored = self.queue.enqueue(mutation).await;
        let pending = self.queue.len().await;
        self.dispatch(CartAction::SetPendingSync(pending));
        match stored {
            Ok(()) => {
                debug!("cart: queued {op} while offline, pending={pending}");
                MutationOutcome::Queued
            }
            Err(err) if err.is_quota_exceeded() => {
                warn!("cart: queued {op} kept in memory only: {err}");
                let error = CartError::storage_quota(err.to_string());
                self.dispatch(CartAction::Fail(error));
                MutationOutcome::Queued
            }
            Err(err) => {
                warn!("cart: queued {op} kept in memory only: {err}");
                MutationOutcome::Queued
            }
        }
    }

    async fn send(&self, call: RemoteCall) -> MutationOutcome {
        let gateway = self.gateway.as_ref();
        let result = match &call {
            RemoteCall::Create(identity) => {
                create_item(
                    gateway,
                    &identity.product_id,
                    1,
                    identity.variant.as_deref(),
                )
                .await
            }
            RemoteCall::Mutate(mutation) => send_mutation(gateway, mutation).await,
        };

        match result {
            Ok(()) => self.reconcile().await,
            Err(err) => {
                warn!("cart: remote call failed, reloading from server: {err}");
                let error = CartError::from(err);
                match self.gateway.get_cart().await {
                    Ok(remote) => self.apply_remote(remote),
                    Err(reload) => debug!("cart: reload after failure also failed: {reload}"),
                }
                self.dispatch(CartAction::Fail(error.clone()));
                MutationOutcome::Degraded(error)
            }
        }
    }

    async fn reconcile(&self) -> MutationOutcome {
        match self.gateway.get_cart().await {
            Ok(remote) => {
                self.apply_remote(remote);
                MutationOutcome::Reconciled
            }
            Err(err) => {
                warn!("cart: reconciliation fetch failed: {err}");
                let error = CartError::from(err);
                self.dispatch(CartAction::Fail(error.clone()));
                MutationOutcome::Degraded(error)
            }
        }
    }

    /// Replaces local items with the server cart, keeping local selection and
    /// first-added time for lines that survive.
    fn apply_remote(&self, remote: RemoteCart) {
        let items = {
            let current = self.state.read();
            let now = Utc::now();
            remote
                .items
                .into_iter()
                .map(|line| {
                    let id = ItemId::compose(&line.product_id, line.variant.as_deref());
                    let local = current.item(&id);
                    CartItem {
                        selected: local.map_or(true, |item| item.selected),
                        added_at: local.map_or(now, |item| item.added_at),
                        updated_at: local
                            .filter(|item| item.quantity == line.quantity)
                            .map_or(now, |item| item.updated_at),
                        id,
                        product_id: line.product_id,
                        quantity: line.quantity,
                        unit_price: line.unit_price,
                        discount: line.discount,
                        metadata: line.metadata,
                        variant: line.variant,
                    }
                })
                .collect::<Vec<_>>()
        };
        let transition = self.dispatch(CartAction::Load {
            items,
            coupon_code: remote.coupon_code,
        });
        self.schedule_persist(&transition.state);
    }

    async fn restore_snapshot(&self) -> MutationOutcome {
        let items = self.persistence.load().await;
        info!("cart: restored {} items from local snapshot", items.len());
        let coupon_code = self.state.read().coupon_code.clone();
        self.dispatch(CartAction::Load { items, coupon_code });
        MutationOutcome::Local
    }
}

async fn send_mutation(
    gateway: &dyn RemoteCartGateway,
    mutation: &CartMutation,
) -> Result<(), GatewayError> {
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
        } => gateway
            .update_cart_item(product_id, *quantity, variant.as_deref())
            .await
            .map(|_| ()),
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

#[async_trait]
impl ConnectivityObserver for CartSyncService {
    async fn connectivity_changed(&self, online: bool) {
        let was_online = self.state.read().is_online;
        if was_online != online {
            self.dispatch(CartAction::SetOnline(online));
        }
        if !online {
            return;
        }

        let pending = self.queue.has_pending_operations().await;
        if was_online && !pending {
            return;
        }
        if pending {
            let report = self.sync_pending().await;
            if report.succeeded > 0 || report.dropped > 0 {
                return;
            }
        }
        if self.is_authenticated() {
            self.reconcile().await;
        }
    }
}

#[cfg(test)]
#[path = "tests/coordinator_tests.rs"]
mod tests;
