//! Client-side cart synchronization: optimistic local mutations over an
//! authoritative remote cart, with a durable offline queue and size-bounded
//! local snapshots.

pub mod config;
pub mod coordinator;
pub mod gateway;
pub mod network;
pub mod offline_queue;
pub mod persistence;
pub mod reducer;

pub use config::{load_settings, load_settings_from, SyncSettings};
pub use coordinator::{CartEvent, CartSyncService, MutationOutcome};
pub use gateway::{
    AuthProvider, GatewayError, GatewayResult, HttpCartGateway, MissingRemoteCartGateway,
    RemoteCartGateway, StaticAuth,
};
pub use network::{ConnectivityObserver, ConnectivitySource, ManualConnectivity, NetworkMonitor};
pub use offline_queue::{DrainReport, OfflineQueue};
pub use persistence::{PersistenceLayer, PersistencePolicy, SaveOutcome};
pub use reducer::{CartAction, CartStateMachine, Transition};

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
