use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};

use async_trait::async_trait;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

/// Platform connectivity signal.
#[async_trait]
pub trait ConnectivitySource: Send + Sync {
    async fn is_online(&self) -> bool;
    /// Receives `true`/`false` on every reported transition.
    fn subscribe(&self) -> broadcast::Receiver<bool>;
}

/// Receives de-duplicated connectivity changes from a [`NetworkMonitor`].
#[async_trait]
pub trait ConnectivityObserver: Send + Sync {
    async fn connectivity_changed(&self, online: bool);
}

/// Connectivity toggled by hand, for the CLI and tests.
pub struct ManualConnectivity {
    online: AtomicBool,
    events: broadcast::Sender<bool>,
}

impl ManualConnectivity {
    pub fn new(online: bool) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            online: AtomicBool::new(online),
            events,
        })
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        let _ = self.events.send(online);
    }
}

#[async_trait]
impl ConnectivitySource for ManualConnectivity {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<bool> {
        self.events.subscribe()
    }
}

/// Follows connectivity transitions until stopped or the observer is gone.
pub struct NetworkMonitor {
    task: JoinHandle<()>,
}

impl NetworkMonitor {
    /// Delivers the initial connectivity before returning, then follows
    /// transitions on a background task.
    pub async fn start(
        source: Arc<dyn ConnectivitySource>,
        observer: Weak<dyn ConnectivityObserver>,
    ) -> Self {
        let mut transitions = source.subscribe();
        let mut last = source.is_online().await;
        info!("network: initial connectivity online={last}");
        notify(&observer, last).await;

        let task = tokio::spawn(async move {
            loop {
                let online = match transitions.recv().await {
                    Ok(online) => online,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("network: missed {skipped} connectivity signals, polling");
                        source.is_online().await
                    }
                    Err(RecvError::Closed) => break,
                };
                if online == last {
                    debug!("network: ignoring repeated online={online}");
                    continue;
                }
                last = online;
                info!("network: connectivity changed online={online}");
                if !notify(&observer, online).await {
                    break;
                }
            }
            debug!("network: monitor exiting");
        });
        Self { task }
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn notify(observer: &Weak<dyn ConnectivityObserver>, online: bool) -> bool {
    match observer.upgrade() {
        Some(observer) => {
            observer.connectivity_changed(online).await;
            true
        }
        None => false,
    }
}

#[cfg(test)]
#[path = "tests/network_tests.rs"]
mod tests;
