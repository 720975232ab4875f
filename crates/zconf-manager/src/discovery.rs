//! Discovery manager: owns the set of active browse sessions.
//!
//! Each watch starts one backend browse session and one drain task. The
//! drain task normalizes raw sightings into Added/Removed/Resolved events
//! and routes them through the dispatcher, resolving found services inline
//! so a single instance's events keep their order: Added before Resolved
//! before any later Removed.

use async_channel::Receiver;
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zconf_core::error::{Result, ZconfError};
use zconf_core::record::{subscription_key, ServiceRecord};

use crate::backend::{BrowseUpdate, NsdBackend, ResolveUpdate};
use crate::dispatch::{DiscoveryEvent, EventAction, EventDispatcher, Subscription};
use crate::net::MulticastLock;

pub struct DiscoveryManager {
    backend: Arc<dyn NsdBackend>,
    subscriptions: Arc<DashMap<String, Subscription>>,
    tasks: DashMap<String, JoinHandle<()>>,
    dispatcher: EventDispatcher,
    multicast: Arc<MulticastLock>,
    addresses: Vec<IpAddr>,
    event_capacity: usize,
}

impl DiscoveryManager {
    pub fn new(
        backend: Arc<dyn NsdBackend>,
        multicast: Arc<MulticastLock>,
        addresses: Vec<IpAddr>,
        event_capacity: usize,
    ) -> Self {
        let subscriptions = Arc::new(DashMap::new());
        Self {
            backend,
            dispatcher: EventDispatcher::new(subscriptions.clone()),
            subscriptions,
            tasks: DashMap::new(),
            multicast,
            addresses,
            event_capacity,
        }
    }

    /// Starts watching a service type and returns the subscriber's event
    /// stream.
    ///
    /// The first watch while the multicast gate is released acquires it;
    /// only [`DiscoveryManager::close`] releases it again. A start failure
    /// leaves no subscription behind and is not retried; the caller
    /// re-issues the watch.
    pub async fn watch(
        &self,
        service_type: &str,
        domain: &str,
    ) -> Result<Receiver<DiscoveryEvent>> {
        let key = subscription_key(service_type, domain);

        if self.multicast.acquire() {
            debug!("multicast reception enabled");
        }

        let (browse, updates) =
            self.backend
                .start_browse(service_type)
                .map_err(|e| ZconfError::DiscoveryStart {
                    service_type: service_type.to_string(),
                    reason: e.to_string(),
                })?;

        let (tx, rx) = async_channel::bounded(self.event_capacity);

        // The subscription must be routable before the drain task runs:
        // sightings the backend replays immediately would otherwise find
        // no destination and be dropped.
        if self
            .subscriptions
            .insert(key.clone(), Subscription { sender: tx, browse })
            .is_some()
        {
            debug!(key, "duplicate watch, replacing bookkeeping");
        }
        let task = self.spawn_drain(updates);
        if let Some(superseded) = self.tasks.insert(key.clone(), task) {
            superseded.abort();
        }

        info!(key, "watch started");
        Ok(rx)
    }

    fn spawn_drain(&self, updates: Receiver<BrowseUpdate>) -> JoinHandle<()> {
        let backend = self.backend.clone();
        let dispatcher = self.dispatcher.clone();

        tokio::spawn(async move {
            while let Ok(update) = updates.recv().await {
                match update {
                    BrowseUpdate::Found(record) => {
                        resolve_and_dispatch(&backend, &dispatcher, record).await;
                    }
                    BrowseUpdate::Lost(record) => {
                        dispatcher.dispatch(EventAction::Removed, record).await;
                    }
                }
            }
            debug!("browse session drained");
        })
    }

    /// Stops watching one service type. The multicast gate stays held; only
    /// `close` releases it. No-op when the key is unknown.
    pub fn unwatch(&self, service_type: &str, domain: &str) {
        let key = subscription_key(service_type, domain);
        let Some((_, subscription)) = self.subscriptions.remove(&key) else {
            debug!(key, "unwatch for unknown key, ignoring");
            return;
        };

        if let Err(e) = self.backend.stop_browse(subscription.browse) {
            warn!(key, error = %e, "failed to stop browse session");
        }
        if let Some((_, task)) = self.tasks.remove(&key) {
            task.abort();
        }
        info!(key, "watch stopped");
    }

    /// Releases the multicast gate exactly once, cancels every browse
    /// session tolerating individual failures, and clears all subscriptions.
    pub fn close(&self) {
        if self.multicast.release() {
            debug!("multicast reception disabled");
        }

        let keys: Vec<String> = self.subscriptions.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, subscription)) = self.subscriptions.remove(&key) {
                if let Err(e) = self.backend.stop_browse(subscription.browse) {
                    warn!(key, error = %e, "failed to stop browse session during close");
                }
            }
            if let Some((_, task)) = self.tasks.remove(&key) {
                task.abort();
            }
        }

        info!("discovery manager closed");
    }

    /// Number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn addresses(&self) -> &[IpAddr] {
        &self.addresses
    }
}

/// The resolution pipeline for one sighting. A failed resolve still emits
/// `Added` with the unresolved metadata; a partial result beats silence.
/// Success emits `Added` then `Resolved`, both with the full record, because
/// callers distinguish "exists" from "ready to use".
async fn resolve_and_dispatch(
    backend: &Arc<dyn NsdBackend>,
    dispatcher: &EventDispatcher,
    record: ServiceRecord,
) {
    match backend.start_resolve(&record) {
        Ok(results) => match results.recv().await {
            Ok(ResolveUpdate::Resolved(resolved)) => {
                dispatcher.dispatch(EventAction::Added, resolved.clone()).await;
                dispatcher.dispatch(EventAction::Resolved, resolved).await;
            }
            Ok(ResolveUpdate::Failed(reason)) => {
                warn!(
                    service = record.name,
                    reason, "resolve failed, reporting unresolved service"
                );
                dispatcher.dispatch(EventAction::Added, record).await;
            }
            Err(_) => {
                debug!(service = record.name, "resolve ended without a verdict");
            }
        },
        Err(e) => {
            warn!(
                service = record.name,
                error = %e,
                "resolve request rejected, reporting unresolved service"
            );
            dispatcher.dispatch(EventAction::Added, record).await;
        }
    }
}
