//! Registration manager: owns the set of locally advertised services.
//!
//! Two maps with distinct roles: the listener map (key -> advertise handle)
//! is the sole source of truth for what is outstanding and drives
//! unregister; the active map mirrors asynchronous registration outcomes
//! and exists for introspection only, since registration completion may
//! race with a subsequent unregister.

use async_channel::Receiver;
use dashmap::DashMap;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use zconf_core::error::{Result, ZconfError};
use zconf_core::record::{normalize_txt, registration_key, ServiceRecord};

use crate::backend::{AdvertiseHandle, AdvertiseUpdate, BackendError, NsdBackend};

pub struct RegistrationManager {
    backend: Arc<dyn NsdBackend>,
    /// Sole source of truth for outstanding registrations
    listeners: DashMap<String, AdvertiseHandle>,
    /// Registrations confirmed by the backend; introspection only
    active: Arc<DashMap<String, ServiceRecord>>,
    tasks: DashMap<String, JoinHandle<()>>,
    addresses: Vec<IpAddr>,
    hostname: Option<String>,
}

impl RegistrationManager {
    pub fn new(
        backend: Arc<dyn NsdBackend>,
        addresses: Vec<IpAddr>,
        hostname: Option<String>,
    ) -> Self {
        Self {
            backend,
            listeners: DashMap::new(),
            active: Arc::new(DashMap::new()),
            tasks: DashMap::new(),
            addresses,
            hostname,
        }
    }

    /// Requests advertisement of a service and returns the constructed
    /// record immediately.
    ///
    /// Completion is asynchronous; the returned record does not reflect
    /// platform-assigned values such as a disambiguated name. A duplicate
    /// (type, domain, name) silently replaces the bookkeeping of the
    /// earlier registration.
    pub async fn register(
        &self,
        service_type: &str,
        domain: &str,
        name: &str,
        port: u16,
        attributes: HashMap<String, Option<String>>,
    ) -> Result<ServiceRecord> {
        let key = registration_key(service_type, domain, name);

        let mut record = ServiceRecord::new(service_type, domain, name, port);
        record.txt = normalize_txt(attributes);
        record.hostname = self.hostname.clone();
        record.addresses = self.addresses.clone();

        let (handle, updates) = self.backend.start_advertise(&record).map_err(|e| match e {
            BackendError::PermissionDenied(reason) => ZconfError::Permission { reason },
            other => ZconfError::Registration {
                service: key.clone(),
                reason: other.to_string(),
            },
        })?;

        if self.listeners.insert(key.clone(), handle).is_some() {
            debug!(key, "duplicate registration, replacing bookkeeping");
        }
        let task = self.spawn_drain(key.clone(), updates);
        if let Some(superseded) = self.tasks.insert(key.clone(), task) {
            superseded.abort();
        }

        info!(key, port, "advertise requested");
        Ok(record)
    }

    fn spawn_drain(&self, key: String, updates: Receiver<AdvertiseUpdate>) -> JoinHandle<()> {
        let active = self.active.clone();
        tokio::spawn(async move {
            while let Ok(update) = updates.recv().await {
                match update {
                    AdvertiseUpdate::Registered(record) => {
                        info!(key, name = record.name, "service registered");
                        active.insert(key.clone(), record);
                    }
                    AdvertiseUpdate::RegistrationFailed(reason) => {
                        error!(key, reason, "service registration failed");
                    }
                    AdvertiseUpdate::Unregistered => {
                        info!(key, "service unregistered");
                        active.remove(&key);
                    }
                    AdvertiseUpdate::UnregistrationFailed(reason) => {
                        error!(key, reason, "service unregistration failed");
                    }
                }
            }
        })
    }

    /// Withdraws one registration. No-op when the key is unknown.
    pub fn unregister(&self, service_type: &str, domain: &str, name: &str) {
        let key = registration_key(service_type, domain, name);
        let Some((_, handle)) = self.listeners.remove(&key) else {
            debug!(key, "unregister for unknown key, ignoring");
            return;
        };

        if let Err(e) = self.backend.stop_advertise(handle) {
            warn!(key, error = %e, "failed to cancel registration");
        }
        // The drain task ends when the backend closes the update channel.
        self.tasks.remove(&key);
        info!(key, "unregister requested");
    }

    /// Withdraws every outstanding registration and clears all state.
    /// Individual cancellation failures are logged and skipped.
    pub fn stop(&self) {
        let keys: Vec<String> = self.listeners.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, handle)) = self.listeners.remove(&key) {
                if let Err(e) = self.backend.stop_advertise(handle) {
                    warn!(key, error = %e, "failed to cancel registration during stop");
                }
            }
        }

        for entry in self.tasks.iter() {
            entry.value().abort();
        }
        self.tasks.clear();
        self.active.clear();

        info!("registration manager stopped");
    }

    /// Number of outstanding registrations.
    pub fn registered_count(&self) -> usize {
        self.listeners.len()
    }

    /// Registrations the backend has confirmed so far.
    pub fn active_services(&self) -> Vec<ServiceRecord> {
        self.active.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn addresses(&self) -> &[IpAddr] {
        &self.addresses
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;

    fn manager(backend: &MemoryBackend) -> RegistrationManager {
        RegistrationManager::new(Arc::new(backend.clone()), Vec::new(), Some("host".to_string()))
    }

    #[tokio::test]
    async fn test_register_returns_record_immediately() {
        let backend = MemoryBackend::new();
        let manager = manager(&backend);

        let mut attributes = HashMap::new();
        attributes.insert("model".to_string(), Some("X1".to_string()));
        attributes.insert("absent".to_string(), None);

        let record = manager
            .register("_http._tcp.", "local.", "printer", 631, attributes)
            .await
            .unwrap();

        assert_eq!(record.name, "printer");
        assert_eq!(record.port, 631);
        assert_eq!(record.hostname.as_deref(), Some("host"));
        assert_eq!(record.txt.len(), 1);
        assert_eq!(manager.registered_count(), 1);
    }

    #[tokio::test]
    async fn test_unregister_unknown_key_is_noop() {
        let backend = MemoryBackend::new();
        let manager = manager(&backend);

        manager.unregister("_http._tcp.", "local.", "ghost");
        assert_eq!(manager.registered_count(), 0);
        assert_eq!(backend.advertise_stops(), 0);
    }

    #[tokio::test]
    async fn test_permission_denied_surfaces() {
        let backend = MemoryBackend::new();
        backend.fail_next_advertise(BackendError::PermissionDenied("multicast denied".into()));
        let manager = manager(&backend);

        let result = manager
            .register("_http._tcp.", "local.", "printer", 631, HashMap::new())
            .await;
        assert!(matches!(result, Err(ZconfError::Permission { .. })));
        assert_eq!(manager.registered_count(), 0);
    }

    #[tokio::test]
    async fn test_active_map_tracks_confirmations() {
        let backend = MemoryBackend::new();
        let manager = manager(&backend);

        manager
            .register("_http._tcp.", "local.", "printer", 631, HashMap::new())
            .await
            .unwrap();

        // The memory backend confirms synchronously; give the drain task a
        // moment to observe it.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(manager.active_services().len(), 1);
    }
}
