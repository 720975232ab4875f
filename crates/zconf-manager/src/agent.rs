//! Caller-facing facade tying the network context and the two managers
//! together.
//!
//! Managers are constructed lazily: the first register (or watch) after a
//! stop (or close) builds a fresh manager with the address set selected by
//! that call's family. Later calls reuse the live manager regardless of the
//! family they pass, and stop/close discard it entirely, so lifecycle
//! boundaries are hard: no manager survives its own teardown.

use async_channel::Receiver;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use zconf_core::config::{AddressFamily, ZconfConfig};
use zconf_core::error::{Result, ZconfError};
use zconf_core::record::ServiceRecord;

use crate::backend::NsdBackend;
use crate::discovery::DiscoveryManager;
use crate::dispatch::DiscoveryEvent;
use crate::net::{HostIdentity, NetworkContext, SystemHostIdentity};
use crate::registration::RegistrationManager;

pub struct Zconf {
    config: ZconfConfig,
    backend: Arc<dyn NsdBackend>,
    network: NetworkContext,
    registration: Mutex<Option<Arc<RegistrationManager>>>,
    discovery: Mutex<Option<Arc<DiscoveryManager>>>,
}

impl Zconf {
    /// Creates a facade using the system host identity.
    pub fn new(config: ZconfConfig, backend: Arc<dyn NsdBackend>) -> Result<Self> {
        Self::with_identity(config, backend, &SystemHostIdentity)
    }

    /// Creates a facade with an explicit host identity provider.
    pub fn with_identity(
        config: ZconfConfig,
        backend: Arc<dyn NsdBackend>,
        identity: &dyn HostIdentity,
    ) -> Result<Self> {
        let network = NetworkContext::new(identity);
        Self::with_network(config, backend, network)
    }

    /// Creates a facade around a prebuilt network context.
    pub fn with_network(
        config: ZconfConfig,
        backend: Arc<dyn NsdBackend>,
        network: NetworkContext,
    ) -> Result<Self> {
        config.validate().map_err(ZconfError::InvalidConfig)?;

        let network = match &config.hostname_override {
            Some(hostname) => network.with_hostname(hostname.clone()),
            None => network,
        };

        Ok(Self {
            config,
            backend,
            network,
            registration: Mutex::new(None),
            discovery: Mutex::new(None),
        })
    }

    /// The resolved local hostname.
    pub fn hostname(&self) -> Result<String> {
        self.network.hostname().map(str::to_string)
    }

    /// Registers a service; see [`RegistrationManager::register`].
    pub async fn register(
        &self,
        service_type: &str,
        domain: &str,
        name: &str,
        port: u16,
        attributes: HashMap<String, Option<String>>,
        family: AddressFamily,
    ) -> Result<ServiceRecord> {
        let manager = {
            let mut slot = self.registration.lock();
            slot.get_or_insert_with(|| {
                Arc::new(RegistrationManager::new(
                    self.backend.clone(),
                    self.network.addresses_for(family),
                    self.network.hostname().ok().map(str::to_string),
                ))
            })
            .clone()
        };

        manager
            .register(service_type, domain, name, port, attributes)
            .await
    }

    /// Withdraws a registration; no-op without an active manager.
    pub fn unregister(&self, service_type: &str, domain: &str, name: &str) {
        let manager = self.registration.lock().clone();
        if let Some(manager) = manager {
            manager.unregister(service_type, domain, name);
        }
    }

    /// Withdraws everything and discards the registration manager. The next
    /// register constructs a fresh one.
    pub fn stop(&self) {
        let manager = self.registration.lock().take();
        if let Some(manager) = manager {
            manager.stop();
        }
    }

    /// Starts watching a service type; see [`DiscoveryManager::watch`].
    pub async fn watch(
        &self,
        service_type: &str,
        domain: &str,
        family: AddressFamily,
    ) -> Result<Receiver<DiscoveryEvent>> {
        let manager = {
            let mut slot = self.discovery.lock();
            slot.get_or_insert_with(|| {
                Arc::new(DiscoveryManager::new(
                    self.backend.clone(),
                    self.network.multicast_lock(),
                    self.network.addresses_for(family),
                    self.config.event_channel_capacity,
                ))
            })
            .clone()
        };

        manager.watch(service_type, domain).await
    }

    /// Stops watching one service type; no-op without an active manager.
    pub fn unwatch(&self, service_type: &str, domain: &str) {
        let manager = self.discovery.lock().clone();
        if let Some(manager) = manager {
            manager.unwatch(service_type, domain);
        }
    }

    /// Tears down discovery and discards the manager. The next watch
    /// constructs a fresh one and re-acquires the multicast gate.
    pub fn close(&self) {
        let manager = self.discovery.lock().take();
        if let Some(manager) = manager {
            manager.close();
        }
    }

    pub fn network(&self) -> &NetworkContext {
        &self.network
    }

    /// The live registration manager, if one exists.
    pub fn registration_manager(&self) -> Option<Arc<RegistrationManager>> {
        self.registration.lock().clone()
    }

    /// The live discovery manager, if one exists.
    pub fn discovery_manager(&self) -> Option<Arc<DiscoveryManager>> {
        self.discovery.lock().clone()
    }
}
