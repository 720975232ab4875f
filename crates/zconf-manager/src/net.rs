//! Network context: interface addresses, hostname, multicast gate.
//!
//! Everything here is computed once at initialization. The address sets are
//! not re-validated against later interface state; a context built on a
//! network that has since changed simply hands out stale sets and the
//! backend falls back to platform-default address selection.

use nix::net::if_::InterfaceFlags;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;
use zconf_core::config::AddressFamily;
use zconf_core::error::ZconfError;

/// Source of the local host's name.
///
/// Implementations report the platform value; the fallback identifier is
/// only consulted when that value is empty or the sentinel `"unknown"`.
pub trait HostIdentity: Send + Sync {
    /// Platform-reported hostname; `None` when it cannot be obtained at all.
    fn hostname(&self) -> Option<String>;

    /// Identifier used to derive a pseudo-hostname when the platform value
    /// is unusable.
    fn fallback_id(&self) -> String;
}

/// Host identity read from the operating system
pub struct SystemHostIdentity;

impl HostIdentity for SystemHostIdentity {
    fn hostname(&self) -> Option<String> {
        hostname::get().ok().map(|h| h.to_string_lossy().to_string())
    }

    fn fallback_id(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// Explicit multicast-reception gate.
///
/// Deliberately not a counting lock: `acquire` is a no-op while already
/// held and `release` is a no-op while not held, so the discovery manager
/// can acquire on first watch and release exactly once on close.
#[derive(Debug, Default)]
pub struct MulticastLock {
    active: AtomicBool,
}

impl MulticastLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if this call changed the gate from released to held.
    pub fn acquire(&self) -> bool {
        self.active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Returns true if this call changed the gate from held to released.
    pub fn release(&self) -> bool {
        self.active
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Addresses and hostname of the local host, captured once at startup
pub struct NetworkContext {
    addresses: Vec<IpAddr>,
    ipv4: Vec<IpAddr>,
    ipv6: Vec<IpAddr>,
    hostname: Option<String>,
    multicast: Arc<MulticastLock>,
}

impl NetworkContext {
    /// Enumerates interfaces and resolves the hostname. Enumeration failure
    /// is logged and leaves the address sets empty; registration and
    /// discovery still work with platform-default address selection.
    pub fn new(identity: &dyn HostIdentity) -> Self {
        let candidates = match enumerate_multicast_addresses() {
            Ok(addresses) => addresses,
            Err(e) => {
                error!(error = %e, "interface enumeration failed, continuing without addresses");
                Vec::new()
            }
        };

        Self::from_parts(candidates, resolve_hostname(identity))
    }

    /// Builds a context from an explicit candidate list. Loopback addresses
    /// are dropped; the rest are classified by family in the given order.
    pub fn from_parts(candidates: Vec<IpAddr>, hostname: Option<String>) -> Self {
        let addresses: Vec<IpAddr> = candidates
            .into_iter()
            .filter(|addr| !addr.is_loopback())
            .collect();
        let ipv4 = addresses.iter().filter(|a| a.is_ipv4()).copied().collect();
        let ipv6 = addresses.iter().filter(|a| a.is_ipv6()).copied().collect();

        debug!(count = addresses.len(), hostname = ?hostname, "network context initialized");

        Self {
            addresses,
            ipv4,
            ipv6,
            hostname,
            multicast: Arc::new(MulticastLock::new()),
        }
    }

    /// Replaces the resolved hostname, used for configuration overrides.
    pub fn with_hostname(mut self, hostname: String) -> Self {
        self.hostname = Some(hostname);
        self
    }

    /// The resolved hostname; fails when it could not be determined.
    pub fn hostname(&self) -> zconf_core::Result<&str> {
        self.hostname
            .as_deref()
            .ok_or(ZconfError::HostnameUnavailable)
    }

    /// The precomputed address set for a family selection.
    pub fn addresses_for(&self, family: AddressFamily) -> Vec<IpAddr> {
        match family {
            AddressFamily::Ipv4 => self.ipv4.clone(),
            AddressFamily::Ipv6 => self.ipv6.clone(),
            AddressFamily::Any => self.addresses.clone(),
        }
    }

    pub fn addresses(&self) -> &[IpAddr] {
        &self.addresses
    }

    pub fn ipv4_addresses(&self) -> &[IpAddr] {
        &self.ipv4
    }

    pub fn ipv6_addresses(&self) -> &[IpAddr] {
        &self.ipv6
    }

    pub fn multicast_lock(&self) -> Arc<MulticastLock> {
        self.multicast.clone()
    }
}

fn resolve_hostname(identity: &dyn HostIdentity) -> Option<String> {
    let reported = identity.hostname()?;
    if reported.is_empty() || reported == "unknown" {
        let fallback = format!("device-{}", identity.fallback_id());
        debug!(fallback, "platform hostname unusable, using fallback");
        Some(fallback)
    } else {
        Some(reported)
    }
}

/// Walks the interface list keeping addresses of multicast-capable,
/// non-loopback interfaces.
fn enumerate_multicast_addresses() -> anyhow::Result<Vec<IpAddr>> {
    let mut addresses = Vec::new();

    for ifaddr in nix::ifaddrs::getifaddrs()? {
        if !ifaddr.flags.contains(InterfaceFlags::IFF_MULTICAST)
            || ifaddr.flags.contains(InterfaceFlags::IFF_LOOPBACK)
        {
            continue;
        }

        let Some(address) = ifaddr.address else {
            continue;
        };
        if let Some(sin6) = address.as_sockaddr_in6() {
            addresses.push(IpAddr::V6(sin6.ip()));
        } else if let Some(sin) = address.as_sockaddr_in() {
            addresses.push(IpAddr::V4(sin.ip()));
        }
    }

    Ok(addresses)
}
