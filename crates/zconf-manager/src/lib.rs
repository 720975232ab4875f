//! Zeroconf (mDNS/DNS-SD) service lifecycle manager.
//!
//! This crate tracks concurrently registered and watched services and
//! multiplexes asynchronous DNS-SD engine callbacks into a stable event
//! model. The engine itself is a collaborator behind [`NsdBackend`];
//! everything here is about lifecycle bookkeeping that stays consistent
//! despite the racy, best-effort nature of multicast DNS.
//!
//! # Architecture
//!
//! 1. [`NetworkContext`] captures interface addresses and the hostname once
//!    at startup and owns the multicast-reception gate.
//! 2. [`RegistrationManager`] owns locally advertised services; its listener
//!    map is the sole source of truth for what is outstanding.
//! 3. [`DiscoveryManager`] owns browse subscriptions, resolves sightings,
//!    and emits Added/Removed/Resolved events per subscriber.
//! 4. [`Zconf`] is the caller-facing facade with the lazy-construct /
//!    discard-on-teardown manager lifecycle.
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use zconf_core::{AddressFamily, ZconfConfig};
//! use zconf_manager::{MdnsSdBackend, Zconf};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = Arc::new(MdnsSdBackend::new()?);
//!     let zconf = Zconf::new(ZconfConfig::default(), backend)?;
//!
//!     let record = zconf
//!         .register(
//!             "_http._tcp.",
//!             "local.",
//!             "printer",
//!             631,
//!             HashMap::new(),
//!             AddressFamily::Ipv4,
//!         )
//!         .await?;
//!     println!("advertising {}", record.fullname());
//!
//!     let events = zconf.watch("_ipp._tcp.", "local.", AddressFamily::Any).await?;
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?} {}", event.action, event.service.name);
//!     }
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod backend;
pub mod discovery;
pub mod dispatch;
pub mod net;
pub mod registration;

pub use agent::Zconf;
pub use backend::mdns::MdnsSdBackend;
pub use backend::memory::MemoryBackend;
pub use backend::{
    AdvertiseHandle, AdvertiseUpdate, BackendError, BrowseHandle, BrowseUpdate, NsdBackend,
    ResolveUpdate,
};
pub use discovery::DiscoveryManager;
pub use dispatch::{DiscoveryEvent, EventAction};
pub use net::{HostIdentity, MulticastLock, NetworkContext, SystemHostIdentity};
pub use registration::RegistrationManager;
pub use zconf_core::{AddressFamily, Result, ServiceRecord, ZconfConfig, ZconfError};
