//! The external DNS-SD collaborator contract.
//!
//! The managers never talk to a multicast engine directly. They issue
//! requests through [`NsdBackend`] and receive outcomes as explicit update
//! messages over channels, delivered from whatever thread the engine runs
//! its callbacks on. Anonymous capture-based listener objects are replaced
//! by the update enums below.

use async_channel::Receiver;
use thiserror::Error;
use zconf_core::record::ServiceRecord;

pub mod mdns;
pub mod memory;

/// Result type alias for backend operations
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Errors reported synchronously by a backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// The platform denies multicast or network access
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The backend rejected the request
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The backend itself is unusable
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Opaque handle for an outstanding advertisement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdvertiseHandle(pub u64);

/// Opaque handle for an active browse session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BrowseHandle(pub u64);

/// Asynchronous outcomes of an advertisement
#[derive(Debug, Clone)]
pub enum AdvertiseUpdate {
    /// The service is advertised; the record may carry a
    /// platform-disambiguated name
    Registered(ServiceRecord),

    /// The platform rejected the advertisement after the fact
    RegistrationFailed(String),

    /// The advertisement was withdrawn
    Unregistered,

    /// Withdrawal failed
    UnregistrationFailed(String),
}

/// Raw sightings reported by a browse session
#[derive(Debug, Clone)]
pub enum BrowseUpdate {
    /// A service instance appeared; the record may be unresolved
    Found(ServiceRecord),

    /// A service instance disappeared; carries whatever metadata accompanied
    /// the loss notification
    Lost(ServiceRecord),
}

/// Verdict of a resolve request
#[derive(Debug, Clone)]
pub enum ResolveUpdate {
    /// Resolution completed with address, port, and TXT attributes
    Resolved(ServiceRecord),

    /// Resolution failed
    Failed(String),
}

/// A multicast DNS-SD engine.
///
/// All request methods return immediately; outcomes arrive on the returned
/// receivers from the engine's own threads. A resolve that never completes
/// simply never delivers a verdict; no timeout is imposed here.
pub trait NsdBackend: Send + Sync + 'static {
    /// Starts advertising the given record.
    fn start_advertise(
        &self,
        record: &ServiceRecord,
    ) -> BackendResult<(AdvertiseHandle, Receiver<AdvertiseUpdate>)>;

    /// Withdraws an advertisement. The final [`AdvertiseUpdate`] arrives on
    /// the channel returned by [`NsdBackend::start_advertise`].
    fn stop_advertise(&self, handle: AdvertiseHandle) -> BackendResult<()>;

    /// Starts browsing for instances of a service type.
    fn start_browse(
        &self,
        service_type: &str,
    ) -> BackendResult<(BrowseHandle, Receiver<BrowseUpdate>)>;

    /// Cancels a browse session and closes its update channel.
    fn stop_browse(&self, handle: BrowseHandle) -> BackendResult<()>;

    /// Requests resolution of a sighted service.
    fn start_resolve(&self, record: &ServiceRecord) -> BackendResult<Receiver<ResolveUpdate>>;
}
