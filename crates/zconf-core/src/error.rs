//! Error types for the service lifecycle manager.
//!
//! Errors from asynchronous backend callbacks never cross the dispatch
//! boundary; they are translated to a logged no-op or a degraded event.
//! Cleanup failures during unregister/unwatch/stop/close are logged and
//! swallowed so cleanup continues for the remaining entries.

use thiserror::Error;

/// Result type alias using ZconfError as the error type.
pub type Result<T> = std::result::Result<T, ZconfError>;

/// Errors surfaced to callers of the lifecycle manager
#[derive(Debug, Error)]
pub enum ZconfError {
    /// The platform denies multicast or network access; fatal to the operation
    #[error("Permission denied: {reason}")]
    Permission { reason: String },

    /// The platform rejected an advertise request; surfaced once, no retry
    #[error("Failed to register service '{service}': {reason}")]
    Registration { service: String, reason: String },

    /// A browse session could not start; the subscription is not created
    #[error("Failed to start discovery for '{service_type}': {reason}")]
    DiscoveryStart {
        service_type: String,
        reason: String,
    },

    /// Resolution failed; non-fatal, degrades to an unresolved added event
    #[error("Failed to resolve service '{service}': {reason}")]
    Resolve { service: String, reason: String },

    /// Best-effort cleanup failed for one entry; logged, never propagated
    #[error("Cleanup failed for '{key}': {reason}")]
    Cancellation { key: String, reason: String },

    /// The platform hostname could not be determined
    #[error("Hostname could not be determined")]
    HostnameUnavailable,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
