//! # Zconf Core
//!
//! Core types, error handling, and configuration for the Zconf
//! Zeroconf (mDNS/DNS-SD) service lifecycle manager.
//!
//! This crate provides the foundational building blocks shared by the
//! registration and discovery managers:
//!
//! - **Records**: the canonical [`ServiceRecord`] representation of an
//!   advertised or discovered service, the opaque bookkeeping keys derived
//!   from it, and its wire serialization.
//! - **Errors**: the full error taxonomy using `thiserror`, from permission
//!   denials through best-effort cancellation failures.
//! - **Configuration**: a serde-backed configuration struct with defaults
//!   and validation.
//!
//! ## Example
//!
//! ```
//! use zconf_core::record::ServiceRecord;
//!
//! let record = ServiceRecord::new("_http._tcp.", "local.", "printer", 631);
//! assert_eq!(record.registration_key(), "_http._tcp.local.printer");
//! assert_eq!(record.derived_subscription_key(), "_http._tcp.local.");
//! ```

pub mod config;
pub mod error;
pub mod record;

// Re-export commonly used types for convenience
pub use config::{AddressFamily, ZconfConfig};
pub use error::{Result, ZconfError};
pub use record::ServiceRecord;
