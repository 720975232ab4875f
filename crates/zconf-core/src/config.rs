//! Configuration types for the service lifecycle manager

use serde::{Deserialize, Serialize};

/// Address family selection for registration and discovery.
///
/// Determines which precomputed address set is threaded into a newly
/// constructed manager. The set is not re-validated against current
/// interface state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    /// IPv4 addresses only
    Ipv4,

    /// IPv6 addresses only
    Ipv6,

    /// Both families, in discovery order
    #[default]
    Any,
}

impl AddressFamily {
    /// Parses a caller-supplied family string. Matching is case-insensitive;
    /// anything other than "ipv4" or "ipv6" selects both families.
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("ipv4") {
            AddressFamily::Ipv4
        } else if value.eq_ignore_ascii_case("ipv6") {
            AddressFamily::Ipv6
        } else {
            AddressFamily::Any
        }
    }
}

/// Configuration for the Zconf facade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZconfConfig {
    /// Capacity of each subscriber's event channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Overrides the platform-reported hostname when set
    #[serde(default)]
    pub hostname_override: Option<String>,
}

impl Default for ZconfConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: default_event_channel_capacity(),
            hostname_override: None,
        }
    }
}

impl ZconfConfig {
    /// Validates the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.event_channel_capacity == 0 {
            return Err("event_channel_capacity cannot be 0".to_string());
        }

        if matches!(self.hostname_override.as_deref(), Some("")) {
            return Err("hostname_override cannot be empty".to_string());
        }

        Ok(())
    }
}

// Default configuration values
fn default_event_channel_capacity() -> usize {
    1000
}
