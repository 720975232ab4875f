//! The canonical service representation shared by registration and discovery

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::net::IpAddr;

/// Bookkeeping key identifying one registration: type, domain, and instance
/// name concatenated. Two services with identical components collide; the
/// later registration silently replaces the bookkeeping of the earlier one.
pub fn registration_key(service_type: &str, domain: &str, name: &str) -> String {
    format!("{service_type}{domain}{name}")
}

/// Bookkeeping key identifying one discovery subscription: type and domain
/// concatenated.
pub fn subscription_key(service_type: &str, domain: &str) -> String {
    format!("{service_type}{domain}")
}

/// Routing key derived from a service type as reported by the backend:
/// leading and trailing dots stripped, the literal `.local.` suffix appended.
pub fn derived_subscription_key(service_type: &str) -> String {
    format!("{}.local.", service_type.trim_matches('.'))
}

/// Drops attribute entries without a value. An explicit empty string is kept;
/// only a genuinely absent value is removed.
pub fn normalize_txt(attributes: HashMap<String, Option<String>>) -> HashMap<String, String> {
    attributes
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key, v)))
        .collect()
}

/// A service advertised on or discovered from the local network.
///
/// `hostname` and `addresses` stay empty until resolution completes; a record
/// built from a raw found notification carries type and name only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    /// DNS-SD service type, e.g. `_http._tcp.`
    pub service_type: String,

    /// Domain, e.g. `local.`
    pub domain: String,

    /// Instance name
    pub name: String,

    /// Service port
    pub port: u16,

    /// TXT record attributes
    pub txt: HashMap<String, String>,

    /// Resolved host name, if resolution has completed
    pub hostname: Option<String>,

    /// Resolved addresses (mixed families, discovery order)
    pub addresses: Vec<IpAddr>,
}

impl ServiceRecord {
    /// Creates an unresolved record with no TXT attributes or addresses.
    pub fn new(
        service_type: impl Into<String>,
        domain: impl Into<String>,
        name: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            service_type: service_type.into(),
            domain: domain.into(),
            name: name.into(),
            port,
            txt: HashMap::new(),
            hostname: None,
            addresses: Vec::new(),
        }
    }

    /// Registration identity of this record.
    pub fn registration_key(&self) -> String {
        registration_key(&self.service_type, &self.domain, &self.name)
    }

    /// Subscription identity of this record's type and domain.
    pub fn subscription_key(&self) -> String {
        subscription_key(&self.service_type, &self.domain)
    }

    /// Routing key used to find the subscriber this record's events belong to.
    pub fn derived_subscription_key(&self) -> String {
        derived_subscription_key(&self.service_type)
    }

    /// Dotted type-plus-domain form, e.g. `_http._tcp.local.`
    pub fn type_with_domain(&self) -> String {
        format!(
            "{}.{}",
            self.service_type.trim_matches('.'),
            self.domain.trim_start_matches('.')
        )
    }

    /// Full instance name, e.g. `printer._http._tcp.local.`
    pub fn fullname(&self) -> String {
        format!("{}.{}", self.name, self.type_with_domain())
    }

    fn addresses_of_family(&self, want_v4: bool) -> Vec<String> {
        self.addresses
            .iter()
            .filter(|addr| addr.is_ipv4() == want_v4)
            .map(|addr| addr.to_string())
            .collect()
    }
}

// The wire shape consumed by callers: `{domain, type, name, port, hostname,
// ipv4Addresses, ipv6Addresses, txtRecord}`.
impl Serialize for ServiceRecord {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("ServiceRecord", 8)?;
        state.serialize_field("domain", &self.domain)?;
        state.serialize_field("type", &self.service_type)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("port", &self.port)?;
        state.serialize_field("hostname", &self.hostname)?;
        state.serialize_field("ipv4Addresses", &self.addresses_of_family(true))?;
        state.serialize_field("ipv6Addresses", &self.addresses_of_family(false))?;
        state.serialize_field("txtRecord", &self.txt)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_registration_key_concatenation() {
        let record = ServiceRecord::new("_http._tcp.", "local.", "printer", 631);
        assert_eq!(record.registration_key(), "_http._tcp.local.printer");
        assert_eq!(record.subscription_key(), "_http._tcp.local.");
    }

    #[test]
    fn test_derived_key_strips_dots() {
        assert_eq!(derived_subscription_key("_http._tcp"), "_http._tcp.local.");
        assert_eq!(derived_subscription_key("._http._tcp."), "_http._tcp.local.");
        assert_eq!(
            derived_subscription_key("..._ipp._tcp..."),
            "_ipp._tcp.local."
        );
    }

    #[test]
    fn test_fullname() {
        let record = ServiceRecord::new("_http._tcp.", "local.", "printer", 631);
        assert_eq!(record.type_with_domain(), "_http._tcp.local.");
        assert_eq!(record.fullname(), "printer._http._tcp.local.");
    }

    #[test]
    fn test_txt_normalization_keeps_explicit_empty() {
        let mut attrs = HashMap::new();
        attrs.insert("model".to_string(), Some("X1".to_string()));
        attrs.insert("note".to_string(), Some(String::new()));
        attrs.insert("absent".to_string(), None);

        let txt = normalize_txt(attrs);
        assert_eq!(txt.len(), 2);
        assert_eq!(txt.get("model").map(String::as_str), Some("X1"));
        assert_eq!(txt.get("note").map(String::as_str), Some(""));
        assert!(!txt.contains_key("absent"));
    }

    #[test]
    fn test_wire_shape() {
        let mut record = ServiceRecord::new("_http._tcp.", "local.", "printer", 631);
        record.hostname = Some("printer.local".to_string());
        record.addresses = vec![
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)),
            IpAddr::V6(Ipv6Addr::LOCALHOST),
        ];
        record.txt.insert("model".to_string(), "X1".to_string());

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "_http._tcp.");
        assert_eq!(value["domain"], "local.");
        assert_eq!(value["name"], "printer");
        assert_eq!(value["port"], 631);
        assert_eq!(value["hostname"], "printer.local");
        assert_eq!(value["ipv4Addresses"][0], "192.168.1.20");
        assert_eq!(value["ipv6Addresses"][0], "::1");
        assert_eq!(value["txtRecord"]["model"], "X1");
    }

    #[test]
    fn test_wire_shape_unresolved() {
        let record = ServiceRecord::new("_http._tcp.", "local.", "printer", 0);
        let value = serde_json::to_value(&record).unwrap();
        assert!(value["hostname"].is_null());
        assert_eq!(value["ipv4Addresses"].as_array().unwrap().len(), 0);
    }
}
