// # Service References
//
// A service advertised over DNS-SD is identified by its (name, type, domain)
// triple. Resolution maps that identity to the host name and port the
// service currently listens on.
//
// The host name is not resolved to an IP address here; that is the job of
// an ordinary DNS/mDNS host lookup.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{Error, Result};

/// Identity triple of an advertised service instance
///
/// Immutable once constructed. Two ids are equal when all three components
/// are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceId {
    /// Instance name (e.g. "printer")
    pub name: String,
    /// Service type (e.g. "_ipp._tcp")
    pub service_type: String,
    /// Domain (e.g. "local")
    pub domain: String,
}

impl ServiceId {
    /// Create a new service identity
    pub fn new(
        name: impl Into<String>,
        service_type: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            service_type: service_type.into(),
            domain: domain.into(),
        }
    }

    /// Fully qualified instance name, e.g. `printer._ipp._tcp.local.`
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.name, self.type_domain())
    }

    /// Service type qualified by domain, e.g. `_ipp._tcp.local.`
    pub fn type_domain(&self) -> String {
        format!(
            "{}.{}.",
            self.service_type.trim_end_matches('.'),
            self.domain.trim_end_matches('.')
        )
    }

    /// Whether any component of the triple is empty
    pub fn is_incomplete(&self) -> bool {
        self.name.is_empty() || self.service_type.is_empty() || self.domain.is_empty()
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.name, self.service_type, self.domain)
    }
}

/// Host name and port a service is reachable at
///
/// Can only be built through [`Endpoint::new`], so a host name is never
/// empty and a port is never 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    host_name: String,
    port: u16,
}

impl Endpoint {
    /// Create an endpoint, rejecting an empty host name or port 0
    pub fn new(host_name: impl Into<String>, port: u16) -> Result<Self> {
        let host_name = host_name.into();
        if host_name.is_empty() {
            return Err(Error::invalid_input("endpoint host name cannot be empty"));
        }
        if port == 0 {
            return Err(Error::invalid_input("endpoint port must be in 1..=65535"));
        }
        Ok(Self { host_name, port })
    }

    /// Host name of the service (not an IP address)
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// Port of the service
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host_name, self.port)
    }
}

/// A service instance plus its most recent resolution
///
/// Created unresolved. Only the owning `Resolver` changes the endpoint.
/// When a resolution fails or the service is withdrawn the endpoint is
/// cleared, so `host_name()` and `port()` never return stale values.
///
/// Equality and hashing use the identity triple only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceReference {
    id: ServiceId,
    endpoint: Option<Endpoint>,
}

impl ServiceReference {
    /// Create an unresolved reference to the given service
    pub fn new(
        name: impl Into<String>,
        service_type: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self::from_id(ServiceId::new(name, service_type, domain))
    }

    /// Create an unresolved reference from an existing identity
    pub fn from_id(id: ServiceId) -> Self {
        Self { id, endpoint: None }
    }

    pub fn id(&self) -> &ServiceId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    pub fn service_type(&self) -> &str {
        &self.id.service_type
    }

    pub fn domain(&self) -> &str {
        &self.id.domain
    }

    /// Whether `host_name()` and `port()` currently hold a resolved value
    pub fn is_resolved(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Resolved host name, if resolved
    pub fn host_name(&self) -> Option<&str> {
        self.endpoint.as_ref().map(Endpoint::host_name)
    }

    /// Resolved port, if resolved
    pub fn port(&self) -> Option<u16> {
        self.endpoint.as_ref().map(Endpoint::port)
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// Replace the resolved endpoint; `None` marks the reference unresolved
    pub(crate) fn set_endpoint(&mut self, endpoint: Option<Endpoint>) {
        self.endpoint = endpoint;
    }
}

impl PartialEq for ServiceReference {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ServiceReference {}

impl Hash for ServiceReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn new_reference_is_unresolved() {
        let reference = ServiceReference::new("printer", "_ipp._tcp", "local");
        assert!(!reference.is_resolved());
        assert_eq!(reference.host_name(), None);
        assert_eq!(reference.port(), None);
        assert_eq!(reference.name(), "printer");
        assert_eq!(reference.service_type(), "_ipp._tcp");
        assert_eq!(reference.domain(), "local");
    }

    #[test]
    fn full_name_has_single_trailing_dot() {
        let id = ServiceId::new("printer", "_ipp._tcp", "local.");
        assert_eq!(id.full_name(), "printer._ipp._tcp.local.");
        assert_eq!(id.type_domain(), "_ipp._tcp.local.");
    }

    #[test]
    fn endpoint_rejects_empty_host_and_port_zero() {
        assert!(Endpoint::new("", 631).is_err());
        assert!(Endpoint::new("printer.local", 0).is_err());
        let endpoint = Endpoint::new("printer.local", 631).unwrap();
        assert_eq!(endpoint.to_string(), "printer.local:631");
    }

    #[test]
    fn equality_ignores_resolution_state() {
        let a = ServiceReference::new("printer", "_ipp._tcp", "local");
        let mut b = a.clone();
        b.set_endpoint(Some(Endpoint::new("printer.local", 631).unwrap()));
        assert_eq!(a, b);

        let mut seen = HashSet::new();
        seen.insert(a);
        assert!(!seen.insert(b), "same identity deduplicates");
    }

    #[test]
    fn clearing_endpoint_drops_host_and_port() {
        let mut reference = ServiceReference::new("printer", "_ipp._tcp", "local");
        reference.set_endpoint(Some(Endpoint::new("printer.local", 631).unwrap()));
        assert_eq!(reference.port(), Some(631));

        reference.set_endpoint(None);
        assert!(!reference.is_resolved());
        assert_eq!(reference.host_name(), None);
    }
}
