//! Backend endpoints and the per-protocol endpoint map.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;

use mailgate_imap::Security;

use crate::error::TopologyError;
use crate::request::Protocol;

/// A backend mail service: where to connect and how to secure it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
    security: Security,
}

impl Endpoint {
    /// Creates an endpoint.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, security: Security) -> Self {
        Self {
            host: host.into(),
            port,
            security,
        }
    }

    /// Backend host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Backend port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Transport security mode.
    #[must_use]
    pub const fn security(&self) -> Security {
        self.security
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.host, self.port, self.security)
    }
}

/// Protocol to endpoint map, unique per protocol, immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoints(HashMap<Protocol, Endpoint>);

impl Endpoints {
    /// Builds the map, refusing a protocol that appears twice.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::DuplicateEndpoint`] on a repeated protocol.
    pub fn try_from_iter(
        entries: impl IntoIterator<Item = (Protocol, Endpoint)>,
    ) -> Result<Self, TopologyError> {
        let mut map = HashMap::new();
        for (protocol, endpoint) in entries {
            match map.entry(protocol) {
                Entry::Occupied(_) => return Err(TopologyError::DuplicateEndpoint(protocol)),
                Entry::Vacant(slot) => {
                    slot.insert(endpoint);
                }
            }
        }
        Ok(Self(map))
    }

    /// Endpoint configured for `protocol`.
    #[must_use]
    pub fn get(&self, protocol: Protocol) -> Option<&Endpoint> {
        self.0.get(&protocol)
    }

    /// Number of configured protocols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if no protocol is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let endpoints = Endpoints::try_from_iter([
            (Protocol::Imap, Endpoint::new("imap.internal", 143, Security::None)),
            (Protocol::Smtp, Endpoint::new("smtp.internal", 25, Security::StartTls)),
        ])
        .unwrap();

        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints.get(Protocol::Imap).unwrap().host(), "imap.internal");
        assert_eq!(endpoints.get(Protocol::Smtp).unwrap().port(), 25);
        assert!(endpoints.get(Protocol::Pop3).is_none());
    }

    #[test]
    fn test_duplicate_protocol_rejected() {
        let result = Endpoints::try_from_iter([
            (Protocol::Imap, Endpoint::new("a", 143, Security::None)),
            (Protocol::Imap, Endpoint::new("b", 143, Security::None)),
        ]);

        assert!(matches!(
            result,
            Err(TopologyError::DuplicateEndpoint(Protocol::Imap))
        ));
    }

    #[test]
    fn test_display() {
        let endpoint = Endpoint::new("mx1", 993, Security::Implicit);
        assert_eq!(endpoint.to_string(), "mx1:993 (implicit-tls)");
    }
}
