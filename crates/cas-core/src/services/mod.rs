//! Services: the applications tickets are issued for, the registry of
//! services allowed to use this server, and the orchestrator that issues
//! and validates tickets on their behalf.

pub mod assertion;
pub mod central_authentication_service;
pub mod manager;
pub mod registered;

pub use assertion::Assertion;
pub use central_authentication_service::{CentralAuthenticationService, ProxyGrantingTicketIssued};
pub use manager::{InMemoryServicesManager, ServicesManager};
pub use registered::{
    AccessStrategy, AttributeReleasePolicy, MultifactorPolicy, ProxyPolicy, RegisteredService,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// An application identified by the URL it asked to be returned to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
}

impl Service {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Whether `other` names the same service. Fragments are ignored; the
    /// rest must match exactly.
    pub fn matches(&self, other: &Service) -> bool {
        strip_fragment(&self.id) == strip_fragment(&other.id)
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

fn strip_fragment(id: &str) -> &str {
    id.split_once('#').map_or(id, |(base, _)| base)
}
