use super::Service;
use crate::authentication::{Authentication, Principal};
use serde::Serialize;

/// What a successful validation tells the validating service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assertion {
    /// Authentication of the root session.
    pub primary_authentication: Authentication,
    /// Every authentication in the lineage, nearest first, ending with the
    /// root session's.
    pub chained_authentications: Vec<Authentication>,
    /// The root principal after the service's release policy.
    pub principal: Principal,
    pub service: Service,
    /// True when the ticket was issued from freshly presented credentials.
    pub from_new_login: bool,
    /// Services that proxied on behalf of the session, nearest first.
    /// Empty for a plain service ticket.
    pub proxies: Vec<Service>,
}

impl Assertion {
    pub fn is_proxied(&self) -> bool {
        !self.proxies.is_empty()
    }
}
