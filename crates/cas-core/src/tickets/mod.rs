//! Ticket model.
//!
//! Tickets refer to one another by id only. A granting ticket (TGT or PGT)
//! records the ids of everything issued beneath it so revocation can cascade,
//! and a grant ticket (ST or PT) records the id of the ticket that granted it.
//! Resolution always goes through the registry, so a ticket graph never holds
//! a reference cycle and serializes as plain data.

pub mod expiration;
pub mod factory;
pub mod id_generator;

pub use expiration::ExpirationPolicy;
pub use factory::{ExpirationPolicies, TicketFactory};
pub use id_generator::UniqueTicketIdGenerator;

use crate::authentication::Authentication;
use crate::services::Service;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TicketType {
    #[serde(rename = "TGT")]
    TicketGranting,
    #[serde(rename = "ST")]
    Service,
    #[serde(rename = "PGT")]
    ProxyGranting,
    #[serde(rename = "PGTIOU")]
    ProxyGrantingIou,
    #[serde(rename = "PT")]
    Proxy,
}

impl TicketType {
    pub const ALL: [TicketType; 5] = [
        TicketType::TicketGranting,
        TicketType::Service,
        TicketType::ProxyGranting,
        TicketType::ProxyGrantingIou,
        TicketType::Proxy,
    ];

    pub fn prefix(&self) -> &'static str {
        match self {
            TicketType::TicketGranting => "TGT",
            TicketType::Service => "ST",
            TicketType::ProxyGranting => "PGT",
            TicketType::ProxyGrantingIou => "PGTIOU",
            TicketType::Proxy => "PT",
        }
    }

    /// Type encoded in a ticket id's prefix.
    pub fn from_id(id: &str) -> Option<TicketType> {
        id.split_once('-')
            .and_then(|(prefix, _)| prefix.parse().ok())
    }

    /// TGT and PGT: tickets that grant other tickets.
    pub fn is_granting(&self) -> bool {
        matches!(self, TicketType::TicketGranting | TicketType::ProxyGranting)
    }

    /// ST and PT: single-service grants consumed by validation.
    pub fn is_grant(&self) -> bool {
        matches!(self, TicketType::Service | TicketType::Proxy)
    }
}

impl fmt::Display for TicketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

impl FromStr for TicketType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TicketType::ALL
            .into_iter()
            .find(|t| t.prefix() == s)
            .ok_or_else(|| format!("Unknown ticket prefix: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub ticket_type: TicketType,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub count_of_uses: u32,
    pub expiration_policy: ExpirationPolicy,
    pub state: TicketState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TicketState {
    Granting(GrantingTicket),
    Grant(GrantTicket),
}

/// State of a TGT or PGT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantingTicket {
    pub authentication: Authentication,
    /// For a PGT: the ticket that granted the ST/PT this PGT was created from.
    pub parent_ticket_id: Option<String>,
    /// For a PGT: the service that requested proxying rights.
    pub proxied_by: Option<Service>,
    /// Service id → ids of the STs/PTs issued for it under this ticket.
    #[serde(default)]
    pub services: BTreeMap<String, Vec<String>>,
    /// PGTs created beneath this ticket.
    #[serde(default)]
    pub proxy_granting_tickets: BTreeSet<String>,
}

/// State of an ST or PT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantTicket {
    pub granting_ticket_id: String,
    pub service: Service,
    pub from_new_login: bool,
}

impl Ticket {
    pub fn granting(&self) -> Option<&GrantingTicket> {
        match &self.state {
            TicketState::Granting(g) => Some(g),
            TicketState::Grant(_) => None,
        }
    }

    pub fn granting_mut(&mut self) -> Option<&mut GrantingTicket> {
        match &mut self.state {
            TicketState::Granting(g) => Some(g),
            TicketState::Grant(_) => None,
        }
    }

    pub fn grant(&self) -> Option<&GrantTicket> {
        match &self.state {
            TicketState::Grant(g) => Some(g),
            TicketState::Granting(_) => None,
        }
    }

    pub fn authentication(&self) -> Option<&Authentication> {
        self.granting().map(|g| &g.authentication)
    }

    /// Principal owning a granting ticket.
    pub fn principal_id(&self) -> Option<&str> {
        self.authentication().map(|a| a.principal.id.as_str())
    }

    /// Parent id: the granting ticket for an ST/PT, the parent for a PGT,
    /// `None` for a root TGT.
    pub fn parent_id(&self) -> Option<&str> {
        match &self.state {
            TicketState::Granting(g) => g.parent_ticket_id.as_deref(),
            TicketState::Grant(g) => Some(g.granting_ticket_id.as_str()),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_policy.is_expired(self, now)
    }

    /// Record a successful use: bump the use count and reset the idle timer.
    pub fn mark_used(&mut self, now: DateTime<Utc>) {
        self.count_of_uses = self.count_of_uses.saturating_add(1);
        self.last_used_at = now;
    }

    /// Ids of every ticket recorded beneath this one.
    pub fn descendant_ids(&self) -> Vec<String> {
        match &self.state {
            TicketState::Granting(g) => g
                .services
                .values()
                .flatten()
                .chain(g.proxy_granting_tickets.iter())
                .cloned()
                .collect(),
            TicketState::Grant(_) => Vec::new(),
        }
    }

    /// True when the id prefix agrees with the ticket type and the state shape.
    pub fn is_well_formed(&self) -> bool {
        TicketType::from_id(&self.id) == Some(self.ticket_type)
            && match self.state {
                TicketState::Granting(_) => self.ticket_type.is_granting(),
                TicketState::Grant(_) => self.ticket_type.is_grant(),
            }
    }
}

impl GrantingTicket {
    pub fn new(authentication: Authentication) -> Self {
        Self {
            authentication,
            parent_ticket_id: None,
            proxied_by: None,
            services: BTreeMap::new(),
            proxy_granting_tickets: BTreeSet::new(),
        }
    }

    /// Record a ticket issued for `service`. With `only_track_most_recent`
    /// the previously recorded ids for that service are dropped and returned.
    pub fn record_service(
        &mut self,
        service: &Service,
        ticket_id: &str,
        only_track_most_recent: bool,
    ) -> Vec<String> {
        let ids = self.services.entry(service.id.clone()).or_default();
        let replaced = if only_track_most_recent {
            std::mem::take(ids)
        } else {
            Vec::new()
        };
        ids.push(ticket_id.to_string());
        replaced
    }

    pub fn has_service(&self, service: &Service) -> bool {
        self.services
            .get(&service.id)
            .map(|ids| !ids.is_empty())
            .unwrap_or(false)
    }

    pub fn remove_ticket_id(&mut self, ticket_id: &str) {
        for ids in self.services.values_mut() {
            ids.retain(|id| id != ticket_id);
        }
        self.services.retain(|_, ids| !ids.is_empty());
        self.proxy_granting_tickets.remove(ticket_id);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::authentication::Principal;

    fn tgt(id: &str) -> Ticket {
        let now = Utc::now();
        Ticket {
            id: id.to_string(),
            ticket_type: TicketType::TicketGranting,
            created_at: now,
            last_used_at: now,
            count_of_uses: 0,
            expiration_policy: ExpirationPolicy::Never,
            state: TicketState::Granting(GrantingTicket::new(Authentication::new(
                Principal::new("casuser"),
                now,
            ))),
        }
    }

    #[test]
    fn test_ticket_type_from_id() {
        assert_eq!(TicketType::from_id("TGT-1-abc"), Some(TicketType::TicketGranting));
        assert_eq!(TicketType::from_id("ST-9-abc-node"), Some(TicketType::Service));
        assert_eq!(TicketType::from_id("PGTIOU-1-x"), Some(TicketType::ProxyGrantingIou));
        assert_eq!(TicketType::from_id("PGT-1-x"), Some(TicketType::ProxyGranting));
        assert_eq!(TicketType::from_id("PT-1-x"), Some(TicketType::Proxy));
        assert_eq!(TicketType::from_id("XX-1-x"), None);
        assert_eq!(TicketType::from_id("TGT"), None);
    }

    #[test]
    fn test_well_formed_checks_prefix() {
        let ticket = tgt("TGT-1-abc");
        assert!(ticket.is_well_formed());

        let mut mislabeled = tgt("ST-1-abc");
        assert!(!mislabeled.is_well_formed());
        mislabeled.ticket_type = TicketType::Service;
        assert!(!mislabeled.is_well_formed(), "granting state under ST type");
    }

    #[test]
    fn test_record_service_tracks_all_by_default() {
        let mut ticket = tgt("TGT-1-abc");
        let service = Service::new("https://a.example.org");
        let g = ticket.granting_mut().unwrap();
        assert!(g.record_service(&service, "ST-1-a", false).is_empty());
        assert!(g.record_service(&service, "ST-2-b", false).is_empty());
        assert_eq!(g.services.get(&service.id).unwrap().len(), 2);
        assert!(g.has_service(&service));
    }

    #[test]
    fn test_record_service_only_most_recent() {
        let mut ticket = tgt("TGT-1-abc");
        let service = Service::new("https://a.example.org");
        let g = ticket.granting_mut().unwrap();
        g.record_service(&service, "ST-1-a", true);
        let replaced = g.record_service(&service, "ST-2-b", true);
        assert_eq!(replaced, vec!["ST-1-a".to_string()]);
        assert_eq!(g.services.get(&service.id).unwrap(), &vec!["ST-2-b".to_string()]);
    }

    #[test]
    fn test_descendant_ids_include_proxy_granting_tickets() {
        let mut ticket = tgt("TGT-1-abc");
        let g = ticket.granting_mut().unwrap();
        g.record_service(&Service::new("https://a.example.org"), "ST-1-a", false);
        g.proxy_granting_tickets.insert("PGT-2-b".to_string());

        let mut ids = ticket.descendant_ids();
        ids.sort();
        assert_eq!(ids, vec!["PGT-2-b".to_string(), "ST-1-a".to_string()]);
    }

    #[test]
    fn test_remove_ticket_id() {
        let mut ticket = tgt("TGT-1-abc");
        let g = ticket.granting_mut().unwrap();
        let service = Service::new("https://a.example.org");
        g.record_service(&service, "ST-1-a", false);
        g.remove_ticket_id("ST-1-a");
        assert!(!g.has_service(&service));
        assert!(g.services.is_empty());
    }

    #[test]
    fn test_mark_used() {
        let mut ticket = tgt("TGT-1-abc");
        let later = ticket.created_at + chrono::Duration::seconds(5);
        ticket.mark_used(later);
        assert_eq!(ticket.count_of_uses, 1);
        assert_eq!(ticket.last_used_at, later);
        assert_eq!(ticket.created_at + chrono::Duration::seconds(5), later);
    }
}
