//! Construction of new tickets with fresh ids and configured policies.
//!
//! Only the orchestrator creates tickets, and it does so through this factory.

use super::{
    ExpirationPolicy, GrantTicket, GrantingTicket, Ticket, TicketState, TicketType,
    UniqueTicketIdGenerator,
};
use crate::authentication::Authentication;
use crate::config::CasConfig;
use crate::crypto::CryptoError;
use crate::services::Service;
use chrono::{DateTime, Utc};

/// Expiration policy per ticket type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpirationPolicies {
    pub ticket_granting: ExpirationPolicy,
    pub service: ExpirationPolicy,
    pub proxy_granting: ExpirationPolicy,
    pub proxy: ExpirationPolicy,
}

impl ExpirationPolicies {
    pub fn from_config(config: &CasConfig) -> Self {
        let session = ExpirationPolicy::session(
            config.tgt_max_time_to_live_secs,
            config.tgt_time_to_idle_secs,
        );
        Self {
            ticket_granting: ExpirationPolicy::RememberMe {
                remember_me: Box::new(ExpirationPolicy::HardTimeout {
                    time_to_kill_secs: config.tgt_remember_me_time_to_live_secs,
                }),
                default: Box::new(session),
            },
            service: ExpirationPolicy::grant(config.st_time_to_kill_secs, config.st_number_of_uses),
            proxy_granting: ExpirationPolicy::session(
                config.pgt_max_time_to_live_secs,
                config.pgt_time_to_idle_secs,
            ),
            proxy: ExpirationPolicy::grant(config.pt_time_to_kill_secs, config.pt_number_of_uses),
        }
    }
}

impl Default for ExpirationPolicies {
    fn default() -> Self {
        Self::from_config(&CasConfig::default())
    }
}

#[derive(Debug)]
pub struct TicketFactory {
    id_generator: UniqueTicketIdGenerator,
    policies: ExpirationPolicies,
}

impl TicketFactory {
    pub fn new(id_generator: UniqueTicketIdGenerator, policies: ExpirationPolicies) -> Self {
        Self {
            id_generator,
            policies,
        }
    }

    pub fn from_config(config: &CasConfig) -> Self {
        Self::new(
            UniqueTicketIdGenerator::new(
                config.ticket_id_random_length,
                config.ticket_id_suffix.clone(),
            ),
            ExpirationPolicies::from_config(config),
        )
    }

    pub fn policies(&self) -> &ExpirationPolicies {
        &self.policies
    }

    pub fn create_ticket_granting_ticket(
        &self,
        authentication: Authentication,
        now: DateTime<Utc>,
    ) -> Result<Ticket, CryptoError> {
        let id = self.id_generator.new_ticket_id(TicketType::TicketGranting)?;
        Ok(Ticket {
            id,
            ticket_type: TicketType::TicketGranting,
            created_at: now,
            last_used_at: now,
            count_of_uses: 0,
            expiration_policy: self.policies.ticket_granting.clone(),
            state: TicketState::Granting(GrantingTicket::new(authentication)),
        })
    }

    /// Issue an ST (from a TGT) or a PT (from a PGT) for `service`.
    ///
    /// `from_new_login` holds when credentials accompanied this grant or the
    /// granting ticket had never been used before.
    pub fn create_grant_ticket(
        &self,
        granting_ticket: &Ticket,
        service: &Service,
        credential_provided: bool,
        now: DateTime<Utc>,
    ) -> Result<Ticket, CryptoError> {
        let (ticket_type, policy) = match granting_ticket.ticket_type {
            TicketType::ProxyGranting => (TicketType::Proxy, &self.policies.proxy),
            _ => (TicketType::Service, &self.policies.service),
        };
        let id = self.id_generator.new_ticket_id(ticket_type)?;

        Ok(Ticket {
            id,
            ticket_type,
            created_at: now,
            last_used_at: now,
            count_of_uses: 0,
            expiration_policy: policy.clone(),
            state: TicketState::Grant(GrantTicket {
                granting_ticket_id: granting_ticket.id.clone(),
                service: service.clone(),
                from_new_login: credential_provided || granting_ticket.count_of_uses == 0,
            }),
        })
    }

    /// Create a PGT beneath `parent_ticket_id` (the ticket that granted the
    /// ST/PT being proxied from).
    pub fn create_proxy_granting_ticket(
        &self,
        parent_ticket_id: &str,
        authentication: Authentication,
        proxied_by: &Service,
        now: DateTime<Utc>,
    ) -> Result<Ticket, CryptoError> {
        let id = self.id_generator.new_ticket_id(TicketType::ProxyGranting)?;
        let mut granting = GrantingTicket::new(authentication);
        granting.parent_ticket_id = Some(parent_ticket_id.to_string());
        granting.proxied_by = Some(proxied_by.clone());

        Ok(Ticket {
            id,
            ticket_type: TicketType::ProxyGranting,
            created_at: now,
            last_used_at: now,
            count_of_uses: 0,
            expiration_policy: self.policies.proxy_granting.clone(),
            state: TicketState::Granting(granting),
        })
    }

    /// IOU handed to the proxy callback alongside a PGT; never stored.
    pub fn create_proxy_granting_ticket_iou(&self) -> Result<String, CryptoError> {
        self.id_generator.new_ticket_id(TicketType::ProxyGrantingIou)
    }
}

impl Default for TicketFactory {
    fn default() -> Self {
        Self::from_config(&CasConfig::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::authentication::Principal;

    fn authentication() -> Authentication {
        Authentication::new(Principal::new("casuser"), Utc::now())
    }

    #[test]
    fn test_create_ticket_granting_ticket() {
        let factory = TicketFactory::default();
        let now = Utc::now();
        let tgt = factory
            .create_ticket_granting_ticket(authentication(), now)
            .unwrap();

        assert!(tgt.id.starts_with("TGT-"));
        assert!(tgt.is_well_formed());
        assert_eq!(tgt.created_at, now);
        assert_eq!(tgt.principal_id(), Some("casuser"));
        assert_eq!(tgt.expiration_policy, factory.policies().ticket_granting);
    }

    #[test]
    fn test_first_service_ticket_is_from_new_login() {
        let factory = TicketFactory::default();
        let now = Utc::now();
        let mut tgt = factory
            .create_ticket_granting_ticket(authentication(), now)
            .unwrap();
        let service = Service::new("https://a.example.org");

        let first = factory.create_grant_ticket(&tgt, &service, false, now).unwrap();
        assert!(first.grant().unwrap().from_new_login);

        tgt.mark_used(now);
        let second = factory.create_grant_ticket(&tgt, &service, false, now).unwrap();
        assert!(!second.grant().unwrap().from_new_login);

        let renewed = factory.create_grant_ticket(&tgt, &service, true, now).unwrap();
        assert!(renewed.grant().unwrap().from_new_login);
    }

    #[test]
    fn test_proxy_ticket_from_proxy_granting_ticket() {
        let factory = TicketFactory::default();
        let now = Utc::now();
        let pgt = factory
            .create_proxy_granting_ticket(
                "TGT-1-abc",
                authentication(),
                &Service::new("https://proxy.example.org"),
                now,
            )
            .unwrap();
        assert!(pgt.id.starts_with("PGT-"));
        assert_eq!(pgt.parent_id(), Some("TGT-1-abc"));

        let pt = factory
            .create_grant_ticket(&pgt, &Service::new("https://b.example.org"), false, now)
            .unwrap();
        assert_eq!(pt.ticket_type, TicketType::Proxy);
        assert!(pt.id.starts_with("PT-"));
        assert_eq!(pt.parent_id(), Some(pgt.id.as_str()));
        assert_eq!(pt.expiration_policy, factory.policies().proxy);
    }

    #[test]
    fn test_pgt_iou_prefix() {
        let factory = TicketFactory::default();
        let iou = factory.create_proxy_granting_ticket_iou().unwrap();
        assert_eq!(TicketType::from_id(&iou), Some(TicketType::ProxyGrantingIou));
    }

    #[test]
    fn test_policies_from_config() {
        let config = CasConfig {
            st_time_to_kill_secs: 30,
            st_number_of_uses: 2,
            ..CasConfig::default()
        };
        let policies = ExpirationPolicies::from_config(&config);
        assert_eq!(policies.service, ExpirationPolicy::grant(30, 2));
    }
}
