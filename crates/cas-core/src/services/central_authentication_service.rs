//! The ticket orchestrator.
//!
//! Every mutation of an existing ticket is a single conditional registry
//! write against the version the ticket was read at. Service and proxy
//! ticket consumption therefore succeeds at most once per ticket, across
//! processes sharing the registry.

use super::{Assertion, RegisteredService, Service, ServicesManager};
use crate::authentication::{Authentication, AuthenticationError, AuthenticationResult};
use crate::config::CasConfig;
use crate::errors::CasError;
use crate::mfa::{
    AuthenticationEvent, AuthenticationEventRepository, MultifactorDecision, MultifactorEngine,
    RequestContext,
};
use crate::observability::{hash_for_correlation, metrics, ErrorCategory};
use crate::registry::{TicketRegistry, VersionedTicket};
use crate::tickets::{Ticket, TicketFactory, TicketType};
use common::sanitize::{mask_ticket_id, MaskedTicketId};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Upper bound on proxy nesting when walking a lineage to its root.
const MAX_LINEAGE_DEPTH: usize = 64;

/// A newly created proxy-granting ticket and the IOU handed to the proxy
/// callback with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyGrantingTicketIssued {
    pub pgt_id: String,
    pub pgt_iou: String,
}

/// Authentications and proxying services from a granting ticket up to its
/// root TGT, nearest first.
struct Lineage {
    authentications: Vec<Authentication>,
    proxies: Vec<Service>,
}

impl Lineage {
    fn root(&self) -> Option<&Authentication> {
        self.authentications.last()
    }
}

pub struct CentralAuthenticationService {
    registry: Arc<TicketRegistry>,
    factory: TicketFactory,
    services: Arc<dyn ServicesManager>,
    multifactor: Option<Arc<MultifactorEngine>>,
    authentication_events: Option<Arc<dyn AuthenticationEventRepository>>,
    only_track_most_recent_session: bool,
    ticket_update_max_attempts: u32,
}

impl CentralAuthenticationService {
    pub fn new(
        registry: Arc<TicketRegistry>,
        factory: TicketFactory,
        services: Arc<dyn ServicesManager>,
        config: &CasConfig,
    ) -> Self {
        Self {
            registry,
            factory,
            services,
            multifactor: None,
            authentication_events: None,
            only_track_most_recent_session: config.only_track_most_recent_session,
            ticket_update_max_attempts: config.ticket_update_max_attempts.max(1),
        }
    }

    pub fn with_multifactor_engine(mut self, engine: Arc<MultifactorEngine>) -> Self {
        self.multifactor = Some(engine);
        self
    }

    /// Record an event for every grant that completes a new login, the
    /// history risk-based triggers score requests against.
    pub fn with_authentication_events(
        mut self,
        repository: Arc<dyn AuthenticationEventRepository>,
    ) -> Self {
        self.authentication_events = Some(repository);
        self
    }

    pub fn registry(&self) -> &Arc<TicketRegistry> {
        &self.registry
    }

    /// Start an SSO session.
    #[instrument(name = "cas.create_tgt", skip_all, fields(status))]
    pub async fn create_ticket_granting_ticket(
        &self,
        result: &AuthenticationResult,
    ) -> Result<Ticket, CasError> {
        let outcome = self.create_tgt_inner(result).await;
        finish("create_ticket_granting_ticket", &outcome);
        outcome
    }

    async fn create_tgt_inner(&self, result: &AuthenticationResult) -> Result<Ticket, CasError> {
        let authentication = &result.authentication;
        if authentication.is_empty() {
            return Err(AuthenticationError::UnresolvedPrincipal.into());
        }

        if let Some(service) = &result.service {
            let registered = self.registered_service(service).await?;
            registered.ensure_principal_access(service, &authentication.principal)?;
        }

        let now = self.registry.clock().now();
        let tgt = self
            .factory
            .create_ticket_granting_ticket(authentication.clone(), now)?;
        self.registry.add_ticket(&tgt).await?;
        metrics::record_ticket_created(tgt.ticket_type.prefix());

        info!(
            target: "cas.tickets",
            tgt = %MaskedTicketId(&tgt.id),
            principal = %hash_for_correlation(&authentication.principal.id),
            "Created ticket-granting ticket"
        );
        Ok(tgt)
    }

    /// Issue a service ticket from an existing session.
    ///
    /// `result` carries credentials presented with this request (renewed
    /// login or step-up); its principal must match the session's, and it
    /// replaces the session's authentication once the grant succeeds.
    #[instrument(
        name = "cas.grant_service_ticket",
        skip_all,
        fields(tgt = %MaskedTicketId(tgt_id), service = %service, status)
    )]
    pub async fn grant_service_ticket(
        &self,
        tgt_id: &str,
        service: &Service,
        result: Option<&AuthenticationResult>,
        context: &RequestContext,
    ) -> Result<Ticket, CasError> {
        let outcome = self
            .grant_service_ticket_inner(tgt_id, service, result, context)
            .await;
        finish("grant_service_ticket", &outcome);
        outcome
    }

    async fn grant_service_ticket_inner(
        &self,
        tgt_id: &str,
        service: &Service,
        result: Option<&AuthenticationResult>,
        context: &RequestContext,
    ) -> Result<Ticket, CasError> {
        let tgt = self.live_ticket(tgt_id, &[TicketType::TicketGranting]).await?;
        let session = tgt
            .ticket
            .authentication()
            .ok_or_else(|| invalid(tgt_id))?;

        let renewed = match result {
            Some(result) => {
                if result.authentication.principal.id != session.principal.id {
                    warn!(target: "cas.tickets", "Authentication principal differs from the session's");
                    return Err(AuthenticationError::MixedPrincipal.into());
                }
                Some(result.authentication.clone())
            }
            None => None,
        };
        let current = renewed.as_ref().unwrap_or(session);
        let credential_provided = result.is_some_and(|r| r.credential_provided);

        let registered = self.registered_service(service).await?;
        registered.ensure_principal_access(service, &current.principal)?;
        registered.ensure_sso_participation(service, credential_provided)?;
        registered.ensure_required_handlers(current)?;
        self.enforce_multifactor(current, &registered, context).await?;
        let principal_id = current.principal.id.clone();

        let now = self.registry.clock().now();
        let st = self
            .factory
            .create_grant_ticket(&tgt.ticket, service, credential_provided, now)?;

        let only_most_recent = self.only_track_most_recent_session;
        let mut replaced = Vec::new();
        self.update_with_retry(tgt, |ticket| {
            ticket.mark_used(now);
            if let Some(granting) = ticket.granting_mut() {
                replaced = granting.record_service(service, &st.id, only_most_recent);
                if let Some(authentication) = &renewed {
                    granting.authentication = authentication.clone();
                }
            }
        })
        .await?;
        self.registry.add_ticket(&st).await?;
        self.revoke_untracked(replaced).await?;
        metrics::record_ticket_created(st.ticket_type.prefix());

        if let Some(events) = &self.authentication_events {
            if st.grant().is_some_and(|g| g.from_new_login) {
                events
                    .record(AuthenticationEvent::from_request(principal_id, context, now))
                    .await;
            }
        }

        info!(
            target: "cas.tickets",
            st = %MaskedTicketId(&st.id),
            from_new_login = st.grant().is_some_and(|g| g.from_new_login),
            "Granted service ticket"
        );
        Ok(st)
    }

    /// Validate (and consume) a service or proxy ticket presented by
    /// `service`.
    ///
    /// The use is recorded before the service is compared, so a ticket
    /// presented for the wrong service is spent as well.
    #[instrument(
        name = "cas.validate_service_ticket",
        skip_all,
        fields(ticket = %MaskedTicketId(ticket_id), service = %service, status)
    )]
    pub async fn validate_service_ticket(
        &self,
        ticket_id: &str,
        service: &Service,
    ) -> Result<Assertion, CasError> {
        let outcome = self.validate_inner(ticket_id, service).await;
        metrics::record_ticket_validation(if outcome.is_ok() { "success" } else { "failure" });
        finish("validate_service_ticket", &outcome);
        outcome
    }

    async fn validate_inner(&self, ticket_id: &str, service: &Service) -> Result<Assertion, CasError> {
        let versioned = self
            .live_ticket(ticket_id, &[TicketType::Service, TicketType::Proxy])
            .await?;
        let grant = versioned
            .ticket
            .grant()
            .cloned()
            .ok_or_else(|| invalid(ticket_id))?;

        self.consume(versioned).await?;

        if !grant.service.matches(service) {
            warn!(
                target: "cas.tickets",
                issued_for = %grant.service,
                "Ticket presented by a different service"
            );
            return Err(invalid(ticket_id));
        }

        let registered = self.registered_service(&grant.service).await?;
        let lineage = self.resolve_lineage(&grant.granting_ticket_id).await?;
        let root = lineage.root().cloned().ok_or_else(|| invalid(ticket_id))?;

        registered.ensure_principal_access(&grant.service, &root.principal)?;
        registered.ensure_required_handlers(&root)?;

        Ok(Assertion {
            principal: registered.released_principal(&root.principal),
            primary_authentication: root,
            chained_authentications: lineage.authentications,
            service: grant.service,
            from_new_login: grant.from_new_login,
            proxies: lineage.proxies,
        })
    }

    /// Let `callback` proxy on behalf of the session behind a service or
    /// proxy ticket. `result` is the callback's own authentication.
    #[instrument(
        name = "cas.create_pgt",
        skip_all,
        fields(ticket = %MaskedTicketId(ticket_id), callback = %callback, status)
    )]
    pub async fn create_proxy_granting_ticket(
        &self,
        ticket_id: &str,
        callback: &Service,
        result: &AuthenticationResult,
    ) -> Result<ProxyGrantingTicketIssued, CasError> {
        let outcome = self.create_pgt_inner(ticket_id, callback, result).await;
        finish("create_proxy_granting_ticket", &outcome);
        outcome
    }

    async fn create_pgt_inner(
        &self,
        ticket_id: &str,
        callback: &Service,
        result: &AuthenticationResult,
    ) -> Result<ProxyGrantingTicketIssued, CasError> {
        let versioned = self
            .live_ticket(ticket_id, &[TicketType::Service, TicketType::Proxy])
            .await?;
        let grant = versioned
            .ticket
            .grant()
            .ok_or_else(|| invalid(ticket_id))?;

        let registered = self.registered_service(&grant.service).await?;
        registered.ensure_proxy_allowed(&grant.service, callback)?;

        let parent = self
            .live_ticket(
                &grant.granting_ticket_id,
                &[TicketType::TicketGranting, TicketType::ProxyGranting],
            )
            .await?;
        let lineage = self.resolve_lineage(&parent.ticket.id).await?;
        let root = lineage.root().ok_or_else(|| invalid(ticket_id))?;
        registered.ensure_principal_access(&grant.service, &root.principal)?;

        let now = self.registry.clock().now();
        let pgt = self.factory.create_proxy_granting_ticket(
            &parent.ticket.id,
            result.authentication.clone(),
            callback,
            now,
        )?;
        let pgt_iou = self.factory.create_proxy_granting_ticket_iou()?;

        self.update_with_retry(parent, |ticket| {
            if let Some(granting) = ticket.granting_mut() {
                granting.proxy_granting_tickets.insert(pgt.id.clone());
            }
        })
        .await?;
        self.registry.add_ticket(&pgt).await?;
        metrics::record_ticket_created(pgt.ticket_type.prefix());

        info!(
            target: "cas.tickets",
            pgt = %MaskedTicketId(&pgt.id),
            "Created proxy-granting ticket"
        );
        Ok(ProxyGrantingTicketIssued {
            pgt_id: pgt.id,
            pgt_iou,
        })
    }

    /// Issue a proxy ticket for `service` from a proxy-granting ticket.
    /// Every ancestor up to the root session must still be live.
    #[instrument(
        name = "cas.grant_proxy_ticket",
        skip_all,
        fields(pgt = %MaskedTicketId(pgt_id), service = %service, status)
    )]
    pub async fn grant_proxy_ticket(&self, pgt_id: &str, service: &Service) -> Result<Ticket, CasError> {
        let outcome = self.grant_proxy_ticket_inner(pgt_id, service).await;
        finish("grant_proxy_ticket", &outcome);
        outcome
    }

    async fn grant_proxy_ticket_inner(&self, pgt_id: &str, service: &Service) -> Result<Ticket, CasError> {
        let pgt = self.live_ticket(pgt_id, &[TicketType::ProxyGranting]).await?;
        let lineage = self.resolve_lineage(pgt_id).await?;
        let root = lineage.root().ok_or_else(|| invalid(pgt_id))?;

        let registered = self.registered_service(service).await?;
        registered.ensure_principal_access(service, &root.principal)?;
        registered.ensure_sso_participation(service, false)?;
        registered.ensure_required_handlers(root)?;

        let now = self.registry.clock().now();
        let pt = self.factory.create_grant_ticket(&pgt.ticket, service, false, now)?;

        let only_most_recent = self.only_track_most_recent_session;
        let mut replaced = Vec::new();
        self.update_with_retry(pgt, |ticket| {
            ticket.mark_used(now);
            if let Some(granting) = ticket.granting_mut() {
                replaced = granting.record_service(service, &pt.id, only_most_recent);
            }
        })
        .await?;
        self.registry.add_ticket(&pt).await?;
        self.revoke_untracked(replaced).await?;
        metrics::record_ticket_created(pt.ticket_type.prefix());

        info!(
            target: "cas.tickets",
            pt = %MaskedTicketId(&pt.id),
            proxies = lineage.proxies.len(),
            "Granted proxy ticket"
        );
        Ok(pt)
    }

    /// End a session: remove the TGT and every ticket beneath it. Destroying
    /// an unknown or already removed id removes nothing and is not an error.
    #[instrument(name = "cas.destroy_tgt", skip_all, fields(tgt = %MaskedTicketId(tgt_id), status))]
    pub async fn destroy_ticket_granting_ticket(&self, tgt_id: &str) -> Result<u64, CasError> {
        let outcome = self.destroy_inner(tgt_id).await;
        finish("destroy_ticket_granting_ticket", &outcome);
        outcome
    }

    async fn destroy_inner(&self, tgt_id: &str) -> Result<u64, CasError> {
        if TicketType::from_id(tgt_id) != Some(TicketType::TicketGranting) {
            debug!(target: "cas.tickets", "Not a ticket-granting ticket id, nothing to destroy");
            return Ok(0);
        }
        let removed = self.registry.delete_ticket(tgt_id).await?;
        metrics::record_tickets_removed("destroyed", removed);
        info!(target: "cas.tickets", removed, "Destroyed ticket-granting ticket");
        Ok(removed)
    }

    pub async fn get_ticket_granting_ticket(&self, tgt_id: &str) -> Result<Ticket, CasError> {
        Ok(self
            .live_ticket(tgt_id, &[TicketType::TicketGranting])
            .await?
            .ticket)
    }

    /// Whether the session has been issued a ticket for `service`.
    pub async fn is_authenticated_to(&self, tgt_id: &str, service: &Service) -> Result<bool, CasError> {
        let tgt = self.registry.get_typed(tgt_id, TicketType::TicketGranting).await?;
        Ok(tgt
            .as_ref()
            .and_then(Ticket::granting)
            .is_some_and(|g| g.has_service(service)))
    }

    pub async fn count_sessions_for(&self, principal_id: &str) -> Result<u64, CasError> {
        Ok(self.registry.count_sessions_for(principal_id).await?)
    }

    async fn registered_service(&self, service: &Service) -> Result<Arc<RegisteredService>, CasError> {
        let registered = self
            .services
            .find_service_by(service)
            .await
            .ok_or_else(|| CasError::UnauthorizedService {
                service: service.id.clone(),
                reason: "service is not registered".to_string(),
            })?;
        registered.ensure_enabled(service)?;
        Ok(registered)
    }

    async fn enforce_multifactor(
        &self,
        authentication: &Authentication,
        registered: &RegisteredService,
        context: &RequestContext,
    ) -> Result<(), CasError> {
        let Some(engine) = &self.multifactor else {
            return Ok(());
        };
        match engine.evaluate(authentication, Some(registered), context).await? {
            MultifactorDecision::Proceed { provider } => Err(CasError::MultifactorRequired { provider }),
            MultifactorDecision::Unavailable { provider } => Err(CasError::MultifactorFailed {
                reason: format!("provider {provider} is unavailable"),
                provider: Some(provider),
            }),
            MultifactorDecision::NotRequired
            | MultifactorDecision::Satisfied { .. }
            | MultifactorDecision::Bypass { .. }
            | MultifactorDecision::Phantom { .. } => Ok(()),
        }
    }

    /// Live ticket of one of `types`; anything else reads as invalid.
    async fn live_ticket(&self, id: &str, types: &[TicketType]) -> Result<VersionedTicket, CasError> {
        let matches_type = TicketType::from_id(id).is_some_and(|t| types.contains(&t));
        if !matches_type {
            return Err(invalid(id));
        }
        match self.registry.get_versioned(id).await? {
            Some(versioned) if types.contains(&versioned.ticket.ticket_type) => Ok(versioned),
            _ => Err(invalid(id)),
        }
    }

    /// Record one use of a grant ticket in a single conditional write.
    /// Losing the race to another validator reads as an invalid ticket.
    async fn consume(&self, mut versioned: VersionedTicket) -> Result<(), CasError> {
        let now = self.registry.clock().now();
        versioned.ticket.mark_used(now);
        let id = versioned.ticket.id.clone();

        let won = if versioned.ticket.is_expired(now) {
            let removed = self
                .registry
                .delete_if_unchanged(&id, versioned.version)
                .await?;
            if removed {
                metrics::record_tickets_removed("consumed", 1);
            }
            removed
        } else {
            self.registry.update_if_unchanged(&versioned).await?
        };

        if won {
            Ok(())
        } else {
            debug!(target: "cas.tickets", "Ticket consumed concurrently");
            Err(invalid(&id))
        }
    }

    /// Apply `change` to a granting ticket and write it back conditionally,
    /// re-reading and re-applying when another writer got there first.
    /// Remove tickets a granting ticket no longer tracks. Nothing would
    /// cascade to them once the session is destroyed.
    async fn revoke_untracked(&self, ids: Vec<String>) -> Result<(), CasError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut removed = 0;
        for id in &ids {
            removed += self.registry.delete_ticket(id).await?;
        }
        debug!(target: "cas.tickets", replaced = ids.len(), removed, "Revoked earlier tickets for service");
        Ok(())
    }

    async fn update_with_retry<F>(&self, mut current: VersionedTicket, mut change: F) -> Result<Ticket, CasError>
    where
        F: FnMut(&mut Ticket) + Send,
    {
        let id = current.ticket.id.clone();
        for attempt in 1..=self.ticket_update_max_attempts {
            let mut candidate = current.clone();
            change(&mut candidate.ticket);
            if self.registry.update_if_unchanged(&candidate).await? {
                return Ok(candidate.ticket);
            }
            debug!(target: "cas.tickets", attempt, "Concurrent ticket update, retrying");
            current = self
                .registry
                .get_versioned(&id)
                .await?
                .ok_or_else(|| invalid(&id))?;
        }
        warn!(
            target: "cas.tickets",
            ticket = %MaskedTicketId(&id),
            attempts = self.ticket_update_max_attempts,
            "Gave up updating ticket under contention"
        );
        Err(CasError::Prevented(format!(
            "ticket {} changed concurrently",
            mask_ticket_id(&id)
        )))
    }

    /// Walk from a granting ticket to its root TGT through the registry.
    async fn resolve_lineage(&self, granting_id: &str) -> Result<Lineage, CasError> {
        let mut lineage = Lineage {
            authentications: Vec::new(),
            proxies: Vec::new(),
        };
        let mut next = Some(granting_id.to_string());

        while let Some(id) = next.take() {
            if lineage.authentications.len() >= MAX_LINEAGE_DEPTH {
                warn!(target: "cas.tickets", "Ticket lineage exceeds maximum depth");
                return Err(invalid(granting_id));
            }
            let ticket = self
                .registry
                .get_ticket(&id)
                .await?
                .ok_or_else(|| invalid(&id))?;
            let granting = ticket.granting().ok_or_else(|| invalid(&id))?;

            lineage.authentications.push(granting.authentication.clone());
            if let Some(proxied_by) = &granting.proxied_by {
                lineage.proxies.push(proxied_by.clone());
            }
            next = granting.parent_ticket_id.clone();
        }
        Ok(lineage)
    }
}

fn invalid(id: &str) -> CasError {
    CasError::InvalidTicket(mask_ticket_id(id))
}

/// Record the outcome on the current span and count failures.
fn finish<T>(operation: &str, outcome: &Result<T, CasError>) {
    let status = match outcome {
        Ok(_) => "success",
        Err(e) => {
            metrics::record_error(operation, ErrorCategory::from(e).as_str());
            debug!(target: "cas.tickets", operation, code = e.code(), "Operation failed");
            "error"
        }
    };
    tracing::Span::current().record("status", status);
}
