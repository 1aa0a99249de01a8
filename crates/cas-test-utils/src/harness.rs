//! In-memory test harness for orchestrator tests
//!
//! Wires a manual clock, in-memory registry, services manager and
//! [`CentralAuthenticationService`] together so tests can drive whole
//! ticket flows and move time explicitly.

use crate::builders::TestAuthenticationBuilder;
use crate::test_ids::{CATCH_ALL_PATTERN, CATCH_ALL_SERVICE_ID};
use cas_core::clock::{Clock, ManualClock};
use cas_core::config::CasConfig;
use cas_core::errors::CasError;
use cas_core::mfa::{AuthenticationEventRepository, MultifactorEngine, RequestContext};
use cas_core::registry::{InMemoryTicketStore, TicketRegistry};
use cas_core::services::{
    Assertion, CentralAuthenticationService, InMemoryServicesManager, RegisteredService, Service,
};
use cas_core::tickets::{Ticket, TicketFactory};
use std::sync::Arc;

/// Builder for [`CasTestHarness`]
///
/// # Example
/// ```rust,ignore
/// let harness = CasTestHarness::builder()
///     .configure(|c| {
///         c.tgt_max_time_to_live_secs = 2;
///         c.tgt_time_to_idle_secs = 10;
///     })
///     .build();
/// ```
pub struct CasTestHarnessBuilder {
    config: CasConfig,
    services: Vec<RegisteredService>,
    multifactor: Option<MultifactorEngine>,
    authentication_events: Option<Arc<dyn AuthenticationEventRepository>>,
}

impl CasTestHarnessBuilder {
    pub fn configure(mut self, f: impl FnOnce(&mut CasConfig)) -> Self {
        f(&mut self.config);
        self
    }

    /// Register a service. The first call replaces the default catch-all.
    pub fn service(mut self, service: RegisteredService) -> Self {
        self.services.push(service);
        self
    }

    pub fn multifactor(mut self, engine: MultifactorEngine) -> Self {
        self.multifactor = Some(engine);
        self
    }

    /// Record authentication history for risk-based triggers.
    pub fn authentication_events(mut self, repository: Arc<dyn AuthenticationEventRepository>) -> Self {
        self.authentication_events = Some(repository);
        self
    }

    pub fn build(self) -> CasTestHarness {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(InMemoryTicketStore::new());
        let registry = Arc::new(TicketRegistry::new(store.clone(), clock.clone()));

        let services = if self.services.is_empty() {
            vec![catch_all_service()]
        } else {
            self.services
        };
        let services = Arc::new(InMemoryServicesManager::new(services));

        let mut cas = CentralAuthenticationService::new(
            registry.clone(),
            TicketFactory::from_config(&self.config),
            services.clone(),
            &self.config,
        );
        if let Some(engine) = self.multifactor {
            cas = cas.with_multifactor_engine(Arc::new(engine));
        }
        if let Some(repository) = self.authentication_events {
            cas = cas.with_authentication_events(repository);
        }

        CasTestHarness {
            clock,
            store,
            registry,
            services,
            cas,
            config: self.config,
        }
    }
}

/// Running orchestrator over in-memory storage with a controllable clock
pub struct CasTestHarness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<InMemoryTicketStore>,
    pub registry: Arc<TicketRegistry>,
    pub services: Arc<InMemoryServicesManager>,
    pub cas: CentralAuthenticationService,
    pub config: CasConfig,
}

impl CasTestHarness {
    pub fn builder() -> CasTestHarnessBuilder {
        CasTestHarnessBuilder {
            config: CasConfig::default(),
            services: Vec::new(),
            multifactor: None,
            authentication_events: None,
        }
    }

    /// Harness with default configuration and the catch-all service.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start a session for `principal_id` authenticated at the harness clock.
    pub async fn login(&self, principal_id: &str) -> anyhow::Result<Ticket> {
        let result = TestAuthenticationBuilder::new(principal_id)
            .authenticated_at(self.clock.now())
            .build_result();
        self.cas
            .create_ticket_granting_ticket(&result)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create TGT: {}", e))
    }

    /// Issue a service ticket from an existing session, no new credentials.
    pub async fn grant(&self, tgt_id: &str, service: &str) -> Result<Ticket, CasError> {
        self.cas
            .grant_service_ticket(tgt_id, &Service::new(service), None, &RequestContext::new())
            .await
    }

    /// Issue a service ticket for a request with the given details.
    pub async fn grant_from(
        &self,
        tgt_id: &str,
        service: &str,
        context: &RequestContext,
    ) -> Result<Ticket, CasError> {
        self.cas
            .grant_service_ticket(tgt_id, &Service::new(service), None, context)
            .await
    }

    pub async fn validate(&self, ticket_id: &str, service: &str) -> Result<Assertion, CasError> {
        self.cas
            .validate_service_ticket(ticket_id, &Service::new(service))
            .await
    }

    /// Whether the registry still returns `ticket_id` (expiry applied).
    pub async fn exists(&self, ticket_id: &str) -> bool {
        self.registry
            .get_ticket(ticket_id)
            .await
            .expect("registry read failed")
            .is_some()
    }

    pub fn advance_secs(&self, secs: i64) {
        self.clock.advance_secs(secs);
    }
}

impl Default for CasTestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Enabled service matching every https URL.
pub fn catch_all_service() -> RegisteredService {
    RegisteredService::new(CATCH_ALL_SERVICE_ID, "catch-all", CATCH_ALL_PATTERN)
        .expect("catch-all pattern compiles")
}
