//! Custom test assertions for expressive tests
//!
//! Provides trait-based assertions for tickets and orchestrator errors.

use cas_core::errors::CasError;
use cas_core::services::Service;
use cas_core::tickets::{Ticket, TicketType};

/// Custom assertions for issued tickets
///
/// # Example
/// ```rust,ignore
/// st.assert_service_ticket()
///     .assert_granted_by(&tgt.id)
///     .assert_for_service("https://a.example.org");
/// ```
pub trait TicketAssertions {
    /// Assert the ticket type and that the id carries the matching prefix
    fn assert_ticket_type(&self, expected: TicketType) -> &Self;

    fn assert_service_ticket(&self) -> &Self;

    fn assert_ticket_granting_ticket(&self) -> &Self;

    /// Assert the id has the `PREFIX-counter-random[-suffix]` shape
    fn assert_well_formed_id(&self) -> &Self;

    /// Assert an ST/PT was issued under `granting_ticket_id`
    fn assert_granted_by(&self, granting_ticket_id: &str) -> &Self;

    /// Assert an ST/PT was issued for `service`
    fn assert_for_service(&self, service: &str) -> &Self;

    /// Assert a TGT/PGT belongs to `principal_id`
    fn assert_principal(&self, principal_id: &str) -> &Self;

    /// Assert a TGT/PGT records a ticket issued for `service`
    fn assert_tracks_service(&self, service: &str) -> &Self;
}

impl TicketAssertions for Ticket {
    fn assert_ticket_type(&self, expected: TicketType) -> &Self {
        assert_eq!(
            self.ticket_type, expected,
            "Ticket {} has type {}, expected {}",
            self.id, self.ticket_type, expected
        );
        assert!(
            self.id.starts_with(&format!("{}-", expected.prefix())),
            "Ticket id {} lacks prefix {}",
            self.id,
            expected.prefix()
        );
        self
    }

    fn assert_service_ticket(&self) -> &Self {
        self.assert_ticket_type(TicketType::Service)
    }

    fn assert_ticket_granting_ticket(&self) -> &Self {
        self.assert_ticket_type(TicketType::TicketGranting)
    }

    fn assert_well_formed_id(&self) -> &Self {
        assert!(self.is_well_formed(), "Ticket {} is not well formed", self.id);

        let parts: Vec<&str> = self.id.splitn(3, '-').collect();
        assert!(parts.len() == 3, "Ticket id {} has too few segments", self.id);
        assert!(
            parts[1].parse::<u64>().is_ok(),
            "Ticket id {} has non-numeric counter '{}'",
            self.id,
            parts[1]
        );
        assert!(
            !parts[2].is_empty(),
            "Ticket id {} has no random segment",
            self.id
        );
        self
    }

    fn assert_granted_by(&self, granting_ticket_id: &str) -> &Self {
        let grant = self
            .grant()
            .unwrap_or_else(|| panic!("Ticket {} is not a grant ticket", self.id));
        assert_eq!(
            grant.granting_ticket_id, granting_ticket_id,
            "Ticket {} was granted by another ticket",
            self.id
        );
        self
    }

    fn assert_for_service(&self, service: &str) -> &Self {
        let grant = self
            .grant()
            .unwrap_or_else(|| panic!("Ticket {} is not a grant ticket", self.id));
        assert!(
            grant.service.matches(&Service::new(service)),
            "Ticket {} was issued for {}, expected {}",
            self.id,
            grant.service,
            service
        );
        self
    }

    fn assert_principal(&self, principal_id: &str) -> &Self {
        assert_eq!(
            self.principal_id(),
            Some(principal_id),
            "Ticket {} belongs to another principal",
            self.id
        );
        self
    }

    fn assert_tracks_service(&self, service: &str) -> &Self {
        let granting = self
            .granting()
            .unwrap_or_else(|| panic!("Ticket {} is not a granting ticket", self.id));
        assert!(
            granting.has_service(&Service::new(service)),
            "Ticket {} does not track {}. Tracked: {:?}",
            self.id,
            service,
            granting.services.keys().collect::<Vec<_>>()
        );
        self
    }
}

/// Assertions on orchestrator results
///
/// # Example
/// ```rust,ignore
/// cas.validate_service_ticket(&st.id, &service)
///     .await
///     .assert_error_code("INVALID_TICKET");
/// ```
pub trait CasResultAssertions {
    /// Assert the call failed with the given stable error code
    fn assert_error_code(&self, code: &str) -> &Self;

    fn assert_invalid_ticket(&self) -> &Self {
        self.assert_error_code("INVALID_TICKET")
    }
}

impl<T: std::fmt::Debug> CasResultAssertions for Result<T, CasError> {
    fn assert_error_code(&self, code: &str) -> &Self {
        match self {
            Ok(value) => panic!("Expected {code} error, got Ok({value:?})"),
            Err(err) => assert_eq!(err.code(), code, "Unexpected error: {err}"),
        }
        self
    }
}
