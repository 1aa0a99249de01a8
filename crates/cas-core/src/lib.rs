//! Single sign-on ticketing core.
//!
//! This library issues, validates and revokes the tickets behind an SSO
//! session and runs the authentication and multifactor decisions that gate
//! them. Protocol adapters (CAS, OAuth, SAML endpoints) sit outside and call
//! into [`services::CentralAuthenticationService`].
//!
//! # Modules
//!
//! - `authentication` - Credential handlers, policies and principal resolution
//! - `clock` - Injectable time source
//! - `config` - Environment-driven configuration
//! - `crypto` - Ticket encryption, id randomness, digests
//! - `errors` - The error taxonomy the orchestrator reports
//! - `mfa` - Multifactor triggers, bypass rules and failure modes
//! - `observability` - Metrics and log-correlation helpers
//! - `registry` - Ticket registry and its storage backends
//! - `services` - Registered services and the orchestrator
//! - `tickets` - Ticket model, expiration policies and factory

pub mod authentication;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod mfa;
pub mod observability;
pub mod registry;
pub mod services;
pub mod tickets;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CasConfig;
pub use errors::CasError;
pub use registry::TicketRegistry;
pub use services::CentralAuthenticationService;
