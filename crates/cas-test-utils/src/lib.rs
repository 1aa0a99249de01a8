//! # CAS Test Utilities
//!
//! Shared test utilities for the CAS core crate.
//!
//! This crate provides:
//! - Fixed test identities and service URLs
//! - Authentication builders (TestAuthenticationBuilder)
//! - Scriptable handlers and MFA providers
//! - An in-memory harness wiring registry, services and orchestrator
//! - Custom assertions (TicketAssertions trait)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cas_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let harness = CasTestHarness::builder().build();
//!
//!     let tgt = harness.login(TEST_USER).await?;
//!     let st = harness.grant(&tgt.id, SERVICE_A).await?;
//!
//!     st.assert_service_ticket()
//!         .assert_granted_by(&tgt.id);
//!     Ok(())
//! }
//! ```

pub mod assertions;
pub mod builders;
pub mod harness;
pub mod mock_handlers;
pub mod test_ids;

// Re-export commonly used items
pub use assertions::*;
pub use builders::*;
pub use harness::*;
pub use mock_handlers::*;
pub use test_ids::*;

pub use cas_core::clock::ManualClock;
