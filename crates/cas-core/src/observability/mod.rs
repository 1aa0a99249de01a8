//! Metrics and log-correlation helpers.
//!
//! # Privacy by Default
//!
//! Instrumented entry points use `#[instrument(skip_all)]` and add fields
//! explicitly. Fields fall into three groups:
//! - **SAFE**: logged as-is (ticket types, handler names, transitions)
//! - **MASKED**: ticket ids, via `common::sanitize::MaskedTicketId`
//! - **HASHED**: principal ids, via [`hash_for_correlation`]
//!
//! Credentials and secret values never reach a log line.

pub mod metrics;

use crate::errors::CasError;
use sha2::{Digest, Sha256};

/// Hash a value for log correlation (SHA-256, first 8 hex chars).
///
/// One-way and truncated: good enough to follow one principal through a
/// log stream without writing the id itself.
pub fn hash_for_correlation(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(digest.get(..4).unwrap_or_default())
}

/// Error categories for metrics labels (bounded cardinality).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Credential failures and unresolved principals
    Authentication,
    /// Service access and authentication-policy denials
    Authorization,
    /// Missing, expired or consumed tickets
    Ticket,
    /// Step-up required or failed
    Multifactor,
    /// Registry, crypto and other infrastructure failures
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Authorization => "authorization",
            ErrorCategory::Ticket => "ticket",
            ErrorCategory::Multifactor => "multifactor",
            ErrorCategory::Internal => "internal",
        }
    }
}

impl From<&CasError> for ErrorCategory {
    fn from(err: &CasError) -> Self {
        match err {
            CasError::Authentication(_) => ErrorCategory::Authentication,
            CasError::UnauthorizedService { .. }
            | CasError::UnsatisfiedAuthenticationPolicy { .. } => ErrorCategory::Authorization,
            CasError::InvalidTicket(_) => ErrorCategory::Ticket,
            CasError::MultifactorRequired { .. } | CasError::MultifactorFailed { .. } => {
                ErrorCategory::Multifactor
            }
            CasError::Prevented(_) | CasError::Internal(_) => ErrorCategory::Internal,
        }
    }
}
