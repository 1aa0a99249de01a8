use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Why a single handler did not authenticate a credential.
///
/// `Prevented` means the handler could not reach a verdict (backend down,
/// timeout). Every other variant is a definitive "credential is not
/// acceptable" answer.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum HandlerError {
    #[error("Account not found")]
    AccountNotFound,

    #[error("Invalid credentials")]
    FailedLogin,

    #[error("Credential expired")]
    CredentialExpired,

    #[error("Account disabled")]
    AccountDisabled,

    #[error("Account locked")]
    AccountLocked,

    #[error("Account expired")]
    AccountExpired,

    #[error("Password must be changed")]
    AccountPasswordMustChange,

    #[error("Login not permitted at this time")]
    InvalidLoginTime,

    #[error("Login not permitted from this location")]
    InvalidLoginLocation,

    #[error("Authentication prevented: {0}")]
    Prevented(String),
}

impl HandlerError {
    pub fn is_prevented(&self) -> bool {
        matches!(self, HandlerError::Prevented(_))
    }

    /// Stable code for audit messages and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            HandlerError::AccountNotFound => "AccountNotFoundException",
            HandlerError::FailedLogin => "FailedLoginException",
            HandlerError::CredentialExpired => "CredentialExpiredException",
            HandlerError::AccountDisabled => "AccountDisabledException",
            HandlerError::AccountLocked => "AccountLockedException",
            HandlerError::AccountExpired => "AccountExpiredException",
            HandlerError::AccountPasswordMustChange => "AccountPasswordMustChangeException",
            HandlerError::InvalidLoginTime => "InvalidLoginTimeException",
            HandlerError::InvalidLoginLocation => "InvalidLoginLocationException",
            HandlerError::Prevented(_) => "PreventedException",
        }
    }
}

/// Per-handler failures keyed by handler name.
pub type HandlerFailures = BTreeMap<String, HandlerError>;

/// Overall failure of the authentication manager.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    #[error("No credentials supplied")]
    NoCredentials,

    /// Every handler that was consulted failed, or no handler supported the
    /// credentials (empty map).
    #[error("Authentication failed: {}", describe(.failures))]
    Failed { failures: HandlerFailures },

    /// At least one handler succeeded but the configured policy rejected
    /// the overall result.
    #[error("Authentication policy {policy} not satisfied")]
    PolicyNotSatisfied {
        policy: String,
        failures: HandlerFailures,
    },

    #[error("Principal could not be resolved")]
    UnresolvedPrincipal,

    #[error("Mixed principals: session belongs to a different principal")]
    MixedPrincipal,
}

impl AuthenticationError {
    pub fn failures(&self) -> Option<&HandlerFailures> {
        match self {
            AuthenticationError::Failed { failures }
            | AuthenticationError::PolicyNotSatisfied { failures, .. } => Some(failures),
            _ => None,
        }
    }

    /// True when no handler gave a definitive answer and at least one was
    /// prevented. Callers may retry or fail open/closed on this.
    pub fn is_prevented(&self) -> bool {
        self.failures()
            .map(|failures| {
                !failures.is_empty() && failures.values().all(HandlerError::is_prevented)
            })
            .unwrap_or(false)
    }
}

fn describe(failures: &HandlerFailures) -> String {
    if failures.is_empty() {
        return "no handler supports the supplied credentials".to_string();
    }
    failures
        .iter()
        .map(|(handler, error)| format!("{handler}={}", error.code()))
        .collect::<Vec<_>>()
        .join(", ")
}
