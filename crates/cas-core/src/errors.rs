use crate::authentication::AuthenticationError;
use crate::crypto::CryptoError;
use crate::mfa::MultifactorError;
use crate::observability::ErrorCategory;
use crate::registry::RegistryError;
use thiserror::Error;

/// Every failure the orchestrator reports.
///
/// Protocol adapters translate these into wire responses; backend errors
/// never cross this boundary unconverted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CasError {
    /// Ticket missing, expired, consumed, of the wrong type, or presented for
    /// the wrong service. Carries the masked ticket id.
    #[error("Invalid ticket: {0}")]
    InvalidTicket(String),

    #[error("Service {service} is not authorized: {reason}")]
    UnauthorizedService { service: String, reason: String },

    #[error("Authentication does not satisfy the handlers required by the service: {required:?}")]
    UnsatisfiedAuthenticationPolicy { required: Vec<String> },

    #[error(transparent)]
    Authentication(#[from] AuthenticationError),

    #[error("Multifactor authentication with provider {provider} is required")]
    MultifactorRequired { provider: String },

    #[error("Multifactor authentication failed: {reason}")]
    MultifactorFailed {
        provider: Option<String>,
        reason: String,
    },

    /// Infrastructure failure; the outcome could not be determined.
    #[error("Request prevented: {0}")]
    Prevented(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CasError {
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::from(self)
    }

    /// Stable code for adapters to map onto protocol error responses.
    pub fn code(&self) -> &'static str {
        match self {
            CasError::InvalidTicket(_) => "INVALID_TICKET",
            CasError::UnauthorizedService { .. } => "UNAUTHORIZED_SERVICE",
            CasError::UnsatisfiedAuthenticationPolicy { .. } => "UNSATISFIED_AUTHENTICATION_POLICY",
            CasError::Authentication(_) => "AUTHENTICATION_FAILED",
            CasError::MultifactorRequired { .. } => "MULTIFACTOR_REQUIRED",
            CasError::MultifactorFailed { .. } => "MULTIFACTOR_FAILED",
            CasError::Prevented(_) => "PREVENTED",
            CasError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller may reasonably retry. The core itself never does.
    pub fn is_retryable(&self) -> bool {
        match self {
            CasError::Prevented(_) => true,
            CasError::Authentication(e) => e.is_prevented(),
            _ => false,
        }
    }
}

impl From<RegistryError> for CasError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Crypto(e) => CasError::Internal(format!("Registry cipher failure: {e}")),
            other => CasError::Prevented(other.to_string()),
        }
    }
}

impl From<CryptoError> for CasError {
    fn from(err: CryptoError) -> Self {
        CasError::Internal(err.to_string())
    }
}

impl From<MultifactorError> for CasError {
    fn from(err: MultifactorError) -> Self {
        CasError::MultifactorFailed {
            provider: err.provider().map(str::to_string),
            reason: err.to_string(),
        }
    }
}
