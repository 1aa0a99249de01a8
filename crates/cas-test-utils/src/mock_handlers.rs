//! Scriptable authentication handlers and multifactor providers.

use async_trait::async_trait;
use cas_core::authentication::{
    AuthenticationHandler, Credential, CredentialType, HandlerError, HandlerResult, Principal,
};
use cas_core::mfa::{FailureMode, MultifactorAuthenticationProvider};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Handler that returns a fixed outcome and counts how often it ran.
pub struct MockAuthenticationHandler {
    name: String,
    outcome: Result<Option<Principal>, HandlerError>,
    supported: Option<CredentialType>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockAuthenticationHandler {
    /// Accepts every credential, proposing no principal of its own.
    pub fn succeeding(name: impl Into<String>) -> Self {
        Self::with_outcome(name, Ok(None))
    }

    /// Accepts every credential and proposes `principal`.
    pub fn resolving(name: impl Into<String>, principal: Principal) -> Self {
        Self::with_outcome(name, Ok(Some(principal)))
    }

    pub fn failing(name: impl Into<String>, error: HandlerError) -> Self {
        Self::with_outcome(name, Err(error))
    }

    fn with_outcome(
        name: impl Into<String>,
        outcome: Result<Option<Principal>, HandlerError>,
    ) -> Self {
        Self {
            name: name.into(),
            outcome,
            supported: None,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Only claim support for credentials of this type.
    pub fn supporting(mut self, credential_type: CredentialType) -> Self {
        self.supported = Some(credential_type);
        self
    }

    /// Sleep before answering, to exercise handler timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthenticationHandler for MockAuthenticationHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, credential: &Credential) -> bool {
        self.supported
            .map_or(true, |supported| supported == credential.credential_type())
    }

    async fn authenticate(&self, credential: &Credential) -> Result<HandlerResult, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.outcome {
            Ok(principal) => {
                let result = HandlerResult::new(self.name.clone(), credential.metadata());
                Ok(match principal {
                    Some(principal) => result.with_principal(principal.clone()),
                    None => result,
                })
            }
            Err(error) => Err(error.clone()),
        }
    }
}

/// Provider whose availability can be flipped mid-test.
#[derive(Debug)]
pub struct MockMultifactorProvider {
    id: String,
    order: i32,
    failure_mode: FailureMode,
    available: AtomicBool,
    delay: Option<Duration>,
    availability_checks: AtomicUsize,
}

impl MockMultifactorProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            order: 0,
            failure_mode: FailureMode::Undefined,
            available: AtomicBool::new(true),
            delay: None,
            availability_checks: AtomicUsize::new(0),
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    pub fn unavailable(self) -> Self {
        self.available.store(false, Ordering::SeqCst);
        self
    }

    /// Delay the availability answer, to exercise the engine's timeout.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn availability_checks(&self) -> usize {
        self.availability_checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MultifactorAuthenticationProvider for MockMultifactorProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    async fn is_available(&self) -> bool {
        self.availability_checks.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.available.load(Ordering::SeqCst)
    }
}
