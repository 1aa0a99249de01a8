//! Authentication handler capability and its decorators.
//!
//! A handler is one credential source. Cross-cutting behavior (timeouts,
//! tracing, metrics) is layered on by wrapping a handler in
//! [`TimeoutHandler`] or [`InstrumentedHandler`], both of which are
//! handlers themselves.

use crate::authentication::credential::Credential;
use crate::authentication::error::HandlerError;
use crate::authentication::principal::Principal;
use crate::authentication::result::HandlerResult;
use crate::crypto;
use crate::observability::metrics;
use async_trait::async_trait;
use common::secret::ExposeSecret;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn, Instrument};

/// Bcrypt hash verified when the username is unknown, so a miss costs the
/// same as a wrong password.
const DUMMY_PASSWORD_HASH: &str = "$2b$12$LQv3c1yqBWVHxkd0LHAkCOYz6TtxMQJqhN8/LewY5GyYqExt7YD3a";

#[async_trait]
pub trait AuthenticationHandler: Send + Sync {
    /// Unique within a manager; used as the key of success/failure maps.
    fn name(&self) -> &str;

    fn supports(&self, credential: &Credential) -> bool;

    async fn authenticate(&self, credential: &Credential) -> Result<HandlerResult, HandlerError>;
}

/// Bounds a handler call. Expiry is reported as [`HandlerError::Prevented`],
/// never as a credential failure.
pub struct TimeoutHandler {
    inner: Arc<dyn AuthenticationHandler>,
    timeout: Duration,
}

impl TimeoutHandler {
    pub fn new(inner: Arc<dyn AuthenticationHandler>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl AuthenticationHandler for TimeoutHandler {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn supports(&self, credential: &Credential) -> bool {
        self.inner.supports(credential)
    }

    async fn authenticate(&self, credential: &Credential) -> Result<HandlerResult, HandlerError> {
        match tokio::time::timeout(self.timeout, self.inner.authenticate(credential)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    target: "cas.authn",
                    handler = self.inner.name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Authentication handler timed out"
                );
                Err(HandlerError::Prevented(format!(
                    "handler {} timed out after {}ms",
                    self.inner.name(),
                    self.timeout.as_millis()
                )))
            }
        }
    }
}

/// Adds a span and a duration histogram around every call.
pub struct InstrumentedHandler {
    inner: Arc<dyn AuthenticationHandler>,
}

impl InstrumentedHandler {
    pub fn new(inner: Arc<dyn AuthenticationHandler>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl AuthenticationHandler for InstrumentedHandler {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn supports(&self, credential: &Credential) -> bool {
        self.inner.supports(credential)
    }

    async fn authenticate(&self, credential: &Credential) -> Result<HandlerResult, HandlerError> {
        let span = tracing::debug_span!(
            "cas.authn.handler",
            handler = self.inner.name(),
            credential_type = %credential.credential_type()
        );
        let start = Instant::now();
        let result = self.inner.authenticate(credential).instrument(span).await;

        let status = match &result {
            Ok(_) => "success",
            Err(e) => e.code(),
        };
        metrics::record_handler_duration(self.inner.name(), status, start.elapsed());
        debug!(target: "cas.authn", handler = self.inner.name(), status, "Handler completed");
        result
    }
}

/// Wrap `handler` with instrumentation and, when given, a timeout.
pub fn decorate(
    handler: Arc<dyn AuthenticationHandler>,
    timeout: Option<Duration>,
) -> Arc<dyn AuthenticationHandler> {
    let instrumented: Arc<dyn AuthenticationHandler> = Arc::new(InstrumentedHandler::new(handler));
    match timeout {
        Some(timeout) => Arc::new(TimeoutHandler::new(instrumented, timeout)),
        None => instrumented,
    }
}

/// Static username → bcrypt hash map.
///
/// Intended for small fixed deployments and tests. Supports both plain and
/// remember-me username/password credentials.
pub struct AcceptUsersAuthenticationHandler {
    name: String,
    users: HashMap<String, String>,
    dummy_hash: String,
}

impl AcceptUsersAuthenticationHandler {
    /// `users` maps usernames to bcrypt hashes.
    pub fn new(name: impl Into<String>, users: HashMap<String, String>) -> Self {
        Self {
            name: name.into(),
            users,
            dummy_hash: DUMMY_PASSWORD_HASH.to_string(),
        }
    }

    /// Hash each plaintext password at `cost`. The unknown-user dummy hash
    /// uses the same cost.
    pub fn from_plaintext<I, U, P>(
        name: impl Into<String>,
        users: I,
        cost: u32,
    ) -> Result<Self, crypto::CryptoError>
    where
        I: IntoIterator<Item = (U, P)>,
        U: Into<String>,
        P: AsRef<str>,
    {
        let mut hashed = HashMap::new();
        for (username, password) in users {
            hashed.insert(username.into(), crypto::hash_password(password.as_ref(), cost)?);
        }
        Ok(Self {
            name: name.into(),
            users: hashed,
            dummy_hash: crypto::hash_password("unknown-user", cost)?,
        })
    }
}

#[async_trait]
impl AuthenticationHandler for AcceptUsersAuthenticationHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, credential: &Credential) -> bool {
        credential.as_username_password().is_some()
    }

    async fn authenticate(&self, credential: &Credential) -> Result<HandlerResult, HandlerError> {
        let Some(upc) = credential.as_username_password() else {
            return Err(HandlerError::FailedLogin);
        };

        let stored = self.users.get(&upc.username);
        let hash = stored.unwrap_or(&self.dummy_hash).clone();
        let password = upc.password.clone();

        // bcrypt is CPU-bound; keep it off the async workers.
        let verified =
            tokio::task::spawn_blocking(move || crypto::verify_password(password.expose_secret(), &hash))
            .await
            .map_err(|e| HandlerError::Prevented(format!("password verification aborted: {e}")))?
            .map_err(|e| HandlerError::Prevented(e.to_string()))?;

        if stored.is_none() {
            return Err(HandlerError::AccountNotFound);
        }
        if !verified {
            return Err(HandlerError::FailedLogin);
        }

        Ok(HandlerResult::new(&self.name, credential.metadata())
            .with_principal(Principal::new(upc.username.clone())))
    }
}
