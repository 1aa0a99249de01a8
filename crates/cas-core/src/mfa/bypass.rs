//! Bypass rules: reasons to skip a provider a trigger selected.
//!
//! Bypass is consulted before the provider's availability, so a bypassed
//! request never touches the provider's backend.

use super::RequestContext;
use crate::authentication::{
    Authentication, CredentialType, AUTHENTICATION_METHOD_ATTRIBUTE,
};
use crate::clock::Clock;
use crate::services::RegisteredService;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait]
pub trait BypassEvaluator: Send + Sync {
    fn name(&self) -> &str;

    async fn should_bypass(
        &self,
        authentication: &Authentication,
        service: Option<&RegisteredService>,
        provider: &str,
        context: &RequestContext,
    ) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NeverBypass;

#[async_trait]
impl BypassEvaluator for NeverBypass {
    fn name(&self) -> &str {
        "never"
    }

    async fn should_bypass(
        &self,
        _authentication: &Authentication,
        _service: Option<&RegisteredService>,
        _provider: &str,
        _context: &RequestContext,
    ) -> bool {
        false
    }
}

/// Bypass on a principal attribute. In missing-attribute mode the bypass
/// applies to principals that do not carry the attribute at all.
#[derive(Debug, Clone)]
pub struct PrincipalAttributeBypass {
    attribute: String,
    value: Option<Regex>,
    when_missing: bool,
}

impl PrincipalAttributeBypass {
    pub fn matching(attribute: impl Into<String>, value: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            attribute: attribute.into(),
            value: Some(Regex::new(value)?),
            when_missing: false,
        })
    }

    pub fn when_missing(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: None,
            when_missing: true,
        }
    }
}

#[async_trait]
impl BypassEvaluator for PrincipalAttributeBypass {
    fn name(&self) -> &str {
        "principal-attribute"
    }

    async fn should_bypass(
        &self,
        authentication: &Authentication,
        _service: Option<&RegisteredService>,
        _provider: &str,
        _context: &RequestContext,
    ) -> bool {
        let values = authentication.principal.attribute(&self.attribute);
        if self.when_missing {
            return values.map_or(true, <[String]>::is_empty);
        }
        match (&self.value, values) {
            (Some(pattern), Some(values)) => values.iter().any(|v| pattern.is_match(v)),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthenticationAttributeBypass {
    attribute: String,
    value: Regex,
}

impl AuthenticationAttributeBypass {
    pub fn new(attribute: impl Into<String>, value: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            attribute: attribute.into(),
            value: Regex::new(value)?,
        })
    }
}

#[async_trait]
impl BypassEvaluator for AuthenticationAttributeBypass {
    fn name(&self) -> &str {
        "authentication-attribute"
    }

    async fn should_bypass(
        &self,
        authentication: &Authentication,
        _service: Option<&RegisteredService>,
        _provider: &str,
        _context: &RequestContext,
    ) -> bool {
        authentication
            .attribute(&self.attribute)
            .is_some_and(|values| values.iter().any(|v| self.value.is_match(v)))
    }
}

/// Bypass when any of the named handlers succeeded for the session.
#[derive(Debug, Clone)]
pub struct AuthenticationHandlerBypass {
    handlers: Vec<String>,
}

impl AuthenticationHandlerBypass {
    pub fn new<I, S>(handlers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            handlers: handlers.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl BypassEvaluator for AuthenticationHandlerBypass {
    fn name(&self) -> &str {
        "authentication-handler"
    }

    async fn should_bypass(
        &self,
        authentication: &Authentication,
        _service: Option<&RegisteredService>,
        _provider: &str,
        _context: &RequestContext,
    ) -> bool {
        self.handlers
            .iter()
            .any(|h| authentication.satisfied_by_handler(h))
    }
}

/// Bypass when `authenticationMethod` matches.
#[derive(Debug, Clone)]
pub struct AuthenticationMethodBypass {
    method: Regex,
}

impl AuthenticationMethodBypass {
    pub fn new(method: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            method: Regex::new(method)?,
        })
    }
}

#[async_trait]
impl BypassEvaluator for AuthenticationMethodBypass {
    fn name(&self) -> &str {
        "authentication-method"
    }

    async fn should_bypass(
        &self,
        authentication: &Authentication,
        _service: Option<&RegisteredService>,
        _provider: &str,
        _context: &RequestContext,
    ) -> bool {
        authentication
            .attribute(AUTHENTICATION_METHOD_ATTRIBUTE)
            .is_some_and(|values| values.iter().any(|v| self.method.is_match(v)))
    }
}

#[derive(Debug, Clone)]
pub struct CredentialTypeBypass {
    types: Vec<CredentialType>,
}

impl CredentialTypeBypass {
    pub fn new(types: impl IntoIterator<Item = CredentialType>) -> Self {
        Self {
            types: types.into_iter().collect(),
        }
    }
}

#[async_trait]
impl BypassEvaluator for CredentialTypeBypass {
    fn name(&self) -> &str {
        "credential-type"
    }

    async fn should_bypass(
        &self,
        authentication: &Authentication,
        _service: Option<&RegisteredService>,
        _provider: &str,
        _context: &RequestContext,
    ) -> bool {
        authentication
            .credentials
            .iter()
            .any(|c| self.types.contains(&c.credential_type))
    }
}

/// Bypass on request properties: a header value or the remote address.
#[derive(Debug, Clone, Default)]
pub struct HttpRequestBypass {
    headers: Vec<(String, Regex)>,
    remote_address: Option<Regex>,
}

impl HttpRequestBypass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, regex::Error> {
        self.headers.push((name.to_ascii_lowercase(), Regex::new(value)?));
        Ok(self)
    }

    pub fn with_remote_address(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.remote_address = Some(Regex::new(pattern)?);
        Ok(self)
    }
}

#[async_trait]
impl BypassEvaluator for HttpRequestBypass {
    fn name(&self) -> &str {
        "http-request"
    }

    async fn should_bypass(
        &self,
        _authentication: &Authentication,
        _service: Option<&RegisteredService>,
        _provider: &str,
        context: &RequestContext,
    ) -> bool {
        let address_matches = match (&self.remote_address, context.remote_address.as_deref()) {
            (Some(pattern), Some(address)) => pattern.is_match(address),
            _ => false,
        };
        address_matches
            || self.headers.iter().any(|(name, pattern)| {
                context.header(name).is_some_and(|v| pattern.is_match(v))
            })
    }
}

/// Bypass when the service's multifactor policy says so.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegisteredServiceBypass;

#[async_trait]
impl BypassEvaluator for RegisteredServiceBypass {
    fn name(&self) -> &str {
        "registered-service"
    }

    async fn should_bypass(
        &self,
        _authentication: &Authentication,
        service: Option<&RegisteredService>,
        _provider: &str,
        _context: &RequestContext,
    ) -> bool {
        service
            .and_then(|s| s.multifactor_policy.as_ref())
            .is_some_and(|p| p.bypass_enabled)
    }
}

/// Devices a principal has previously completed step-up on.
#[async_trait]
pub trait TrustedDeviceStore: Send + Sync {
    async fn trusted_since(&self, principal: &str, fingerprint: &str) -> Option<DateTime<Utc>>;

    async fn trust(&self, principal: &str, fingerprint: &str, at: DateTime<Utc>);
}

#[derive(Debug, Default)]
pub struct InMemoryTrustedDeviceStore {
    devices: RwLock<HashMap<(String, String), DateTime<Utc>>>,
}

impl InMemoryTrustedDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrustedDeviceStore for InMemoryTrustedDeviceStore {
    async fn trusted_since(&self, principal: &str, fingerprint: &str) -> Option<DateTime<Utc>> {
        self.devices
            .read()
            .await
            .get(&(principal.to_string(), fingerprint.to_string()))
            .copied()
    }

    async fn trust(&self, principal: &str, fingerprint: &str, at: DateTime<Utc>) {
        self.devices
            .write()
            .await
            .insert((principal.to_string(), fingerprint.to_string()), at);
    }
}

/// Bypass for a device the principal trusted within the last `trusted_for`.
pub struct TrustedDeviceBypass {
    store: Arc<dyn TrustedDeviceStore>,
    trusted_for: Duration,
    clock: Arc<dyn Clock>,
}

impl TrustedDeviceBypass {
    pub fn new(store: Arc<dyn TrustedDeviceStore>, trusted_for: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            trusted_for,
            clock,
        }
    }

    pub fn for_days(store: Arc<dyn TrustedDeviceStore>, days: i64, clock: Arc<dyn Clock>) -> Self {
        Self::new(store, Duration::days(days), clock)
    }
}

#[async_trait]
impl BypassEvaluator for TrustedDeviceBypass {
    fn name(&self) -> &str {
        "trusted-device"
    }

    async fn should_bypass(
        &self,
        authentication: &Authentication,
        _service: Option<&RegisteredService>,
        _provider: &str,
        context: &RequestContext,
    ) -> bool {
        let Some(fingerprint) = context.device_fingerprint.as_deref() else {
            return false;
        };
        match self
            .store
            .trusted_since(&authentication.principal.id, fingerprint)
            .await
        {
            Some(since) => self.clock.now() - since <= self.trusted_for,
            None => false,
        }
    }
}

/// Bypasses when any member does. Members run in order and evaluation
/// stops at the first bypass.
#[derive(Default, Clone)]
pub struct ChainingBypassEvaluator {
    evaluators: Vec<Arc<dyn BypassEvaluator>>,
}

impl ChainingBypassEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, evaluator: Arc<dyn BypassEvaluator>) -> Self {
        self.evaluators.push(evaluator);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.evaluators.is_empty()
    }

    /// Name of the first member that bypasses.
    pub async fn first_bypass(
        &self,
        authentication: &Authentication,
        service: Option<&RegisteredService>,
        provider: &str,
        context: &RequestContext,
    ) -> Option<&str> {
        for evaluator in &self.evaluators {
            if evaluator
                .should_bypass(authentication, service, provider, context)
                .await
            {
                return Some(evaluator.name());
            }
        }
        None
    }
}

#[async_trait]
impl BypassEvaluator for ChainingBypassEvaluator {
    fn name(&self) -> &str {
        "chaining"
    }

    async fn should_bypass(
        &self,
        authentication: &Authentication,
        service: Option<&RegisteredService>,
        provider: &str,
        context: &RequestContext,
    ) -> bool {
        self.first_bypass(authentication, service, provider, context)
            .await
            .is_some()
    }
}
