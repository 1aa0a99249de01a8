//! Rules deciding whether a request needs step-up authentication.

use super::{MultifactorError, RequestContext};
use crate::authentication::{Authentication, Principal};
use crate::services::RegisteredService;
use async_trait::async_trait;
use regex::Regex;

/// Request parameter naming a provider explicitly.
pub const DEFAULT_AUTHN_METHOD_PARAMETER: &str = "authn_method";

#[async_trait]
pub trait MultifactorTrigger: Send + Sync {
    fn name(&self) -> &str;

    /// Evaluation position under first-activated selection; lower runs first.
    fn order(&self) -> i32 {
        0
    }

    /// The provider id this trigger asks for, if it fires.
    async fn is_activated(
        &self,
        authentication: &Authentication,
        service: Option<&RegisteredService>,
        context: &RequestContext,
    ) -> Result<Option<String>, MultifactorError>;
}

/// Requires one provider for every request.
#[derive(Debug, Clone)]
pub struct GlobalTrigger {
    provider: String,
    order: i32,
}

impl GlobalTrigger {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            order: 0,
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

#[async_trait]
impl MultifactorTrigger for GlobalTrigger {
    fn name(&self) -> &str {
        "global"
    }

    fn order(&self) -> i32 {
        self.order
    }

    async fn is_activated(
        &self,
        _authentication: &Authentication,
        _service: Option<&RegisteredService>,
        _context: &RequestContext,
    ) -> Result<Option<String>, MultifactorError> {
        Ok(Some(self.provider.clone()))
    }
}

fn any_value_matches(values: Option<&[String]>, pattern: &Regex) -> bool {
    values.is_some_and(|values| values.iter().any(|v| pattern.is_match(v)))
}

/// Fires when a principal attribute (e.g. group membership) matches.
#[derive(Debug, Clone)]
pub struct PrincipalAttributeTrigger {
    attribute: String,
    value: Regex,
    provider: String,
    order: i32,
}

impl PrincipalAttributeTrigger {
    pub fn new(
        attribute: impl Into<String>,
        value: &str,
        provider: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            attribute: attribute.into(),
            value: Regex::new(value)?,
            provider: provider.into(),
            order: 10,
        })
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

#[async_trait]
impl MultifactorTrigger for PrincipalAttributeTrigger {
    fn name(&self) -> &str {
        "principal-attribute"
    }

    fn order(&self) -> i32 {
        self.order
    }

    async fn is_activated(
        &self,
        authentication: &Authentication,
        _service: Option<&RegisteredService>,
        _context: &RequestContext,
    ) -> Result<Option<String>, MultifactorError> {
        let principal = &authentication.principal;
        Ok(any_value_matches(principal.attribute(&self.attribute), &self.value)
            .then(|| self.provider.clone()))
    }
}

/// Fires when an authentication attribute matches, e.g. a particular
/// handler in `authenticationMethod`.
#[derive(Debug, Clone)]
pub struct AuthenticationAttributeTrigger {
    attribute: String,
    value: Regex,
    provider: String,
    order: i32,
}

impl AuthenticationAttributeTrigger {
    pub fn new(
        attribute: impl Into<String>,
        value: &str,
        provider: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            attribute: attribute.into(),
            value: Regex::new(value)?,
            provider: provider.into(),
            order: 20,
        })
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

#[async_trait]
impl MultifactorTrigger for AuthenticationAttributeTrigger {
    fn name(&self) -> &str {
        "authentication-attribute"
    }

    fn order(&self) -> i32 {
        self.order
    }

    async fn is_activated(
        &self,
        authentication: &Authentication,
        _service: Option<&RegisteredService>,
        _context: &RequestContext,
    ) -> Result<Option<String>, MultifactorError> {
        Ok(
            any_value_matches(authentication.attribute(&self.attribute), &self.value)
                .then(|| self.provider.clone()),
        )
    }
}

/// Fires for services whose multifactor policy lists providers, optionally
/// only for principals carrying a matching attribute.
#[derive(Debug, Clone, Default)]
pub struct RegisteredServiceTrigger {
    order: i32,
}

impl RegisteredServiceTrigger {
    pub fn new() -> Self {
        Self { order: 30 }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

fn principal_condition_holds(
    principal: &Principal,
    name: Option<&str>,
    value: Option<&Regex>,
) -> bool {
    match (name, value) {
        (None, _) => true,
        (Some(name), None) => principal.attribute(name).is_some(),
        (Some(name), Some(value)) => any_value_matches(principal.attribute(name), value),
    }
}

#[async_trait]
impl MultifactorTrigger for RegisteredServiceTrigger {
    fn name(&self) -> &str {
        "registered-service"
    }

    fn order(&self) -> i32 {
        self.order
    }

    async fn is_activated(
        &self,
        authentication: &Authentication,
        service: Option<&RegisteredService>,
        _context: &RequestContext,
    ) -> Result<Option<String>, MultifactorError> {
        let Some(policy) = service.and_then(|s| s.multifactor_policy.as_ref()) else {
            return Ok(None);
        };
        if policy.bypass_enabled {
            return Ok(None);
        }
        if !principal_condition_holds(
            &authentication.principal,
            policy.principal_attribute_name.as_deref(),
            policy.principal_attribute_value.as_ref(),
        ) {
            return Ok(None);
        }
        Ok(policy.providers.first().cloned())
    }
}

/// Fires when the request names a provider in a parameter.
#[derive(Debug, Clone)]
pub struct RequestParameterTrigger {
    parameter: String,
    order: i32,
}

impl Default for RequestParameterTrigger {
    fn default() -> Self {
        Self::new(DEFAULT_AUTHN_METHOD_PARAMETER)
    }
}

impl RequestParameterTrigger {
    pub fn new(parameter: impl Into<String>) -> Self {
        Self {
            parameter: parameter.into(),
            order: 40,
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

#[async_trait]
impl MultifactorTrigger for RequestParameterTrigger {
    fn name(&self) -> &str {
        "request-parameter"
    }

    fn order(&self) -> i32 {
        self.order
    }

    async fn is_activated(
        &self,
        _authentication: &Authentication,
        _service: Option<&RegisteredService>,
        context: &RequestContext,
    ) -> Result<Option<String>, MultifactorError> {
        Ok(context
            .parameter(&self.parameter)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string))
    }
}
