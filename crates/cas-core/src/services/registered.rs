//! Registered service definitions and the access checks they impose.

use super::Service;
use crate::authentication::{AttributeMap, Authentication, Principal};
use crate::errors::CasError;
use crate::mfa::FailureMode;
use regex::Regex;
use std::collections::BTreeMap;

/// Who may use a service, and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessStrategy {
    pub enabled: bool,
    /// When false, every grant needs freshly presented credentials.
    pub sso_enabled: bool,
    /// Attribute name → acceptable values. The principal must carry each
    /// attribute with at least one acceptable value; an empty value list
    /// only requires the attribute to be present.
    pub required_attributes: BTreeMap<String, Vec<String>>,
}

impl Default for AccessStrategy {
    fn default() -> Self {
        Self {
            enabled: true,
            sso_enabled: true,
            required_attributes: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum ProxyPolicy {
    #[default]
    Refuse,
    Allow {
        callback_pattern: Regex,
    },
}

/// Per-service multifactor requirements.
#[derive(Debug, Clone, Default)]
pub struct MultifactorPolicy {
    pub providers: Vec<String>,
    pub failure_mode: FailureMode,
    /// Skip multifactor entirely for this service.
    pub bypass_enabled: bool,
    /// Only require the providers when this principal attribute matches.
    pub principal_attribute_name: Option<String>,
    pub principal_attribute_value: Option<Regex>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AttributeReleasePolicy {
    #[default]
    ReturnAll,
    ReturnAllowed(Vec<String>),
    DenyAll,
}

impl AttributeReleasePolicy {
    pub fn apply(&self, attributes: &AttributeMap) -> AttributeMap {
        match self {
            AttributeReleasePolicy::ReturnAll => attributes.clone(),
            AttributeReleasePolicy::ReturnAllowed(allowed) => attributes
                .iter()
                .filter(|(name, _)| allowed.contains(name))
                .map(|(name, values)| (name.clone(), values.clone()))
                .collect(),
            AttributeReleasePolicy::DenyAll => AttributeMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegisteredService {
    pub id: u64,
    pub name: String,
    /// Anchored pattern the requesting service URL must match in full.
    pub service_id: Regex,
    /// Lower values are matched first.
    pub evaluation_order: i32,
    pub access_strategy: AccessStrategy,
    pub proxy_policy: ProxyPolicy,
    pub multifactor_policy: Option<MultifactorPolicy>,
    pub attribute_release: AttributeReleasePolicy,
    /// Principal attribute released as the username instead of the id.
    pub username_attribute: Option<String>,
    /// Handlers the session's authentication must include.
    pub required_handlers: Vec<String>,
}

impl RegisteredService {
    pub fn new(id: u64, name: impl Into<String>, service_id: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            id,
            name: name.into(),
            service_id: Regex::new(&format!("^(?:{service_id})$"))?,
            evaluation_order: 0,
            access_strategy: AccessStrategy::default(),
            proxy_policy: ProxyPolicy::default(),
            multifactor_policy: None,
            attribute_release: AttributeReleasePolicy::default(),
            username_attribute: None,
            required_handlers: Vec::new(),
        })
    }

    pub fn with_evaluation_order(mut self, order: i32) -> Self {
        self.evaluation_order = order;
        self
    }

    pub fn with_access_strategy(mut self, strategy: AccessStrategy) -> Self {
        self.access_strategy = strategy;
        self
    }

    pub fn with_proxy_policy(mut self, policy: ProxyPolicy) -> Self {
        self.proxy_policy = policy;
        self
    }

    pub fn with_multifactor_policy(mut self, policy: MultifactorPolicy) -> Self {
        self.multifactor_policy = Some(policy);
        self
    }

    pub fn with_attribute_release(mut self, policy: AttributeReleasePolicy) -> Self {
        self.attribute_release = policy;
        self
    }

    pub fn with_username_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.username_attribute = Some(attribute.into());
        self
    }

    pub fn with_required_handlers<I, S>(mut self, handlers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_handlers = handlers.into_iter().map(Into::into).collect();
        self
    }

    pub fn matches(&self, service: &Service) -> bool {
        self.service_id.is_match(&service.id)
    }

    pub fn ensure_enabled(&self, service: &Service) -> Result<(), CasError> {
        if self.access_strategy.enabled {
            Ok(())
        } else {
            Err(unauthorized(service, "service is disabled"))
        }
    }

    pub fn ensure_principal_access(
        &self,
        service: &Service,
        principal: &Principal,
    ) -> Result<(), CasError> {
        let missing = self
            .access_strategy
            .required_attributes
            .iter()
            .find(|(name, accepted)| match principal.attribute(name) {
                None => true,
                Some(values) => {
                    !accepted.is_empty() && !values.iter().any(|v| accepted.contains(v))
                }
            });
        match missing {
            Some((name, _)) => Err(unauthorized(
                service,
                &format!("principal lacks required attribute {name}"),
            )),
            None => Ok(()),
        }
    }

    /// A grant from an existing session is refused when the service opts
    /// out of single sign-on, unless credentials came with this request.
    pub fn ensure_sso_participation(
        &self,
        service: &Service,
        credential_provided: bool,
    ) -> Result<(), CasError> {
        if self.access_strategy.sso_enabled || credential_provided {
            Ok(())
        } else {
            Err(unauthorized(service, "service does not participate in single sign-on"))
        }
    }

    pub fn ensure_required_handlers(&self, authentication: &Authentication) -> Result<(), CasError> {
        let unsatisfied: Vec<String> = self
            .required_handlers
            .iter()
            .filter(|h| !authentication.satisfied_by_handler(h))
            .cloned()
            .collect();
        if unsatisfied.is_empty() {
            Ok(())
        } else {
            Err(CasError::UnsatisfiedAuthenticationPolicy {
                required: unsatisfied,
            })
        }
    }

    pub fn ensure_proxy_allowed(&self, service: &Service, callback: &Service) -> Result<(), CasError> {
        match &self.proxy_policy {
            ProxyPolicy::Allow { callback_pattern } if callback_pattern.is_match(&callback.id) => Ok(()),
            ProxyPolicy::Allow { .. } => Err(unauthorized(service, "proxy callback not allowed")),
            ProxyPolicy::Refuse => Err(unauthorized(service, "service may not proxy")),
        }
    }

    /// The principal as this service sees it: released attributes only,
    /// and the username attribute in place of the id when configured.
    pub fn released_principal(&self, principal: &Principal) -> Principal {
        let id = self
            .username_attribute
            .as_deref()
            .and_then(|attr| principal.attribute(attr))
            .and_then(|values| values.first())
            .cloned()
            .unwrap_or_else(|| principal.id.clone());
        Principal::with_attributes(id, self.attribute_release.apply(&principal.attributes))
    }
}

fn unauthorized(service: &Service, reason: &str) -> CasError {
    CasError::UnauthorizedService {
        service: service.id.clone(),
        reason: reason.to_string(),
    }
}
