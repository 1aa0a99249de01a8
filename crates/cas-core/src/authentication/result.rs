//! The outcome of authentication: an immutable snapshot that tickets carry.

use crate::authentication::credential::CredentialMetadata;
use crate::authentication::error::{AuthenticationError, HandlerError};
use crate::authentication::principal::{AttributeMergeStrategy, AttributeMap, Principal};
use crate::services::Service;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Names of the handlers that satisfied the authentication.
pub const AUTHENTICATION_METHOD_ATTRIBUTE: &str = "authenticationMethod";
pub const SUCCESSFUL_HANDLERS_ATTRIBUTE: &str = "successfulAuthenticationHandlers";
pub const CREDENTIAL_TYPE_ATTRIBUTE: &str = "credentialType";
pub const REMEMBER_ME_ATTRIBUTE: &str = "longTermAuthenticationRequestTokenUsed";
/// Multifactor providers that have been satisfied for this authentication.
pub const AUTHN_CONTEXT_ATTRIBUTE: &str = "authnContextClass";

/// What one handler produced on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerResult {
    pub handler_name: String,
    pub credential: CredentialMetadata,
    /// Principal proposed by the handler, if it knows one.
    pub principal: Option<Principal>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl HandlerResult {
    pub fn new(handler_name: impl Into<String>, credential: CredentialMetadata) -> Self {
        Self {
            handler_name: handler_name.into(),
            credential,
            principal: None,
            warnings: Vec::new(),
        }
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authentication {
    pub principal: Principal,
    pub authentication_date: DateTime<Utc>,
    /// Credentials in the order they were presented.
    pub credentials: Vec<CredentialMetadata>,
    pub successes: BTreeMap<String, HandlerResult>,
    pub failures: BTreeMap<String, HandlerError>,
    /// Protocol-level attributes, e.g. which handler or provider satisfied
    /// the request.
    pub attributes: AttributeMap,
}

impl Authentication {
    pub fn new(principal: Principal, authentication_date: DateTime<Utc>) -> Self {
        Self {
            principal,
            authentication_date,
            credentials: Vec::new(),
            successes: BTreeMap::new(),
            failures: BTreeMap::new(),
            attributes: AttributeMap::new(),
        }
    }

    /// An authentication with no principal id or no successful handler
    /// cannot back a session.
    pub fn is_empty(&self) -> bool {
        self.principal.id.is_empty() || self.successes.is_empty()
    }

    pub fn attribute(&self, name: &str) -> Option<&[String]> {
        self.attributes.get(name).map(Vec::as_slice)
    }

    pub fn has_attribute_value(&self, name: &str, value: &str) -> bool {
        self.attribute(name)
            .map(|values| values.iter().any(|v| v == value))
            .unwrap_or(false)
    }

    pub fn add_attribute_value(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        let values = self.attributes.entry(name.to_string()).or_default();
        if !values.contains(&value) {
            values.push(value);
        }
    }

    pub fn is_remember_me(&self) -> bool {
        self.has_attribute_value(REMEMBER_ME_ATTRIBUTE, "true")
    }

    pub fn satisfied_by_handler(&self, handler_name: &str) -> bool {
        self.successes.contains_key(handler_name)
    }

    /// True once `provider_id` has been recorded as satisfied.
    pub fn satisfied_by_provider(&self, provider_id: &str) -> bool {
        self.has_attribute_value(AUTHN_CONTEXT_ATTRIBUTE, provider_id)
    }
}

/// An authentication handed to the orchestrator, plus the service it was
/// requested for and whether credentials were presented in this request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationResult {
    pub authentication: Authentication,
    pub service: Option<Service>,
    pub credential_provided: bool,
}

impl AuthenticationResult {
    pub fn new(authentication: Authentication) -> Self {
        Self {
            authentication,
            service: None,
            credential_provided: true,
        }
    }

    pub fn for_service(mut self, service: Service) -> Self {
        self.service = Some(service);
        self
    }
}

/// Collects the authentications of one login transaction (primary plus any
/// step-up) and merges them into a single result.
///
/// The first collected principal is elected; attributes, handler results
/// and credentials from all authentications are combined.
#[derive(Debug, Default)]
pub struct AuthenticationResultBuilder {
    authentications: Vec<Authentication>,
    credential_provided: bool,
}

impl AuthenticationResultBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collect(mut self, authentication: Authentication) -> Self {
        self.credential_provided |= !authentication.credentials.is_empty();
        self.authentications.push(authentication);
        self
    }

    pub fn credential_provided(mut self, provided: bool) -> Self {
        self.credential_provided = provided;
        self
    }

    pub fn build(
        self,
        service: Option<Service>,
    ) -> Result<AuthenticationResult, AuthenticationError> {
        let mut authentications = self.authentications.into_iter();
        let mut merged = authentications
            .next()
            .ok_or(AuthenticationError::UnresolvedPrincipal)?;

        for next in authentications {
            if next.principal.id == merged.principal.id {
                AttributeMergeStrategy::MultiValued
                    .merge(&mut merged.principal.attributes, &next.principal.attributes);
            }
            AttributeMergeStrategy::MultiValued.merge(&mut merged.attributes, &next.attributes);
            merged.credentials.extend(next.credentials);
            merged.successes.extend(next.successes);
            for (handler, failure) in next.failures {
                merged.failures.entry(handler).or_insert(failure);
            }
        }

        if merged.principal.id.is_empty() {
            return Err(AuthenticationError::UnresolvedPrincipal);
        }

        Ok(AuthenticationResult {
            authentication: merged,
            service,
            credential_provided: self.credential_provided,
        })
    }
}
