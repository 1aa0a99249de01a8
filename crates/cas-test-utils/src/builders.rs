//! Builders for authentications and authentication results.

use crate::test_ids::PRIMARY_HANDLER;
use cas_core::authentication::{
    AttributeMap, Authentication, AuthenticationResult, CredentialMetadata, CredentialType,
    HandlerResult, Principal, AUTHENTICATION_METHOD_ATTRIBUTE, AUTHN_CONTEXT_ATTRIBUTE,
    CREDENTIAL_TYPE_ATTRIBUTE, REMEMBER_ME_ATTRIBUTE, SUCCESSFUL_HANDLERS_ATTRIBUTE,
};
use cas_core::services::Service;
use chrono::{DateTime, Utc};

/// Builder for an [`Authentication`] that looks like one the manager
/// produced: handlers recorded as successes with their protocol attributes.
///
/// # Example
/// ```rust,ignore
/// let auth = TestAuthenticationBuilder::new("casuser")
///     .with_principal_attribute("memberOf", "faculty")
///     .with_provider("mfa-duo")
///     .build();
/// ```
pub struct TestAuthenticationBuilder {
    principal_id: String,
    principal_attributes: AttributeMap,
    handlers: Vec<String>,
    no_handlers: bool,
    credential_type: CredentialType,
    providers: Vec<String>,
    extra: Vec<(String, String)>,
    remember_me: bool,
    authenticated_at: DateTime<Utc>,
    service: Option<Service>,
    credential_provided: bool,
}

impl TestAuthenticationBuilder {
    pub fn new(principal_id: impl Into<String>) -> Self {
        Self {
            principal_id: principal_id.into(),
            principal_attributes: AttributeMap::new(),
            handlers: Vec::new(),
            no_handlers: false,
            credential_type: CredentialType::UsernamePassword,
            providers: Vec::new(),
            extra: Vec::new(),
            remember_me: false,
            authenticated_at: Utc::now(),
            service: None,
            credential_provided: true,
        }
    }

    /// Add a successful handler. Without any, [`PRIMARY_HANDLER`] is used.
    pub fn with_handler(mut self, name: impl Into<String>) -> Self {
        self.no_handlers = false;
        self.handlers.push(name.into());
        self
    }

    /// Build an authentication with no successful handler.
    pub fn without_handlers(mut self) -> Self {
        self.handlers.clear();
        self.no_handlers = true;
        self
    }

    pub fn with_credential_type(mut self, credential_type: CredentialType) -> Self {
        self.credential_type = credential_type;
        self
    }

    pub fn with_principal_attribute(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.principal_attributes
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    pub fn with_authentication_attribute(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.extra.push((name.into(), value.into()));
        self
    }

    /// Mark a multifactor provider as already satisfied.
    pub fn with_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.providers.push(provider_id.into());
        self
    }

    pub fn remember_me(mut self) -> Self {
        self.remember_me = true;
        self
    }

    pub fn authenticated_at(mut self, at: DateTime<Utc>) -> Self {
        self.authenticated_at = at;
        self
    }

    pub fn for_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(Service::new(service));
        self
    }

    /// Result of a request that reused the SSO session instead of
    /// presenting credentials.
    pub fn from_sso_session(mut self) -> Self {
        self.credential_provided = false;
        self
    }

    pub fn build(&self) -> Authentication {
        let principal =
            Principal::with_attributes(self.principal_id.clone(), self.principal_attributes.clone());
        let mut authentication = Authentication::new(principal, self.authenticated_at);

        let credential = CredentialMetadata {
            id: Some(self.principal_id.clone()),
            credential_type: self.credential_type,
        };
        authentication.credentials.push(credential.clone());

        let handlers: Vec<&str> = if self.no_handlers {
            Vec::new()
        } else if self.handlers.is_empty() {
            vec![PRIMARY_HANDLER]
        } else {
            self.handlers.iter().map(String::as_str).collect()
        };
        for name in handlers {
            authentication
                .successes
                .insert(name.to_string(), HandlerResult::new(name, credential.clone()));
            authentication.add_attribute_value(AUTHENTICATION_METHOD_ATTRIBUTE, name);
            authentication.add_attribute_value(SUCCESSFUL_HANDLERS_ATTRIBUTE, name);
        }
        authentication.add_attribute_value(
            CREDENTIAL_TYPE_ATTRIBUTE,
            self.credential_type.as_str(),
        );

        for provider in &self.providers {
            authentication.add_attribute_value(AUTHN_CONTEXT_ATTRIBUTE, provider.clone());
        }
        for (name, value) in &self.extra {
            authentication.add_attribute_value(name, value.clone());
        }
        if self.remember_me {
            authentication.add_attribute_value(REMEMBER_ME_ATTRIBUTE, "true");
        }
        authentication
    }

    pub fn build_result(&self) -> AuthenticationResult {
        let mut result = AuthenticationResult::new(self.build());
        result.service = self.service.clone();
        result.credential_provided = self.credential_provided;
        result
    }
}

/// Shorthand for a plain password login by `principal_id`.
pub fn authentication_for(principal_id: &str) -> AuthenticationResult {
    TestAuthenticationBuilder::new(principal_id).build_result()
}
