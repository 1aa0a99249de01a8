//! The authentication manager: runs credentials through the handler chain,
//! applies the configured policies and resolves one principal.

use crate::authentication::credential::Credential;
use crate::authentication::error::{AuthenticationError, HandlerFailures};
use crate::authentication::handlers::{decorate, AuthenticationHandler};
use crate::authentication::policy::{AnyAuthenticationPolicy, AuthenticationPolicy, HandlerOutcomes};
use crate::authentication::principal::{AttributeMergeStrategy, Principal};
use crate::authentication::resolvers::{EchoPrincipalResolver, PrincipalResolver};
use crate::authentication::result::{
    Authentication, AuthenticationResult, AuthenticationResultBuilder, HandlerResult,
    AUTHENTICATION_METHOD_ATTRIBUTE, CREDENTIAL_TYPE_ATTRIBUTE, REMEMBER_ME_ATTRIBUTE,
    SUCCESSFUL_HANDLERS_ATTRIBUTE,
};
use crate::clock::Clock;
use crate::observability::{hash_for_correlation, metrics};
use crate::services::Service;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

struct HandlerRegistration {
    handler: Arc<dyn AuthenticationHandler>,
    resolver: Arc<dyn PrincipalResolver>,
}

pub struct AuthenticationManager {
    handlers: Vec<HandlerRegistration>,
    /// Run after each handler's own resolver; they may add attributes.
    attribute_resolvers: Vec<Arc<dyn PrincipalResolver>>,
    policies: Vec<Arc<dyn AuthenticationPolicy>>,
    merge_strategy: AttributeMergeStrategy,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for AuthenticationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationManager")
            .field(
                "handlers",
                &self.handlers.iter().map(|r| r.handler.name()).collect::<Vec<_>>(),
            )
            .field(
                "policies",
                &self.policies.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("merge_strategy", &self.merge_strategy)
            .finish()
    }
}

pub struct AuthenticationManagerBuilder {
    handlers: Vec<(Arc<dyn AuthenticationHandler>, Option<Arc<dyn PrincipalResolver>>)>,
    attribute_resolvers: Vec<Arc<dyn PrincipalResolver>>,
    policies: Vec<Arc<dyn AuthenticationPolicy>>,
    merge_strategy: AttributeMergeStrategy,
    handler_timeout: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl AuthenticationManagerBuilder {
    /// Handlers are consulted in the order they are added.
    pub fn handler(mut self, handler: Arc<dyn AuthenticationHandler>) -> Self {
        self.handlers.push((handler, None));
        self
    }

    pub fn handler_with_resolver(
        mut self,
        handler: Arc<dyn AuthenticationHandler>,
        resolver: Arc<dyn PrincipalResolver>,
    ) -> Self {
        self.handlers.push((handler, Some(resolver)));
        self
    }

    pub fn attribute_resolver(mut self, resolver: Arc<dyn PrincipalResolver>) -> Self {
        self.attribute_resolvers.push(resolver);
        self
    }

    /// Every added policy must be satisfied. With none added, the manager
    /// uses [`AnyAuthenticationPolicy`].
    pub fn policy(mut self, policy: Arc<dyn AuthenticationPolicy>) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn merge_strategy(mut self, strategy: AttributeMergeStrategy) -> Self {
        self.merge_strategy = strategy;
        self
    }

    /// Bound each handler call; expiry reads as `Prevented`.
    pub fn handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> AuthenticationManager {
        let echo: Arc<dyn PrincipalResolver> = Arc::new(EchoPrincipalResolver);
        let handlers = self
            .handlers
            .into_iter()
            .map(|(handler, resolver)| HandlerRegistration {
                handler: decorate(handler, self.handler_timeout),
                resolver: resolver.unwrap_or_else(|| Arc::clone(&echo)),
            })
            .collect();

        let mut policies = self.policies;
        if policies.is_empty() {
            policies.push(Arc::new(AnyAuthenticationPolicy::default()));
        }

        AuthenticationManager {
            handlers,
            attribute_resolvers: self.attribute_resolvers,
            policies,
            merge_strategy: self.merge_strategy,
            clock: self.clock,
        }
    }
}

impl AuthenticationManager {
    pub fn builder(clock: Arc<dyn Clock>) -> AuthenticationManagerBuilder {
        AuthenticationManagerBuilder {
            handlers: Vec::new(),
            attribute_resolvers: Vec::new(),
            policies: Vec::new(),
            merge_strategy: AttributeMergeStrategy::default(),
            handler_timeout: None,
            clock,
        }
    }

    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|r| r.handler.name()).collect()
    }

    /// Authenticate `credentials`, in order, against every supporting handler.
    ///
    /// Handler failures never stop the chain unless a policy asks for it.
    /// The returned error carries the per-handler failure map, which holds
    /// failure kinds only, never credential material.
    #[instrument(skip_all, name = "cas.authn.authenticate", fields(credentials = credentials.len()))]
    pub async fn authenticate(
        &self,
        credentials: &[Credential],
    ) -> Result<Authentication, AuthenticationError> {
        if credentials.is_empty() {
            return Err(AuthenticationError::NoCredentials);
        }

        let start = Instant::now();
        let stop_after_success = self.policies.iter().all(|p| p.stop_after_first_success());

        let mut successes: BTreeMap<String, HandlerResult> = BTreeMap::new();
        let mut failures = HandlerFailures::new();
        let mut principals: Vec<Principal> = Vec::new();
        let mut remember_me = false;

        'credentials: for credential in credentials {
            for registration in &self.handlers {
                let handler = &registration.handler;
                if !handler.supports(credential) {
                    continue;
                }

                match handler.authenticate(credential).await {
                    Ok(result) => {
                        debug!(target: "cas.authn", handler = handler.name(), "Handler succeeded");
                        if let Some(principal) =
                            registration.resolver.resolve(credential, &result).await
                        {
                            principals.push(principal);
                        }
                        for resolver in &self.attribute_resolvers {
                            if let Some(principal) = resolver.resolve(credential, &result).await {
                                principals.push(principal);
                            }
                        }
                        remember_me |= credential.is_remember_me();
                        successes.insert(handler.name().to_string(), result);

                        if stop_after_success {
                            continue 'credentials;
                        }
                    }
                    Err(error) => {
                        debug!(
                            target: "cas.authn",
                            handler = handler.name(),
                            failure = error.code(),
                            "Handler failed"
                        );
                        let resume = self
                            .policies
                            .iter()
                            .all(|p| p.should_resume_on_failure(&error));
                        failures.insert(handler.name().to_string(), error);
                        if !resume {
                            break 'credentials;
                        }
                    }
                }
            }
        }

        let outcome = self.evaluate(credentials, successes, failures, principals, remember_me);
        let status = match &outcome {
            Ok(_) => "success",
            Err(e) if e.is_prevented() => "prevented",
            Err(_) => "failure",
        };
        metrics::record_authentication(status, start.elapsed());

        match &outcome {
            Ok(authentication) => info!(
                target: "cas.authn",
                principal = %hash_for_correlation(&authentication.principal.id),
                handlers = authentication.successes.len(),
                "Authentication succeeded"
            ),
            Err(e) => warn!(target: "cas.authn", error = %e, "Authentication failed"),
        }
        outcome
    }

    /// [`Self::authenticate`], packaged for the orchestrator.
    pub async fn authenticate_for(
        &self,
        service: Option<Service>,
        credentials: &[Credential],
    ) -> Result<AuthenticationResult, AuthenticationError> {
        let authentication = self.authenticate(credentials).await?;
        AuthenticationResultBuilder::new()
            .collect(authentication)
            .build(service)
    }

    fn evaluate(
        &self,
        credentials: &[Credential],
        successes: BTreeMap<String, HandlerResult>,
        failures: HandlerFailures,
        principals: Vec<Principal>,
        remember_me: bool,
    ) -> Result<Authentication, AuthenticationError> {
        if successes.is_empty() {
            return Err(AuthenticationError::Failed { failures });
        }

        let outcomes = HandlerOutcomes {
            successes: &successes,
            failures: &failures,
        };
        if let Some(policy) = self.policies.iter().find(|p| !p.is_satisfied_by(outcomes)) {
            return Err(AuthenticationError::PolicyNotSatisfied {
                policy: policy.name().to_string(),
                failures,
            });
        }

        let mut principals = principals.into_iter();
        let mut principal = principals
            .next()
            .filter(|p| !p.id.is_empty())
            .ok_or(AuthenticationError::UnresolvedPrincipal)?;
        for other in principals {
            self.merge_strategy
                .merge(&mut principal.attributes, &other.attributes);
        }

        let mut authentication = Authentication::new(principal, self.clock.now());
        authentication.credentials = credentials.iter().map(Credential::metadata).collect();
        for (name, result) in &successes {
            authentication.add_attribute_value(AUTHENTICATION_METHOD_ATTRIBUTE, name.clone());
            authentication.add_attribute_value(SUCCESSFUL_HANDLERS_ATTRIBUTE, name.clone());
            authentication.add_attribute_value(
                CREDENTIAL_TYPE_ATTRIBUTE,
                result.credential.credential_type.as_str(),
            );
        }
        if remember_me {
            authentication.add_attribute_value(REMEMBER_ME_ATTRIBUTE, "true");
        }
        authentication.successes = successes;
        authentication.failures = failures;
        Ok(authentication)
    }
}
