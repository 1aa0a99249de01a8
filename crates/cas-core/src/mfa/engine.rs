use super::bypass::{BypassEvaluator, ChainingBypassEvaluator};
use super::provider::{MultifactorAuthenticationProvider, MultifactorProviderRegistry};
use super::triggers::MultifactorTrigger;
use super::{FailureMode, MultifactorDecision, MultifactorError, RequestContext, TriggerSelection};
use crate::authentication::Authentication;
use crate::config::CasConfig;
use crate::observability::{hash_for_correlation, metrics};
use crate::services::RegisteredService;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const DEFAULT_AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolves the multifactor decision for a request.
///
/// Order of evaluation:
/// 1. triggers select a provider (per [`TriggerSelection`]);
/// 2. a session already carrying that provider is `Satisfied`;
/// 3. bypass evaluators may skip it;
/// 4. the provider's availability is checked under a timeout, and an
///    unreachable provider is mapped through the resolved [`FailureMode`].
pub struct MultifactorEngine {
    triggers: Vec<Arc<dyn MultifactorTrigger>>,
    bypass: ChainingBypassEvaluator,
    providers: MultifactorProviderRegistry,
    selection: TriggerSelection,
    global_failure_mode: FailureMode,
    availability_timeout: Duration,
}

pub struct MultifactorEngineBuilder {
    triggers: Vec<Arc<dyn MultifactorTrigger>>,
    bypass: ChainingBypassEvaluator,
    providers: MultifactorProviderRegistry,
    selection: TriggerSelection,
    global_failure_mode: FailureMode,
    availability_timeout: Duration,
}

impl MultifactorEngineBuilder {
    pub fn trigger(mut self, trigger: Arc<dyn MultifactorTrigger>) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn bypass(mut self, evaluator: Arc<dyn BypassEvaluator>) -> Self {
        self.bypass = self.bypass.with(evaluator);
        self
    }

    pub fn selection(mut self, selection: TriggerSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn global_failure_mode(mut self, mode: FailureMode) -> Self {
        self.global_failure_mode = mode;
        self
    }

    pub fn availability_timeout(mut self, timeout: Duration) -> Self {
        self.availability_timeout = timeout;
        self
    }

    /// Selection, global failure mode and availability timeout from config.
    pub fn configure(self, config: &CasConfig) -> Self {
        self.selection(config.mfa_trigger_selection)
            .global_failure_mode(config.mfa_global_failure_mode)
            .availability_timeout(config.handler_timeout)
    }

    pub fn build(mut self) -> MultifactorEngine {
        // Stable: equal orders keep registration order.
        self.triggers.sort_by_key(|t| t.order());
        MultifactorEngine {
            triggers: self.triggers,
            bypass: self.bypass,
            providers: self.providers,
            selection: self.selection,
            global_failure_mode: self.global_failure_mode,
            availability_timeout: self.availability_timeout,
        }
    }
}

impl MultifactorEngine {
    pub fn builder(providers: MultifactorProviderRegistry) -> MultifactorEngineBuilder {
        MultifactorEngineBuilder {
            triggers: Vec::new(),
            bypass: ChainingBypassEvaluator::new(),
            providers,
            selection: TriggerSelection::default(),
            global_failure_mode: FailureMode::Closed,
            availability_timeout: DEFAULT_AVAILABILITY_TIMEOUT,
        }
    }

    pub fn providers(&self) -> &MultifactorProviderRegistry {
        &self.providers
    }

    #[instrument(skip_all, fields(principal = %hash_for_correlation(&authentication.principal.id)))]
    pub async fn evaluate(
        &self,
        authentication: &Authentication,
        service: Option<&RegisteredService>,
        context: &RequestContext,
    ) -> Result<MultifactorDecision, MultifactorError> {
        let decision = self.decide(authentication, service, context).await?;
        metrics::record_mfa_decision(decision.as_str());
        info!(
            target: "cas.mfa",
            transition = decision.as_str(),
            provider = decision.provider().unwrap_or("-"),
            "Multifactor decision"
        );
        Ok(decision)
    }

    async fn decide(
        &self,
        authentication: &Authentication,
        service: Option<&RegisteredService>,
        context: &RequestContext,
    ) -> Result<MultifactorDecision, MultifactorError> {
        let Some(provider) = self.select_provider(authentication, service, context).await? else {
            return Ok(MultifactorDecision::NotRequired);
        };
        let id = provider.id().to_string();

        if authentication.satisfied_by_provider(&id) {
            return Ok(MultifactorDecision::Satisfied { provider: id });
        }

        if let Some(evaluator) = self
            .bypass
            .first_bypass(authentication, service, &id, context)
            .await
        {
            info!(target: "cas.mfa", provider = %id, evaluator, "Multifactor bypassed");
            return Ok(MultifactorDecision::Bypass { provider: id });
        }

        if self.is_available(provider.as_ref()).await {
            return Ok(MultifactorDecision::Proceed { provider: id });
        }

        let service_mode = service
            .and_then(|s| s.multifactor_policy.as_ref())
            .map_or(FailureMode::Undefined, |p| p.failure_mode);
        let mode = FailureMode::resolve([
            service_mode,
            provider.failure_mode(),
            self.global_failure_mode,
        ]);
        warn!(
            target: "cas.mfa",
            provider = %id,
            failure_mode = %mode,
            "Multifactor provider unavailable"
        );
        Ok(match mode {
            FailureMode::Open => MultifactorDecision::Bypass { provider: id },
            FailureMode::Phantom => MultifactorDecision::Phantom { provider: id },
            FailureMode::Closed | FailureMode::Undefined => {
                MultifactorDecision::Unavailable { provider: id }
            }
        })
    }

    async fn select_provider(
        &self,
        authentication: &Authentication,
        service: Option<&RegisteredService>,
        context: &RequestContext,
    ) -> Result<Option<Arc<dyn MultifactorAuthenticationProvider>>, MultifactorError> {
        let mut selected: Option<Arc<dyn MultifactorAuthenticationProvider>> = None;
        for trigger in &self.triggers {
            let Some(id) = trigger.is_activated(authentication, service, context).await? else {
                continue;
            };
            let provider = self.providers.get(&id)?;
            debug!(target: "cas.mfa", trigger = trigger.name(), provider = %id, "Trigger activated");
            match self.selection {
                TriggerSelection::FirstActivated => return Ok(Some(provider)),
                TriggerSelection::HighestRankedProvider => {
                    let outranks = selected
                        .as_ref()
                        .map_or(true, |current| current.order() < provider.order());
                    if outranks {
                        selected = Some(provider);
                    }
                }
            }
        }
        Ok(selected)
    }

    async fn is_available(&self, provider: &dyn MultifactorAuthenticationProvider) -> bool {
        match tokio::time::timeout(self.availability_timeout, provider.is_available()).await {
            Ok(available) => available,
            Err(_) => {
                warn!(
                    target: "cas.mfa",
                    provider = provider.id(),
                    timeout_ms = self.availability_timeout.as_millis() as u64,
                    "Multifactor availability check timed out"
                );
                false
            }
        }
    }
}
