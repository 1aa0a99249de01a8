//! Multifactor (step-up) authentication decisions.
//!
//! Triggers decide whether a provider is needed, bypass evaluators may veto
//! it, and the provider's failure mode decides what happens when it cannot
//! be reached. [`MultifactorEngine`] combines the three into a single
//! [`MultifactorDecision`].

pub mod bypass;
pub mod engine;
pub mod provider;
pub mod risk;
pub mod triggers;

pub use bypass::{
    AuthenticationAttributeBypass, AuthenticationHandlerBypass, AuthenticationMethodBypass,
    BypassEvaluator, ChainingBypassEvaluator, CredentialTypeBypass, HttpRequestBypass,
    InMemoryTrustedDeviceStore, NeverBypass, PrincipalAttributeBypass, RegisteredServiceBypass,
    TrustedDeviceBypass, TrustedDeviceStore,
};
pub use engine::{MultifactorEngine, MultifactorEngineBuilder};
pub use provider::{MultifactorAuthenticationProvider, MultifactorProviderRegistry};
pub use risk::{
    AuthenticationEvent, AuthenticationEventRepository, GeoLocation, GeoLocationRiskCalculator,
    InMemoryAuthenticationEventRepository, IpAddressRiskCalculator, RiskBasedTrigger,
    RiskCalculator, TimeOfDayRiskCalculator, UserAgentRiskCalculator,
};
pub use triggers::{
    AuthenticationAttributeTrigger, GlobalTrigger, MultifactorTrigger, PrincipalAttributeTrigger,
    RegisteredServiceTrigger, RequestParameterTrigger,
};

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// What to do when a selected provider cannot be reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FailureMode {
    /// Deny the request.
    Closed,
    /// Continue as if step-up were not required.
    Open,
    /// Continue without step-up and without recording anything against the
    /// session.
    Phantom,
    /// Defer to the next level; resolves to `Closed` when nothing is set.
    #[default]
    Undefined,
}

impl FailureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureMode::Closed => "CLOSED",
            FailureMode::Open => "OPEN",
            FailureMode::Phantom => "PHANTOM",
            FailureMode::Undefined => "UNDEFINED",
        }
    }

    /// First defined mode in `levels`, else `Closed`.
    pub fn resolve(levels: impl IntoIterator<Item = FailureMode>) -> FailureMode {
        levels
            .into_iter()
            .find(|mode| *mode != FailureMode::Undefined)
            .unwrap_or(FailureMode::Closed)
    }
}

impl fmt::Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "closed" => Ok(FailureMode::Closed),
            "open" => Ok(FailureMode::Open),
            "phantom" => Ok(FailureMode::Phantom),
            "undefined" => Ok(FailureMode::Undefined),
            other => Err(format!("unknown failure mode '{other}'")),
        }
    }
}

/// How the engine picks one provider when several triggers could fire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TriggerSelection {
    /// Triggers run in ascending order; the first to activate wins.
    #[default]
    FirstActivated,
    /// Every trigger runs; the activated provider with the highest rank wins.
    HighestRankedProvider,
}

impl FromStr for TriggerSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "first-activated" | "first" => Ok(TriggerSelection::FirstActivated),
            "highest-rank" | "highest-ranked-provider" => Ok(TriggerSelection::HighestRankedProvider),
            other => Err(format!("unknown trigger selection '{other}'")),
        }
    }
}

/// Outcome of a multifactor evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultifactorDecision {
    NotRequired,
    /// The session already carries the provider's authentication context.
    Satisfied { provider: String },
    Bypass { provider: String },
    /// Step-up must happen before the request can continue.
    Proceed { provider: String },
    Unavailable { provider: String },
    Phantom { provider: String },
}

impl MultifactorDecision {
    /// Transition label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            MultifactorDecision::NotRequired => "not_required",
            MultifactorDecision::Satisfied { .. } => "satisfied",
            MultifactorDecision::Bypass { .. } => "bypass",
            MultifactorDecision::Proceed { .. } => "proceed",
            MultifactorDecision::Unavailable { .. } => "unavailable",
            MultifactorDecision::Phantom { .. } => "phantom",
        }
    }

    pub fn provider(&self) -> Option<&str> {
        match self {
            MultifactorDecision::NotRequired => None,
            MultifactorDecision::Satisfied { provider }
            | MultifactorDecision::Bypass { provider }
            | MultifactorDecision::Proceed { provider }
            | MultifactorDecision::Unavailable { provider }
            | MultifactorDecision::Phantom { provider } => Some(provider),
        }
    }

    /// Whether the request may continue without step-up.
    pub fn allows_continuation(&self) -> bool {
        !matches!(
            self,
            MultifactorDecision::Proceed { .. } | MultifactorDecision::Unavailable { .. }
        )
    }
}

/// Request details triggers and bypass rules may look at. Protocol adapters
/// fill this from the inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub remote_address: Option<String>,
    pub user_agent: Option<String>,
    /// Header names are stored lowercased.
    pub headers: BTreeMap<String, String>,
    pub parameters: BTreeMap<String, String>,
    pub geo_location: Option<GeoLocation>,
    pub device_fingerprint: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_remote_address(mut self, address: impl Into<String>) -> Self {
        self.remote_address = Some(address.into());
        self
    }

    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_geo_location(mut self, location: GeoLocation) -> Self {
        self.geo_location = Some(location);
        self
    }

    pub fn with_device_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.device_fingerprint = Some(fingerprint.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MultifactorError {
    #[error("Unknown multifactor provider: {0}")]
    UnknownProvider(String),

    #[error("Multifactor provider {provider} is unavailable")]
    Unavailable { provider: String },

    #[error("Multifactor evaluation failed: {0}")]
    Evaluation(String),
}

impl MultifactorError {
    pub fn provider(&self) -> Option<&str> {
        match self {
            MultifactorError::UnknownProvider(provider)
            | MultifactorError::Unavailable { provider } => Some(provider),
            MultifactorError::Evaluation(_) => None,
        }
    }
}
