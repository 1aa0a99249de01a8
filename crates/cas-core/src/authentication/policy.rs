//! Policies deciding whether a set of handler outcomes counts as an
//! authenticated transaction.

use crate::authentication::error::{HandlerError, HandlerFailures};
use crate::authentication::result::HandlerResult;
use std::collections::BTreeMap;

/// The handler outcomes collected so far in one transaction.
#[derive(Debug, Clone, Copy)]
pub struct HandlerOutcomes<'a> {
    pub successes: &'a BTreeMap<String, HandlerResult>,
    pub failures: &'a HandlerFailures,
}

pub trait AuthenticationPolicy: Send + Sync {
    fn name(&self) -> &str;

    fn is_satisfied_by(&self, outcomes: HandlerOutcomes<'_>) -> bool;

    /// Keep consulting handlers after `failure`?
    fn should_resume_on_failure(&self, _failure: &HandlerError) -> bool {
        true
    }

    /// Stop consulting handlers once one has succeeded?
    fn stop_after_first_success(&self) -> bool {
        false
    }
}

/// Satisfied when at least one handler succeeded. Without `try_all`, the
/// manager stops at the first success.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyAuthenticationPolicy {
    pub try_all: bool,
}

impl AuthenticationPolicy for AnyAuthenticationPolicy {
    fn name(&self) -> &str {
        "any"
    }

    fn is_satisfied_by(&self, outcomes: HandlerOutcomes<'_>) -> bool {
        !outcomes.successes.is_empty()
    }

    fn stop_after_first_success(&self) -> bool {
        !self.try_all
    }
}

/// Satisfied only when every named handler succeeded.
#[derive(Debug, Clone, Default)]
pub struct AllRequiredHandlersPolicy {
    pub required: Vec<String>,
}

impl AllRequiredHandlersPolicy {
    pub fn new<I, S>(required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
        }
    }
}

impl AuthenticationPolicy for AllRequiredHandlersPolicy {
    fn name(&self) -> &str {
        "all-required-handlers"
    }

    fn is_satisfied_by(&self, outcomes: HandlerOutcomes<'_>) -> bool {
        !outcomes.successes.is_empty()
            && self
                .required
                .iter()
                .all(|handler| outcomes.successes.contains_key(handler))
    }
}

/// Satisfied when something succeeded and nothing failed. Stops at the
/// first failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllHandlersSucceededPolicy;

impl AuthenticationPolicy for AllHandlersSucceededPolicy {
    fn name(&self) -> &str {
        "all-handlers-succeeded"
    }

    fn is_satisfied_by(&self, outcomes: HandlerOutcomes<'_>) -> bool {
        !outcomes.successes.is_empty() && outcomes.failures.is_empty()
    }

    fn should_resume_on_failure(&self, _failure: &HandlerError) -> bool {
        false
    }
}

/// Refuses any transaction in which a handler was prevented, even if
/// another handler succeeded.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotPreventedPolicy;

impl AuthenticationPolicy for NotPreventedPolicy {
    fn name(&self) -> &str {
        "not-prevented"
    }

    fn is_satisfied_by(&self, outcomes: HandlerOutcomes<'_>) -> bool {
        !outcomes.successes.is_empty()
            && !outcomes.failures.values().any(HandlerError::is_prevented)
    }

    fn should_resume_on_failure(&self, failure: &HandlerError) -> bool {
        !failure.is_prevented()
    }
}
