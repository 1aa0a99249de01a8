//! Directory (LDAP / Active Directory) authentication handler.
//!
//! The wire client is a [`DirectoryClient`] supplied by the deployment. Bind
//! failures come back as diagnostic text; an [`ErrorClassifier`] maps that
//! text onto a [`HandlerError`] by trying its rules in order, first match wins.

use crate::authentication::credential::Credential;
use crate::authentication::error::HandlerError;
use crate::authentication::handlers::AuthenticationHandler;
use crate::authentication::principal::{AttributeMap, Principal};
use crate::authentication::result::HandlerResult;
use async_trait::async_trait;
use common::sanitize::MessageSanitizer;
use regex::Regex;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// A successful bind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attributes: AttributeMap,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// The directory could not be reached or did not answer.
    #[error("Directory unreachable: {0}")]
    Unreachable(String),

    /// The directory answered and refused the bind. Carries its diagnostic
    /// message.
    #[error("Bind rejected: {0}")]
    Rejected(String),

    #[error("No entry matches the username")]
    EntryNotFound,
}

#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Locate the user's entry and bind as it.
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<DirectoryEntry, DirectoryError>;
}

/// Ordered matcher → outcome rules.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rules: Vec<(Regex, HandlerError)>,
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(mut self, pattern: &str, outcome: HandlerError) -> Result<Self, regex::Error> {
        self.rules.push((Regex::new(pattern)?, outcome));
        Ok(self)
    }

    /// Active Directory sub-error codes as they appear in bind diagnostics,
    /// e.g. `AcceptSecurityContext error, data 52e, v1db1`.
    pub fn active_directory() -> Result<Self, regex::Error> {
        let code = |c: &str| format!(r"(?i)\bdata\s+{c}\b");
        Self::new()
            .with_rule(&code("525"), HandlerError::AccountNotFound)?
            .with_rule(&code("52e"), HandlerError::FailedLogin)?
            .with_rule(&code("530"), HandlerError::InvalidLoginTime)?
            .with_rule(&code("531"), HandlerError::InvalidLoginLocation)?
            .with_rule(&code("532"), HandlerError::CredentialExpired)?
            .with_rule(&code("533"), HandlerError::AccountDisabled)?
            .with_rule(&code("701"), HandlerError::AccountExpired)?
            .with_rule(&code("773"), HandlerError::AccountPasswordMustChange)?
            .with_rule(&code("775"), HandlerError::AccountLocked)
    }

    pub fn classify(&self, message: &str) -> Option<HandlerError> {
        self.rules
            .iter()
            .find(|(pattern, _)| pattern.is_match(message))
            .map(|(_, outcome)| outcome.clone())
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

pub struct DirectoryAuthenticationHandler {
    name: String,
    client: Arc<dyn DirectoryClient>,
    classifier: ErrorClassifier,
    sanitizer: MessageSanitizer,
    /// Entry attribute holding the principal id; the username when unset
    /// or absent on the entry.
    principal_id_attribute: Option<String>,
}

impl DirectoryAuthenticationHandler {
    pub fn new(
        name: impl Into<String>,
        client: Arc<dyn DirectoryClient>,
        classifier: ErrorClassifier,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.into(),
            client,
            classifier,
            sanitizer: MessageSanitizer::new()?,
            principal_id_attribute: None,
        })
    }

    pub fn with_principal_id_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.principal_id_attribute = Some(attribute.into());
        self
    }

    fn principal_for(&self, username: &str, entry: DirectoryEntry) -> Principal {
        let id = self
            .principal_id_attribute
            .as_deref()
            .and_then(|attr| entry.attributes.get(attr))
            .and_then(|values| values.first())
            .cloned()
            .unwrap_or_else(|| username.to_string());
        Principal::with_attributes(id, entry.attributes)
    }
}

#[async_trait]
impl AuthenticationHandler for DirectoryAuthenticationHandler {
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

        match self.client.authenticate(&upc.username, upc.password()).await {
            Ok(entry) => {
                debug!(target: "cas.authn.directory", handler = %self.name, "Directory bind succeeded");
                Ok(HandlerResult::new(&self.name, credential.metadata())
                    .with_principal(self.principal_for(&upc.username, entry)))
            }
            Err(DirectoryError::EntryNotFound) => Err(HandlerError::AccountNotFound),
            Err(DirectoryError::Unreachable(message)) => {
                let message = self.sanitizer.sanitize(&message);
                warn!(target: "cas.authn.directory", handler = %self.name, error = %message, "Directory unreachable");
                Err(HandlerError::Prevented(message))
            }
            Err(DirectoryError::Rejected(message)) => {
                let outcome = self
                    .classifier
                    .classify(&message)
                    .unwrap_or(HandlerError::FailedLogin);
                debug!(
                    target: "cas.authn.directory",
                    handler = %self.name,
                    outcome = outcome.code(),
                    diagnostic = %self.sanitizer.sanitize(&message),
                    "Directory bind rejected"
                );
                Err(outcome)
            }
        }
    }
}
