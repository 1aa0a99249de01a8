//! Principal resolution: turning handler results into the principal a
//! session is issued for.

use crate::authentication::credential::Credential;
use crate::authentication::principal::{AttributeMap, Principal};
use crate::authentication::result::HandlerResult;
use async_trait::async_trait;
use std::collections::HashMap;

#[async_trait]
pub trait PrincipalResolver: Send + Sync {
    fn name(&self) -> &str;

    /// Resolve a principal for `credential`, given what the handler that
    /// accepted it proposed. `None` means this resolver has nothing to add.
    async fn resolve(
        &self,
        credential: &Credential,
        handler_result: &HandlerResult,
    ) -> Option<Principal>;
}

/// Takes the handler's principal as-is, falling back to the credential id.
#[derive(Debug, Default)]
pub struct EchoPrincipalResolver;

#[async_trait]
impl PrincipalResolver for EchoPrincipalResolver {
    fn name(&self) -> &str {
        "echo"
    }

    async fn resolve(
        &self,
        credential: &Credential,
        handler_result: &HandlerResult,
    ) -> Option<Principal> {
        handler_result
            .principal
            .clone()
            .or_else(|| credential.id().map(Principal::new))
    }
}

/// Looks attributes up in a static repository keyed by principal id.
///
/// The principal id comes from the handler result or the credential. With
/// `principal_id_attribute` set, the id is replaced by the first value of
/// that repository attribute.
#[derive(Debug, Default)]
pub struct AttributeRepositoryPrincipalResolver {
    repository: HashMap<String, AttributeMap>,
    principal_id_attribute: Option<String>,
}

impl AttributeRepositoryPrincipalResolver {
    pub fn new(repository: HashMap<String, AttributeMap>) -> Self {
        Self {
            repository,
            principal_id_attribute: None,
        }
    }

    pub fn with_principal_id_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.principal_id_attribute = Some(attribute.into());
        self
    }
}

#[async_trait]
impl PrincipalResolver for AttributeRepositoryPrincipalResolver {
    fn name(&self) -> &str {
        "attribute-repository"
    }

    async fn resolve(
        &self,
        credential: &Credential,
        handler_result: &HandlerResult,
    ) -> Option<Principal> {
        let id = handler_result
            .principal
            .as_ref()
            .map(|p| p.id.clone())
            .or_else(|| credential.id().map(str::to_string))?;
        let attributes = self.repository.get(&id)?.clone();

        let resolved_id = self
            .principal_id_attribute
            .as_deref()
            .and_then(|attr| attributes.get(attr))
            .and_then(|values| values.first())
            .cloned()
            .unwrap_or(id);
        Some(Principal::with_attributes(resolved_id, attributes))
    }
}
