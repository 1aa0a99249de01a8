use super::{FailureMode, MultifactorError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A step-up authentication provider (Duo, TOTP, WebAuthn, ...).
#[async_trait]
pub trait MultifactorAuthenticationProvider: Send + Sync + fmt::Debug {
    /// Identifier used in service policies and `authnContextClass`,
    /// e.g. `mfa-duo`.
    fn id(&self) -> &str;

    /// Rank; higher wins under highest-ranked selection.
    fn order(&self) -> i32 {
        0
    }

    fn failure_mode(&self) -> FailureMode {
        FailureMode::Undefined
    }

    /// Whether the provider's backend can be reached right now.
    async fn is_available(&self) -> bool;
}

#[derive(Debug, Default, Clone)]
pub struct MultifactorProviderRegistry {
    providers: HashMap<String, Arc<dyn MultifactorAuthenticationProvider>>,
}

impl MultifactorProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn MultifactorAuthenticationProvider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    pub fn with_provider(mut self, provider: Arc<dyn MultifactorAuthenticationProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn MultifactorAuthenticationProvider>, MultifactorError> {
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| MultifactorError::UnknownProvider(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.providers.contains_key(id)
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
