//! Credential authentication.
//!
//! The [`AuthenticationManager`] runs credentials through an ordered chain
//! of [`AuthenticationHandler`]s, aggregates per-handler outcomes, applies
//! [`AuthenticationPolicy`]s and resolves a single [`Principal`]. The result
//! is an [`Authentication`] snapshot that tickets carry for their lifetime.

pub mod credential;
pub mod directory;
pub mod error;
pub mod handlers;
pub mod manager;
pub mod policy;
pub mod principal;
pub mod resolvers;
pub mod result;

pub use credential::{Credential, CredentialMetadata, CredentialType, UsernamePasswordCredential};
pub use directory::{
    DirectoryAuthenticationHandler, DirectoryClient, DirectoryEntry, DirectoryError,
    ErrorClassifier,
};
pub use error::{AuthenticationError, HandlerError, HandlerFailures};
pub use handlers::{
    AcceptUsersAuthenticationHandler, AuthenticationHandler, InstrumentedHandler, TimeoutHandler,
};
pub use manager::{AuthenticationManager, AuthenticationManagerBuilder};
pub use policy::{
    AllHandlersSucceededPolicy, AllRequiredHandlersPolicy, AnyAuthenticationPolicy,
    AuthenticationPolicy, HandlerOutcomes, NotPreventedPolicy,
};
pub use principal::{AttributeMap, AttributeMergeStrategy, Principal};
pub use resolvers::{
    AttributeRepositoryPrincipalResolver, EchoPrincipalResolver, PrincipalResolver,
};
pub use result::{
    Authentication, AuthenticationResult, AuthenticationResultBuilder, HandlerResult,
    AUTHENTICATION_METHOD_ATTRIBUTE, AUTHN_CONTEXT_ATTRIBUTE, CREDENTIAL_TYPE_ATTRIBUTE,
    REMEMBER_ME_ATTRIBUTE, SUCCESSFUL_HANDLERS_ATTRIBUTE,
};
