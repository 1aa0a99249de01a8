//! Credentials presented for authentication.
//!
//! One sum type covers every credential shape the manager dispatches on;
//! handlers match on the variant in `supports`. Secret material is held in
//! `SecretString` and never copied into [`CredentialMetadata`].

use common::secret::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone)]
pub enum Credential {
    UsernamePassword(UsernamePasswordCredential),
    /// Username/password with the "remember me" box ticked.
    RememberMe(UsernamePasswordCredential),
    OneTimePassword {
        username: String,
        code: SecretString,
    },
    BearerToken {
        token: SecretString,
    },
    X509Certificate {
        subject_dn: String,
        issuer_dn: String,
        serial_number: String,
    },
    Spnego {
        /// GSS token, base64 as received from the browser.
        token: SecretString,
        principal_hint: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct UsernamePasswordCredential {
    pub username: String,
    pub password: SecretString,
}

impl UsernamePasswordCredential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

/// Discriminant of [`Credential`], safe to log and to record in an
/// authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    UsernamePassword,
    RememberMe,
    OneTimePassword,
    BearerToken,
    X509Certificate,
    Spnego,
}

impl CredentialType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialType::UsernamePassword => "UsernamePasswordCredential",
            CredentialType::RememberMe => "RememberMeUsernamePasswordCredential",
            CredentialType::OneTimePassword => "OneTimeTokenCredential",
            CredentialType::BearerToken => "BearerTokenCredential",
            CredentialType::X509Certificate => "X509CertificateCredential",
            CredentialType::Spnego => "SpnegoCredential",
        }
    }
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Credential {
    pub fn username_password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credential::UsernamePassword(UsernamePasswordCredential::new(username, password))
    }

    pub fn credential_type(&self) -> CredentialType {
        match self {
            Credential::UsernamePassword(_) => CredentialType::UsernamePassword,
            Credential::RememberMe(_) => CredentialType::RememberMe,
            Credential::OneTimePassword { .. } => CredentialType::OneTimePassword,
            Credential::BearerToken { .. } => CredentialType::BearerToken,
            Credential::X509Certificate { .. } => CredentialType::X509Certificate,
            Credential::Spnego { .. } => CredentialType::Spnego,
        }
    }

    /// Identifier suitable for principal resolution and logs. Never derived
    /// from secret material.
    pub fn id(&self) -> Option<&str> {
        match self {
            Credential::UsernamePassword(c) | Credential::RememberMe(c) => Some(&c.username),
            Credential::OneTimePassword { username, .. } => Some(username),
            Credential::X509Certificate { subject_dn, .. } => Some(subject_dn),
            Credential::Spnego { principal_hint, .. } => principal_hint.as_deref(),
            Credential::BearerToken { .. } => None,
        }
    }

    /// Username/password view over both the plain and remember-me variants.
    pub fn as_username_password(&self) -> Option<&UsernamePasswordCredential> {
        match self {
            Credential::UsernamePassword(c) | Credential::RememberMe(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_remember_me(&self) -> bool {
        matches!(self, Credential::RememberMe(_))
    }

    pub fn metadata(&self) -> CredentialMetadata {
        CredentialMetadata {
            id: self.id().map(str::to_string),
            credential_type: self.credential_type(),
        }
    }
}

/// What an [`Authentication`](super::Authentication) remembers about a
/// credential: its id and type, never its secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialMetadata {
    pub id: Option<String>,
    pub credential_type: CredentialType,
}
