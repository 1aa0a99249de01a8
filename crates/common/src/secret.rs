//! Secret types for credential material that must never reach a log line.
//!
//! Re-exports [`secrecy`] so every crate in the workspace names the same
//! types. `SecretString` implements `Debug` with redaction, so a credential
//! enum or request struct can derive `Debug` and still be safe to trace.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct UsernamePassword {
//!     username: String,
//!     password: SecretString,
//! }
//!
//! let credential = UsernamePassword {
//!     username: "casuser".to_string(),
//!     password: SecretString::from("Mellon"),
//! };
//!
//! assert!(!format!("{credential:?}").contains("Mellon"));
//! assert_eq!(credential.password.expose_secret(), "Mellon");
//! ```
//!
//! Use `SecretString` for:
//! - user passwords and one-time codes
//! - bearer tokens presented as credentials
//! - the registry encryption key while it is still base64 text
//!
//! Use `SecretBox<T>` for binary key material such as `SecretBox<[u8; 32]>`.
//!
//! Secrets are zeroized on drop. Reading one requires an explicit
//! `expose_secret()` call, which keeps every read site greppable.

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
