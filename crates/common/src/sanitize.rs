//! Log sanitization for ticket identifiers and secret-bearing key/value pairs.
//!
//! Ticket ids are bearer credentials: anyone holding a live TGT or ST id can
//! act as the session that owns it. Any log line that mentions one must carry
//! only the type prefix and the sequence component, followed by a fixed-width
//! mask that does not reveal the length of the random segment.
//!
//! ```rust
//! use common::sanitize::mask_ticket_id;
//!
//! assert_eq!(mask_ticket_id("TGT-1-aB3dE5fG7hJ9kL1mN3pQ-node1"), "TGT-1-********");
//! ```
//!
//! Free text (backend error messages, request dumps) goes through
//! [`MessageSanitizer`], which masks embedded ticket ids and the values of
//! password/token/secret-like keys.

use regex::Regex;
use std::fmt;

/// Fixed-width replacement for the hidden part of a ticket id.
pub const TICKET_ID_MASK: &str = "********";

/// Replacement for secret values found in free text.
pub const SECRET_VALUE_MASK: &str = "*******";

/// Mask a ticket id down to `PREFIX-SEQUENCE-********`.
///
/// Ids that do not follow the `PREFIX-SEQUENCE-...` layout are masked
/// entirely apart from whatever precedes the first `-`.
#[must_use]
pub fn mask_ticket_id(id: &str) -> String {
    MaskedTicketId(id).to_string()
}

/// Display adapter that renders a ticket id masked, for use in tracing fields
/// without an intermediate allocation: `ticket_id = %MaskedTicketId(&id)`.
#[derive(Clone, Copy)]
pub struct MaskedTicketId<'a>(pub &'a str);

impl fmt::Display for MaskedTicketId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = self.0.splitn(3, '-');
        let prefix = parts.next().unwrap_or_default();
        let sequence = parts.next();
        let rest = parts.next();

        match (sequence, rest) {
            (Some(seq), Some(_)) if is_type_prefix(prefix) && is_numeric(seq) => {
                write!(f, "{prefix}-{seq}-{TICKET_ID_MASK}")
            }
            (Some(_), _) if is_type_prefix(prefix) => write!(f, "{prefix}-{TICKET_ID_MASK}"),
            _ => f.write_str(TICKET_ID_MASK),
        }
    }
}

impl fmt::Debug for MaskedTicketId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

fn is_type_prefix(prefix: &str) -> bool {
    matches!(prefix, "TGT" | "ST" | "PGT" | "PGTIOU" | "PT")
}

fn is_numeric(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

/// Masks ticket ids and secret values embedded in free text.
///
/// Patterns are compiled once when the sanitizer is constructed; build one
/// per component and keep it for the component's lifetime.
#[derive(Debug, Clone)]
pub struct MessageSanitizer {
    ticket_pattern: Regex,
    secret_pattern: Regex,
}

impl MessageSanitizer {
    /// Compile the sanitizer patterns.
    ///
    /// # Errors
    ///
    /// Returns the regex error if a pattern fails to compile.
    pub fn new() -> Result<Self, regex::Error> {
        let ticket_pattern =
            Regex::new(r"\b(TGT|PGTIOU|PGT|ST|PT)-(\d+)-[A-Za-z0-9]+(?:-[A-Za-z0-9.]+)?")?;
        let secret_pattern = Regex::new(
            r#"(?i)\b([a-z_\-]*(?:password|passwd|passphrase|token|secret|credential)[a-z_\-]*)(\s*[:=]\s*)("?)([^\s",&;]+)"#,
        )?;
        Ok(Self {
            ticket_pattern,
            secret_pattern,
        })
    }

    /// Return `message` with every ticket id and secret value masked.
    #[must_use]
    pub fn sanitize(&self, message: &str) -> String {
        let masked_tickets = self
            .ticket_pattern
            .replace_all(message, format!("${{1}}-${{2}}-{TICKET_ID_MASK}").as_str());
        self.secret_pattern
            .replace_all(
                &masked_tickets,
                format!("${{1}}${{2}}${{3}}{SECRET_VALUE_MASK}").as_str(),
            )
            .into_owned()
    }
}
