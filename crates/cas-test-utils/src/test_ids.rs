//! Fixed identities, services and provider ids for reproducible tests.

// Principals
pub const TEST_USER: &str = "casuser";
pub const TEST_PASSWORD: &str = "rutgers";
pub const OTHER_USER: &str = "alice";
pub const UNKNOWN_USER: &str = "nobody";

// Services
pub const SERVICE_A: &str = "https://a.example.org";
pub const SERVICE_B: &str = "https://b.example.org";
pub const PROXY_CALLBACK: &str = "https://proxy.example.org/callback";
pub const PROXIED_SERVICE: &str = "https://backend.example.org/api";

/// Matches every https URL; registered by the harness unless overridden.
pub const CATCH_ALL_PATTERN: &str = "https://.*";
pub const CATCH_ALL_SERVICE_ID: u64 = 1;

// Handlers
pub const PRIMARY_HANDLER: &str = "accept";
pub const SECONDARY_HANDLER: &str = "secondary";

// Multifactor providers
pub const MFA_DUO: &str = "mfa-duo";
pub const MFA_TOTP: &str = "mfa-gauth";
pub const MFA_WEBAUTHN: &str = "mfa-webauthn";
