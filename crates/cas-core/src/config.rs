use crate::crypto::CIPHER_KEY_LEN;
use crate::mfa::{FailureMode, TriggerSelection};
use base64::{engine::general_purpose, Engine as _};
use common::config::{DatabaseConfig, ObservabilityConfig, RedisConfig};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TGT_MAX_TIME_TO_LIVE_SECONDS: i64 = 28_800;
pub const DEFAULT_TGT_TIME_TO_IDLE_SECONDS: i64 = 7_200;
pub const DEFAULT_TGT_REMEMBER_ME_TIME_TO_LIVE_SECONDS: i64 = 1_209_600;
pub const DEFAULT_ST_TIME_TO_KILL_SECONDS: i64 = 10;
pub const DEFAULT_PT_TIME_TO_KILL_SECONDS: i64 = 10;
pub const DEFAULT_NUMBER_OF_USES: u32 = 1;
pub const DEFAULT_TICKET_ID_RANDOM_LENGTH: usize = 20;
pub const MIN_TICKET_ID_RANDOM_LENGTH: usize = 10;
pub const MAX_TICKET_ID_RANDOM_LENGTH: usize = 128;
pub const DEFAULT_REGISTRY_OPERATION_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_REGISTRY_CLEANER_INTERVAL_SECONDS: u64 = 120;
pub const DEFAULT_HANDLER_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_TICKET_UPDATE_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_REDIS_KEY_PREFIX: &str = "cas";
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryBackend {
    Memory,
    Redis,
    Postgres,
}

impl FromStr for RegistryBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "in-memory" => Ok(RegistryBackend::Memory),
            "redis" => Ok(RegistryBackend::Redis),
            "postgres" | "postgresql" => Ok(RegistryBackend::Postgres),
            other => Err(format!("unknown registry backend '{other}'")),
        }
    }
}

/// AES-256 key for at-rest ticket encryption. Debug output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey(Vec<u8>);

impl EncryptionKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey([REDACTED])")
    }
}

#[derive(Debug, Clone)]
pub struct CasConfig {
    pub tgt_max_time_to_live_secs: i64,
    pub tgt_time_to_idle_secs: i64,
    pub tgt_remember_me_time_to_live_secs: i64,
    pub st_time_to_kill_secs: i64,
    pub st_number_of_uses: u32,
    pub pgt_max_time_to_live_secs: i64,
    pub pgt_time_to_idle_secs: i64,
    pub pt_time_to_kill_secs: i64,
    pub pt_number_of_uses: u32,
    pub ticket_id_random_length: usize,
    pub ticket_id_suffix: Option<String>,
    pub registry_encryption_key: Option<EncryptionKey>,
    pub registry_backend: RegistryBackend,
    pub redis: Option<RedisConfig>,
    pub database: Option<DatabaseConfig>,
    pub registry_operation_timeout: Duration,
    pub registry_cleaner_enabled: bool,
    pub registry_cleaner_interval: Duration,
    pub handler_timeout: Duration,
    pub only_track_most_recent_session: bool,
    pub mfa_global_failure_mode: FailureMode,
    pub mfa_trigger_selection: TriggerSelection,
    pub ticket_update_max_attempts: u32,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {var}: {reason}")]
    InvalidValue { var: String, reason: String },

    #[error("Invalid registry encryption key: {0}")]
    InvalidEncryptionKey(String),

    #[error("Base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),
}

impl Default for CasConfig {
    fn default() -> Self {
        Self {
            tgt_max_time_to_live_secs: DEFAULT_TGT_MAX_TIME_TO_LIVE_SECONDS,
            tgt_time_to_idle_secs: DEFAULT_TGT_TIME_TO_IDLE_SECONDS,
            tgt_remember_me_time_to_live_secs: DEFAULT_TGT_REMEMBER_ME_TIME_TO_LIVE_SECONDS,
            st_time_to_kill_secs: DEFAULT_ST_TIME_TO_KILL_SECONDS,
            st_number_of_uses: DEFAULT_NUMBER_OF_USES,
            pgt_max_time_to_live_secs: DEFAULT_TGT_MAX_TIME_TO_LIVE_SECONDS,
            pgt_time_to_idle_secs: DEFAULT_TGT_TIME_TO_IDLE_SECONDS,
            pt_time_to_kill_secs: DEFAULT_PT_TIME_TO_KILL_SECONDS,
            pt_number_of_uses: DEFAULT_NUMBER_OF_USES,
            ticket_id_random_length: DEFAULT_TICKET_ID_RANDOM_LENGTH,
            ticket_id_suffix: None,
            registry_encryption_key: None,
            registry_backend: RegistryBackend::Memory,
            redis: None,
            database: None,
            registry_operation_timeout: Duration::from_millis(
                DEFAULT_REGISTRY_OPERATION_TIMEOUT_MS,
            ),
            registry_cleaner_enabled: true,
            registry_cleaner_interval: Duration::from_secs(
                DEFAULT_REGISTRY_CLEANER_INTERVAL_SECONDS,
            ),
            handler_timeout: Duration::from_millis(DEFAULT_HANDLER_TIMEOUT_MS),
            only_track_most_recent_session: true,
            mfa_global_failure_mode: FailureMode::Closed,
            mfa_trigger_selection: TriggerSelection::FirstActivated,
            ticket_update_max_attempts: DEFAULT_TICKET_UPDATE_MAX_ATTEMPTS,
            observability: ObservabilityConfig::default(),
        }
    }
}

impl CasConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing)
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = CasConfig::default();

        let tgt_max_time_to_live_secs = positive_secs(
            vars,
            "CAS_TGT_MAX_TIME_TO_LIVE_SECONDS",
            defaults.tgt_max_time_to_live_secs,
        )?;
        let tgt_time_to_idle_secs = positive_secs(
            vars,
            "CAS_TGT_TIME_TO_IDLE_SECONDS",
            defaults.tgt_time_to_idle_secs,
        )?;
        let tgt_remember_me_time_to_live_secs = positive_secs(
            vars,
            "CAS_TGT_REMEMBER_ME_TIME_TO_LIVE_SECONDS",
            defaults.tgt_remember_me_time_to_live_secs,
        )?;
        let st_time_to_kill_secs = positive_secs(
            vars,
            "CAS_ST_TIME_TO_KILL_SECONDS",
            defaults.st_time_to_kill_secs,
        )?;
        let st_number_of_uses =
            number_of_uses(vars, "CAS_ST_NUMBER_OF_USES", defaults.st_number_of_uses)?;
        let pgt_max_time_to_live_secs = positive_secs(
            vars,
            "CAS_PGT_MAX_TIME_TO_LIVE_SECONDS",
            defaults.pgt_max_time_to_live_secs,
        )?;
        let pgt_time_to_idle_secs = positive_secs(
            vars,
            "CAS_PGT_TIME_TO_IDLE_SECONDS",
            defaults.pgt_time_to_idle_secs,
        )?;
        let pt_time_to_kill_secs = positive_secs(
            vars,
            "CAS_PT_TIME_TO_KILL_SECONDS",
            defaults.pt_time_to_kill_secs,
        )?;
        let pt_number_of_uses =
            number_of_uses(vars, "CAS_PT_NUMBER_OF_USES", defaults.pt_number_of_uses)?;

        let ticket_id_random_length: usize = parse_or(
            vars,
            "CAS_TICKET_ID_RANDOM_LENGTH",
            defaults.ticket_id_random_length,
        )?;
        if !(MIN_TICKET_ID_RANDOM_LENGTH..=MAX_TICKET_ID_RANDOM_LENGTH)
            .contains(&ticket_id_random_length)
        {
            return Err(invalid(
                "CAS_TICKET_ID_RANDOM_LENGTH",
                format!(
                    "must be between {} and {}",
                    MIN_TICKET_ID_RANDOM_LENGTH, MAX_TICKET_ID_RANDOM_LENGTH
                ),
            ));
        }

        let ticket_id_suffix = vars
            .get("CAS_TICKET_ID_SUFFIX")
            .filter(|s| !s.is_empty())
            .cloned();
        if let Some(suffix) = &ticket_id_suffix {
            if !suffix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.')
            {
                return Err(invalid(
                    "CAS_TICKET_ID_SUFFIX",
                    "only [A-Za-z0-9.] is allowed".to_string(),
                ));
            }
        }

        let registry_encryption_key = vars
            .get("CAS_REGISTRY_ENCRYPTION_KEY")
            .map(|encoded| decode_encryption_key(encoded))
            .transpose()?;

        let registry_backend: RegistryBackend =
            parse_or(vars, "CAS_REGISTRY_BACKEND", defaults.registry_backend)?;

        let redis = vars.get("REDIS_URL").map(|url| RedisConfig {
            url: url.clone(),
            key_prefix: vars
                .get("CAS_REDIS_KEY_PREFIX")
                .cloned()
                .unwrap_or_else(|| DEFAULT_REDIS_KEY_PREFIX.to_string()),
        });
        if registry_backend == RegistryBackend::Redis && redis.is_none() {
            return Err(ConfigError::MissingEnvVar("REDIS_URL".to_string()));
        }

        let database = match vars.get("DATABASE_URL") {
            Some(url) => Some(DatabaseConfig {
                postgres_url: url.clone(),
                max_connections: parse_or(
                    vars,
                    "CAS_DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                )?,
            }),
            None => None,
        };
        if registry_backend == RegistryBackend::Postgres && database.is_none() {
            return Err(ConfigError::MissingEnvVar("DATABASE_URL".to_string()));
        }

        let registry_operation_timeout = Duration::from_millis(positive(
            vars,
            "CAS_REGISTRY_OPERATION_TIMEOUT_MS",
            DEFAULT_REGISTRY_OPERATION_TIMEOUT_MS,
        )?);
        let registry_cleaner_enabled = parse_or(
            vars,
            "CAS_REGISTRY_CLEANER_ENABLED",
            defaults.registry_cleaner_enabled,
        )?;
        let registry_cleaner_interval = Duration::from_secs(positive(
            vars,
            "CAS_REGISTRY_CLEANER_INTERVAL_SECONDS",
            DEFAULT_REGISTRY_CLEANER_INTERVAL_SECONDS,
        )?);
        let handler_timeout = Duration::from_millis(positive(
            vars,
            "CAS_HANDLER_TIMEOUT_MS",
            DEFAULT_HANDLER_TIMEOUT_MS,
        )?);
        let only_track_most_recent_session = parse_or(
            vars,
            "CAS_ONLY_TRACK_MOST_RECENT_SESSION",
            defaults.only_track_most_recent_session,
        )?;
        let mfa_global_failure_mode = parse_or(
            vars,
            "CAS_MFA_GLOBAL_FAILURE_MODE",
            defaults.mfa_global_failure_mode,
        )?;
        let mfa_trigger_selection = parse_or(
            vars,
            "CAS_MFA_TRIGGER_SELECTION",
            defaults.mfa_trigger_selection,
        )?;
        let ticket_update_max_attempts = positive(
            vars,
            "CAS_TICKET_UPDATE_MAX_ATTEMPTS",
            defaults.ticket_update_max_attempts,
        )?;

        let observability = ObservabilityConfig {
            log_level: vars
                .get("CAS_LOG_LEVEL")
                .cloned()
                .unwrap_or(defaults.observability.log_level),
            json_logs: parse_or(vars, "CAS_JSON_LOGS", defaults.observability.json_logs)?,
        };

        Ok(CasConfig {
            tgt_max_time_to_live_secs,
            tgt_time_to_idle_secs,
            tgt_remember_me_time_to_live_secs,
            st_time_to_kill_secs,
            st_number_of_uses,
            pgt_max_time_to_live_secs,
            pgt_time_to_idle_secs,
            pt_time_to_kill_secs,
            pt_number_of_uses,
            ticket_id_random_length,
            ticket_id_suffix,
            registry_encryption_key,
            registry_backend,
            redis,
            database,
            registry_operation_timeout,
            registry_cleaner_enabled,
            registry_cleaner_interval,
            handler_timeout,
            only_track_most_recent_session,
            mfa_global_failure_mode,
            mfa_trigger_selection,
            ticket_update_max_attempts,
            observability,
        })
    }
}

fn decode_encryption_key(encoded: &str) -> Result<EncryptionKey, ConfigError> {
    let key = general_purpose::STANDARD
        .decode(encoded)
        .map_err(ConfigError::Base64Error)?;

    if key.len() != CIPHER_KEY_LEN {
        return Err(ConfigError::InvalidEncryptionKey(format!(
            "Expected {} bytes, got {}",
            CIPHER_KEY_LEN,
            key.len()
        )));
    }

    Ok(EncryptionKey(key))
}

fn invalid(var: &str, reason: String) -> ConfigError {
    ConfigError::InvalidValue {
        var: var.to_string(),
        reason,
    }
}

fn parse_or<T>(vars: &HashMap<String, String>, var: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match vars.get(var) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(var, e.to_string())),
        None => Ok(default),
    }
}

fn positive<T>(vars: &HashMap<String, String>, var: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: fmt::Display,
{
    let value = parse_or(vars, var, default)?;
    if value <= T::default() {
        return Err(invalid(var, "must be greater than zero".to_string()));
    }
    Ok(value)
}

fn positive_secs(
    vars: &HashMap<String, String>,
    var: &str,
    default: i64,
) -> Result<i64, ConfigError> {
    positive(vars, var, default)
}

fn number_of_uses(
    vars: &HashMap<String, String>,
    var: &str,
    default: u32,
) -> Result<u32, ConfigError> {
    positive(vars, var, default)
}
