//! Redis ticket store.
//!
//! # Key Patterns
//!
//! - `{prefix}:ticket:{key}` - Ticket record (HASH: `version`, `type`,
//!   `principal`, `created`, `expires`, `payload`)
//! - `{prefix}:tickets` - Index of ticket keys (ZSET scored by creation millis)
//!
//! Records carry a `PEXPIREAT` at their hard ceiling so Redis evicts tickets
//! nobody reads again. Evicted records leave stale index members behind;
//! [`RedisTicketStore::scan`] prunes them as it finds them.
//!
//! All writes go through the scripts in [`super::lua_scripts`], so the
//! version check and the write are one atomic step on the server.

use super::{lua_scripts, RegistryError, StoredTicket, TicketStore};
use crate::tickets::TicketType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::config::RedisConfig;
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};
use tracing::{debug, error, warn};

type RawRecord = (
    Option<u64>,
    Option<String>,
    Option<String>,
    Option<i64>,
    Option<i64>,
    Option<Vec<u8>>,
);

/// Ticket store backed by a shared Redis deployment.
///
/// Cheaply cloneable; the multiplexed connection is shared by every clone.
#[derive(Clone)]
pub struct RedisTicketStore {
    connection: MultiplexedConnection,
    key_prefix: String,
    put_script: Script,
    compare_and_swap_script: Script,
    compare_and_remove_script: Script,
    remove_script: Script,
    remove_all_script: Script,
}

impl std::fmt::Debug for RedisTicketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisTicketStore")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RedisTicketStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Backend` if the URL is invalid or the
    /// connection fails.
    pub async fn new(config: &RedisConfig) -> Result<Self, RegistryError> {
        // Never log the URL; it may carry credentials.
        let client = Client::open(config.url.as_str()).map_err(|e| {
            error!(target: "cas.registry.redis", error = %e, "Failed to open Redis client");
            RegistryError::Backend(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(target: "cas.registry.redis", error = %e, "Failed to connect to Redis");
                RegistryError::Backend(format!("Failed to connect to Redis: {e}"))
            })?;

        debug!(target: "cas.registry.redis", key_prefix = %config.key_prefix, "Connected to Redis");

        Ok(Self {
            connection,
            key_prefix: config.key_prefix.clone(),
            put_script: Script::new(lua_scripts::PUT_TICKET),
            compare_and_swap_script: Script::new(lua_scripts::COMPARE_AND_SWAP_TICKET),
            compare_and_remove_script: Script::new(lua_scripts::COMPARE_AND_REMOVE_TICKET),
            remove_script: Script::new(lua_scripts::REMOVE_TICKET),
            remove_all_script: Script::new(lua_scripts::REMOVE_ALL_TICKETS),
        })
    }

    fn record_key(&self, key: &str) -> String {
        format!("{}:ticket:{key}", self.key_prefix)
    }

    fn record_key_prefix(&self) -> String {
        format!("{}:ticket:", self.key_prefix)
    }

    fn index_key(&self) -> String {
        format!("{}:tickets", self.key_prefix)
    }

    async fn read(
        &self,
        conn: &mut MultiplexedConnection,
        key: &str,
    ) -> Result<Option<StoredTicket>, RegistryError> {
        let raw: RawRecord = redis::cmd("HMGET")
            .arg(self.record_key(key))
            .arg("version")
            .arg("type")
            .arg("principal")
            .arg("created")
            .arg("expires")
            .arg("payload")
            .query_async(conn)
            .await
            .map_err(|e| backend_error("read ticket", &e))?;

        let (Some(version), Some(ticket_type), principal, Some(created), expires, Some(payload)) =
            raw
        else {
            return Ok(None);
        };

        let ticket_type: TicketType = ticket_type.parse().map_err(|e: String| {
            warn!(target: "cas.registry.redis", error = %e, "Unknown ticket type in record");
            RegistryError::Serialization(e)
        })?;
        let created_at = from_millis(created).ok_or_else(|| {
            RegistryError::Serialization(format!("Invalid creation time {created}"))
        })?;

        Ok(Some(StoredTicket {
            key: key.to_string(),
            ticket_type,
            principal_digest: principal.filter(|p| !p.is_empty()),
            version,
            created_at,
            expires_at: expires.filter(|ms| *ms > 0).and_then(from_millis),
            payload,
        }))
    }
}

#[async_trait]
impl TicketStore for RedisTicketStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn put(&self, record: StoredTicket) -> Result<u64, RegistryError> {
        let mut conn = self.connection.clone();
        let version: u64 = self
            .put_script
            .key(self.record_key(&record.key))
            .key(self.index_key())
            .arg(&record.key)
            .arg(record.ticket_type.prefix())
            .arg(record.principal_digest.as_deref().unwrap_or(""))
            .arg(record.created_at.timestamp_millis())
            .arg(expires_millis(&record))
            .arg(record.payload.as_slice())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| backend_error("put ticket", &e))?;
        Ok(version)
    }

    async fn get(&self, key: &str) -> Result<Option<StoredTicket>, RegistryError> {
        let mut conn = self.connection.clone();
        self.read(&mut conn, key).await
    }

    async fn remove(&self, key: &str) -> Result<bool, RegistryError> {
        let mut conn = self.connection.clone();
        let removed: i64 = self
            .remove_script
            .key(self.record_key(key))
            .key(self.index_key())
            .arg(key)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| backend_error("remove ticket", &e))?;
        Ok(removed > 0)
    }

    async fn remove_all(&self) -> Result<u64, RegistryError> {
        let mut conn = self.connection.clone();
        let removed: u64 = self
            .remove_all_script
            .key(self.index_key())
            .arg(self.record_key_prefix())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| backend_error("remove all tickets", &e))?;
        Ok(removed)
    }

    async fn compare_and_swap(
        &self,
        expected_version: u64,
        record: StoredTicket,
    ) -> Result<Option<u64>, RegistryError> {
        let mut conn = self.connection.clone();
        let version: u64 = self
            .compare_and_swap_script
            .key(self.record_key(&record.key))
            .key(self.index_key())
            .arg(expected_version)
            .arg(&record.key)
            .arg(record.ticket_type.prefix())
            .arg(record.principal_digest.as_deref().unwrap_or(""))
            .arg(record.created_at.timestamp_millis())
            .arg(expires_millis(&record))
            .arg(record.payload.as_slice())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| backend_error("compare-and-swap ticket", &e))?;
        Ok((version > 0).then_some(version))
    }

    async fn compare_and_remove(
        &self,
        key: &str,
        expected_version: u64,
    ) -> Result<bool, RegistryError> {
        let mut conn = self.connection.clone();
        let removed: i64 = self
            .compare_and_remove_script
            .key(self.record_key(key))
            .key(self.index_key())
            .arg(expected_version)
            .arg(key)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| backend_error("compare-and-remove ticket", &e))?;
        Ok(removed == 1)
    }

    async fn scan(
        &self,
        from: usize,
        count: Option<usize>,
    ) -> Result<Vec<StoredTicket>, RegistryError> {
        if count == Some(0) {
            return Ok(Vec::new());
        }
        let start = isize::try_from(from).unwrap_or(isize::MAX);
        let stop = match count {
            Some(count) => start.saturating_add(isize::try_from(count).unwrap_or(isize::MAX) - 1),
            None => -1,
        };

        let mut conn = self.connection.clone();
        let members: Vec<String> = redis::cmd("ZRANGE")
            .arg(self.index_key())
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("scan ticket index", &e))?;

        let mut records = Vec::with_capacity(members.len());
        let mut stale = Vec::new();
        for member in members {
            match self.read(&mut conn, &member).await? {
                Some(record) => records.push(record),
                None => stale.push(member),
            }
        }

        if !stale.is_empty() {
            debug!(target: "cas.registry.redis", count = stale.len(), "Pruning evicted index entries");
            let pruned: Result<i64, _> = redis::cmd("ZREM")
                .arg(self.index_key())
                .arg(&stale)
                .query_async(&mut conn)
                .await;
            if let Err(e) = pruned {
                warn!(target: "cas.registry.redis", error = %e, "Failed to prune ticket index");
            }
        }

        Ok(records)
    }
}

fn expires_millis(record: &StoredTicket) -> i64 {
    record.expires_at.map_or(0, |at| at.timestamp_millis())
}

fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

fn backend_error(operation: &str, e: &redis::RedisError) -> RegistryError {
    error!(target: "cas.registry.redis", operation, error = %e, "Redis command failed");
    RegistryError::Backend(format!("Redis {operation} failed: {e}"))
}
