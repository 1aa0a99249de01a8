//! Ticket registry.
//!
//! [`TicketRegistry`] owns the registry contract: serialization, optional
//! at-rest encryption, lazy expiration on read, cascading deletion and the
//! counting queries. Storage is delegated to a [`TicketStore`] backend, so the
//! in-memory, Redis and PostgreSQL backends all honor identical semantics.
//!
//! Every record carries a storage version assigned by the backend. Consuming
//! a grant ticket and updating a granting ticket go through single
//! conditional backend calls ([`TicketRegistry::update_if_unchanged`],
//! [`TicketRegistry::delete_if_unchanged`]), so concurrent validations of
//! one ticket id succeed at most once across every node sharing the backend.

pub mod cleaner;
pub mod lua_scripts;
pub mod memory;
pub mod postgres;
pub mod redis;

pub use cleaner::{run_cleaner, TicketRegistryCleaner};
pub use memory::InMemoryTicketStore;
pub use postgres::PgTicketStore;
pub use redis::RedisTicketStore;

use crate::clock::Clock;
use crate::config::{CasConfig, RegistryBackend};
use crate::crypto::{self, CryptoError, TicketCipher};
use crate::observability::metrics;
use crate::tickets::{Ticket, TicketType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::sanitize::MaskedTicketId;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Registry backend error: {0}")]
    Backend(String),

    #[error("Registry operation timed out: {0}")]
    Timeout(String),

    #[error("Ticket serialization failed: {0}")]
    Serialization(String),

    #[error("Ticket encryption failed: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Concurrent modification of ticket {0}")]
    Conflict(String),
}

/// A ticket as a backend sees it: opaque payload plus the few plaintext
/// fields needed for indexing and eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTicket {
    /// Ticket id, or its SHA-512 digest when the registry encrypts.
    pub key: String,
    pub ticket_type: TicketType,
    /// SHA-256 digest of the owning principal, for TGTs.
    pub principal_digest: Option<String>,
    /// Assigned by the backend; starts at 1 and increases on every write.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    /// Hard ceiling after which the backend may evict the record.
    pub expires_at: Option<DateTime<Utc>>,
    pub payload: Vec<u8>,
}

/// Storage backend contract.
///
/// Implementations must make every write visible to subsequent reads from
/// any node sharing the backend, and must implement the conditional
/// operations atomically.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    /// Insert or overwrite. Returns the new version.
    async fn put(&self, record: StoredTicket) -> Result<u64, RegistryError>;

    async fn get(&self, key: &str) -> Result<Option<StoredTicket>, RegistryError>;

    async fn remove(&self, key: &str) -> Result<bool, RegistryError>;

    async fn remove_all(&self) -> Result<u64, RegistryError>;

    /// Overwrite `record.key` only if its current version equals
    /// `expected_version`. Returns the new version when applied.
    async fn compare_and_swap(
        &self,
        expected_version: u64,
        record: StoredTicket,
    ) -> Result<Option<u64>, RegistryError>;

    /// Remove `key` only if its current version equals `expected_version`.
    async fn compare_and_remove(
        &self,
        key: &str,
        expected_version: u64,
    ) -> Result<bool, RegistryError>;

    /// Records in a stable order (creation time, then key), skipping `from`
    /// and returning at most `count`.
    async fn scan(
        &self,
        from: usize,
        count: Option<usize>,
    ) -> Result<Vec<StoredTicket>, RegistryError>;
}

/// A ticket together with the storage version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedTicket {
    pub ticket: Ticket,
    pub version: u64,
}

/// Paging window for [`TicketRegistry::stream`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamCriteria {
    pub from: usize,
    pub count: Option<usize>,
}

pub struct TicketRegistry {
    store: Arc<dyn TicketStore>,
    cipher: Option<Arc<TicketCipher>>,
    clock: Arc<dyn Clock>,
    operation_timeout: Option<Duration>,
}

impl std::fmt::Debug for TicketRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketRegistry")
            .field("store", &self.store.name())
            .field("encrypted", &self.cipher.is_some())
            .field("operation_timeout", &self.operation_timeout)
            .finish()
    }
}

impl TicketRegistry {
    pub fn new(store: Arc<dyn TicketStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            cipher: None,
            clock,
            operation_timeout: None,
        }
    }

    /// Registry over the backend `config` selects, with encryption and the
    /// per-operation timeout applied.
    pub async fn from_config(config: &CasConfig, clock: Arc<dyn Clock>) -> Result<Self, RegistryError> {
        let store: Arc<dyn TicketStore> = match config.registry_backend {
            RegistryBackend::Memory => Arc::new(InMemoryTicketStore::new()),
            RegistryBackend::Redis => {
                let redis = config.redis.as_ref().ok_or_else(|| {
                    RegistryError::Backend("Redis backend selected without Redis configuration".into())
                })?;
                Arc::new(RedisTicketStore::new(redis).await?)
            }
            RegistryBackend::Postgres => {
                let database = config.database.as_ref().ok_or_else(|| {
                    RegistryError::Backend("PostgreSQL backend selected without database configuration".into())
                })?;
                Arc::new(PgTicketStore::connect(database).await?)
            }
        };

        let mut registry =
            Self::new(store, clock).with_operation_timeout(config.registry_operation_timeout);
        if let Some(key) = &config.registry_encryption_key {
            registry = registry.with_cipher(TicketCipher::new(key.as_bytes())?);
        }
        Ok(registry)
    }

    /// Encrypt payloads and digest storage keys with `cipher`.
    pub fn with_cipher(mut self, cipher: TicketCipher) -> Self {
        self.cipher = Some(Arc::new(cipher));
        self
    }

    /// Bound every backend call; expiry is reported as [`RegistryError::Timeout`].
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    #[instrument(skip_all, fields(ticket_id = %MaskedTicketId(&ticket.id)))]
    pub async fn add_ticket(&self, ticket: &Ticket) -> Result<(), RegistryError> {
        let record = self.encode(ticket)?;
        self.timed("add", self.store.put(record)).await?;
        debug!(target: "cas.registry", ticket_type = %ticket.ticket_type, "Added ticket");
        Ok(())
    }

    /// Unconditional overwrite. Prefer [`Self::update_if_unchanged`] for
    /// read-modify-write sequences.
    #[instrument(skip_all, fields(ticket_id = %MaskedTicketId(&ticket.id)))]
    pub async fn update_ticket(&self, ticket: &Ticket) -> Result<(), RegistryError> {
        let record = self.encode(ticket)?;
        self.timed("update", self.store.put(record)).await?;
        Ok(())
    }

    /// Live ticket by id. Expired tickets read as `None` and are removed
    /// (with their descendants) on the way out.
    pub async fn get_ticket(&self, id: &str) -> Result<Option<Ticket>, RegistryError> {
        Ok(self.get_versioned(id).await?.map(|v| v.ticket))
    }

    /// Live ticket by id, only if its id prefix names `ticket_type`.
    pub async fn get_typed(
        &self,
        id: &str,
        ticket_type: TicketType,
    ) -> Result<Option<Ticket>, RegistryError> {
        if TicketType::from_id(id) != Some(ticket_type) {
            return Ok(None);
        }
        self.get_ticket(id).await
    }

    /// Live ticket by id, only if it satisfies `predicate`.
    pub async fn get_ticket_matching<P>(
        &self,
        id: &str,
        predicate: P,
    ) -> Result<Option<Ticket>, RegistryError>
    where
        P: Fn(&Ticket) -> bool + Send,
    {
        Ok(self.get_ticket(id).await?.filter(|t| predicate(t)))
    }

    #[instrument(skip_all, fields(ticket_id = %MaskedTicketId(id)))]
    pub async fn get_versioned(&self, id: &str) -> Result<Option<VersionedTicket>, RegistryError> {
        let Some(versioned) = self.load(id).await? else {
            return Ok(None);
        };

        if versioned.ticket.is_expired(self.clock.now()) {
            debug!(target: "cas.registry", "Ticket read after expiry, removing");
            if let Err(e) = self.delete_ticket(id).await {
                warn!(target: "cas.registry", error = %e, "Failed to remove expired ticket");
            } else {
                metrics::record_tickets_removed("expired_on_read", 1);
            }
            return Ok(None);
        }

        Ok(Some(versioned))
    }

    /// Write `versioned.ticket` only if the stored version is still
    /// `versioned.version`. Returns `false` when another writer got there first.
    #[instrument(skip_all, fields(ticket_id = %MaskedTicketId(&versioned.ticket.id)))]
    pub async fn update_if_unchanged(
        &self,
        versioned: &VersionedTicket,
    ) -> Result<bool, RegistryError> {
        let record = self.encode(&versioned.ticket)?;
        let applied = self
            .timed(
                "compare_and_swap",
                self.store.compare_and_swap(versioned.version, record),
            )
            .await?;
        Ok(applied.is_some())
    }

    /// Remove `id` only if the stored version is still `version`.
    #[instrument(skip_all, fields(ticket_id = %MaskedTicketId(id)))]
    pub async fn delete_if_unchanged(&self, id: &str, version: u64) -> Result<bool, RegistryError> {
        let key = self.storage_key(id);
        self.timed(
            "compare_and_remove",
            self.store.compare_and_remove(&key, version),
        )
        .await
    }

    /// Remove `id` and every ticket recorded beneath it, expired or not.
    /// Returns how many tickets were actually removed.
    #[instrument(skip_all, fields(ticket_id = %MaskedTicketId(id)))]
    pub async fn delete_ticket(&self, id: &str) -> Result<u64, RegistryError> {
        let mut pending = vec![id.to_string()];
        let mut removed = 0u64;

        while let Some(next) = pending.pop() {
            if let Some(versioned) = self.load(&next).await? {
                pending.extend(versioned.ticket.descendant_ids());
            }
            let key = self.storage_key(&next);
            if self.timed("delete", self.store.remove(&key)).await? {
                removed += 1;
            }
        }

        debug!(target: "cas.registry", removed, "Deleted ticket lineage");
        Ok(removed)
    }

    pub async fn delete_all(&self) -> Result<u64, RegistryError> {
        self.timed("delete_all", self.store.remove_all()).await
    }

    /// Every live ticket.
    pub async fn get_tickets(&self) -> Result<Vec<Ticket>, RegistryError> {
        self.stream(StreamCriteria::default()).await
    }

    /// A page of live tickets in backend order. Records that fail to decode
    /// or are expired are skipped.
    pub async fn stream(&self, criteria: StreamCriteria) -> Result<Vec<Ticket>, RegistryError> {
        let records = self
            .timed("scan", self.store.scan(criteria.from, criteria.count))
            .await?;
        let now = self.clock.now();
        Ok(records
            .into_iter()
            .filter_map(|record| self.decode(record, None))
            .map(|v| v.ticket)
            .filter(|t| !t.is_expired(now))
            .collect())
    }

    /// Every decodable ticket, including expired ones. Used by the cleaner.
    pub(crate) async fn all_tickets_including_expired(&self) -> Result<Vec<Ticket>, RegistryError> {
        let records = self.timed("scan", self.store.scan(0, None)).await?;
        Ok(records
            .into_iter()
            .filter_map(|record| self.decode(record, None))
            .map(|v| v.ticket)
            .collect())
    }

    /// Live root sessions (TGTs) owned by `principal_id`.
    pub async fn count_sessions_for(&self, principal_id: &str) -> Result<u64, RegistryError> {
        let digest = crypto::digest_principal_id(principal_id);
        self.count_live(|record| {
            record.ticket_type == TicketType::TicketGranting
                && record.principal_digest.as_deref() == Some(digest.as_str())
        })
        .await
    }

    /// Live root sessions (TGTs).
    pub async fn session_count(&self) -> Result<u64, RegistryError> {
        self.count_live(|record| record.ticket_type == TicketType::TicketGranting)
            .await
    }

    /// Live STs and PTs.
    pub async fn service_ticket_count(&self) -> Result<u64, RegistryError> {
        self.count_live(|record| record.ticket_type.is_grant()).await
    }

    async fn count_live<F>(&self, filter: F) -> Result<u64, RegistryError>
    where
        F: Fn(&StoredTicket) -> bool,
    {
        let records = self.timed("scan", self.store.scan(0, None)).await?;
        let now = self.clock.now();
        let count = records
            .into_iter()
            .filter(|record| filter(record))
            .filter_map(|record| self.decode(record, None))
            .filter(|v| !v.ticket.is_expired(now))
            .count();
        Ok(count as u64)
    }

    /// Read ignoring expiration.
    async fn load(&self, id: &str) -> Result<Option<VersionedTicket>, RegistryError> {
        let key = self.storage_key(id);
        let record = self.timed("get", self.store.get(&key)).await?;
        Ok(record.and_then(|r| self.decode(r, Some(id))))
    }

    fn storage_key(&self, id: &str) -> String {
        if self.cipher.is_some() {
            crypto::digest_ticket_id(id)
        } else {
            id.to_string()
        }
    }

    fn encode(&self, ticket: &Ticket) -> Result<StoredTicket, RegistryError> {
        let json =
            serde_json::to_vec(ticket).map_err(|e| RegistryError::Serialization(e.to_string()))?;
        let payload = match &self.cipher {
            Some(cipher) => cipher.encrypt(&json)?,
            None => json,
        };

        let principal_digest = match ticket.ticket_type {
            TicketType::TicketGranting => ticket.principal_id().map(crypto::digest_principal_id),
            _ => None,
        };

        Ok(StoredTicket {
            key: self.storage_key(&ticket.id),
            ticket_type: ticket.ticket_type,
            principal_digest,
            version: 0,
            created_at: ticket.created_at,
            expires_at: ticket
                .expiration_policy
                .hard_ceiling()
                .and_then(|ceiling| ticket.created_at.checked_add_signed(ceiling)),
            payload,
        })
    }

    /// Decode a record. Any failure reads as "not found".
    fn decode(&self, record: StoredTicket, expected_id: Option<&str>) -> Option<VersionedTicket> {
        let plaintext = match &self.cipher {
            Some(cipher) => match cipher.decrypt(&record.payload) {
                Ok(p) => p,
                Err(e) => {
                    warn!(target: "cas.registry", error = %e, "Failed to decrypt ticket, treating as not found");
                    return None;
                }
            },
            None => record.payload,
        };

        let ticket: Ticket = match serde_json::from_slice(&plaintext) {
            Ok(t) => t,
            Err(e) => {
                warn!(target: "cas.registry", error = %e, "Failed to decode ticket, treating as not found");
                return None;
            }
        };

        if !ticket.is_well_formed() || expected_id.is_some_and(|id| id != ticket.id) {
            warn!(
                target: "cas.registry",
                ticket_id = %MaskedTicketId(&ticket.id),
                "Stored ticket does not match its key or type, treating as not found"
            );
            return None;
        }

        Some(VersionedTicket {
            ticket,
            version: record.version,
        })
    }

    async fn timed<T, F>(&self, operation: &'static str, fut: F) -> Result<T, RegistryError>
    where
        F: Future<Output = Result<T, RegistryError>>,
    {
        let start = Instant::now();
        let result = match self.operation_timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(RegistryError::Timeout(format!(
                    "{operation} on {} after {}ms",
                    self.store.name(),
                    limit.as_millis()
                ))),
            },
            None => fut.await,
        };

        let status = if result.is_ok() { "success" } else { "error" };
        metrics::record_registry_operation(operation, status, start.elapsed());
        if let Err(e) = &result {
            warn!(target: "cas.registry", operation, backend = self.store.name(), error = %e, "Registry operation failed");
        }
        result
    }
}
