//! PostgreSQL ticket store.
//!
//! One row per ticket in the `tickets` table (see `migrations/`). The
//! conditional operations are single statements guarded by
//! `WHERE key = $1 AND version = $2`, so row-level locking makes them atomic.

use super::{RegistryError, StoredTicket, TicketStore};
use crate::tickets::TicketType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::config::DatabaseConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use tracing::{debug, error};

#[derive(Debug, FromRow)]
struct TicketRow {
    key: String,
    ticket_type: String,
    principal_digest: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    payload: Vec<u8>,
}

impl TryFrom<TicketRow> for StoredTicket {
    type Error = RegistryError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        let ticket_type: TicketType = row.ticket_type.parse().map_err(RegistryError::Serialization)?;
        Ok(StoredTicket {
            key: row.key,
            ticket_type,
            principal_digest: row.principal_digest,
            version: to_version(row.version)?,
            created_at: row.created_at,
            expires_at: row.expires_at,
            payload: row.payload,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PgTicketStore {
    pool: PgPool,
}

impl PgTicketStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool and bring the schema up to date.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, RegistryError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.postgres_url)
            .await
            .map_err(|e| {
                // Never log the URL; it may carry credentials.
                error!(target: "cas.registry.postgres", error = %e, "Failed to connect to database");
                RegistryError::Backend(format!("Failed to connect to database: {e}"))
            })?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), RegistryError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                error!(target: "cas.registry.postgres", error = %e, "Failed to run migrations");
                RegistryError::Backend(format!("Failed to run migrations: {e}"))
            })?;
        debug!(target: "cas.registry.postgres", "Ticket registry schema up to date");
        Ok(())
    }
}

#[async_trait]
impl TicketStore for PgTicketStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn put(&self, record: StoredTicket) -> Result<u64, RegistryError> {
        let version: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO tickets (
                key, ticket_type, principal_digest, version, created_at, expires_at, payload
            )
            VALUES ($1, $2, $3, 1, $4, $5, $6)
            ON CONFLICT (key) DO UPDATE SET
                ticket_type = EXCLUDED.ticket_type,
                principal_digest = EXCLUDED.principal_digest,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at,
                payload = EXCLUDED.payload,
                version = tickets.version + 1
            RETURNING version
            "#,
        )
        .bind(&record.key)
        .bind(record.ticket_type.prefix())
        .bind(&record.principal_digest)
        .bind(record.created_at)
        .bind(record.expires_at)
        .bind(&record.payload)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| database_error("store ticket", &e))?;

        to_version(version)
    }

    async fn get(&self, key: &str) -> Result<Option<StoredTicket>, RegistryError> {
        let row = sqlx::query_as::<_, TicketRow>(
            r#"
            SELECT key, ticket_type, principal_digest, version, created_at, expires_at, payload
            FROM tickets
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| database_error("fetch ticket", &e))?;

        row.map(StoredTicket::try_from).transpose()
    }

    async fn remove(&self, key: &str) -> Result<bool, RegistryError> {
        let result = sqlx::query("DELETE FROM tickets WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| database_error("delete ticket", &e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_all(&self) -> Result<u64, RegistryError> {
        let result = sqlx::query("DELETE FROM tickets")
            .execute(&self.pool)
            .await
            .map_err(|e| database_error("delete all tickets", &e))?;
        Ok(result.rows_affected())
    }

    async fn compare_and_swap(
        &self,
        expected_version: u64,
        record: StoredTicket,
    ) -> Result<Option<u64>, RegistryError> {
        let Ok(expected) = i64::try_from(expected_version) else {
            return Ok(None);
        };

        let version: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE tickets SET
                ticket_type = $3,
                principal_digest = $4,
                created_at = $5,
                expires_at = $6,
                payload = $7,
                version = version + 1
            WHERE key = $1 AND version = $2
            RETURNING version
            "#,
        )
        .bind(&record.key)
        .bind(expected)
        .bind(record.ticket_type.prefix())
        .bind(&record.principal_digest)
        .bind(record.created_at)
        .bind(record.expires_at)
        .bind(&record.payload)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| database_error("compare-and-swap ticket", &e))?;

        version.map(to_version).transpose()
    }

    async fn compare_and_remove(
        &self,
        key: &str,
        expected_version: u64,
    ) -> Result<bool, RegistryError> {
        let Ok(expected) = i64::try_from(expected_version) else {
            return Ok(false);
        };

        let result = sqlx::query("DELETE FROM tickets WHERE key = $1 AND version = $2")
            .bind(key)
            .bind(expected)
            .execute(&self.pool)
            .await
            .map_err(|e| database_error("compare-and-remove ticket", &e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn scan(
        &self,
        from: usize,
        count: Option<usize>,
    ) -> Result<Vec<StoredTicket>, RegistryError> {
        let offset = i64::try_from(from).unwrap_or(i64::MAX);
        let limit = count.map(|c| i64::try_from(c).unwrap_or(i64::MAX));

        let rows = sqlx::query_as::<_, TicketRow>(
            r#"
            SELECT key, ticket_type, principal_digest, version, created_at, expires_at, payload
            FROM tickets
            ORDER BY created_at, key
            OFFSET $1
            LIMIT $2
            "#,
        )
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| database_error("scan tickets", &e))?;

        rows.into_iter().map(StoredTicket::try_from).collect()
    }
}

fn to_version(version: i64) -> Result<u64, RegistryError> {
    u64::try_from(version)
        .map_err(|_| RegistryError::Serialization(format!("Invalid ticket version {version}")))
}

fn database_error(operation: &str, e: &sqlx::Error) -> RegistryError {
    error!(target: "cas.registry.postgres", operation, error = %e, "Database query failed");
    RegistryError::Backend(format!("Failed to {operation}: {e}"))
}
