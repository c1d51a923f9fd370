//! SQLite implementation of the `FlagStore` port.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::debug;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::FlagStore;

/// Flag store backed by a single `entity_flags` table with upsert
/// semantics. Values are stored as JSON text.
pub struct SqliteFlagStore {
    pool: SqlitePool,
}

impl SqliteFlagStore {
    /// Wrap a pool and ensure the schema exists.
    pub async fn new(pool: SqlitePool) -> DomainResult<Self> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS entity_flags (
                entity_id TEXT NOT NULL,
                flag_key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (entity_id, flag_key)
            )
            ",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    /// Remove every flag owned by an entity. Used when an entity leaves
    /// the scene.
    pub async fn purge_entity(&self, entity_id: &str) -> DomainResult<u64> {
        let result = sqlx::query("DELETE FROM entity_flags WHERE entity_id = ?1")
            .bind(entity_id)
            .execute(&self.pool)
            .await?;
        debug!(entity = %entity_id, removed = result.rows_affected(), "purged entity flags");
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl FlagStore for SqliteFlagStore {
    async fn get(&self, entity_id: &str, key: &str) -> DomainResult<Option<Value>> {
        let raw: Option<String> = sqlx::query_scalar(
            "SELECT value FROM entity_flags WHERE entity_id = ?1 AND flag_key = ?2",
        )
        .bind(entity_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match raw {
            Some(text) => {
                let value = serde_json::from_str(&text).map_err(|err| {
                    DomainError::SerializationError(format!(
                        "corrupt flag value for {entity_id}:{key}: {err}"
                    ))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, entity_id: &str, key: &str, value: Value) -> DomainResult<()> {
        let text = serde_json::to_string(&value)?;
        sqlx::query(
            r"
            INSERT INTO entity_flags (entity_id, flag_key, value, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (entity_id, flag_key)
            DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            ",
        )
        .bind(entity_id)
        .bind(key)
        .bind(text)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, entity_id: &str, key: &str) -> DomainResult<()> {
        sqlx::query("DELETE FROM entity_flags WHERE entity_id = ?1 AND flag_key = ?2")
            .bind(entity_id)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
