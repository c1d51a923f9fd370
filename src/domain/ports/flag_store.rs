//! Persistent flag store port.
//!
//! The host keeps per-entity key/value flags (visibility state toward other
//! entities, cover state, manual overrides). This crate treats that store
//! as opaque: async get/set/remove on JSON values, failures surfaced as
//! `DomainError::FlagStoreError`.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::errors::DomainResult;

/// Well-known flag key prefixes used by the integrator and applier.
pub mod keys {
    /// Visibility of a subject as seen by the flag's owner: `visibility.<subject_id>`.
    pub fn visibility(subject_id: &str) -> String {
        format!("visibility.{subject_id}")
    }

    /// Cover a subject has against the flag's owner: `cover.<subject_id>`.
    pub fn cover(subject_id: &str) -> String {
        format!("cover.{subject_id}")
    }

    /// Manual cover override for a subject: `cover_override.<subject_id>`.
    pub fn cover_override(subject_id: &str) -> String {
        format!("cover_override.{subject_id}")
    }

    /// Manual visibility override for a subject: `visibility_override.<subject_id>`.
    pub fn visibility_override(subject_id: &str) -> String {
        format!("visibility_override.{subject_id}")
    }
}

/// Port for the opaque per-entity key/value store.
#[async_trait]
pub trait FlagStore: Send + Sync {
    /// Read a flag. Absent keys are `Ok(None)`, not errors.
    async fn get(&self, entity_id: &str, key: &str) -> DomainResult<Option<Value>>;

    /// Write a flag, replacing any existing value.
    async fn set(&self, entity_id: &str, key: &str, value: Value) -> DomainResult<()>;

    /// Remove a flag. Removing an absent key is not an error.
    async fn remove(&self, entity_id: &str, key: &str) -> DomainResult<()>;
}

/// In-memory flag store.
///
/// The default store for tests and for hosts without persistence wired in.
#[derive(Debug, Default)]
pub struct MemoryFlagStore {
    flags: RwLock<HashMap<(String, String), Value>>,
}

impl MemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored flags, across all entities.
    pub async fn len(&self) -> usize {
        self.flags.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.flags.read().await.is_empty()
    }
}

#[async_trait]
impl FlagStore for MemoryFlagStore {
    async fn get(&self, entity_id: &str, key: &str) -> DomainResult<Option<Value>> {
        let flags = self.flags.read().await;
        Ok(flags
            .get(&(entity_id.to_string(), key.to_string()))
            .cloned())
    }

    async fn set(&self, entity_id: &str, key: &str, value: Value) -> DomainResult<()> {
        let mut flags = self.flags.write().await;
        flags.insert((entity_id.to_string(), key.to_string()), value);
        Ok(())
    }

    async fn remove(&self, entity_id: &str, key: &str) -> DomainResult<()> {
        let mut flags = self.flags.write().await;
        flags.remove(&(entity_id.to_string(), key.to_string()));
        Ok(())
    }
}
