//! Transactional application of decided outcomes to persistent state.
//!
//! Every write lands in a per-transaction command log of
//! `{location, old value, new value}` records, so rollback is a reverse
//! fold over the log rather than per-change-type logic. A batch of
//! outcomes either commits as a whole or is fully undone: any hard error
//! (a write that fails past retries, or an uncorrectable post-apply
//! inconsistency) rolls back everything applied so far.
//!
//! Concurrent transactions touching the same pair are an accepted
//! last-write-wins race; this engine serializes nothing across
//! transactions.

use backoff::ExponentialBackoffBuilder;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::config::ApplierConfig;
use crate::domain::models::{OverrideChange, SneakOutcome};
use crate::domain::ports::{keys, FlagStore};

/// Which side of the pair state a change record touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Visibility,
    Cover,
    Override,
}

/// One applied write, with enough context to undo it.
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    pub observer_id: String,
    pub subject_id: String,
    pub kind: ChangeKind,
    /// Store location the write went to.
    pub entity_id: String,
    pub key: String,
    /// Value before the write; `None` means the key was absent.
    pub old_value: Option<Value>,
    /// Value written; `None` means the key was removed.
    pub new_value: Option<Value>,
    pub applied_at: DateTime<Utc>,
}

/// Per-call options; unset fields fall back to the applier's config.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    /// How long the committed transaction stays available for late rollback.
    pub grace_period: Option<Duration>,
    /// Maximum inconsistencies the post-apply check will auto-correct.
    pub auto_correct_threshold: Option<usize>,
}

/// Options a transaction actually ran under, after config resolution.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedApplyOptions {
    pub grace_period: Duration,
    pub auto_correct_threshold: usize,
}

/// Server-side transaction record. Owned by the applier, referenced by id.
#[derive(Debug)]
pub struct Transaction {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    log: Vec<ChangeRecord>,
    pub completed: bool,
    /// Options this transaction ran under.
    pub options: ResolvedApplyOptions,
}

impl Transaction {
    fn new(options: ResolvedApplyOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            log: Vec::new(),
            completed: false,
            options,
        }
    }

    /// Applied changes of one kind, in application order.
    pub fn changes_of(&self, kind: ChangeKind) -> impl Iterator<Item = &ChangeRecord> {
        self.log.iter().filter(move |record| record.kind == kind)
    }

    pub fn change_count(&self) -> usize {
        self.log.len()
    }
}

/// Result surface of `apply_outcomes`.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    pub success: bool,
    pub transaction_id: Uuid,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Writes committed and still in effect (zero after a rollback).
    pub applied_changes: usize,
}

/// Applies decided outcomes to the flag store as one logical transaction.
pub struct OutcomeApplier {
    config: ApplierConfig,
    store: Arc<dyn FlagStore>,
    transactions: Arc<RwLock<HashMap<Uuid, Transaction>>>,
}

impl OutcomeApplier {
    pub fn new(config: ApplierConfig, store: Arc<dyn FlagStore>) -> Self {
        Self {
            config,
            store,
            transactions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Apply a batch of outcomes atomically.
    ///
    /// Invalid outcomes are reported per-item and skipped; the valid
    /// remainder either fully commits or is fully rolled back.
    pub async fn apply_outcomes(
        &self,
        outcomes: &[SneakOutcome],
        options: &ApplyOptions,
    ) -> ApplyReport {
        let resolved = ResolvedApplyOptions {
            grace_period: options
                .grace_period
                .unwrap_or_else(|| Duration::from_millis(self.config.grace_period_ms)),
            auto_correct_threshold: options
                .auto_correct_threshold
                .unwrap_or(self.config.auto_correct_threshold),
        };
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        // Phase 1: validation, before any side effect.
        let valid: Vec<&SneakOutcome> = outcomes
            .iter()
            .filter(|outcome| match outcome.validate() {
                Ok(()) => true,
                Err(err) => {
                    errors.push(err.to_string());
                    false
                }
            })
            .collect();

        let mut transaction = Transaction::new(resolved);
        let transaction_id = transaction.id;
        info!(
            transaction_id = %transaction_id,
            outcomes = outcomes.len(),
            valid = valid.len(),
            "applying outcome batch"
        );

        if valid.is_empty() {
            return ApplyReport {
                success: errors.is_empty(),
                transaction_id,
                errors,
                warnings,
                applied_changes: 0,
            };
        }

        // Phase 2: apply partitions; visibility-only, then cover-only,
        // then combined (visibility before cover within each pair).
        let (visibility_only, cover_only, combined): (Vec<_>, Vec<_>, Vec<_>) = {
            let mut v = Vec::new();
            let mut c = Vec::new();
            let mut both = Vec::new();
            for outcome in valid {
                if outcome.is_combined() {
                    both.push(outcome);
                } else if outcome.new_visibility.is_some() {
                    v.push(outcome);
                } else {
                    c.push(outcome);
                }
            }
            (v, c, both)
        };

        let mut hard_error: Option<String> = None;
        'apply: for outcome in visibility_only
            .into_iter()
            .chain(cover_only)
            .chain(combined)
        {
            if let Err(err) = self.apply_one(outcome, &mut transaction).await {
                hard_error = Some(err.to_string());
                break 'apply;
            }
        }

        // Phase 3: post-apply consistency check + bounded auto-correction.
        if hard_error.is_none() {
            match self.verify_consistency(&transaction, &mut warnings).await {
                Ok(()) => {}
                Err(err) => hard_error = Some(err.to_string()),
            }
        }

        // Phase 4: commit or roll back.
        if let Some(err) = hard_error {
            warn!(
                transaction_id = %transaction_id,
                error = %err,
                "hard error during apply; rolling back"
            );
            errors.push(err);
            let rollback_warnings = Self::unwind(&*self.store, &transaction).await;
            warnings.extend(rollback_warnings);
            return ApplyReport {
                success: false,
                transaction_id,
                errors,
                warnings,
                applied_changes: 0,
            };
        }

        transaction.completed = true;
        let applied_changes = transaction.change_count();
        {
            let mut transactions = self.transactions.write().await;
            transactions.insert(transaction_id, transaction);
        }
        self.schedule_removal(transaction_id, resolved.grace_period);

        info!(
            transaction_id = %transaction_id,
            applied_changes,
            "outcome batch committed"
        );
        ApplyReport {
            success: errors.is_empty(),
            transaction_id,
            errors,
            warnings,
            applied_changes,
        }
    }

    /// Undo a transaction by id. Idempotent: unknown or already
    /// rolled-back ids return false without side effects.
    pub async fn rollback_transaction(&self, id: Uuid) -> bool {
        let transaction = {
            let mut transactions = self.transactions.write().await;
            transactions.remove(&id)
        };
        match transaction {
            Some(transaction) => {
                info!(transaction_id = %id, "explicit rollback requested");
                Self::unwind(&*self.store, &transaction).await;
                true
            }
            None => {
                debug!(transaction_id = %id, "rollback requested for unknown transaction");
                false
            }
        }
    }

    /// Transactions currently retained (in-flight or inside the grace window).
    pub async fn active_transaction_count(&self) -> usize {
        self.transactions.read().await.len()
    }

    /// Apply a single outcome, appending a change record per write.
    /// Visibility lands before cover for the same pair: downstream
    /// cover-implies-concealment reads depend on the visibility write
    /// being committed first.
    async fn apply_one(
        &self,
        outcome: &SneakOutcome,
        transaction: &mut Transaction,
    ) -> DomainResult<()> {
        let observer = &outcome.observer_id;
        let subject = &outcome.subject_id;

        if let Some(level) = outcome.new_visibility {
            self.apply_change(
                transaction,
                outcome,
                ChangeKind::Visibility,
                &keys::visibility(subject),
                Some(serde_json::to_value(level)?),
            )
            .await?;
        }
        if let Some(level) = outcome.new_cover {
            self.apply_change(
                transaction,
                outcome,
                ChangeKind::Cover,
                &keys::cover(subject),
                Some(serde_json::to_value(level)?),
            )
            .await?;
        }
        if let Some(change) = outcome.override_change {
            let new_value = match change {
                OverrideChange::Set(level) => Some(serde_json::to_value(level)?),
                OverrideChange::Clear => None,
            };
            self.apply_change(
                transaction,
                outcome,
                ChangeKind::Override,
                &keys::cover_override(subject),
                new_value,
            )
            .await?;
        }

        debug!(
            observer = %observer,
            subject = %subject,
            log_len = transaction.change_count(),
            "outcome applied"
        );
        Ok(())
    }

    async fn apply_change(
        &self,
        transaction: &mut Transaction,
        outcome: &SneakOutcome,
        kind: ChangeKind,
        key: &str,
        new_value: Option<Value>,
    ) -> DomainResult<()> {
        let entity_id = outcome.observer_id.clone();
        let old_value = self.store.get(&entity_id, key).await?;

        self.write_with_retry(&entity_id, key, new_value.as_ref())
            .await?;

        transaction.log.push(ChangeRecord {
            observer_id: outcome.observer_id.clone(),
            subject_id: outcome.subject_id.clone(),
            kind,
            entity_id,
            key: key.to_string(),
            old_value,
            new_value,
            applied_at: Utc::now(),
        });
        Ok(())
    }

    /// Re-read every written location and compare with intent. Small
    /// inconsistency counts get one auto-correction pass; anything else
    /// (or a correction that does not stick) is a hard error.
    async fn verify_consistency(
        &self,
        transaction: &Transaction,
        warnings: &mut Vec<String>,
    ) -> DomainResult<()> {
        let mut inconsistent = Vec::new();
        for record in &transaction.log {
            let current = self.store.get(&record.entity_id, &record.key).await?;
            if current != record.new_value {
                inconsistent.push(record);
            }
        }
        if inconsistent.is_empty() {
            return Ok(());
        }

        if inconsistent.len() > transaction.options.auto_correct_threshold {
            return Err(DomainError::ValidationFailed(format!(
                "post-apply check found {} inconsistent writes (threshold {})",
                inconsistent.len(),
                transaction.options.auto_correct_threshold
            )));
        }

        warn!(
            count = inconsistent.len(),
            "post-apply inconsistencies; attempting auto-correction"
        );
        for record in inconsistent {
            warnings.push(format!(
                "auto-correcting {}:{} ({})",
                record.entity_id,
                record.key,
                match record.kind {
                    ChangeKind::Visibility => "visibility",
                    ChangeKind::Cover => "cover",
                    ChangeKind::Override => "override",
                }
            ));
            self.write_with_retry(&record.entity_id, &record.key, record.new_value.as_ref())
                .await?;
            let current = self.store.get(&record.entity_id, &record.key).await?;
            if current != record.new_value {
                return Err(DomainError::ValidationFailed(format!(
                    "auto-correction did not stick for {}:{}",
                    record.entity_id, record.key
                )));
            }
        }
        Ok(())
    }

    /// Reverse fold over the command log. Best-effort: individual
    /// failures are logged and returned as warnings so one bad pair
    /// cannot block undoing the rest.
    async fn unwind(store: &dyn FlagStore, transaction: &Transaction) -> Vec<String> {
        let mut warnings = Vec::new();
        for record in transaction.log.iter().rev() {
            let result = match &record.old_value {
                Some(value) => {
                    store
                        .set(&record.entity_id, &record.key, value.clone())
                        .await
                }
                None => store.remove(&record.entity_id, &record.key).await,
            };
            if let Err(err) = result {
                warn!(
                    entity = %record.entity_id,
                    key = %record.key,
                    error = %err,
                    "rollback write failed; continuing"
                );
                warnings.push(format!(
                    "rollback failed for {}:{}: {err}",
                    record.entity_id, record.key
                ));
            }
        }
        debug!(
            transaction_id = %transaction.id,
            reversed = transaction.log.len(),
            "transaction unwound"
        );
        warnings
    }

    /// Persistent write with bounded exponential retry.
    async fn write_with_retry(
        &self,
        entity_id: &str,
        key: &str,
        value: Option<&Value>,
    ) -> DomainResult<()> {
        let initial = Duration::from_millis(self.config.write_retry_initial_ms.max(1));
        // Elapsed-time budget sized so roughly `write_retry_attempts`
        // doubling intervals fit before retry gives up.
        let budget = initial * 2_u32.saturating_pow(self.config.write_retry_attempts);
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(initial)
            .with_max_elapsed_time(Some(budget))
            .build();

        let store = Arc::clone(&self.store);
        backoff::future::retry(policy, || {
            let store = Arc::clone(&store);
            let value = value.cloned();
            async move {
                let result = match value {
                    Some(value) => store.set(entity_id, key, value).await,
                    None => store.remove(entity_id, key).await,
                };
                result.map_err(backoff::Error::transient)
            }
        })
        .await
    }

    /// Drop a completed transaction once the grace window for late
    /// rollback requests has passed.
    fn schedule_removal(&self, id: Uuid, grace: Duration) {
        let transactions = Arc::clone(&self.transactions);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let mut transactions = transactions.write().await;
            if transactions.remove(&id).is_some() {
                debug!(transaction_id = %id, "transaction retired after grace window");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{CoverLevel, VisibilityLevel};
    use crate::domain::ports::MemoryFlagStore;
    use async_trait::async_trait;
    use serde_json::json;

    /// Store that silently drops writes to one key, simulating a
    /// persistence layer that acks but does not commit.
    struct DroppingStore {
        inner: MemoryFlagStore,
        dropped_key: String,
    }

    #[async_trait]
    impl FlagStore for DroppingStore {
        async fn get(&self, entity_id: &str, key: &str) -> DomainResult<Option<Value>> {
            self.inner.get(entity_id, key).await
        }

        async fn set(&self, entity_id: &str, key: &str, value: Value) -> DomainResult<()> {
            if key == self.dropped_key {
                return Ok(()); // acked, never written
            }
            self.inner.set(entity_id, key, value).await
        }

        async fn remove(&self, entity_id: &str, key: &str) -> DomainResult<()> {
            self.inner.remove(entity_id, key).await
        }
    }

    fn applier_with(store: Arc<dyn FlagStore>) -> OutcomeApplier {
        OutcomeApplier::new(
            ApplierConfig {
                grace_period_ms: 60_000,
                write_retry_initial_ms: 1,
                ..ApplierConfig::default()
            },
            store,
        )
    }

    #[tokio::test]
    async fn test_apply_commits_and_orders_writes() {
        let store = Arc::new(MemoryFlagStore::new());
        let applier = applier_with(store.clone());

        let outcomes = vec![SneakOutcome::new("guard", "rogue")
            .with_visibility(VisibilityLevel::Hidden)
            .with_cover(CoverLevel::Standard)];

        let report = applier.apply_outcomes(&outcomes, &ApplyOptions::default()).await;
        assert!(report.success);
        assert_eq!(report.applied_changes, 2);

        assert_eq!(
            store.get("guard", "visibility.rogue").await.unwrap(),
            Some(json!("hidden"))
        );
        assert_eq!(
            store.get("guard", "cover.rogue").await.unwrap(),
            Some(json!("standard"))
        );

        // Visibility must precede cover in the log for a combined change.
        let transactions = applier.transactions.read().await;
        let transaction = transactions.get(&report.transaction_id).unwrap();
        let kinds: Vec<ChangeKind> = transaction.log.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![ChangeKind::Visibility, ChangeKind::Cover]);
    }

    #[tokio::test]
    async fn test_invalid_outcomes_reported_not_fatal() {
        let store = Arc::new(MemoryFlagStore::new());
        let applier = applier_with(store.clone());

        let outcomes = vec![
            SneakOutcome::new("guard", "rogue").with_visibility(VisibilityLevel::Undetected),
            SneakOutcome::new("", "rogue").with_cover(CoverLevel::Lesser), // invalid
            SneakOutcome::new("guard", "rogue-2"),                         // no changes
        ];

        let report = applier.apply_outcomes(&outcomes, &ApplyOptions::default()).await;
        assert!(!report.success); // per-item errors surface in the report
        assert_eq!(report.errors.len(), 2);
        // The valid outcome still committed.
        assert_eq!(
            store.get("guard", "visibility.rogue").await.unwrap(),
            Some(json!("undetected"))
        );
        assert_eq!(report.applied_changes, 1);
    }

    #[tokio::test]
    async fn test_write_failure_rolls_back_whole_batch() {
        // Scenario: A's visibility change applies, B's cover write is
        // silently dropped. The batch must fail and A must be restored.
        let store = Arc::new(DroppingStore {
            inner: MemoryFlagStore::new(),
            dropped_key: keys::cover("rogue"),
        });
        store
            .inner
            .set("guard-a", &keys::visibility("rogue"), json!("full"))
            .await
            .unwrap();

        let applier = applier_with(store.clone());
        let outcomes = vec![
            SneakOutcome::new("guard-a", "rogue").with_visibility(VisibilityLevel::Hidden),
            SneakOutcome::new("guard-b", "rogue").with_cover(CoverLevel::Standard),
        ];

        let report = applier.apply_outcomes(&outcomes, &ApplyOptions::default()).await;
        assert!(!report.success);
        assert!(!report.errors.is_empty());
        assert_eq!(report.applied_changes, 0);

        // A restored to its prior value by the reverse fold.
        assert_eq!(
            store.get("guard-a", &keys::visibility("rogue")).await.unwrap(),
            Some(json!("full"))
        );
        // The failed transaction is not retained.
        assert_eq!(applier.active_transaction_count().await, 0);
    }

    #[tokio::test]
    async fn test_rollback_is_idempotent() {
        let store = Arc::new(MemoryFlagStore::new());
        let applier = applier_with(store.clone());

        let outcomes =
            vec![SneakOutcome::new("guard", "rogue").with_visibility(VisibilityLevel::Hidden)];
        let report = applier.apply_outcomes(&outcomes, &ApplyOptions::default()).await;
        assert!(report.success);

        // First rollback undoes the write (key was previously absent).
        assert!(applier.rollback_transaction(report.transaction_id).await);
        assert_eq!(
            store.get("guard", "visibility.rogue").await.unwrap(),
            None
        );

        // Second rollback: no transaction, no side effects.
        store
            .set("guard", "visibility.rogue", json!("partial"))
            .await
            .unwrap();
        assert!(!applier.rollback_transaction(report.transaction_id).await);
        assert_eq!(
            store.get("guard", "visibility.rogue").await.unwrap(),
            Some(json!("partial"))
        );
    }

    #[tokio::test]
    async fn test_rollback_unknown_id_returns_false() {
        let applier = applier_with(Arc::new(MemoryFlagStore::new()));
        assert!(!applier.rollback_transaction(Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn test_override_clear_round_trip() {
        let store = Arc::new(MemoryFlagStore::new());
        store
            .set("guard", &keys::cover_override("rogue"), json!("greater"))
            .await
            .unwrap();
        let applier = applier_with(store.clone());

        let outcomes = vec![SneakOutcome::new("guard", "rogue")
            .with_override(OverrideChange::Clear)];
        let report = applier.apply_outcomes(&outcomes, &ApplyOptions::default()).await;
        assert!(report.success);
        assert_eq!(
            store.get("guard", &keys::cover_override("rogue")).await.unwrap(),
            None
        );

        // Rolling back restores the override.
        assert!(applier.rollback_transaction(report.transaction_id).await);
        assert_eq!(
            store.get("guard", &keys::cover_override("rogue")).await.unwrap(),
            Some(json!("greater"))
        );
    }

    #[tokio::test]
    async fn test_empty_batch_succeeds_vacuously() {
        let applier = applier_with(Arc::new(MemoryFlagStore::new()));
        let report = applier.apply_outcomes(&[], &ApplyOptions::default()).await;
        assert!(report.success);
        assert_eq!(report.applied_changes, 0);
    }
}
