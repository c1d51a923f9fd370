//! Dual-source integration: merge the visibility and cover oracles into
//! one combined result for a pair.
//!
//! The two source paths are wrapped individually so that a failure on one
//! side never suppresses a valid result from the other. Each path resolves
//! in order: manual override from the flag store, then the oracle, then a
//! local geometric fallback. `combined_state` itself never returns an
//! error; everything degrades into the result's flags and warnings.

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::models::config::IntegratorConfig;
use crate::domain::models::{
    effective_visibility, CoverLevel, EntityRef, PositionState, SourceFlags, VisibilityLevel,
};
use crate::domain::ports::{
    keys, CoverAssessment, CoverOracle, FlagStore, SceneGeometry, VisibilityOracle,
};

/// Where a source value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateSource {
    /// The oracle answered.
    Oracle,
    /// A manual override won unconditionally.
    Override,
    /// Local geometric fallback after oracle failure.
    Fallback,
}

/// One source's contribution to a combined state.
#[derive(Debug, Clone, Serialize)]
pub struct SourceResult<T> {
    pub value: T,
    /// True only for oracle and override paths.
    pub success: bool,
    pub source: StateSource,
    pub fallback_used: bool,
}

impl<T> SourceResult<T> {
    fn oracle(value: T) -> Self {
        Self {
            value,
            success: true,
            source: StateSource::Oracle,
            fallback_used: false,
        }
    }

    fn manual(value: T) -> Self {
        Self {
            value,
            success: true,
            source: StateSource::Override,
            fallback_used: false,
        }
    }

    fn fallback(value: T) -> Self {
        Self {
            value,
            success: false,
            source: StateSource::Fallback,
            fallback_used: true,
        }
    }
}

/// Merged result of both oracles for one pair.
#[derive(Debug, Clone, Serialize)]
pub struct CombinedState {
    pub visibility: SourceResult<VisibilityLevel>,
    pub cover: SourceResult<CoverAssessment>,
    pub effective_visibility: VisibilityLevel,
    pub stealth_bonus: u32,
    pub source_flags: SourceFlags,
    pub warnings: Vec<String>,
}

impl CombinedState {
    /// Flatten into a `PositionState` snapshot for the given pair.
    pub fn into_position_state(self, observer_id: &str, subject_id: &str) -> PositionState {
        let cover_override = match self.cover.source {
            StateSource::Override => Some(self.cover.value.level),
            _ => None,
        };
        let mut state = PositionState::from_sources(
            observer_id,
            subject_id,
            self.visibility.value,
            self.visibility.success,
            self.cover.value.level,
            self.cover.success,
            cover_override,
            self.source_flags,
        );
        state.errors = self.warnings;
        state
    }
}

/// Per-call options for the integrator.
#[derive(Debug, Clone, Default)]
pub struct IntegrateOptions {
    /// Skip the flag-store override lookup (used when the caller already
    /// knows no override can exist, e.g. synthetic entities in tests).
    pub ignore_overrides: bool,
}

/// Merges the two fallible perception sources into one combined result.
///
/// Holds no batching or caching logic; purely per-pair.
pub struct DualSourceIntegrator {
    config: IntegratorConfig,
    visibility_oracle: Arc<dyn VisibilityOracle>,
    cover_oracle: Arc<dyn CoverOracle>,
    geometry: Arc<dyn SceneGeometry>,
    flag_store: Arc<dyn FlagStore>,
    source_flags: SourceFlags,
}

impl DualSourceIntegrator {
    pub fn new(
        config: IntegratorConfig,
        visibility_oracle: Arc<dyn VisibilityOracle>,
        cover_oracle: Arc<dyn CoverOracle>,
        geometry: Arc<dyn SceneGeometry>,
        flag_store: Arc<dyn FlagStore>,
    ) -> Self {
        let source_flags = SourceFlags {
            visibility_enabled: config.visibility_enabled,
            cover_enabled: config.cover_enabled,
        };
        Self {
            config,
            visibility_oracle,
            cover_oracle,
            geometry,
            flag_store,
            source_flags,
        }
    }

    /// Which subsystems were wired live at construction.
    pub fn source_flags(&self) -> SourceFlags {
        self.source_flags
    }

    /// Compute the combined state for one pair. Never errors.
    pub async fn combined_state(
        &self,
        observer: &EntityRef,
        subject: &EntityRef,
        options: &IntegrateOptions,
    ) -> CombinedState {
        let mut warnings = Vec::new();

        let visibility = self
            .resolve_visibility(observer, subject, options, &mut warnings)
            .await;
        let cover = self
            .resolve_cover(observer, subject, options, &mut warnings)
            .await;

        let applied_cover = cover.value.level;
        let effective = effective_visibility(visibility.value, applied_cover);
        let stealth_bonus = cover.value.bonus;

        debug!(
            observer = %observer.id,
            subject = %subject.id,
            visibility = visibility.value.as_str(),
            cover = applied_cover.as_str(),
            effective = effective.as_str(),
            "combined pair state"
        );

        CombinedState {
            visibility,
            cover,
            effective_visibility: effective,
            stealth_bonus,
            source_flags: self.source_flags,
            warnings,
        }
    }

    /// Batch variant: subjects processed in fixed-size chunks to bound
    /// concurrent oracle calls. Per-subject failures merge into that
    /// subject's result; the batch itself always completes.
    pub async fn batch_combined_states(
        &self,
        observer: &EntityRef,
        subjects: &[EntityRef],
        options: &IntegrateOptions,
    ) -> Vec<(String, CombinedState)> {
        let chunk_size = self.config.chunk_size.max(1);
        let mut results = Vec::with_capacity(subjects.len());

        for chunk in subjects.chunks(chunk_size) {
            let futures = chunk
                .iter()
                .map(|subject| async {
                    let combined = self.combined_state(observer, subject, options).await;
                    (subject.id.clone(), combined)
                })
                .collect::<Vec<_>>();
            results.extend(join_all(futures).await);
        }

        results
    }

    async fn resolve_visibility(
        &self,
        observer: &EntityRef,
        subject: &EntityRef,
        options: &IntegrateOptions,
        warnings: &mut Vec<String>,
    ) -> SourceResult<VisibilityLevel> {
        if !options.ignore_overrides {
            match self
                .read_override(observer, &keys::visibility_override(&subject.id))
                .await
            {
                Ok(Some(raw)) => {
                    if let Some(level) = raw.as_str().and_then(VisibilityLevel::parse) {
                        return SourceResult::manual(level);
                    }
                    warnings.push(format!(
                        "unrecognized visibility override for {}: {raw}",
                        subject.id
                    ));
                }
                Ok(None) => {}
                Err(message) => warnings.push(message),
            }
        }

        match self
            .visibility_oracle
            .visibility_between(observer, subject)
            .await
        {
            Ok(level) => SourceResult::oracle(level),
            Err(err) => {
                warn!(
                    observer = %observer.id,
                    subject = %subject.id,
                    error = %err,
                    "visibility oracle failed, using geometric fallback"
                );
                warnings.push(format!("visibility source failed: {err}"));
                SourceResult::fallback(self.fallback_visibility(observer, subject))
            }
        }
    }

    async fn resolve_cover(
        &self,
        observer: &EntityRef,
        subject: &EntityRef,
        options: &IntegrateOptions,
        warnings: &mut Vec<String>,
    ) -> SourceResult<CoverAssessment> {
        if !options.ignore_overrides {
            match self
                .read_override(observer, &keys::cover_override(&subject.id))
                .await
            {
                Ok(Some(raw)) => {
                    if let Some(level) = raw.as_str().and_then(CoverLevel::parse) {
                        return SourceResult::manual(CoverAssessment::new(level));
                    }
                    warnings.push(format!(
                        "unrecognized cover override for {}: {raw}",
                        subject.id
                    ));
                }
                Ok(None) => {}
                Err(message) => warnings.push(message),
            }
        }

        match self.cover_oracle.cover_between(observer, subject).await {
            Ok(assessment) => SourceResult::oracle(assessment),
            Err(err) => {
                warn!(
                    observer = %observer.id,
                    subject = %subject.id,
                    error = %err,
                    "cover oracle failed, using geometric fallback"
                );
                warnings.push(format!("cover source failed: {err}"));
                SourceResult::fallback(CoverAssessment::new(
                    self.fallback_cover(observer, subject),
                ))
            }
        }
    }

    /// Override lookup; store failures degrade to "no override".
    async fn read_override(
        &self,
        observer: &EntityRef,
        key: &str,
    ) -> Result<Option<serde_json::Value>, String> {
        self.flag_store
            .get(&observer.id, key)
            .await
            .map_err(|err| format!("override lookup failed for {key}: {err}"))
    }

    /// Geometric stand-in for the visibility oracle: an unobstructed
    /// sightline means plainly visible, a blocked one means hidden.
    fn fallback_visibility(&self, observer: &EntityRef, subject: &EntityRef) -> VisibilityLevel {
        match self
            .geometry
            .line_of_sight(observer.position, subject.position)
        {
            Ok(true) => VisibilityLevel::Full,
            Ok(false) => VisibilityLevel::Hidden,
            Err(_) => VisibilityLevel::Full,
        }
    }

    /// Geometric stand-in for the cover oracle: a blocked sightline implies
    /// something solid in between.
    fn fallback_cover(&self, observer: &EntityRef, subject: &EntityRef) -> CoverLevel {
        match self
            .geometry
            .line_of_sight(observer.position, subject.position)
        {
            Ok(false) => CoverLevel::Standard,
            _ => CoverLevel::None,
        }
    }
}
