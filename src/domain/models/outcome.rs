//! Decided per-pair outcomes handed to the applier.

use serde::{Deserialize, Serialize};

use super::position_state::{CoverLevel, VisibilityLevel};
use crate::domain::errors::{DomainError, DomainResult};

/// Change to the manual cover override for a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action", content = "level")]
pub enum OverrideChange {
    /// Pin the pair's cover to a manual level.
    Set(CoverLevel),
    /// Remove any manual override.
    Clear,
}

/// One decided outcome for an (observer, subject) pair.
///
/// Produced by whatever resolves the sneak attempt (rules engine, user
/// dialog) and consumed by the applier. At least one of the optional
/// changes must be present for the outcome to validate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SneakOutcome {
    pub observer_id: String,
    pub subject_id: String,
    /// New visibility state to persist, if the visibility side changed.
    pub new_visibility: Option<VisibilityLevel>,
    /// New cover state to persist, if the cover side changed.
    pub new_cover: Option<CoverLevel>,
    /// Override change to persist, if any.
    pub override_change: Option<OverrideChange>,
}

impl SneakOutcome {
    pub fn new(observer_id: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self {
            observer_id: observer_id.into(),
            subject_id: subject_id.into(),
            new_visibility: None,
            new_cover: None,
            override_change: None,
        }
    }

    pub fn with_visibility(mut self, level: VisibilityLevel) -> Self {
        self.new_visibility = Some(level);
        self
    }

    pub fn with_cover(mut self, level: CoverLevel) -> Self {
        self.new_cover = Some(level);
        self
    }

    pub fn with_override(mut self, change: OverrideChange) -> Self {
        self.override_change = Some(change);
        self
    }

    /// True when both a visibility and a cover write are requested.
    pub fn is_combined(&self) -> bool {
        self.new_visibility.is_some() && self.new_cover.is_some()
    }

    /// Reject outcomes that cannot be applied before any side effect runs.
    pub fn validate(&self) -> DomainResult<()> {
        if self.observer_id.trim().is_empty() {
            return Err(DomainError::InvalidEntity(
                "outcome observer id is empty".to_string(),
            ));
        }
        if self.subject_id.trim().is_empty() {
            return Err(DomainError::InvalidEntity(
                "outcome subject id is empty".to_string(),
            ));
        }
        if self.new_visibility.is_none()
            && self.new_cover.is_none()
            && self.override_change.is_none()
        {
            return Err(DomainError::ValidationFailed(format!(
                "outcome for {}:{} carries no changes",
                self.observer_id, self.subject_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_requires_a_change() {
        let outcome = SneakOutcome::new("guard", "rogue");
        assert!(outcome.validate().is_err());

        let outcome = outcome.with_visibility(VisibilityLevel::Hidden);
        assert!(outcome.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_blank_ids() {
        let outcome = SneakOutcome::new("", "rogue").with_cover(CoverLevel::Standard);
        assert!(outcome.validate().is_err());

        let outcome = SneakOutcome::new("guard", "   ").with_cover(CoverLevel::Standard);
        assert!(outcome.validate().is_err());
    }

    #[test]
    fn test_combined_detection() {
        let outcome = SneakOutcome::new("guard", "rogue")
            .with_visibility(VisibilityLevel::Hidden)
            .with_cover(CoverLevel::Standard);
        assert!(outcome.is_combined());

        let outcome = SneakOutcome::new("guard", "rogue").with_override(OverrideChange::Clear);
        assert!(!outcome.is_combined());
        assert!(outcome.validate().is_ok());
    }
}
