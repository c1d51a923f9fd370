//! Classified change between a start and end `PositionState`.
//!
//! Transitions are derived on demand by the tracker and discarded once the
//! outcome they informed has been applied; they are never persisted.

use serde::{Deserialize, Serialize};

use super::position_state::PositionState;

/// Direction of a perceptual change from the sneaking subject's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionType {
    /// Concealment got better (or bonus went up at equal concealment).
    Improved,
    /// Concealment got worse.
    Worsened,
    /// Nothing material changed.
    Unchanged,
}

impl TransitionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Improved => "improved",
            Self::Worsened => "worsened",
            Self::Unchanged => "unchanged",
        }
    }
}

/// Pairing of a start and end state for one observer, with the classified change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionTransition {
    pub observer_id: String,
    pub start: PositionState,
    pub end: PositionState,
    pub visibility_changed: bool,
    pub cover_changed: bool,
    /// Signed change in stealth bonus (end minus start).
    pub bonus_delta: i64,
    pub transition_type: TransitionType,
}

impl PositionTransition {
    /// Classify the change between two states for one observer.
    ///
    /// Effective visibility dominates: movement along the fixed
    /// concealment ordering decides improved/worsened. At equal
    /// concealment the stealth-bonus delta breaks the tie.
    pub fn classify(observer_id: impl Into<String>, start: &PositionState, end: &PositionState) -> Self {
        let bonus_delta = i64::from(end.stealth_bonus) - i64::from(start.stealth_bonus);
        let start_rank = start.effective_visibility.concealment_rank();
        let end_rank = end.effective_visibility.concealment_rank();

        let transition_type = match end_rank.cmp(&start_rank) {
            std::cmp::Ordering::Greater => TransitionType::Improved,
            std::cmp::Ordering::Less => TransitionType::Worsened,
            std::cmp::Ordering::Equal => match bonus_delta.cmp(&0) {
                std::cmp::Ordering::Greater => TransitionType::Improved,
                std::cmp::Ordering::Less => TransitionType::Worsened,
                std::cmp::Ordering::Equal => TransitionType::Unchanged,
            },
        };

        Self {
            observer_id: observer_id.into(),
            visibility_changed: start.effective_visibility != end.effective_visibility,
            cover_changed: start.cover != end.cover || start.cover_override != end.cover_override,
            bonus_delta,
            transition_type,
            start: start.clone(),
            end: end.clone(),
        }
    }
}

/// Aggregate advice metrics over a set of transitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionSummary {
    pub improved: usize,
    pub worsened: usize,
    pub unchanged: usize,
    /// Sum of per-observer bonus deltas.
    pub net_bonus_delta: i64,
    /// Observer against whom concealment improved the most.
    pub most_improved_observer: Option<String>,
    /// Observer against whom concealment degraded the most.
    pub most_worsened_observer: Option<String>,
}

impl TransitionSummary {
    /// Fold a transition set into summary counts and extremes.
    pub fn from_transitions<'a, I>(transitions: I) -> Self
    where
        I: IntoIterator<Item = &'a PositionTransition>,
    {
        let mut summary = Self::default();
        let mut best: Option<(i64, &str)> = None;
        let mut worst: Option<(i64, &str)> = None;

        for transition in transitions {
            match transition.transition_type {
                TransitionType::Improved => summary.improved += 1,
                TransitionType::Worsened => summary.worsened += 1,
                TransitionType::Unchanged => summary.unchanged += 1,
            }
            summary.net_bonus_delta += transition.bonus_delta;

            let rank_delta = i64::from(transition.end.effective_visibility.concealment_rank())
                - i64::from(transition.start.effective_visibility.concealment_rank());
            let weight = rank_delta * 8 + transition.bonus_delta;

            if weight > 0 && best.is_none_or(|(w, _)| weight > w) {
                best = Some((weight, &transition.observer_id));
            }
            if weight < 0 && worst.is_none_or(|(w, _)| weight < w) {
                worst = Some((weight, &transition.observer_id));
            }
        }

        summary.most_improved_observer = best.map(|(_, id)| id.to_string());
        summary.most_worsened_observer = worst.map(|(_, id)| id.to_string());
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::position_state::{CoverLevel, SourceFlags, VisibilityLevel};

    fn state(visibility: VisibilityLevel, cover: CoverLevel) -> PositionState {
        PositionState::from_sources(
            "guard",
            "rogue",
            visibility,
            true,
            cover,
            true,
            None,
            SourceFlags::both(),
        )
    }

    #[test]
    fn test_improved_on_concealment_gain() {
        let start = state(VisibilityLevel::Full, CoverLevel::None);
        let end = state(VisibilityLevel::Hidden, CoverLevel::None);
        let transition = PositionTransition::classify("guard", &start, &end);
        assert_eq!(transition.transition_type, TransitionType::Improved);
        assert!(transition.visibility_changed);
    }

    #[test]
    fn test_worsened_on_concealment_loss() {
        let start = state(VisibilityLevel::Undetected, CoverLevel::None);
        let end = state(VisibilityLevel::Partial, CoverLevel::None);
        let transition = PositionTransition::classify("guard", &start, &end);
        assert_eq!(transition.transition_type, TransitionType::Worsened);
    }

    #[test]
    fn test_bonus_breaks_tie_at_equal_concealment() {
        let start = state(VisibilityLevel::Hidden, CoverLevel::None);
        let end = state(VisibilityLevel::Hidden, CoverLevel::Greater);
        let transition = PositionTransition::classify("guard", &start, &end);
        // Effective visibility is hidden on both sides; bonus delta decides
        assert_eq!(transition.transition_type, TransitionType::Improved);
        assert_eq!(transition.bonus_delta, 4);
        assert!(!transition.visibility_changed);
        assert!(transition.cover_changed);
    }

    #[test]
    fn test_unchanged() {
        let start = state(VisibilityLevel::Partial, CoverLevel::Lesser);
        let end = state(VisibilityLevel::Partial, CoverLevel::Lesser);
        let transition = PositionTransition::classify("guard", &start, &end);
        assert_eq!(transition.transition_type, TransitionType::Unchanged);
        assert_eq!(transition.bonus_delta, 0);
    }

    #[test]
    fn test_summary_counts_and_extremes() {
        let transitions = vec![
            PositionTransition::classify(
                "g1",
                &state(VisibilityLevel::Full, CoverLevel::None),
                &state(VisibilityLevel::Undetected, CoverLevel::None),
            ),
            PositionTransition::classify(
                "g2",
                &state(VisibilityLevel::Hidden, CoverLevel::None),
                &state(VisibilityLevel::Full, CoverLevel::None),
            ),
            PositionTransition::classify(
                "g3",
                &state(VisibilityLevel::Partial, CoverLevel::Lesser),
                &state(VisibilityLevel::Partial, CoverLevel::Lesser),
            ),
        ];

        let summary = TransitionSummary::from_transitions(&transitions);
        assert_eq!(summary.improved, 1);
        assert_eq!(summary.worsened, 1);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.most_improved_observer.as_deref(), Some("g1"));
        assert_eq!(summary.most_worsened_observer.as_deref(), Some("g2"));
    }
}
