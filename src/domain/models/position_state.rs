//! Perceptual state between an observer and a subject.
//!
//! A `PositionState` is an immutable snapshot of the relationship from one
//! observer to one subject at one instant: what the visibility oracle said,
//! what the cover oracle said, and the merged effective visibility.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How well the observer can perceive the subject.
///
/// Ordered by concealment: `Full` is fully seen, `Undetected` is the best
/// state a sneaking subject can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityLevel {
    /// Subject is plainly visible.
    Full,
    /// Subject is partially obscured (concealed).
    Partial,
    /// Observer knows roughly where the subject is but cannot see it.
    Hidden,
    /// Observer has no idea where the subject is.
    Undetected,
}

impl VisibilityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Partial => "partial",
            Self::Hidden => "hidden",
            Self::Undetected => "undetected",
        }
    }

    /// Rank in the fixed concealment ordering (full < partial < hidden < undetected).
    pub fn concealment_rank(&self) -> u8 {
        match self {
            Self::Full => 0,
            Self::Partial => 1,
            Self::Hidden => 2,
            Self::Undetected => 3,
        }
    }

    /// True for states where the observer has lost sight of the subject.
    pub fn is_concealed_from_sight(&self) -> bool {
        matches!(self, Self::Hidden | Self::Undetected)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "full" => Some(Self::Full),
            "partial" => Some(Self::Partial),
            "hidden" => Some(Self::Hidden),
            "undetected" => Some(Self::Undetected),
            _ => None,
        }
    }
}

/// Physical cover between the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverLevel {
    None,
    Lesser,
    Standard,
    Greater,
}

impl CoverLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lesser => "lesser",
            Self::Standard => "standard",
            Self::Greater => "greater",
        }
    }

    /// Stealth bonus granted by this cover level.
    pub fn stealth_bonus(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Lesser => 1,
            Self::Standard => 2,
            Self::Greater => 4,
        }
    }

    /// Standard or better cover is enough to degrade full visibility.
    pub fn is_meaningful(&self) -> bool {
        matches!(self, Self::Standard | Self::Greater)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(Self::None),
            "lesser" => Some(Self::Lesser),
            "standard" => Some(Self::Standard),
            "greater" => Some(Self::Greater),
            _ => None,
        }
    }
}

/// Ambient light at a point in the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightingBand {
    Bright,
    Dim,
    Dark,
    Unknown,
}

impl LightingBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bright => "bright",
            Self::Dim => "dim",
            Self::Dark => "dark",
            Self::Unknown => "unknown",
        }
    }
}

/// Which subsystems were live when a state was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceFlags {
    pub visibility_enabled: bool,
    pub cover_enabled: bool,
}

impl SourceFlags {
    pub fn both() -> Self {
        Self {
            visibility_enabled: true,
            cover_enabled: true,
        }
    }
}

/// Merge a visibility level with a cover level into effective visibility.
///
/// Cover only ever adds concealment: a hidden or undetected subject stays
/// exactly as concealed, and a fully visible subject behind meaningful
/// cover is downgraded to partial.
pub fn effective_visibility(visibility: VisibilityLevel, cover: CoverLevel) -> VisibilityLevel {
    if visibility.is_concealed_from_sight() {
        return visibility;
    }
    if visibility == VisibilityLevel::Full && cover.is_meaningful() {
        return VisibilityLevel::Partial;
    }
    visibility
}

/// Immutable snapshot of the observer -> subject perceptual relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionState {
    pub observer_id: String,
    pub subject_id: String,
    /// What the visibility source reported.
    pub visibility: VisibilityLevel,
    /// Whether the visibility value came from a successful source (oracle
    /// or override) rather than a local fallback.
    pub visibility_computed: bool,
    /// What the cover source reported.
    pub cover: CoverLevel,
    pub cover_computed: bool,
    /// Manual override in effect at capture time, if any.
    pub cover_override: Option<CoverLevel>,
    /// Stealth bonus derived from the effective cover level.
    pub stealth_bonus: u32,
    /// Visibility after folding cover in.
    pub effective_visibility: VisibilityLevel,
    pub distance: f64,
    pub has_line_of_sight: bool,
    pub lighting: LightingBand,
    pub captured_at: DateTime<Utc>,
    pub source_flags: SourceFlags,
    pub errors: Vec<String>,
}

impl PositionState {
    /// Build a state from raw source values, deriving the combined fields.
    #[allow(clippy::too_many_arguments)]
    pub fn from_sources(
        observer_id: impl Into<String>,
        subject_id: impl Into<String>,
        visibility: VisibilityLevel,
        visibility_computed: bool,
        cover: CoverLevel,
        cover_computed: bool,
        cover_override: Option<CoverLevel>,
        source_flags: SourceFlags,
    ) -> Self {
        let applied_cover = cover_override.unwrap_or(cover);
        Self {
            observer_id: observer_id.into(),
            subject_id: subject_id.into(),
            visibility,
            visibility_computed,
            cover,
            cover_computed,
            cover_override,
            stealth_bonus: applied_cover.stealth_bonus(),
            effective_visibility: effective_visibility(visibility, applied_cover),
            distance: 0.0,
            has_line_of_sight: true,
            lighting: LightingBand::Unknown,
            captured_at: Utc::now(),
            source_flags,
            errors: Vec::new(),
        }
    }

    /// Safe default used when every computation path failed: the subject is
    /// assumed plainly visible with no cover.
    pub fn fallback(
        observer_id: impl Into<String>,
        subject_id: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let mut state = Self::from_sources(
            observer_id,
            subject_id,
            VisibilityLevel::Full,
            false,
            CoverLevel::None,
            false,
            None,
            SourceFlags::default(),
        );
        state.errors.push(error.into());
        state
    }

    /// Attach scene-geometry readings.
    pub fn with_geometry(
        mut self,
        distance: f64,
        has_line_of_sight: bool,
        lighting: LightingBand,
    ) -> Self {
        self.distance = distance;
        self.has_line_of_sight = has_line_of_sight;
        self.lighting = lighting;
        self
    }

    /// Compact in place for storage: rounds high-precision numeric fields
    /// and truncates the capture timestamp to second precision. Lossy only
    /// below the resolution anything downstream reads at.
    pub fn compact(&mut self) {
        self.distance = (self.distance * 10.0).round() / 10.0;
        if let Some(truncated) = DateTime::from_timestamp(self.captured_at.timestamp(), 0) {
            self.captured_at = truncated;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concealment_ordering() {
        assert!(VisibilityLevel::Full < VisibilityLevel::Partial);
        assert!(VisibilityLevel::Partial < VisibilityLevel::Hidden);
        assert!(VisibilityLevel::Hidden < VisibilityLevel::Undetected);
    }

    #[test]
    fn test_effective_visibility_cover_only_conceals() {
        // Hidden/undetected are untouched by any cover level
        for cover in [
            CoverLevel::None,
            CoverLevel::Lesser,
            CoverLevel::Standard,
            CoverLevel::Greater,
        ] {
            assert_eq!(
                effective_visibility(VisibilityLevel::Hidden, cover),
                VisibilityLevel::Hidden
            );
            assert_eq!(
                effective_visibility(VisibilityLevel::Undetected, cover),
                VisibilityLevel::Undetected
            );
        }

        // Full + meaningful cover degrades to partial
        assert_eq!(
            effective_visibility(VisibilityLevel::Full, CoverLevel::Standard),
            VisibilityLevel::Partial
        );
        assert_eq!(
            effective_visibility(VisibilityLevel::Full, CoverLevel::Greater),
            VisibilityLevel::Partial
        );

        // Lesser cover is not enough
        assert_eq!(
            effective_visibility(VisibilityLevel::Full, CoverLevel::Lesser),
            VisibilityLevel::Full
        );
    }

    #[test]
    fn test_override_wins_for_bonus_and_effective() {
        let state = PositionState::from_sources(
            "guard",
            "rogue",
            VisibilityLevel::Full,
            true,
            CoverLevel::None,
            true,
            Some(CoverLevel::Greater),
            SourceFlags::both(),
        );
        assert_eq!(state.stealth_bonus, 4);
        assert_eq!(state.effective_visibility, VisibilityLevel::Partial);
    }

    #[test]
    fn test_fallback_state_shape() {
        let state = PositionState::fallback("guard", "rogue", "oracle exploded");
        assert_eq!(state.visibility, VisibilityLevel::Full);
        assert_eq!(state.cover, CoverLevel::None);
        assert!(!state.visibility_computed);
        assert_eq!(state.errors.len(), 1);
    }

    #[test]
    fn test_compact_rounds_fields() {
        let mut state = PositionState::fallback("a", "b", "x").with_geometry(
            123.456_789,
            true,
            LightingBand::Dim,
        );
        state.compact();
        assert!((state.distance - 123.5).abs() < 1e-9);
        assert_eq!(state.captured_at.timestamp_subsec_millis(), 0);
    }

    #[test]
    fn test_stealth_bonus_table() {
        assert_eq!(CoverLevel::None.stealth_bonus(), 0);
        assert_eq!(CoverLevel::Lesser.stealth_bonus(), 1);
        assert_eq!(CoverLevel::Standard.stealth_bonus(), 2);
        assert_eq!(CoverLevel::Greater.stealth_bonus(), 4);
    }

    #[test]
    fn test_parse_round_trip() {
        for level in [
            VisibilityLevel::Full,
            VisibilityLevel::Partial,
            VisibilityLevel::Hidden,
            VisibilityLevel::Undetected,
        ] {
            assert_eq!(VisibilityLevel::parse(level.as_str()), Some(level));
        }
        assert_eq!(VisibilityLevel::parse("bogus"), None);
    }
}
