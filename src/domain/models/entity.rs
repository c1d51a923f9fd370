//! Scene entity references and positions.
//!
//! An `EntityRef` is the lightweight handle the rest of the system works
//! with: an identifier plus the position the entity occupied when the
//! reference was taken. States computed for a pair are only valid while
//! neither party has moved, so positions participate in cache keys.

use serde::{Deserialize, Serialize};

/// A point in scene coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance_to(&self, other: Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Stable key fragment for cache keys.
    ///
    /// Positions are rounded to one decimal so sub-pixel jitter does not
    /// defeat caching, while any real movement changes the key.
    pub fn key_fragment(&self) -> String {
        format!("{:.1},{:.1}", self.x, self.y)
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.1}, {:.1})", self.x, self.y)
    }
}

/// Reference to a scene entity at a known position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    /// Scene-unique entity identifier.
    pub id: String,
    /// Position the entity occupied when this reference was taken.
    pub position: Position,
}

impl EntityRef {
    pub fn new(id: impl Into<String>, position: Position) -> Self {
        Self {
            id: id.into(),
            position,
        }
    }

    /// Reference the same entity at a different position.
    pub fn at(&self, position: Position) -> Self {
        Self {
            id: self.id.clone(),
            position,
        }
    }

    /// Key fragment combining identity and position.
    pub fn key_fragment(&self) -> String {
        format!("{}@{}", self.id, self.position.key_fragment())
    }

    /// True when the reference carries a usable identifier.
    pub fn is_valid(&self) -> bool {
        !self.id.trim().is_empty()
    }
}

/// Build the cache key for an (observer, subject) pair.
///
/// Sensitive to both identities and both positions: a cached value is
/// valid only as long as neither party has moved.
pub fn pair_key(observer: &EntityRef, subject: &EntityRef) -> String {
    format!("{}:{}", observer.key_fragment(), subject.key_fragment())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance() {
        let a = Position::new(0.0, 0.0);
        let b = Position::new(3.0, 4.0);
        assert!((a.distance_to(b) - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_pair_key_changes_with_position() {
        let observer = EntityRef::new("guard-1", Position::new(10.0, 20.0));
        let subject = EntityRef::new("rogue-1", Position::new(30.0, 40.0));

        let before = pair_key(&observer, &subject);
        let moved = subject.at(Position::new(31.0, 40.0));
        let after = pair_key(&observer, &moved);

        assert_ne!(before, after);
    }

    #[test]
    fn test_pair_key_stable_under_jitter() {
        let observer = EntityRef::new("guard-1", Position::new(10.0, 20.0));
        let subject = EntityRef::new("rogue-1", Position::new(30.0, 40.0));
        let jittered = subject.at(Position::new(30.01, 40.02));

        assert_eq!(
            pair_key(&observer, &subject),
            pair_key(&observer, &jittered)
        );
    }

    #[test]
    fn test_entity_validity() {
        assert!(EntityRef::new("a", Position::new(0.0, 0.0)).is_valid());
        assert!(!EntityRef::new("  ", Position::new(0.0, 0.0)).is_valid());
    }
}
