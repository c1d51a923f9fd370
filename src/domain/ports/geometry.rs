//! Scene geometry port.
//!
//! Distance, line-of-sight, and lighting queries against the host scene.
//! Cheap and synchronous; failures are surfaced as `DomainError` so callers
//! can degrade to defaults instead of aborting a capture.

use crate::domain::errors::DomainResult;
use crate::domain::models::{LightingBand, Position};

/// Port for scene geometry queries.
pub trait SceneGeometry: Send + Sync {
    /// Distance between two points in scene units.
    fn distance(&self, a: Position, b: Position) -> DomainResult<f64>;

    /// Whether an unobstructed sightline exists between two points.
    fn line_of_sight(&self, a: Position, b: Position) -> DomainResult<bool>;

    /// Ambient light band at a point.
    fn lighting_at(&self, point: Position) -> DomainResult<LightingBand>;
}

/// Featureless planar scene: straight-line distance, nothing blocks sight,
/// lighting unknown. Serves as the null object and as the integrator's
/// local fallback geometry when no host scene is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanarGeometry;

impl SceneGeometry for PlanarGeometry {
    fn distance(&self, a: Position, b: Position) -> DomainResult<f64> {
        Ok(a.distance_to(b))
    }

    fn line_of_sight(&self, _a: Position, _b: Position) -> DomainResult<bool> {
        Ok(true)
    }

    fn lighting_at(&self, _point: Position) -> DomainResult<LightingBand> {
        Ok(LightingBand::Unknown)
    }
}
