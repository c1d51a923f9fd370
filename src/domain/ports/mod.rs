//! Port trait definitions (Hexagonal Architecture)
//!
//! Async trait interfaces that external subsystems are consumed through:
//! - `VisibilityOracle` / `CoverOracle`: the two black-box perception engines
//! - `SceneGeometry`: distance, line-of-sight, and lighting queries
//! - `FlagStore`: opaque per-entity key/value persistence
//!
//! Each port ships a null-object implementation so capability is resolved
//! at construction time rather than probed per call.

pub mod flag_store;
pub mod geometry;
pub mod oracles;

pub use flag_store::{keys, FlagStore, MemoryFlagStore};
pub use geometry::{PlanarGeometry, SceneGeometry};
pub use oracles::{
    CoverAssessment, CoverOracle, NullCoverOracle, NullVisibilityOracle, VisibilityOracle,
};
