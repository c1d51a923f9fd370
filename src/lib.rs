//! Sightline - Perceptual State Tracker
//!
//! Sightline tracks and reconciles the perceptual relationship
//! (visibility + physical cover) between pairs of scene entities across a
//! time window in which one entity tries to move unseen. It orchestrates
//! two independently-failing external subsystems behind a
//! position-sensitive cache, an adaptive batch/concurrency optimizer, and
//! a transactional result applier with rollback.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Value objects, errors, and port traits
//! - **Service Layer** (`services`): Cache, integrator, optimizer, applier
//! - **Application Layer** (`application`): Snapshot/transition tracking
//! - **Infrastructure Layer** (`infrastructure`): Config, logging, SQLite
//!   adapter, and stack wiring
//!
//! # Example
//!
//! ```
//! use sightline::domain::models::Config;
//! use sightline::infrastructure::Sightline;
//!
//! # async fn example() {
//! let stack = Sightline::builder(Config::default()).build();
//! let stats = stack.cache.stats().await;
//! assert_eq!(stats.total_entries, 0);
//! # }
//! ```

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::{CaptureOptions, SneakTracker};
pub use domain::models::{
    Config, CoverLevel, EntityRef, LightingBand, OverrideChange, Position, PositionState,
    PositionTransition, SneakOutcome, TransitionSummary, TransitionType, VisibilityLevel,
};
pub use domain::ports::{
    CoverAssessment, CoverOracle, FlagStore, MemoryFlagStore, SceneGeometry, VisibilityOracle,
};
pub use domain::{DomainError, DomainResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use infrastructure::{Sightline, SightlineBuilder};
pub use services::{
    ApplyOptions, ApplyReport, BatchOptimizer, CacheStats, DualSourceIntegrator, OptimizerMetrics,
    OutcomeApplier, PairOutcome, StateCache,
};
