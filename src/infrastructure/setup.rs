//! Construction-time wiring of the full sightline stack.
//!
//! One `Sightline` instance per process (or per test) owns the cache,
//! integrator, optimizer, tracker, and applier, with every external
//! capability injected explicitly. Disabled subsystems get their null
//! objects here, once, instead of being probed at call time.

use std::sync::Arc;
use tracing::info;

use crate::application::SneakTracker;
use crate::domain::models::config::Config;
use crate::domain::ports::{
    CoverOracle, FlagStore, MemoryFlagStore, NullCoverOracle, NullVisibilityOracle, PlanarGeometry,
    SceneGeometry, VisibilityOracle,
};
use crate::services::applier::OutcomeApplier;
use crate::services::integrator::DualSourceIntegrator;
use crate::services::optimizer::BatchOptimizer;
use crate::services::state_cache::StateCache;

/// Fully wired sightline stack.
pub struct Sightline {
    pub cache: Arc<StateCache>,
    pub integrator: Arc<DualSourceIntegrator>,
    pub optimizer: Arc<BatchOptimizer>,
    pub tracker: Arc<SneakTracker>,
    pub applier: Arc<OutcomeApplier>,
}

impl Sightline {
    pub fn builder(config: Config) -> SightlineBuilder {
        SightlineBuilder::new(config)
    }
}

/// Builder collecting port implementations before wiring.
///
/// Ports not supplied fall back to their null objects (and an in-memory
/// flag store), which keeps tests and headless use trivial.
pub struct SightlineBuilder {
    config: Config,
    visibility_oracle: Option<Arc<dyn VisibilityOracle>>,
    cover_oracle: Option<Arc<dyn CoverOracle>>,
    geometry: Option<Arc<dyn SceneGeometry>>,
    flag_store: Option<Arc<dyn FlagStore>>,
}

impl SightlineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            visibility_oracle: None,
            cover_oracle: None,
            geometry: None,
            flag_store: None,
        }
    }

    pub fn with_visibility_oracle(mut self, oracle: Arc<dyn VisibilityOracle>) -> Self {
        self.visibility_oracle = Some(oracle);
        self
    }

    pub fn with_cover_oracle(mut self, oracle: Arc<dyn CoverOracle>) -> Self {
        self.cover_oracle = Some(oracle);
        self
    }

    pub fn with_geometry(mut self, geometry: Arc<dyn SceneGeometry>) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn with_flag_store(mut self, store: Arc<dyn FlagStore>) -> Self {
        self.flag_store = Some(store);
        self
    }

    /// Wire everything together. Config switches override supplied
    /// oracles: a disabled subsystem always gets its null object.
    pub fn build(self) -> Sightline {
        let geometry = self
            .geometry
            .unwrap_or_else(|| Arc::new(PlanarGeometry));
        let flag_store = self
            .flag_store
            .unwrap_or_else(|| Arc::new(MemoryFlagStore::new()));

        let visibility_oracle: Arc<dyn VisibilityOracle> =
            if self.config.integrator.visibility_enabled {
                self.visibility_oracle
                    .unwrap_or_else(|| Arc::new(NullVisibilityOracle))
            } else {
                Arc::new(NullVisibilityOracle)
            };
        let cover_oracle: Arc<dyn CoverOracle> = if self.config.integrator.cover_enabled {
            self.cover_oracle
                .unwrap_or_else(|| Arc::new(NullCoverOracle))
        } else {
            Arc::new(NullCoverOracle)
        };

        let cache = Arc::new(StateCache::new(self.config.cache.clone()));
        let integrator = Arc::new(DualSourceIntegrator::new(
            self.config.integrator.clone(),
            visibility_oracle,
            cover_oracle,
            Arc::clone(&geometry),
            Arc::clone(&flag_store),
        ));
        let optimizer = Arc::new(BatchOptimizer::new(
            self.config.optimizer.clone(),
            Arc::clone(&cache),
        ));
        let tracker = Arc::new(SneakTracker::new(
            Arc::clone(&integrator),
            Arc::clone(&optimizer),
            Arc::clone(&cache),
            geometry,
        ));
        let applier = Arc::new(OutcomeApplier::new(self.config.applier.clone(), flag_store));

        info!(
            visibility_enabled = self.config.integrator.visibility_enabled,
            cover_enabled = self.config.integrator.cover_enabled,
            "sightline stack wired"
        );
        Sightline {
            cache,
            integrator,
            optimizer,
            tracker,
            applier,
        }
    }
}
