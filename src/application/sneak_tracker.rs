//! Snapshot/transition tracking for a sneaking entity.
//!
//! Orchestrates the integrator and optimizer to capture the full set of
//! observer states at two points in time ("start" and "end"), then
//! classifies the per-observer transitions. Small observer counts are
//! captured sequentially; larger ones go through the optimizer. Cache
//! entries for tracker captures are keyed with the sneaker as the anchor
//! of the pair key, on both the sequential and optimized paths.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::models::{
    EntityRef, LightingBand, Position, PositionState, PositionTransition, TransitionSummary,
};
use crate::domain::ports::SceneGeometry;
use crate::services::integrator::{DualSourceIntegrator, IntegrateOptions};
use crate::services::optimizer::{BatchOptimizer, OptimizeOptions, PairOutcome};
use crate::services::state_cache::StateCache;

/// Observer counts at or below this are captured sequentially; the
/// optimizer's batching overhead only pays off above it.
const SEQUENTIAL_CAPTURE_LIMIT: usize = 10;

/// Per-capture options.
#[derive(Debug, Clone, Default)]
pub struct CaptureOptions {
    /// Bypass the cache and recompute every pair.
    pub force_fresh: bool,
    /// TTL for cache writes; cache default when absent.
    pub ttl: Option<Duration>,
    /// Skip manual-override lookups in the integrator.
    pub ignore_overrides: bool,
}

/// Captures and classifies perceptual state around one sneaking entity.
pub struct SneakTracker {
    integrator: Arc<DualSourceIntegrator>,
    optimizer: Arc<BatchOptimizer>,
    cache: Arc<StateCache>,
    geometry: Arc<dyn SceneGeometry>,
}

impl SneakTracker {
    pub fn new(
        integrator: Arc<DualSourceIntegrator>,
        optimizer: Arc<BatchOptimizer>,
        cache: Arc<StateCache>,
        geometry: Arc<dyn SceneGeometry>,
    ) -> Self {
        Self {
            integrator,
            optimizer,
            cache,
            geometry,
        }
    }

    /// Capture the state every observer holds toward the sneaker.
    ///
    /// `stored_position`, when supplied, is a previously recorded
    /// coordinate for the sneaker; distance and line-of-sight are computed
    /// against it instead of the live position, answering "what would the
    /// state have been when I started".
    pub async fn capture_start_positions(
        &self,
        sneaker: &EntityRef,
        observers: &[EntityRef],
        stored_position: Option<Position>,
        options: &CaptureOptions,
    ) -> HashMap<String, PositionState> {
        let observers = Self::distinct_valid(observers);
        info!(
            sneaker = %sneaker.id,
            observers = observers.len(),
            force_fresh = options.force_fresh,
            "capturing positions"
        );

        if observers.len() <= SEQUENTIAL_CAPTURE_LIMIT {
            self.capture_sequential(sneaker, &observers, stored_position, options)
                .await
        } else {
            self.capture_optimized(sneaker, &observers, stored_position, options)
                .await
        }
    }

    /// End-of-sneak capture: the sneaker's cache entries are invalidated
    /// first so every pair is recomputed fresh.
    pub async fn calculate_end_positions(
        &self,
        sneaker: &EntityRef,
        observers: &[EntityRef],
        stored_position: Option<Position>,
        options: &CaptureOptions,
    ) -> HashMap<String, PositionState> {
        self.cache.invalidate(&sneaker.id).await;
        let options = CaptureOptions {
            force_fresh: true,
            ..options.clone()
        };
        self.capture_start_positions(sneaker, observers, stored_position, &options)
            .await
    }

    /// Pair start and end maps into per-observer transitions.
    ///
    /// Iterates the union of keys. A pair present on only one side is
    /// classified against a copy of the present side, which degenerates
    /// to an unchanged transition, so the output keeps one entry per
    /// observed pair.
    pub fn analyze_position_transitions(
        start: &HashMap<String, PositionState>,
        end: &HashMap<String, PositionState>,
    ) -> HashMap<String, PositionTransition> {
        let keys: HashSet<&String> = start.keys().chain(end.keys()).collect();
        let mut transitions = HashMap::with_capacity(keys.len());

        for observer_id in keys {
            let transition = match (start.get(observer_id), end.get(observer_id)) {
                (Some(before), Some(after)) => {
                    PositionTransition::classify(observer_id.clone(), before, after)
                }
                (Some(only), None) | (None, Some(only)) => {
                    debug!(
                        observer = %observer_id,
                        "pair present on one side only; treating as unchanged"
                    );
                    PositionTransition::classify(observer_id.clone(), only, only)
                }
                (None, None) => continue,
            };
            transitions.insert(observer_id.clone(), transition);
        }
        transitions
    }

    /// Derived advice metrics over a transition set.
    pub fn summarize_transitions(
        transitions: &HashMap<String, PositionTransition>,
    ) -> TransitionSummary {
        TransitionSummary::from_transitions(transitions.values())
    }

    async fn capture_sequential(
        &self,
        sneaker: &EntityRef,
        observers: &[EntityRef],
        stored_position: Option<Position>,
        options: &CaptureOptions,
    ) -> HashMap<String, PositionState> {
        let integrate_options = IntegrateOptions {
            ignore_overrides: options.ignore_overrides,
        };
        let mut results = HashMap::with_capacity(observers.len());

        for observer in observers {
            if !options.force_fresh {
                if let Some(state) = self.cache.get(sneaker, observer).await {
                    results.insert(observer.id.clone(), state);
                    continue;
                }
            }
            let state = Self::capture_pair(
                &self.integrator,
                self.geometry.as_ref(),
                observer,
                sneaker,
                stored_position,
                &integrate_options,
            )
            .await;
            self.cache
                .put(sneaker, observer, state.clone(), options.ttl)
                .await;
            results.insert(observer.id.clone(), state);
        }
        results
    }

    async fn capture_optimized(
        &self,
        sneaker: &EntityRef,
        observers: &[EntityRef],
        stored_position: Option<Position>,
        options: &CaptureOptions,
    ) -> HashMap<String, PositionState> {
        let integrator = Arc::clone(&self.integrator);
        let geometry = Arc::clone(&self.geometry);
        let integrate_options = IntegrateOptions {
            ignore_overrides: options.ignore_overrides,
        };

        // The optimizer anchors the pair on its first argument; the
        // sneaker anchors here so one capture shares one key family.
        let compute = move |sneaker_ref: EntityRef, observer_ref: EntityRef| {
            let integrator = Arc::clone(&integrator);
            let geometry = Arc::clone(&geometry);
            let integrate_options = integrate_options.clone();
            async move {
                Ok(Self::capture_pair(
                    &integrator,
                    geometry.as_ref(),
                    &observer_ref,
                    &sneaker_ref,
                    stored_position,
                    &integrate_options,
                )
                .await)
            }
        };

        let outcomes = self
            .optimizer
            .optimize_pair_calculations(
                sneaker,
                observers,
                compute,
                &OptimizeOptions {
                    ttl: options.ttl,
                    force_fresh: options.force_fresh,
                },
            )
            .await;

        outcomes
            .into_iter()
            .map(|(observer_id, outcome)| {
                let state = match outcome {
                    PairOutcome::Computed(state) => state,
                    PairOutcome::Failed { error } => {
                        warn!(
                            observer = %observer_id,
                            sneaker = %sneaker.id,
                            error = %error,
                            "capture failed; substituting safe default state"
                        );
                        PositionState::fallback(&observer_id, &sneaker.id, error)
                    }
                };
                (observer_id, state)
            })
            .collect()
    }

    /// Compute one observer's state toward the sneaker, including scene
    /// geometry. Geometry failures are caught locally and downgraded to
    /// defaults; they never abort the capture.
    async fn capture_pair(
        integrator: &DualSourceIntegrator,
        geometry: &dyn SceneGeometry,
        observer: &EntityRef,
        sneaker: &EntityRef,
        stored_position: Option<Position>,
        options: &IntegrateOptions,
    ) -> PositionState {
        let combined = integrator.combined_state(observer, sneaker, options).await;
        let mut state = combined.into_position_state(&observer.id, &sneaker.id);

        let reference_point = stored_position.unwrap_or(sneaker.position);

        let distance = match geometry.distance(observer.position, reference_point) {
            Ok(distance) => distance,
            Err(err) => {
                warn!(observer = %observer.id, error = %err, "distance query failed");
                state.errors.push(format!("distance query failed: {err}"));
                0.0
            }
        };
        let has_line_of_sight = match geometry.line_of_sight(observer.position, reference_point) {
            Ok(los) => los,
            Err(err) => {
                warn!(observer = %observer.id, error = %err, "line-of-sight query failed");
                state.errors.push(format!("line-of-sight query failed: {err}"));
                true
            }
        };
        let lighting = match geometry.lighting_at(sneaker.position) {
            Ok(band) => band,
            Err(err) => {
                warn!(observer = %observer.id, error = %err, "lighting query failed");
                state.errors.push(format!("lighting query failed: {err}"));
                LightingBand::Unknown
            }
        };

        state.with_geometry(distance, has_line_of_sight, lighting)
    }

    fn distinct_valid(observers: &[EntityRef]) -> Vec<EntityRef> {
        let mut seen = HashSet::new();
        let mut distinct = Vec::with_capacity(observers.len());
        for observer in observers {
            if !observer.is_valid() {
                warn!("dropping observer with blank id from capture");
                continue;
            }
            if seen.insert(observer.id.clone()) {
                distinct.push(observer.clone());
            }
        }
        distinct
    }
}
