//! Batch/concurrency optimizer for bulk pair-state computation.
//!
//! Given an arbitrary-size set of subjects and a "compute one pair"
//! function, this service decides batch size, concurrency ceiling, launch
//! pacing, spatial clustering, and streaming strategy. Single-pair
//! computation is delegated to the caller's closure (normally backed by
//! the integrator); results are written through the cache.
//!
//! Completeness invariant: the returned map always contains exactly one
//! outcome per distinct valid subject id, with synthesized error entries
//! for members of failed or timed-out batches.

use futures::future::join_all;
use futures::stream::{self, Stream};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::config::OptimizerConfig;
use crate::domain::models::{EntityRef, PositionState};
use crate::services::state_cache::StateCache;

/// Hard bounds on the adaptive settings.
const MIN_CONCURRENT_BATCHES: usize = 1;
const MAX_CONCURRENT_BATCHES: usize = 10;
const MIN_INTER_BATCH_DELAY_MS: u64 = 10;
const MAX_INTER_BATCH_DELAY_MS: u64 = 1_000;

/// Outcome of one pair computation.
#[derive(Debug, Clone)]
pub enum PairOutcome {
    /// State computed (or served from cache).
    Computed(PositionState),
    /// Computation failed; the error is carried instead of the state.
    Failed { error: String },
}

impl PairOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }

    pub fn is_computed(&self) -> bool {
        matches!(self, Self::Computed(_))
    }

    pub fn state(&self) -> Option<&PositionState> {
        match self {
            Self::Computed(state) => Some(state),
            Self::Failed { .. } => None,
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct OptimizeOptions {
    /// TTL for cache writes; cache default when absent.
    pub ttl: Option<Duration>,
    /// Skip cache reads and recompute everything.
    pub force_fresh: bool,
}

/// A performance sample fed to the adaptive tuner.
#[derive(Debug, Clone, Copy)]
pub struct PerformanceSample {
    pub avg_op_time_ms: f64,
    /// 0.0..=1.0 fraction of the memory budget in use.
    pub memory_usage_ratio: f64,
    /// 0.0..=1.0 host load estimate.
    pub system_load_ratio: f64,
}

/// Current adaptive settings (bounded, see constants above).
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TuningState {
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    pub inter_batch_delay_ms: u64,
}

/// Batch-level counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchMetrics {
    pub batches_run: u64,
    pub batches_timed_out: u64,
    pub average_batch_size: f64,
}

/// Optimizer observability snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizerMetrics {
    pub total_operations: u64,
    pub average_operation_time_ms: f64,
    pub peak_operation_time_ms: f64,
    pub average_pairs_per_second: f64,
    pub batch_metrics: BatchMetrics,
}

#[derive(Debug, Default)]
struct MetricsInner {
    total_operations: u64,
    total_time_ms: f64,
    peak_operation_time_ms: f64,
    batches_run: u64,
    batches_timed_out: u64,
    total_batch_members: u64,
}

/// One emitted element of the streaming mode.
#[derive(Debug)]
pub struct StreamBatch {
    pub results: HashMap<String, PairOutcome>,
    pub progress: StreamProgress,
    /// Set when the running result-set memory estimate crossed the
    /// configured ceiling; the consumer should release references it no
    /// longer needs. The estimate resets after this is raised.
    pub memory_reclaim_hint: bool,
}

/// Progress through a streaming computation. `percentage` is monotonic.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StreamProgress {
    pub processed: usize,
    pub total: usize,
    pub percentage: f64,
}

/// Adaptive batching and concurrency control for pair computations.
pub struct BatchOptimizer {
    config: OptimizerConfig,
    cache: Arc<StateCache>,
    tuning: RwLock<TuningState>,
    metrics: RwLock<MetricsInner>,
}

impl BatchOptimizer {
    pub fn new(config: OptimizerConfig, cache: Arc<StateCache>) -> Self {
        let tuning = TuningState {
            batch_size: config
                .initial_batch_size
                .clamp(config.min_batch_size, config.max_batch_size),
            max_concurrent_batches: config
                .max_concurrent_batches
                .clamp(MIN_CONCURRENT_BATCHES, MAX_CONCURRENT_BATCHES),
            inter_batch_delay_ms: config
                .inter_batch_delay_ms
                .clamp(MIN_INTER_BATCH_DELAY_MS, MAX_INTER_BATCH_DELAY_MS),
        };
        Self {
            config,
            cache,
            tuning: RwLock::new(tuning),
            metrics: RwLock::new(MetricsInner::default()),
        }
    }

    /// Current adaptive settings.
    pub async fn tuning(&self) -> TuningState {
        *self.tuning.read().await
    }

    /// Compute states for every distinct valid subject, cache-first.
    pub async fn optimize_pair_calculations<F, Fut>(
        &self,
        observer: &EntityRef,
        subjects: &[EntityRef],
        compute: F,
        options: &OptimizeOptions,
    ) -> HashMap<String, PairOutcome>
    where
        F: Fn(EntityRef, EntityRef) -> Fut + Clone + Send + Sync,
        Fut: Future<Output = DomainResult<PositionState>> + Send,
    {
        let subjects = Self::distinct_valid(subjects);
        let mut results = HashMap::with_capacity(subjects.len());
        if subjects.is_empty() {
            return results;
        }

        // Cache pass.
        let mut misses = Vec::new();
        if options.force_fresh {
            misses.extend(subjects.iter().cloned());
        } else {
            for subject in &subjects {
                match self.cache.get(observer, subject).await {
                    Some(state) => {
                        results.insert(subject.id.clone(), PairOutcome::Computed(state));
                    }
                    None => misses.push(subject.clone()),
                }
            }
        }
        if misses.is_empty() {
            return results;
        }

        let tuning = self.tuning().await;
        let batches: Vec<Vec<EntityRef>> = misses
            .chunks(tuning.batch_size.max(1))
            .map(<[EntityRef]>::to_vec)
            .collect();
        debug!(
            observer = %observer.id,
            subjects = subjects.len(),
            cache_hits = results.len(),
            batches = batches.len(),
            batch_size = tuning.batch_size,
            concurrency = tuning.max_concurrent_batches,
            "dispatching pair computation batches"
        );

        let semaphore = Arc::new(Semaphore::new(tuning.max_concurrent_batches));
        let pacer = Self::launch_pacer(tuning.inter_batch_delay_ms);
        let timeout = Duration::from_millis(self.config.batch_timeout_ms);

        let batch_futures = batches.into_iter().map(|batch| {
            let compute = compute.clone();
            let semaphore = Arc::clone(&semaphore);
            let pacer = Arc::clone(&pacer);
            let observer = observer.clone();
            async move {
                pacer.until_ready().await;
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (
                        Duration::ZERO,
                        false,
                        batch
                            .iter()
                            .map(|subject| {
                                (
                                    subject.clone(),
                                    PairOutcome::failed("batch scheduler shut down"),
                                )
                            })
                            .collect::<Vec<_>>(),
                    );
                };

                let started = Instant::now();
                let member_futures = batch.iter().map(|subject| {
                    let compute = compute.clone();
                    let observer = observer.clone();
                    let subject = subject.clone();
                    async move {
                        let outcome = match compute(observer, subject.clone()).await {
                            Ok(state) => PairOutcome::Computed(state),
                            Err(err) => PairOutcome::failed(err.to_string()),
                        };
                        (subject, outcome)
                    }
                });

                match tokio::time::timeout(timeout, join_all(member_futures)).await {
                    Ok(outcomes) => (started.elapsed(), false, outcomes),
                    Err(_) => {
                        warn!(
                            batch_len = batch.len(),
                            timeout_ms = timeout.as_millis() as u64,
                            "batch timed out; synthesizing error results"
                        );
                        let error =
                            format!("batch timed out after {}ms", timeout.as_millis());
                        (
                            started.elapsed(),
                            true,
                            batch
                                .iter()
                                .map(|subject| {
                                    (subject.clone(), PairOutcome::failed(error.clone()))
                                })
                                .collect(),
                        )
                    }
                }
            }
        });

        for (elapsed, timed_out, outcomes) in join_all(batch_futures).await {
            self.record_batch(elapsed, timed_out, outcomes.len()).await;
            for (subject, outcome) in outcomes {
                if let PairOutcome::Computed(ref state) = outcome {
                    self.cache
                        .put(observer, &subject, state.clone(), options.ttl)
                        .await;
                }
                results.insert(subject.id.clone(), outcome);
            }
        }

        results
    }

    /// Large-N mode: spatially cluster subjects (greedy nearest-neighbor
    /// under the configured radius) and run one optimized calculation per
    /// cluster, staggering cluster starts through the pacer.
    pub async fn optimize_multi_target<F, Fut>(
        &self,
        observer: &EntityRef,
        subjects: &[EntityRef],
        compute: F,
        options: &OptimizeOptions,
    ) -> HashMap<String, PairOutcome>
    where
        F: Fn(EntityRef, EntityRef) -> Fut + Clone + Send + Sync,
        Fut: Future<Output = DomainResult<PositionState>> + Send,
    {
        let clusters = self.cluster_subjects(&Self::distinct_valid(subjects));
        info!(
            observer = %observer.id,
            subjects = subjects.len(),
            clusters = clusters.len(),
            "multi-target optimization"
        );

        let tuning = self.tuning().await;
        let pacer = Self::launch_pacer(tuning.inter_batch_delay_ms);
        let cluster_futures = clusters.into_iter().map(|cluster| {
            let compute = compute.clone();
            let pacer = Arc::clone(&pacer);
            async move {
                pacer.until_ready().await;
                self.optimize_pair_calculations(observer, &cluster, compute, options)
                    .await
            }
        });

        let mut merged = HashMap::new();
        for cluster_results in join_all(cluster_futures).await {
            merged.extend(cluster_results);
        }
        merged
    }

    /// Streaming mode for very large subject counts: a finite,
    /// non-restartable sequence of result batches with monotonic progress.
    /// Cancel by dropping the stream; batches already dispatched still
    /// complete and write to cache.
    pub fn stream_pair_calculations<'a, F, Fut>(
        &'a self,
        observer: EntityRef,
        subjects: Vec<EntityRef>,
        compute: F,
        options: OptimizeOptions,
    ) -> impl Stream<Item = StreamBatch> + 'a
    where
        F: Fn(EntityRef, EntityRef) -> Fut + Clone + Send + Sync + 'a,
        Fut: Future<Output = DomainResult<PositionState>> + Send,
    {
        let subjects = Self::distinct_valid(&subjects);
        let total = subjects.len();
        let chunk_size = self.config.stream_batch_size.max(1);
        let chunks: VecDeque<Vec<EntityRef>> = subjects
            .chunks(chunk_size)
            .map(<[EntityRef]>::to_vec)
            .collect();
        let ceiling_bytes =
            (self.config.stream_memory_ceiling_mb * 1024.0 * 1024.0).max(0.0) as u64;

        struct StreamState<F> {
            chunks: VecDeque<Vec<EntityRef>>,
            processed: usize,
            total: usize,
            running_bytes: u64,
            observer: EntityRef,
            compute: F,
            options: OptimizeOptions,
        }

        let state = StreamState {
            chunks,
            processed: 0,
            total,
            running_bytes: 0,
            observer,
            compute,
            options,
        };

        stream::unfold(state, move |mut state| async move {
            let chunk = state.chunks.pop_front()?;
            let results = self
                .optimize_pair_calculations(
                    &state.observer,
                    &chunk,
                    state.compute.clone(),
                    &state.options,
                )
                .await;

            state.processed += chunk.len();
            for outcome in results.values() {
                state.running_bytes += match outcome {
                    PairOutcome::Computed(s) => {
                        serde_json::to_vec(s).map_or(256, |b| b.len()) as u64
                    }
                    PairOutcome::Failed { error } => error.len() as u64,
                };
            }

            let memory_reclaim_hint = ceiling_bytes > 0 && state.running_bytes > ceiling_bytes;
            if memory_reclaim_hint {
                debug!(
                    estimated_bytes = state.running_bytes,
                    "stream memory estimate crossed ceiling; requesting reclaim"
                );
                state.running_bytes = 0;
            }

            let percentage = if state.total == 0 {
                100.0
            } else {
                state.processed as f64 / state.total as f64 * 100.0
            };
            let batch = StreamBatch {
                results,
                progress: StreamProgress {
                    processed: state.processed,
                    total: state.total,
                    percentage,
                },
                memory_reclaim_hint,
            };
            Some((batch, state))
        })
    }

    /// Nudge the adaptive settings from a performance sample. All
    /// adjustments are bounded.
    pub async fn adapt_performance_settings(&self, sample: &PerformanceSample) {
        let mut tuning = self.tuning.write().await;

        if sample.avg_op_time_ms > 100.0 {
            tuning.batch_size = tuning.batch_size.saturating_sub(2).max(self.config.min_batch_size);
        } else if sample.avg_op_time_ms < 20.0 {
            tuning.batch_size = (tuning.batch_size + 2).min(self.config.max_batch_size);
        }

        if sample.system_load_ratio > 0.8 {
            tuning.max_concurrent_batches =
                tuning.max_concurrent_batches.saturating_sub(1).max(MIN_CONCURRENT_BATCHES);
        } else if sample.system_load_ratio < 0.4 {
            tuning.max_concurrent_batches =
                (tuning.max_concurrent_batches + 1).min(MAX_CONCURRENT_BATCHES);
        }

        if sample.memory_usage_ratio > 0.8 {
            tuning.inter_batch_delay_ms =
                (tuning.inter_batch_delay_ms + 25).min(MAX_INTER_BATCH_DELAY_MS);
        } else {
            tuning.inter_batch_delay_ms = tuning
                .inter_batch_delay_ms
                .saturating_sub(10)
                .max(MIN_INTER_BATCH_DELAY_MS);
        }

        debug!(
            batch_size = tuning.batch_size,
            concurrency = tuning.max_concurrent_batches,
            delay_ms = tuning.inter_batch_delay_ms,
            "adapted optimizer settings"
        );
    }

    /// Observability snapshot.
    pub async fn metrics(&self) -> OptimizerMetrics {
        let inner = self.metrics.read().await;
        let average_operation_time_ms = if inner.total_operations == 0 {
            0.0
        } else {
            inner.total_time_ms / inner.total_operations as f64
        };
        let average_pairs_per_second = if inner.total_time_ms > 0.0 {
            inner.total_operations as f64 / (inner.total_time_ms / 1000.0)
        } else {
            0.0
        };
        OptimizerMetrics {
            total_operations: inner.total_operations,
            average_operation_time_ms,
            peak_operation_time_ms: inner.peak_operation_time_ms,
            average_pairs_per_second,
            batch_metrics: BatchMetrics {
                batches_run: inner.batches_run,
                batches_timed_out: inner.batches_timed_out,
                average_batch_size: if inner.batches_run == 0 {
                    0.0
                } else {
                    inner.total_batch_members as f64 / inner.batches_run as f64
                },
            },
        }
    }

    async fn record_batch(&self, elapsed: Duration, timed_out: bool, members: usize) {
        let mut inner = self.metrics.write().await;
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        let per_op_ms = if members == 0 {
            0.0
        } else {
            elapsed_ms / members as f64
        };
        inner.total_operations += members as u64;
        inner.total_time_ms += elapsed_ms;
        inner.peak_operation_time_ms = inner.peak_operation_time_ms.max(per_op_ms);
        inner.batches_run += 1;
        inner.total_batch_members += members as u64;
        if timed_out {
            inner.batches_timed_out += 1;
        }
    }

    /// Greedy nearest-neighbor clustering under the configured radius.
    fn cluster_subjects(&self, subjects: &[EntityRef]) -> Vec<Vec<EntityRef>> {
        let max_size = self.config.max_cluster_size.max(1);
        let radius = self.config.cluster_radius;
        let mut remaining: Vec<EntityRef> = subjects.to_vec();
        let mut clusters = Vec::new();

        while let Some(seed) = remaining.first().cloned() {
            remaining.remove(0);
            let mut cluster = vec![seed.clone()];

            while cluster.len() < max_size {
                let nearest = remaining
                    .iter()
                    .enumerate()
                    .map(|(idx, candidate)| {
                        (idx, seed.position.distance_to(candidate.position))
                    })
                    .filter(|(_, distance)| *distance <= radius)
                    .min_by(|a, b| a.1.total_cmp(&b.1));
                match nearest {
                    Some((idx, _)) => cluster.push(remaining.remove(idx)),
                    None => break,
                }
            }
            clusters.push(cluster);
        }
        clusters
    }

    /// Rate limiter separating batch launches by the given delay.
    fn launch_pacer(delay_ms: u64) -> Arc<DefaultDirectRateLimiter> {
        let period = Duration::from_millis(delay_ms.max(1));
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::MIN);
        Arc::new(RateLimiter::direct(quota))
    }

    /// First occurrence of each valid subject id wins; invalid references
    /// (blank ids) are dropped with a warning.
    fn distinct_valid(subjects: &[EntityRef]) -> Vec<EntityRef> {
        let mut seen = HashSet::new();
        let mut distinct = Vec::with_capacity(subjects.len());
        for subject in subjects {
            if !subject.is_valid() {
                warn!("dropping subject with blank id from batch");
                continue;
            }
            if seen.insert(subject.id.clone()) {
                distinct.push(subject.clone());
            }
        }
        distinct
    }
}
