//! Service layer: the cache, integrator, optimizer, and applier engines.

pub mod applier;
pub mod integrator;
pub mod optimizer;
pub mod state_cache;

pub use applier::{
    ApplyOptions, ApplyReport, ChangeKind, ChangeRecord, OutcomeApplier, Transaction,
};
pub use integrator::{
    CombinedState, DualSourceIntegrator, IntegrateOptions, SourceResult, StateSource,
};
pub use optimizer::{
    BatchMetrics, BatchOptimizer, OptimizeOptions, OptimizerMetrics, PairOutcome,
    PerformanceSample, StreamBatch, StreamProgress, TuningState,
};
pub use state_cache::{CacheStats, ImportanceTier, StateCache, TierCensus};
