//! Position-sensitive cache for computed pair states.
//!
//! Keys carry both identities and both positions, so a cached value dies
//! naturally the moment either party moves. Eviction is tier-aware:
//! "interesting" states (a subject the observer has lost track of, or one
//! behind real cover) are the expensive ones to recompute and the last to
//! go. The cache is best-effort throughout; nothing in here returns an
//! error to callers.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::domain::models::config::CacheConfig;
use crate::domain::models::{pair_key, CoverLevel, EntityRef, PositionState, VisibilityLevel};

/// Eviction priority bucket, ordered from first-evicted to last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportanceTier {
    Low,
    Normal,
    High,
    Critical,
}

impl ImportanceTier {
    /// Derive the tier from the wrapped state at insertion time.
    ///
    /// Never re-evaluated afterward: a state that was interesting when
    /// computed stays protected for its lifetime.
    pub fn for_state(state: &PositionState) -> Self {
        if state.effective_visibility.is_concealed_from_sight() {
            return Self::Critical;
        }
        let applied_cover = state.cover_override.unwrap_or(state.cover);
        if applied_cover.is_meaningful() || state.effective_visibility == VisibilityLevel::Partial {
            return Self::High;
        }
        if state.effective_visibility == VisibilityLevel::Full && applied_cover == CoverLevel::None
        {
            return Self::Low;
        }
        Self::Normal
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// A cached state plus its bookkeeping. Owned exclusively by the cache.
#[derive(Debug, Clone)]
struct CacheEntry {
    state: PositionState,
    inserted_at: Instant,
    last_access: Instant,
    ttl: Duration,
    tier: ImportanceTier,
    access_count: u64,
    size_estimate_bytes: usize,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() >= self.ttl
    }
}

/// Cache observability counters.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub total_entries: usize,
    pub memory_usage_mb: f64,
    pub evictions: u64,
}

/// Counts of surviving entries per tier; used by maintenance callers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TierCensus {
    pub critical: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

/// Pair-keyed, position-sensitive state cache with tiered eviction.
pub struct StateCache {
    config: CacheConfig,
    entries: RwLock<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    memory_bytes: AtomicU64,
}

impl StateCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            memory_bytes: AtomicU64::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    /// Look up the cached state for a pair at their current positions.
    ///
    /// Expired entries are dropped lazily here and count as misses.
    pub async fn get(&self, observer: &EntityRef, subject: &EntityRef) -> Option<PositionState> {
        let key = pair_key(observer, subject);
        let mut entries = self.entries.write().await;

        let live = match entries.get_mut(&key) {
            Some(entry) if !entry.is_expired() => {
                entry.last_access = Instant::now();
                entry.access_count += 1;
                Some(entry.state.clone())
            }
            Some(_) => None, // expired; dropped below
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if let Some(state) = live {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(state);
        }
        if let Some(entry) = entries.remove(&key) {
            self.memory_bytes
                .fetch_sub(entry.size_estimate_bytes as u64, Ordering::Relaxed);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert a computed state for a pair.
    ///
    /// Oversized payloads are compacted in place before storage; budgets
    /// are enforced after every insert.
    pub async fn put(
        &self,
        observer: &EntityRef,
        subject: &EntityRef,
        mut state: PositionState,
        ttl: Option<Duration>,
    ) {
        let key = pair_key(observer, subject);
        let ttl = ttl.unwrap_or(Duration::from_millis(self.config.default_ttl_ms));
        let tier = ImportanceTier::for_state(&state);

        let mut size = Self::estimate_size(&state);
        if size > self.config.compress_threshold_bytes {
            state.compact();
            size = Self::estimate_size(&state);
            trace!(key = %key, size_bytes = size, "compacted oversized cache payload");
        }

        let now = Instant::now();
        let entry = CacheEntry {
            state,
            inserted_at: now,
            last_access: now,
            ttl,
            tier,
            access_count: 0,
            size_estimate_bytes: size,
        };

        let mut entries = self.entries.write().await;
        if let Some(previous) = entries.insert(key, entry) {
            self.memory_bytes
                .fetch_sub(previous.size_estimate_bytes as u64, Ordering::Relaxed);
        }
        self.memory_bytes.fetch_add(size as u64, Ordering::Relaxed);

        self.enforce_budgets(&mut entries);
    }

    /// Drop every entry referencing the entity as observer or subject.
    ///
    /// Called whenever an entity's position changes in a way the key
    /// cannot see (teleports, scene reloads) or a fresh computation is
    /// being forced.
    pub async fn invalidate(&self, entity_id: &str) {
        let mut entries = self.entries.write().await;
        self.retain_counting(&mut entries, |entry| {
            entry.state.observer_id != entity_id && entry.state.subject_id != entity_id
        });
    }

    /// Bulk invalidation: one pass over the map for any number of entities.
    pub async fn invalidate_many(&self, entity_ids: &[String]) {
        if entity_ids.is_empty() {
            return;
        }
        let targets: HashSet<&str> = entity_ids.iter().map(String::as_str).collect();
        let mut entries = self.entries.write().await;
        self.retain_counting(&mut entries, |entry| {
            !targets.contains(entry.state.observer_id.as_str())
                && !targets.contains(entry.state.subject_id.as_str())
        });
    }

    /// Force occupancy down to exactly `target` entries, evicting in tier
    /// order (expired and low-tier, least-recently-used first).
    pub async fn shrink_to(&self, target: usize) {
        let mut entries = self.entries.write().await;
        if entries.len() <= target {
            return;
        }
        let excess = entries.len() - target;
        let victims = Self::pick_victims(&entries, excess);
        for key in victims {
            if let Some(entry) = entries.remove(&key) {
                self.memory_bytes
                    .fetch_sub(entry.size_estimate_bytes as u64, Ordering::Relaxed);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        debug!(remaining = entries.len(), target, "cache shrink complete");
    }

    /// Surviving entries per tier.
    pub async fn tier_census(&self) -> TierCensus {
        let entries = self.entries.read().await;
        let mut census = TierCensus::default();
        for entry in entries.values() {
            match entry.tier {
                ImportanceTier::Critical => census.critical += 1,
                ImportanceTier::High => census.high += 1,
                ImportanceTier::Normal => census.normal += 1,
                ImportanceTier::Low => census.low += 1,
            }
        }
        census
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub fn stats_snapshot(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            total_entries: 0,
            memory_usage_mb: self.memory_bytes.load(Ordering::Relaxed) as f64 / (1024.0 * 1024.0),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Full stats including current occupancy.
    pub async fn stats(&self) -> CacheStats {
        let mut stats = self.stats_snapshot();
        stats.total_entries = self.entries.read().await.len();
        stats
    }

    fn estimate_size(state: &PositionState) -> usize {
        serde_json::to_vec(state).map_or(256, |bytes| bytes.len())
    }

    fn max_memory_bytes(&self) -> u64 {
        (self.config.max_memory_mb * 1024.0 * 1024.0) as u64
    }

    /// Enforce both budgets; one sweep clears ~20% of capacity so inserts
    /// under sustained pressure do not thrash.
    fn enforce_budgets(&self, entries: &mut HashMap<String, CacheEntry>) {
        let over_count = entries.len() > self.config.max_entries;
        let over_memory = self.memory_bytes.load(Ordering::Relaxed) > self.max_memory_bytes();
        if !over_count && !over_memory {
            return;
        }

        // Pass 1: anything past its TTL goes first.
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            if let Some(entry) = entries.remove(&key) {
                self.memory_bytes
                    .fetch_sub(entry.size_estimate_bytes as u64, Ordering::Relaxed);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        // Pass 2: evict down to 80% of whichever budget is binding.
        let target_len = self.config.max_entries * 4 / 5;
        let target_bytes = self.max_memory_bytes() * 4 / 5;
        while entries.len() > target_len
            || self.memory_bytes.load(Ordering::Relaxed) > target_bytes
        {
            let victims = Self::pick_victims(entries, 1);
            let Some(key) = victims.into_iter().next() else {
                break;
            };
            if let Some(entry) = entries.remove(&key) {
                self.memory_bytes
                    .fetch_sub(entry.size_estimate_bytes as u64, Ordering::Relaxed);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        debug!(remaining = entries.len(), "cache eviction sweep complete");
    }

    /// Pick eviction victims: tier ascending, then least recently used.
    fn pick_victims(entries: &HashMap<String, CacheEntry>, count: usize) -> Vec<String> {
        let mut candidates: Vec<(&String, ImportanceTier, Instant)> = entries
            .iter()
            .map(|(key, entry)| (key, entry.tier, entry.last_access))
            .collect();
        candidates.sort_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)));
        candidates
            .into_iter()
            .take(count)
            .map(|(key, _, _)| key.clone())
            .collect()
    }

    fn retain_counting<F>(&self, entries: &mut HashMap<String, CacheEntry>, keep: F)
    where
        F: Fn(&CacheEntry) -> bool,
    {
        let before = entries.len();
        let mut freed: u64 = 0;
        entries.retain(|_, entry| {
            if keep(entry) {
                true
            } else {
                freed += entry.size_estimate_bytes as u64;
                false
            }
        });
        let removed = before - entries.len();
        if removed > 0 {
            self.memory_bytes.fetch_sub(freed, Ordering::Relaxed);
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
            trace!(removed, "invalidated cache entries");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        CoverLevel, Position, PositionState, SourceFlags, VisibilityLevel,
    };

    fn entity(id: &str, x: f64) -> EntityRef {
        EntityRef::new(id, Position::new(x, 0.0))
    }

    fn state_with(
        observer: &str,
        subject: &str,
        visibility: VisibilityLevel,
        cover: CoverLevel,
    ) -> PositionState {
        PositionState::from_sources(
            observer,
            subject,
            visibility,
            true,
            cover,
            true,
            None,
            SourceFlags::both(),
        )
    }

    fn small_cache(max_entries: usize) -> StateCache {
        StateCache::new(CacheConfig {
            max_entries,
            max_memory_mb: 50.0,
            default_ttl_ms: 60_000,
            compress_threshold_bytes: 8 * 1024,
        })
    }

    #[tokio::test]
    async fn test_hit_and_miss() {
        let cache = StateCache::with_defaults();
        let observer = entity("guard", 0.0);
        let subject = entity("rogue", 10.0);

        assert!(cache.get(&observer, &subject).await.is_none());

        let state = state_with("guard", "rogue", VisibilityLevel::Hidden, CoverLevel::None);
        cache.put(&observer, &subject, state.clone(), None).await;

        let cached = cache.get(&observer, &subject).await.unwrap();
        assert_eq!(cached.visibility, VisibilityLevel::Hidden);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_position_sensitivity() {
        let cache = StateCache::with_defaults();
        let observer = entity("guard", 0.0);
        let subject = entity("rogue", 10.0);

        let state = state_with("guard", "rogue", VisibilityLevel::Full, CoverLevel::None);
        cache.put(&observer, &subject, state, None).await;

        // Same identities, subject moved: must be a miss.
        let moved = subject.at(Position::new(25.0, 0.0));
        assert!(cache.get(&observer, &moved).await.is_none());

        // Observer moved: also a miss.
        let moved_observer = observer.at(Position::new(5.0, 5.0));
        assert!(cache.get(&moved_observer, &subject).await.is_none());

        // Original positions still hit.
        assert!(cache.get(&observer, &subject).await.is_some());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = StateCache::with_defaults();
        let observer = entity("guard", 0.0);
        let subject = entity("rogue", 10.0);

        let state = state_with("guard", "rogue", VisibilityLevel::Full, CoverLevel::None);
        cache
            .put(&observer, &subject, state, Some(Duration::ZERO))
            .await;

        assert!(cache.get(&observer, &subject).await.is_none());
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_invalidate_by_entity() {
        let cache = StateCache::with_defaults();
        let guard = entity("guard", 0.0);
        let rogue = entity("rogue", 10.0);
        let bystander = entity("bystander", 20.0);

        cache
            .put(
                &guard,
                &rogue,
                state_with("guard", "rogue", VisibilityLevel::Full, CoverLevel::None),
                None,
            )
            .await;
        cache
            .put(
                &rogue,
                &bystander,
                state_with(
                    "rogue",
                    "bystander",
                    VisibilityLevel::Full,
                    CoverLevel::None,
                ),
                None,
            )
            .await;
        cache
            .put(
                &guard,
                &bystander,
                state_with(
                    "guard",
                    "bystander",
                    VisibilityLevel::Full,
                    CoverLevel::None,
                ),
                None,
            )
            .await;

        // "rogue" appears as subject in one entry and observer in another.
        cache.invalidate("rogue").await;
        assert_eq!(cache.len().await, 1);
        assert!(cache.get(&guard, &bystander).await.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_many_single_pass() {
        let cache = StateCache::with_defaults();
        for i in 0..10 {
            let observer = entity(&format!("guard-{i}"), f64::from(i));
            let subject = entity("rogue", 100.0);
            cache
                .put(
                    &observer,
                    &subject,
                    state_with(
                        &observer.id,
                        "rogue",
                        VisibilityLevel::Full,
                        CoverLevel::None,
                    ),
                    None,
                )
                .await;
        }

        cache
            .invalidate_many(&["guard-1".to_string(), "guard-2".to_string()])
            .await;
        assert_eq!(cache.len().await, 8);
    }

    #[tokio::test]
    async fn test_eviction_respects_tiers() {
        let cache = small_cache(1000);

        // 25 entries cycling critical, high, normal, low.
        let levels = [
            (VisibilityLevel::Undetected, CoverLevel::None), // critical
            (VisibilityLevel::Full, CoverLevel::Standard),   // high
            (VisibilityLevel::Full, CoverLevel::Lesser),     // normal
            (VisibilityLevel::Full, CoverLevel::None),       // low
        ];
        for i in 0..25 {
            let (visibility, cover) = levels[i % levels.len()];
            let observer = entity(&format!("guard-{i}"), f64::from(i as i32));
            let subject = entity("rogue", 100.0);
            cache
                .put(
                    &observer,
                    &subject,
                    state_with(&observer.id, "rogue", visibility, cover),
                    None,
                )
                .await;
        }
        assert_eq!(cache.len().await, 25);

        cache.shrink_to(10).await;
        assert_eq!(cache.len().await, 10);

        let census = cache.tier_census().await;
        assert!(
            census.critical >= census.low,
            "critical survivors ({}) must be >= low survivors ({})",
            census.critical,
            census.low
        );
        // All 7 critical entries fit under the target; none may be lost
        // while any lower-tier entry survives.
        assert_eq!(census.critical, 7);
        assert_eq!(census.low, 0);
    }

    #[tokio::test]
    async fn test_count_budget_enforced_on_insert() {
        let cache = small_cache(20);
        for i in 0..40 {
            let observer = entity(&format!("guard-{i}"), f64::from(i));
            let subject = entity("rogue", 100.0);
            cache
                .put(
                    &observer,
                    &subject,
                    state_with(
                        &observer.id,
                        "rogue",
                        VisibilityLevel::Full,
                        CoverLevel::None,
                    ),
                    None,
                )
                .await;
        }
        // Sweeps keep occupancy at or under the hard budget.
        assert!(cache.len().await <= 20);
        let stats = cache.stats().await;
        assert!(stats.evictions > 0);
    }

    #[tokio::test]
    async fn test_oversized_payload_compacted_transparently() {
        let cache = StateCache::new(CacheConfig {
            compress_threshold_bytes: 8, // force the compaction path
            ..CacheConfig::default()
        });
        let observer = entity("guard", 0.0);
        let subject = entity("rogue", 10.0);

        let state = state_with("guard", "rogue", VisibilityLevel::Hidden, CoverLevel::None)
            .with_geometry(123.456_789, true, crate::domain::models::LightingBand::Dim);
        cache.put(&observer, &subject, state, None).await;

        // Same logical shape back, numeric precision reduced.
        let cached = cache.get(&observer, &subject).await.unwrap();
        assert_eq!(cached.visibility, VisibilityLevel::Hidden);
        assert!((cached.distance - 123.5).abs() < 1e-9);
    }
}
