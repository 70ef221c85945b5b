//! Memory Context Engine
//!
//! Retrieves historical records for a (task, role) pair, scores them with
//! independent weighted signals, keeps the top N and filters them through
//! the security and role gates. Prepared bundles are cached per
//! `(task, role, scope, tier, categories)` for a fixed TTL.
//!
//! The engine only reads memory; [`ContextEngine::teach`] is the single
//! write path it offers, and it invalidates affected cache entries.

pub mod cache;
pub mod gates;
pub mod scoring;

pub use cache::{InMemoryTtlCache, TtlCache};
pub use scoring::{ScoringWeights, SignalScores};

use crate::agents::AgentRole;
use crate::error::{Error, Result};
use crate::task::{Subtask, Task, TaskId};
use crate::utils::{retry_with_backoff, RetryConfig};
use chrono::{DateTime, Utc};
use conductor_memory::{
    search_terms, MemoryCategory, MemoryFilter, MemoryRecord, MemoryStore, RecordId, SecurityLevel,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Which slice of memory a bundle is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextScope {
    /// Records of the task's own project and records with no project
    /// (falls back to cross-project when the task has none)
    ProjectSpecific,
    /// Every project
    #[default]
    CrossProject,
    /// Pattern records close to the best observed score
    GlobalPatterns,
    /// Team records only
    TeamKnowledge,
}

impl std::fmt::Display for ContextScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ProjectSpecific => "project_specific",
            Self::CrossProject => "cross_project",
            Self::GlobalPatterns => "global_patterns",
            Self::TeamKnowledge => "team_knowledge",
        };
        f.write_str(s)
    }
}

/// Context engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Bundle lifetime in the cache
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Records kept per bundle
    #[serde(default = "default_max_records")]
    pub max_records: usize,
    /// Records fetched from the store before scoring
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
    /// `GlobalPatterns` keeps records scoring at least this share of the best
    #[serde(default = "default_global_pattern_threshold")]
    pub global_pattern_threshold: f64,
    /// Days during which recent-learning tags boost recency
    #[serde(default = "default_recent_days")]
    pub recent_days: i64,
    /// Latency target for one bundle
    #[serde(default = "default_latency_budget_ms")]
    pub latency_budget_ms: u64,
    /// Latency target for a batch
    #[serde(default = "default_batch_latency_budget_ms")]
    pub batch_latency_budget_ms: u64,
    /// Scope used when the caller does not pick one
    #[serde(default)]
    pub default_scope: ContextScope,
    /// Signal weights
    #[serde(default)]
    pub weights: ScoringWeights,
    /// Retry policy for transient store errors
    #[serde(default = "default_store_retry")]
    pub retry: RetryConfig,
}

fn default_cache_ttl_secs() -> u64 {
    30 * 60
}

fn default_max_records() -> usize {
    20
}

fn default_candidate_limit() -> usize {
    200
}

fn default_global_pattern_threshold() -> f64 {
    0.8
}

fn default_recent_days() -> i64 {
    30
}

fn default_latency_budget_ms() -> u64 {
    100
}

fn default_batch_latency_budget_ms() -> u64 {
    1_000
}

fn default_store_retry() -> RetryConfig {
    RetryConfig::default()
        .with_max_attempts(3)
        .with_initial_delay(Duration::from_millis(50))
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            max_records: default_max_records(),
            candidate_limit: default_candidate_limit(),
            global_pattern_threshold: default_global_pattern_threshold(),
            recent_days: default_recent_days(),
            latency_budget_ms: default_latency_budget_ms(),
            batch_latency_budget_ms: default_batch_latency_budget_ms(),
            default_scope: ContextScope::default(),
            weights: ScoringWeights::default(),
            retry: default_store_retry(),
        }
    }
}

impl ContextConfig {
    /// Set the cache TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_secs = ttl.as_secs();
        self
    }

    /// Set the number of records per bundle.
    #[must_use]
    pub fn with_max_records(mut self, max: usize) -> Self {
        self.max_records = max;
        self
    }

    /// Set the default scope.
    #[must_use]
    pub fn with_default_scope(mut self, scope: ContextScope) -> Self {
        self.default_scope = scope;
        self
    }

    /// Set the signal weights.
    #[must_use]
    pub fn with_weights(mut self, weights: ScoringWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Set the store retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Input to [`ContextEngine::prepare_context`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRequest {
    /// Task the bundle is for
    pub task_id: TaskId,
    /// Requesting role
    pub role: AgentRole,
    /// Memory slice
    pub scope: ContextScope,
    /// Text the records are scored against
    pub description: String,
    /// Task project
    #[serde(default)]
    pub project: Option<String>,
    /// Task tags (extra search terms)
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Categories explicitly requested beyond the role's affinity
    #[serde(default)]
    pub categories: Vec<MemoryCategory>,
    /// Optional ceiling below the role's access tier
    #[serde(default)]
    pub max_security: Option<SecurityLevel>,
}

impl ContextRequest {
    /// Request for `role` scored against `description`.
    pub fn new(task_id: TaskId, role: AgentRole, description: impl Into<String>) -> Self {
        Self {
            task_id,
            role,
            scope: ContextScope::default(),
            description: description.into(),
            project: None,
            tags: BTreeSet::new(),
            categories: Vec::new(),
            max_security: None,
        }
    }

    /// Request for a planned subtask, combining task and subtask text.
    #[must_use]
    pub fn for_subtask(task: &Task, subtask: &Subtask, scope: ContextScope) -> Self {
        let mut request = Self::new(
            task.id,
            subtask.role,
            format!("{} {}", task.description, subtask.description),
        )
        .with_scope(scope);
        request.project = task.project.clone();
        request.tags = task.tags.clone();
        request
    }

    /// Set the scope.
    #[must_use]
    pub fn with_scope(mut self, scope: ContextScope) -> Self {
        self.scope = scope;
        self
    }

    /// Set the project.
    #[must_use]
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Explicitly request categories outside the role's affinity.
    #[must_use]
    pub fn with_categories(mut self, categories: impl IntoIterator<Item = MemoryCategory>) -> Self {
        self.categories.extend(categories);
        self
    }

    /// Lower the access ceiling.
    #[must_use]
    pub fn with_max_security(mut self, level: SecurityLevel) -> Self {
        self.max_security = Some(level);
        self
    }

    fn key(&self, tier: SecurityLevel) -> ContextKey {
        let mut categories = self.categories.clone();
        categories.sort_unstable();
        categories.dedup();
        ContextKey {
            task_id: self.task_id,
            role: self.role,
            scope: self.scope,
            tier,
            categories,
        }
    }

    fn search_text(&self) -> String {
        let mut text = self.description.clone();
        for tag in &self.tags {
            text.push(' ');
            text.push_str(tag);
        }
        text
    }

    fn filter(&self, tier: SecurityLevel, limit: usize) -> MemoryFilter {
        let mut filter = MemoryFilter::new().max_security(tier).limit(limit);
        match self.scope {
            ContextScope::ProjectSpecific => {
                if let Some(project) = &self.project {
                    filter = filter.project_or_global(project.clone());
                }
            }
            ContextScope::CrossProject => {}
            ContextScope::GlobalPatterns => filter = filter.category(MemoryCategory::Pattern),
            ContextScope::TeamKnowledge => filter = filter.category(MemoryCategory::Team),
        }
        let text = self.search_text();
        if !search_terms(&text).is_empty() {
            filter = filter.text(text);
        }
        filter
    }
}

/// Cache key.
///
/// Bundles depend on the effective tier and the requested categories as
/// well, so a lowered ceiling or a different category set never reuses a
/// wider bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextKey {
    /// Task
    pub task_id: TaskId,
    /// Role
    pub role: AgentRole,
    /// Scope
    pub scope: ContextScope,
    /// Effective security tier
    pub tier: SecurityLevel,
    /// Extra categories, sorted
    pub categories: Vec<MemoryCategory>,
}

/// A record with its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    /// The record
    pub record: MemoryRecord,
    /// Weighted total
    pub score: f64,
    /// Individual signals
    pub signals: SignalScores,
}

/// Prepared context for one (task, role) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    /// Task
    pub task_id: TaskId,
    /// Role
    pub role: AgentRole,
    /// Scope
    pub scope: ContextScope,
    /// Security-gated records, best first
    pub ranked: Vec<ScoredRecord>,
    /// `ranked` further restricted to the role's boundary
    pub role_view: Vec<ScoredRecord>,
    /// Preparation time
    pub created_at: DateTime<Utc>,
    /// When the cached copy stops being served
    pub expires_at: DateTime<Utc>,
}

impl ContextBundle {
    /// Empty bundle, used by callers that run without memory.
    #[must_use]
    pub fn empty(task_id: TaskId, role: AgentRole) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            role,
            scope: ContextScope::default(),
            ranked: Vec::new(),
            role_view: Vec::new(),
            created_at: now,
            expires_at: now,
        }
    }

    /// Records the role should read, best first.
    pub fn records(&self) -> impl Iterator<Item = &MemoryRecord> {
        self.role_view.iter().map(|s| &s.record)
    }

    /// Titles of [`records`](Self::records).
    #[must_use]
    pub fn titles(&self) -> Vec<&str> {
        self.records().map(|r| r.title.as_str()).collect()
    }

    /// Number of records in the role view.
    #[must_use]
    pub fn len(&self) -> usize {
        self.role_view.len()
    }

    /// Whether the role view is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.role_view.is_empty()
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Requests served from the cache
    pub hits: u64,
    /// Requests that queried the store
    pub misses: u64,
    /// Entries currently cached
    pub entries: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// The Memory Context Engine.
pub struct ContextEngine {
    store: Arc<dyn MemoryStore>,
    cache: Arc<dyn TtlCache<ContextKey, Arc<ContextBundle>>>,
    config: ContextConfig,
    task_projects: DashMap<TaskId, Option<String>>,
    counters: Counters,
}

impl ContextEngine {
    /// Engine with an in-process cache.
    pub fn new(store: Arc<dyn MemoryStore>, config: ContextConfig) -> Self {
        Self::with_cache(store, Arc::new(InMemoryTtlCache::new()), config)
    }

    /// Engine with a caller-provided cache.
    pub fn with_cache(
        store: Arc<dyn MemoryStore>,
        cache: Arc<dyn TtlCache<ContextKey, Arc<ContextBundle>>>,
        config: ContextConfig,
    ) -> Self {
        Self {
            store,
            cache,
            config,
            task_projects: DashMap::new(),
            counters: Counters::default(),
        }
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    /// Prepare (or reuse) the bundle for `request`.
    pub async fn prepare_context(&self, request: &ContextRequest) -> Result<Arc<ContextBundle>> {
        let tier = gates::effective_tier(request.role, request.max_security);
        let key = request.key(tier);
        if let Some(bundle) = self.cache.get(&key).await {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!(task_id = %request.task_id, role = %request.role, scope = %request.scope, "context cache hit");
            return Ok(bundle);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        let started = Instant::now();
        let candidates = self
            .search(&request.filter(tier, self.config.candidate_limit))
            .await?;
        let candidate_count = candidates.len();
        let bundle = Arc::new(self.build_bundle(request, tier, candidates));

        self.cache.insert(key, Arc::clone(&bundle), self.config.ttl()).await;
        self.task_projects
            .insert(request.task_id, request.project.clone());

        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(
            task_id = %request.task_id,
            role = %request.role,
            scope = %request.scope,
            candidates = candidate_count,
            ranked = bundle.ranked.len(),
            role_view = bundle.role_view.len(),
            elapsed_ms,
            "context prepared"
        );
        if elapsed_ms > self.config.latency_budget_ms {
            warn!(role = %request.role, elapsed_ms, "context preparation over latency target");
        }
        Ok(bundle)
    }

    /// Prepare several bundles concurrently; returns once all are ready.
    pub async fn prepare_batch(&self, requests: &[ContextRequest]) -> Result<Vec<Arc<ContextBundle>>> {
        let started = Instant::now();
        let bundles =
            futures::future::try_join_all(requests.iter().map(|r| self.prepare_context(r))).await?;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(count = bundles.len(), elapsed_ms, "context batch prepared");
        if elapsed_ms > self.config.batch_latency_budget_ms {
            warn!(count = bundles.len(), elapsed_ms, "context batch over latency target");
        }
        Ok(bundles)
    }

    /// Query the store, retrying transient errors.
    pub async fn search(&self, filter: &MemoryFilter) -> Result<Vec<MemoryRecord>> {
        retry_with_backoff(
            &self.config.retry,
            |_| {
                let store = Arc::clone(&self.store);
                let filter = filter.clone();
                async move { store.query(&filter).await }
            },
            conductor_memory::Error::is_transient,
        )
        .await
        .map_err(|e| Error::Memory(e.last_error))
    }

    /// Write a record on behalf of an agent and drop bundles it may affect.
    pub async fn teach(&self, record: MemoryRecord) -> Result<RecordId> {
        let project = record.project.clone();
        let category = record.category;
        let id = retry_with_backoff(
            &self.config.retry,
            |_| {
                let store = Arc::clone(&self.store);
                let record = record.clone();
                async move { store.write(record).await }
            },
            conductor_memory::Error::is_transient,
        )
        .await
        .map_err(|e| Error::Memory(e.last_error))?;

        let affected: Vec<TaskId> = self
            .task_projects
            .iter()
            .filter(|entry| project.is_none() || *entry.value() == project)
            .map(|entry| *entry.key())
            .collect();
        let mut dropped = 0;
        for task_id in &affected {
            dropped += self.invalidate_task(*task_id).await;
        }
        info!(record_id = %id, category = %category, dropped, "memory taught");
        Ok(id)
    }

    /// Drop every cached bundle of a task.
    pub async fn invalidate_task(&self, task_id: TaskId) -> usize {
        self.task_projects.remove(&task_id);
        self.cache
            .remove_where(&move |key: &ContextKey| key.task_id == task_id)
            .await
    }

    /// Drop expired bundles.
    pub async fn purge_expired(&self) -> usize {
        let purged = self.cache.purge_expired().await;
        if purged > 0 {
            debug!(purged, "expired context bundles purged");
        }
        purged
    }

    /// Cache counters.
    pub async fn cache_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            entries: self.cache.len().await,
        }
    }

    fn build_bundle(
        &self,
        request: &ContextRequest,
        tier: SecurityLevel,
        candidates: Vec<MemoryRecord>,
    ) -> ContextBundle {
        let now = Utc::now();
        let description = request.description.to_lowercase();
        let terms = search_terms(&request.search_text());
        let input = scoring::ScoringInput {
            description: &description,
            terms: &terms,
            project: request.project.as_deref(),
            role: request.role,
            now,
            recent_days: self.config.recent_days,
        };

        let mut ranked: Vec<ScoredRecord> = candidates
            .into_iter()
            .filter(|r| gates::passes_security(r, tier))
            .map(|record| {
                let signals = scoring::score_signals(&record, &input);
                ScoredRecord {
                    score: signals.combine(&self.config.weights),
                    signals,
                    record,
                }
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });

        if request.scope == ContextScope::GlobalPatterns {
            if let Some(best) = ranked.first().map(|s| s.score) {
                let floor = best * self.config.global_pattern_threshold;
                ranked.retain(|s| s.score >= floor);
            }
        }
        ranked.truncate(self.config.max_records);

        let role_view = ranked
            .iter()
            .filter(|s| gates::passes_role(&s.record, request.role, &request.categories))
            .cloned()
            .collect();

        let ttl = chrono::Duration::from_std(self.config.ttl()).unwrap_or(chrono::Duration::zero());
        ContextBundle {
            task_id: request.task_id,
            role: request.role,
            scope: request.scope,
            ranked,
            role_view,
            created_at: now,
            expires_at: now + ttl,
        }
    }
}

impl std::fmt::Debug for ContextEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextEngine")
            .field("config", &self.config)
            .field("tracked_tasks", &self.task_projects.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
