use super::*;
use async_trait::async_trait;
use conductor_memory::InMemoryStore;
use std::sync::atomic::AtomicU32;
use uuid::Uuid;

fn record(category: MemoryCategory, title: &str, level: SecurityLevel) -> MemoryRecord {
    MemoryRecord::new(category, title, format!("{title} notes about the checkout api"))
        .with_security(level)
}

async fn seeded_store() -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    for level in [
        SecurityLevel::Public,
        SecurityLevel::TeamOnly,
        SecurityLevel::Sensitive,
        SecurityLevel::Confidential,
    ] {
        for category in MemoryCategory::ALL {
            let title = format!("{category} {level}");
            store.write(record(category, &title, level)).await.unwrap();
        }
    }
    store
}

fn engine(store: Arc<InMemoryStore>) -> ContextEngine {
    ContextEngine::new(store, ContextConfig::default())
}

#[tokio::test]
async fn test_bundle_never_exceeds_role_tier() {
    let store = seeded_store().await;
    let engine = engine(store);
    let task_id = Uuid::new_v4();

    for role in AgentRole::ALL {
        let request = ContextRequest::new(task_id, role, "checkout api")
            .with_categories(MemoryCategory::ALL);
        let bundle = engine.prepare_context(&request).await.unwrap();
        assert!(!bundle.ranked.is_empty());
        for scored in bundle.ranked.iter().chain(bundle.role_view.iter()) {
            assert!(scored.record.security_level <= role.access_tier(), "{role}");
        }
    }
}

#[tokio::test]
async fn test_request_ceiling_lowers_tier() {
    let store = seeded_store().await;
    let engine = engine(store);
    let request = ContextRequest::new(Uuid::new_v4(), AgentRole::Architect, "checkout api")
        .with_max_security(SecurityLevel::Public);
    let bundle = engine.prepare_context(&request).await.unwrap();
    assert!(bundle
        .ranked
        .iter()
        .all(|s| s.record.security_level == SecurityLevel::Public));
}

#[tokio::test]
async fn test_cached_bundle_is_reused_without_query() {
    let store = seeded_store().await;
    let engine = engine(Arc::clone(&store));
    let request = ContextRequest::new(Uuid::new_v4(), AgentRole::Engineer, "checkout api");

    let first = engine.prepare_context(&request).await.unwrap();
    let queries = store.query_count();
    let second = engine.prepare_context(&request).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(store.query_count(), queries);

    let stats = engine.cache_stats().await;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entries, 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_bundle_triggers_fresh_query() {
    let store = seeded_store().await;
    let engine = ContextEngine::new(
        Arc::clone(&store) as Arc<dyn MemoryStore>,
        ContextConfig::default().with_ttl(Duration::from_secs(60)),
    );
    let request = ContextRequest::new(Uuid::new_v4(), AgentRole::QA, "checkout api");

    let first = engine.prepare_context(&request).await.unwrap();
    let queries = store.query_count();

    tokio::time::advance(Duration::from_secs(61)).await;
    let second = engine.prepare_context(&request).await.unwrap();

    assert_eq!(store.query_count(), queries + 1);
    assert!(!Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_role_gate_respects_affinity_and_exclusions() {
    let store = Arc::new(InMemoryStore::new());
    store
        .write(MemoryRecord::new(MemoryCategory::Project, "checkout roadmap", "checkout"))
        .await
        .unwrap();
    store
        .write(
            MemoryRecord::new(MemoryCategory::Pattern, "checkout layering", "checkout")
                .with_tag("high_level_design"),
        )
        .await
        .unwrap();
    store
        .write(MemoryRecord::new(MemoryCategory::Pattern, "checkout retries", "checkout"))
        .await
        .unwrap();
    let engine = engine(store);
    let task_id = Uuid::new_v4();

    let plain = ContextRequest::new(task_id, AgentRole::Engineer, "checkout");
    let bundle = engine.prepare_context(&plain).await.unwrap();
    assert_eq!(bundle.ranked.len(), 3);
    assert_eq!(bundle.titles(), vec!["checkout retries"]);

    let widened = ContextRequest::new(task_id, AgentRole::Engineer, "checkout")
        .with_scope(ContextScope::ProjectSpecific)
        .with_categories([MemoryCategory::Project]);
    let bundle = engine.prepare_context(&widened).await.unwrap();
    let mut titles = bundle.titles();
    titles.sort_unstable();
    assert_eq!(titles, vec!["checkout retries", "checkout roadmap"]);
}

#[tokio::test]
async fn test_team_knowledge_scope_reads_team_only() {
    let store = seeded_store().await;
    let engine = engine(store);
    let request = ContextRequest::new(Uuid::new_v4(), AgentRole::Engineer, "checkout api")
        .with_scope(ContextScope::TeamKnowledge);
    let bundle = engine.prepare_context(&request).await.unwrap();
    assert!(!bundle.ranked.is_empty());
    assert!(bundle
        .ranked
        .iter()
        .all(|s| s.record.category == MemoryCategory::Team));
}

#[tokio::test]
async fn test_global_patterns_keeps_near_best() {
    let store = Arc::new(InMemoryStore::new());
    store
        .write(
            MemoryRecord::new(MemoryCategory::Pattern, "strong", "checkout api flow")
                .with_tags(["best_practice", "recommended"]),
        )
        .await
        .unwrap();
    store
        .write(MemoryRecord::new(MemoryCategory::Pattern, "weak", "checkout").with_score(0.0))
        .await
        .unwrap();
    let engine = engine(store);
    let request = ContextRequest::new(Uuid::new_v4(), AgentRole::Architect, "checkout api flow")
        .with_scope(ContextScope::GlobalPatterns);
    let bundle = engine.prepare_context(&request).await.unwrap();
    assert_eq!(bundle.titles(), vec!["strong"]);
}

#[tokio::test]
async fn test_ranking_and_truncation() {
    let store = Arc::new(InMemoryStore::new());
    for i in 0..10 {
        store
            .write(MemoryRecord::new(MemoryCategory::Pattern, format!("note {i}"), "checkout"))
            .await
            .unwrap();
    }
    store
        .write(
            MemoryRecord::new(MemoryCategory::Pattern, "proven", "checkout")
                .with_tag("successful"),
        )
        .await
        .unwrap();
    let engine = ContextEngine::new(store, ContextConfig::default().with_max_records(4));
    let request = ContextRequest::new(Uuid::new_v4(), AgentRole::Engineer, "checkout");
    let bundle = engine.prepare_context(&request).await.unwrap();

    assert_eq!(bundle.ranked.len(), 4);
    assert_eq!(bundle.ranked[0].record.title, "proven");
    assert!(bundle.ranked.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn test_batch_prepares_every_role() {
    let store = seeded_store().await;
    let engine = engine(Arc::clone(&store));
    let task_id = Uuid::new_v4();
    let requests: Vec<ContextRequest> = [AgentRole::Architect, AgentRole::Engineer, AgentRole::QA]
        .into_iter()
        .map(|role| ContextRequest::new(task_id, role, "checkout api"))
        .collect();

    let before = store.query_count();
    let bundles = engine.prepare_batch(&requests).await.unwrap();

    assert_eq!(bundles.len(), 3);
    assert_eq!(bundles[1].role, AgentRole::Engineer);
    assert_eq!(store.query_count(), before + 3);
}

/// Answers every query after a fixed delay.
struct SlowStore {
    inner: InMemoryStore,
    delay: Duration,
}

#[async_trait]
impl MemoryStore for SlowStore {
    async fn query(&self, filter: &MemoryFilter) -> conductor_memory::Result<Vec<MemoryRecord>> {
        tokio::time::sleep(self.delay).await;
        self.inner.query(filter).await
    }

    async fn write(&self, record: MemoryRecord) -> conductor_memory::Result<RecordId> {
        self.inner.write(record).await
    }

    async fn link(&self, from: RecordId, to: RecordId, weight: f64) -> conductor_memory::Result<()> {
        self.inner.link(from, to, weight).await
    }

    async fn get(&self, id: RecordId) -> conductor_memory::Result<Option<MemoryRecord>> {
        self.inner.get(id).await
    }

    async fn count(&self) -> conductor_memory::Result<usize> {
        self.inner.count().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_batch_lookups_run_concurrently() {
    let delay = Duration::from_millis(100);
    let store = Arc::new(SlowStore {
        inner: InMemoryStore::new(),
        delay,
    });
    let engine = ContextEngine::new(store, ContextConfig::default());
    let task_id = Uuid::new_v4();
    let requests: Vec<ContextRequest> = [AgentRole::Architect, AgentRole::Engineer, AgentRole::QA]
        .into_iter()
        .map(|role| ContextRequest::new(task_id, role, "checkout api"))
        .collect();

    let started = tokio::time::Instant::now();
    let bundles = engine.prepare_batch(&requests).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(bundles.len(), 3);
    assert!(elapsed >= delay);
    assert!(elapsed < delay * 2, "batch took {elapsed:?}");
}

#[tokio::test]
async fn test_lower_ceiling_is_not_served_from_wider_bundle() {
    let store = seeded_store().await;
    let engine = engine(Arc::clone(&store));
    let task_id = Uuid::new_v4();

    let full = ContextRequest::new(task_id, AgentRole::Architect, "checkout api");
    let wide = engine.prepare_context(&full).await.unwrap();
    assert!(wide
        .ranked
        .iter()
        .any(|s| s.record.security_level > SecurityLevel::Public));

    let queries = store.query_count();
    let public = full.clone().with_max_security(SecurityLevel::Public);
    let narrow = engine.prepare_context(&public).await.unwrap();
    assert_eq!(store.query_count(), queries + 1);
    assert!(!narrow.ranked.is_empty());
    for scored in narrow.ranked.iter().chain(narrow.role_view.iter()) {
        assert_eq!(scored.record.security_level, SecurityLevel::Public);
    }

    // Same effective tier as no ceiling at all
    let capped = full.clone().with_max_security(SecurityLevel::Confidential);
    let again = engine.prepare_context(&capped).await.unwrap();
    assert!(Arc::ptr_eq(&wide, &again));
}

#[tokio::test]
async fn test_extra_categories_get_their_own_bundle() {
    let store = seeded_store().await;
    let engine = engine(store);
    let task_id = Uuid::new_v4();

    let plain = ContextRequest::new(task_id, AgentRole::Engineer, "checkout api");
    let bundle = engine.prepare_context(&plain).await.unwrap();
    assert!(bundle
        .role_view
        .iter()
        .all(|s| s.record.category != MemoryCategory::Project));

    let widened = plain.clone().with_categories([MemoryCategory::Project]);
    let bundle = engine.prepare_context(&widened).await.unwrap();
    assert!(bundle
        .role_view
        .iter()
        .any(|s| s.record.category == MemoryCategory::Project));

    // Order and duplicates do not matter
    let same = plain
        .clone()
        .with_categories([MemoryCategory::Project, MemoryCategory::Project]);
    let cached = engine.prepare_context(&same).await.unwrap();
    assert!(Arc::ptr_eq(&bundle, &cached));
}

#[tokio::test]
async fn test_project_scope_includes_unassigned_records() {
    let store = Arc::new(InMemoryStore::new());
    for (title, project) in [
        ("checkout shop notes", Some("shop")),
        ("checkout blog notes", Some("blog")),
        ("checkout general notes", None),
    ] {
        let mut record = MemoryRecord::new(MemoryCategory::Pattern, title, "checkout");
        if let Some(project) = project {
            record = record.with_project(project);
        }
        store.write(record).await.unwrap();
    }
    let engine = engine(store);
    let request = ContextRequest::new(Uuid::new_v4(), AgentRole::Engineer, "checkout")
        .with_project("shop")
        .with_scope(ContextScope::ProjectSpecific);
    let bundle = engine.prepare_context(&request).await.unwrap();

    let mut titles = bundle.titles();
    titles.sort_unstable();
    assert_eq!(titles, vec!["checkout general notes", "checkout shop notes"]);
    let general = bundle
        .ranked
        .iter()
        .find(|s| s.record.project.is_none())
        .unwrap();
    assert_eq!(general.signals.project_relevance, 0.5);
}

#[tokio::test]
async fn test_teach_invalidates_project_bundles() {
    let store = seeded_store().await;
    let engine = engine(Arc::clone(&store));
    let shop_task = Uuid::new_v4();
    let blog_task = Uuid::new_v4();

    let shop = ContextRequest::new(shop_task, AgentRole::Engineer, "checkout api").with_project("shop");
    let blog = ContextRequest::new(blog_task, AgentRole::Engineer, "checkout api").with_project("blog");
    engine.prepare_context(&shop).await.unwrap();
    engine.prepare_context(&blog).await.unwrap();

    engine
        .teach(
            MemoryRecord::new(MemoryCategory::Team, "checkout api review", "always paginate")
                .with_project("shop"),
        )
        .await
        .unwrap();

    assert_eq!(engine.cache_stats().await.entries, 1);
    let refreshed = engine.prepare_context(&shop).await.unwrap();
    assert!(refreshed.titles().contains(&"checkout api review"));
}

#[tokio::test]
async fn test_invalidate_task() {
    let store = seeded_store().await;
    let engine = engine(store);
    let task_id = Uuid::new_v4();
    for role in [AgentRole::Engineer, AgentRole::QA] {
        engine
            .prepare_context(&ContextRequest::new(task_id, role, "checkout"))
            .await
            .unwrap();
    }
    assert_eq!(engine.invalidate_task(task_id).await, 2);
    assert_eq!(engine.cache_stats().await.entries, 0);
}

/// Fails the first `failures` queries with a transient error.
struct FlakyStore {
    inner: InMemoryStore,
    failures: AtomicU32,
}

#[async_trait]
impl MemoryStore for FlakyStore {
    async fn query(&self, filter: &MemoryFilter) -> conductor_memory::Result<Vec<MemoryRecord>> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(conductor_memory::Error::Unavailable("busy".into()));
        }
        self.inner.query(filter).await
    }

    async fn write(&self, record: MemoryRecord) -> conductor_memory::Result<RecordId> {
        self.inner.write(record).await
    }

    async fn link(&self, from: RecordId, to: RecordId, weight: f64) -> conductor_memory::Result<()> {
        self.inner.link(from, to, weight).await
    }

    async fn get(&self, id: RecordId) -> conductor_memory::Result<Option<MemoryRecord>> {
        self.inner.get(id).await
    }

    async fn count(&self) -> conductor_memory::Result<usize> {
        self.inner.count().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_transient_store_errors_are_retried() {
    let store = Arc::new(FlakyStore {
        inner: InMemoryStore::new(),
        failures: AtomicU32::new(2),
    });
    let engine = ContextEngine::new(store.clone(), ContextConfig::default());
    let request = ContextRequest::new(Uuid::new_v4(), AgentRole::Engineer, "anything");
    assert!(engine.prepare_context(&request).await.is_ok());

    store.failures.store(5, Ordering::SeqCst);
    let other = ContextRequest::new(Uuid::new_v4(), AgentRole::Engineer, "anything");
    let err = engine.prepare_context(&other).await.unwrap_err();
    assert!(matches!(err, Error::Memory(conductor_memory::Error::Unavailable(_))));
}
