use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use newswire::categories::CategoryCatalog;
use newswire::collect::{CancelFlag, Collector, CollectorSet};
use newswire::model::{RawRecord, RefreshEvent, SourceConfig, SourceKind};
use newswire::refresh::{RefreshOrchestrator, RefreshStart};
use newswire::registry::{SourcePatch, SourceRegistry};
use newswire::store::DurableStore;

fn record(link: &str, title: &str) -> RawRecord {
    let mut record = RawRecord::new();
    record.insert("title".into(), title.into());
    record.insert("link".into(), link.into());
    record
}

/// Serves canned records per source name; failing sources return an error.
#[derive(Default)]
struct StubCollector {
    records: HashMap<String, Vec<RawRecord>>,
    failing: HashSet<String>,
    cancel_during: Option<String>,
}

#[async_trait]
impl Collector for StubCollector {
    async fn collect(
        &self,
        source: &SourceConfig,
        cancel: &CancelFlag,
    ) -> anyhow::Result<Vec<RawRecord>> {
        if self.cancel_during.as_deref() == Some(source.name.as_str()) {
            cancel.cancel();
        }
        if self.failing.contains(&source.name) {
            anyhow::bail!("stub failure for {}", source.name);
        }
        Ok(self.records.get(&source.name).cloned().unwrap_or_default())
    }
}

struct Harness {
    dir: tempfile::TempDir,
    registry: Arc<SourceRegistry>,
    store: Arc<DurableStore>,
}

impl Harness {
    /// A registry whose seeded built-ins are all disabled, plus the given
    /// test sources.
    async fn new(sources: Vec<SourceConfig>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(DurableStore::open(dir.path()).await.unwrap());
        let registry = Arc::new(
            SourceRegistry::load(dir.path().join("sources.json"))
                .await
                .unwrap(),
        );
        for existing in registry.list().await {
            registry
                .update(
                    &existing.name,
                    SourcePatch {
                        enabled: Some(false),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }
        for source in sources {
            registry.add(source).await.unwrap();
        }
        Self { dir, registry, store }
    }

    fn orchestrator(&self, stub: StubCollector) -> Arc<RefreshOrchestrator> {
        self.orchestrator_serving(stub, &[SourceKind::Feed, SourceKind::Scraper])
    }

    fn orchestrator_serving(
        &self,
        stub: StubCollector,
        kinds: &[SourceKind],
    ) -> Arc<RefreshOrchestrator> {
        let stub: Arc<dyn Collector> = Arc::new(stub);
        let mut collectors = CollectorSet::new();
        for kind in kinds {
            collectors.register(*kind, Arc::clone(&stub));
        }
        Arc::new(RefreshOrchestrator::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.store),
            Arc::new(collectors),
            Arc::new(CategoryCatalog::default()),
        ))
    }

    fn snapshot_count(&self) -> usize {
        std::fs::read_dir(self.dir.path().join("news"))
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                name.starts_with("news_") && name.ends_with(".json")
            })
            .count()
    }
}

#[tokio::test]
async fn scrapers_run_first_and_failures_do_not_abort_the_pass() {
    let harness = Harness::new(vec![
        SourceConfig::feed("Alpha", "https://alpha.example/rss", "technology"),
        SourceConfig::feed("Broken", "https://broken.example/rss", "general"),
        SourceConfig::scraper("Zeta", "general"),
    ])
    .await;

    let mut stub = StubCollector::default();
    stub.records
        .insert("Alpha".into(), vec![record("https://e/a1", "A1")]);
    stub.records
        .insert("Zeta".into(), vec![record("https://e/z1", "Z1")]);
    stub.failing.insert("Broken".into());

    let orchestrator = harness.orchestrator(stub);
    let outcome = orchestrator.refresh_and_wait().await.unwrap();

    assert_eq!(outcome.succeeded_sources, vec!["Zeta", "Alpha"]);
    assert_eq!(outcome.failed_sources.len(), 1);
    assert!(outcome.failed_sources["Broken"].contains("stub failure"));
    assert_eq!(outcome.article_count, 2);
    assert!(!outcome.cancelled);
    assert!(outcome.persist_error.is_none());
    assert!(outcome.is_success());

    // Failure bookkeeping landed in the registry.
    let broken = harness.registry.get("Broken").await.unwrap();
    assert_eq!(broken.consecutive_error_count, 1);
    let alpha = harness.registry.get("Alpha").await.unwrap();
    assert!(alpha.last_success_at.is_some());

    // Scraper first in the cache too, and categories resolved per source.
    let cache = orchestrator.cache();
    assert_eq!(cache[0].link, "https://e/z1");
    assert_eq!(cache[1].category, "Technology");
    assert!(cache.iter().all(|a| a.is_new));

    assert_eq!(harness.snapshot_count(), 1);
}

#[tokio::test]
async fn duplicate_links_keep_last_record_in_first_position() {
    let harness = Harness::new(vec![
        SourceConfig::feed("One", "https://one.example/rss", "general"),
        SourceConfig::feed("Two", "https://two.example/rss", "general"),
    ])
    .await;

    let mut stub = StubCollector::default();
    stub.records.insert(
        "One".into(),
        vec![
            record("https://e/dup", "stub headline"),
            record("https://e/other", "other"),
        ],
    );
    stub.records
        .insert("Two".into(), vec![record("https://e/dup", "full headline")]);

    let orchestrator = harness.orchestrator(stub);
    let outcome = orchestrator.refresh_and_wait().await.unwrap();

    assert_eq!(outcome.article_count, 2);
    let cache = orchestrator.cache();
    assert_eq!(cache[0].link, "https://e/dup");
    assert_eq!(cache[0].title, "full headline");
    assert_eq!(cache[0].source_name, "Two");
    assert_eq!(cache[1].link, "https://e/other");
}

#[tokio::test]
async fn is_new_compares_against_previous_pass_and_is_read_merges() {
    let harness = Harness::new(vec![SourceConfig::feed(
        "One",
        "https://one.example/rss",
        "general",
    )])
    .await;

    let mut stub = StubCollector::default();
    stub.records
        .insert("One".into(), vec![record("https://e/1", "first")]);
    let orchestrator = harness.orchestrator(stub);
    orchestrator.refresh_and_wait().await.unwrap();
    assert!(orchestrator.cache()[0].is_new);

    harness.store.mark_read("https://e/1").await.unwrap();

    let mut stub = StubCollector::default();
    stub.records.insert(
        "One".into(),
        vec![record("https://e/1", "first"), record("https://e/2", "second")],
    );
    let orchestrator = harness.orchestrator(stub);
    orchestrator.load_cached().await.unwrap();
    orchestrator.refresh_and_wait().await.unwrap();

    let cache = orchestrator.cache();
    let first = cache.iter().find(|a| a.link == "https://e/1").unwrap();
    let second = cache.iter().find(|a| a.link == "https://e/2").unwrap();
    assert!(!first.is_new);
    assert!(first.is_read);
    assert!(second.is_new);
    assert!(!second.is_read);
}

#[tokio::test]
async fn cancellation_discards_the_whole_batch() {
    let harness = Harness::new(vec![
        SourceConfig::feed("One", "https://one.example/rss", "general"),
        SourceConfig::feed("Two", "https://two.example/rss", "general"),
    ])
    .await;

    // Seed a cache generation to prove it survives the cancelled pass.
    let mut stub = StubCollector::default();
    stub.records
        .insert("One".into(), vec![record("https://e/old", "old")]);
    stub.records.insert("Two".into(), Vec::new());
    let orchestrator = harness.orchestrator(stub);
    orchestrator.refresh_and_wait().await.unwrap();
    assert_eq!(harness.snapshot_count(), 1);

    let mut stub = StubCollector::default();
    stub.records
        .insert("One".into(), vec![record("https://e/new", "new")]);
    stub.records
        .insert("Two".into(), vec![record("https://e/new2", "new2")]);
    stub.cancel_during = Some("One".into());
    let orchestrator = harness.orchestrator(stub);
    orchestrator.load_cached().await.unwrap();
    let outcome = orchestrator.refresh_and_wait().await.unwrap();

    assert!(outcome.cancelled);
    assert_eq!(outcome.article_count, 0);
    assert!(!outcome.is_success());

    // Nothing was committed: same cache, same snapshot count.
    let cache = orchestrator.cache();
    assert_eq!(cache.len(), 1);
    assert_eq!(cache[0].link, "https://e/old");
    assert_eq!(harness.snapshot_count(), 1);
}

#[tokio::test]
async fn snapshot_failure_is_reported_but_the_cache_still_swaps() {
    let harness = Harness::new(vec![SourceConfig::feed(
        "One",
        "https://one.example/rss",
        "general",
    )])
    .await;

    // A plain file where the snapshot directory should be makes every
    // snapshot write fail.
    let news_dir = harness.dir.path().join("news");
    std::fs::remove_dir_all(&news_dir).unwrap();
    std::fs::write(&news_dir, b"").unwrap();

    let mut stub = StubCollector::default();
    stub.records
        .insert("One".into(), vec![record("https://e/1", "one")]);
    let orchestrator = harness.orchestrator(stub);
    let outcome = orchestrator.refresh_and_wait().await.unwrap();

    assert!(outcome.persist_error.is_some());
    assert!(!outcome.cancelled);
    assert_eq!(outcome.article_count, 1);
    assert_eq!(outcome.succeeded_sources, vec!["One"]);

    // Stale-on-disk, fresh-in-memory: readers see the new generation.
    let cache = orchestrator.cache();
    assert_eq!(cache.len(), 1);
    assert_eq!(cache[0].link, "https://e/1");
}

#[tokio::test]
async fn sources_without_a_collector_are_skipped_not_failed() {
    let harness = Harness::new(vec![
        SourceConfig::feed("One", "https://one.example/rss", "general"),
        SourceConfig::scraper("Zeta", "general"),
    ])
    .await;

    let mut stub = StubCollector::default();
    stub.records
        .insert("One".into(), vec![record("https://e/1", "one")]);
    let orchestrator = harness.orchestrator_serving(stub, &[SourceKind::Feed]);
    let outcome = orchestrator.refresh_and_wait().await.unwrap();

    assert_eq!(outcome.succeeded_sources, vec!["One"]);
    assert_eq!(outcome.skipped_sources, vec!["Zeta"]);
    assert!(outcome.failed_sources.is_empty());
    assert_eq!(outcome.article_count, 1);
    assert!(outcome.summary().contains("skipped"));

    // Skipping leaves the source's health bookkeeping alone.
    let zeta = harness.registry.get("Zeta").await.unwrap();
    assert_eq!(zeta.consecutive_error_count, 0);
    assert!(zeta.last_error.is_none());
    assert!(zeta.last_success_at.is_none());
}

#[tokio::test]
async fn second_start_while_running_is_rejected_then_allowed_after_completion() {
    let harness = Harness::new(vec![SourceConfig::feed(
        "One",
        "https://one.example/rss",
        "general",
    )])
    .await;

    let mut stub = StubCollector::default();
    stub.records
        .insert("One".into(), vec![record("https://e/1", "one")]);
    let orchestrator = harness.orchestrator(stub);

    let mut events = orchestrator.subscribe();
    assert_eq!(orchestrator.start_refresh(), RefreshStart::Started);
    // The pass has not run yet; a concurrent request is refused.
    assert_eq!(orchestrator.start_refresh(), RefreshStart::AlreadyInProgress);

    loop {
        if let RefreshEvent::Completed(outcome) = events.recv().await.unwrap() {
            assert!(!outcome.cancelled);
            break;
        }
    }

    assert_eq!(orchestrator.start_refresh(), RefreshStart::Started);
    loop {
        if let RefreshEvent::Completed(_) = events.recv().await.unwrap() {
            break;
        }
    }
}

#[tokio::test]
async fn progress_events_cover_every_enabled_source() {
    let harness = Harness::new(vec![
        SourceConfig::feed("One", "https://one.example/rss", "general"),
        SourceConfig::feed("Two", "https://two.example/rss", "general"),
    ])
    .await;

    let orchestrator = harness.orchestrator(StubCollector::default());
    let mut events = orchestrator.subscribe();
    orchestrator.refresh_and_wait().await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(seen.first(), Some(RefreshEvent::Started)));
    let progress: Vec<(usize, usize)> = seen
        .iter()
        .filter_map(|e| match e {
            RefreshEvent::Progress { done, total } => Some((*done, *total)),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![(1, 2), (2, 2)]);
    assert!(matches!(seen.last(), Some(RefreshEvent::Completed(_))));
}

#[tokio::test]
async fn cache_loads_from_latest_snapshot_with_read_state() {
    let harness = Harness::new(vec![SourceConfig::feed(
        "One",
        "https://one.example/rss",
        "general",
    )])
    .await;

    let mut stub = StubCollector::default();
    stub.records
        .insert("One".into(), vec![record("https://e/1", "one")]);
    let orchestrator = harness.orchestrator(stub);
    orchestrator.refresh_and_wait().await.unwrap();

    harness.store.mark_read("https://e/1").await.unwrap();

    // A fresh orchestrator over the same store sees the persisted pass.
    let restarted = harness.orchestrator(StubCollector::default());
    assert!(restarted.cache().is_empty());
    restarted.load_cached().await.unwrap();
    let cache = restarted.cache();
    assert_eq!(cache.len(), 1);
    assert!(!cache[0].is_new);
    assert!(cache[0].is_read);
}
