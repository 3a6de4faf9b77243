use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{broadcast, watch};

use crate::categories::CategoryCatalog;
use crate::collect::{CancelFlag, CollectorSet};
use crate::dates;
use crate::model::{Article, RawRecord, RefreshEvent, RefreshOutcome, SourceConfig, SourceKind, raw_str};
use crate::registry::SourceRegistry;
use crate::store::DurableStore;

/// Result of asking for a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStart {
    Started,
    /// A pass is already running; no second pass is started (single-flight).
    AlreadyInProgress,
}

/// Coordinates one ingestion pass across all enabled sources: sequential
/// collection (scraper-kind first), cooperative cancellation that discards
/// the whole batch, and a merge pipeline that publishes complete cache
/// generations. Readers never observe a half-updated cache.
pub struct RefreshOrchestrator {
    registry: Arc<SourceRegistry>,
    store: Arc<DurableStore>,
    collectors: Arc<CollectorSet>,
    categories: Arc<CategoryCatalog>,
    refreshing: AtomicBool,
    cancel: CancelFlag,
    cache_tx: watch::Sender<Arc<Vec<Article>>>,
    events: broadcast::Sender<RefreshEvent>,
}

impl RefreshOrchestrator {
    pub fn new(
        registry: Arc<SourceRegistry>,
        store: Arc<DurableStore>,
        collectors: Arc<CollectorSet>,
        categories: Arc<CategoryCatalog>,
    ) -> Self {
        let (cache_tx, _) = watch::channel(Arc::new(Vec::new()));
        let (events, _) = broadcast::channel(64);
        Self {
            registry,
            store,
            collectors,
            categories,
            refreshing: AtomicBool::new(false),
            cancel: CancelFlag::new(),
            cache_tx,
            events,
        }
    }

    /// Seed the cache from the latest persisted snapshot, merging current
    /// read state. Nothing from a previous run counts as new.
    pub async fn load_cached(&self) -> anyhow::Result<()> {
        let mut articles = self.store.load_latest_snapshot().await?;
        let read_links = self.store.read_links().await;
        for article in &mut articles {
            article.is_new = false;
            article.is_read = read_links.contains(&article.link);
        }
        self.cache_tx.send_replace(Arc::new(articles));
        Ok(())
    }

    /// The current cache generation. The returned set is complete and
    /// immutable; a refresh replaces it wholesale.
    pub fn cache(&self) -> Arc<Vec<Article>> {
        self.cache_tx.borrow().clone()
    }

    /// Observe cache generations as they are published.
    pub fn subscribe_cache(&self) -> watch::Receiver<Arc<Vec<Article>>> {
        self.cache_tx.subscribe()
    }

    /// Observe refresh lifecycle events (started / progress / completed).
    pub fn subscribe(&self) -> broadcast::Receiver<RefreshEvent> {
        self.events.subscribe()
    }

    /// Start one pass on a background worker. Returns immediately;
    /// completion is reported through [`Self::subscribe`].
    pub fn start_refresh(self: &Arc<Self>) -> RefreshStart {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::info!("refresh already in progress; request ignored");
            return RefreshStart::AlreadyInProgress;
        }

        self.cancel.reset();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_pass().await;
        });
        RefreshStart::Started
    }

    /// Request cancellation of the running pass. Has no effect once the
    /// merge pipeline has begun, or when no pass is running.
    pub fn cancel_refresh(&self) {
        if self.refreshing.load(Ordering::SeqCst) {
            tracing::info!("cancelling refresh");
            self.cancel.cancel();
        } else {
            tracing::debug!("no refresh in progress to cancel");
        }
    }

    /// Run one pass and wait for its outcome. Fails fast when a pass is
    /// already in flight.
    pub async fn refresh_and_wait(self: &Arc<Self>) -> anyhow::Result<RefreshOutcome> {
        let mut events = self.subscribe();
        match self.start_refresh() {
            RefreshStart::Started => {}
            RefreshStart::AlreadyInProgress => {
                anyhow::bail!("refresh already in progress");
            }
        }
        loop {
            match events.recv().await {
                Ok(RefreshEvent::Completed(outcome)) => return Ok(outcome),
                Ok(_) => {}
                Err(err) => anyhow::bail!("refresh event stream closed: {err}"),
            }
        }
    }

    /// Release collector resources. Call once at shutdown.
    pub async fn close(&self) {
        self.collectors.close_all().await;
    }

    async fn run_pass(self: Arc<Self>) {
        let _ = self.events.send(RefreshEvent::Started);

        let (sources, unserved): (Vec<_>, Vec<_>) = order_sources(self.registry.list().await)
            .into_iter()
            .partition(|s| self.collectors.get(s.kind).is_some());
        let total = sources.len();
        tracing::info!(total, skipped = unserved.len(), "refresh pass started");

        let mut batch: Vec<RawRecord> = Vec::new();
        let mut outcome = RefreshOutcome::default();
        for source in unserved {
            // Not a source failure; health counters stay untouched.
            tracing::warn!(source = %source.name, kind = %source.kind, "no collector registered; source skipped");
            outcome.skipped_sources.push(source.name);
        }
        let mut cancelled = false;

        for (done, source) in sources.iter().enumerate() {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            match self.collect_one(source).await {
                Ok(records) => {
                    tracing::info!(source = %source.name, count = records.len(), "source collected");
                    batch.extend(records);
                    outcome.succeeded_sources.push(source.name.clone());
                    if let Err(err) = self.registry.record_success(&source.name).await {
                        tracing::warn!(source = %source.name, ?err, "failed to record source success");
                    }
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    tracing::warn!(source = %source.name, %message, "source failed; continuing");
                    if let Err(err) = self.registry.record_failure(&source.name, &message).await {
                        tracing::warn!(source = %source.name, ?err, "failed to record source failure");
                    }
                    outcome.failed_sources.insert(source.name.clone(), message);
                }
            }

            let _ = self.events.send(RefreshEvent::Progress {
                done: done + 1,
                total,
            });
        }

        // A flag raised during the final collector still cancels the pass;
        // once the merge starts, cancellation no longer has any effect.
        cancelled = cancelled || self.cancel.is_cancelled();

        if cancelled {
            // The whole batch is discarded: cache and snapshot stay exactly
            // as they were before the pass.
            tracing::info!(collected = batch.len(), "refresh cancelled; batch discarded");
            outcome = RefreshOutcome {
                cancelled: true,
                ..Default::default()
            };
        } else {
            let articles = self.merge_batch(batch, &sources).await;
            outcome.article_count = articles.len();

            if let Err(err) = self.store.save_snapshot(&articles).await {
                // Stale-but-visible beats silently keeping old data: the
                // cache swap below still happens.
                let message = format!("{err:#}");
                tracing::error!(%message, "snapshot persistence failed");
                outcome.persist_error = Some(message);
            }

            self.cache_tx.send_replace(Arc::new(articles));
            tracing::info!(
                articles = outcome.article_count,
                succeeded = outcome.succeeded_sources.len(),
                failed = outcome.failed_sources.len(),
                "refresh pass complete"
            );
        }

        self.cancel.reset();
        self.refreshing.store(false, Ordering::SeqCst);
        let _ = self.events.send(RefreshEvent::Completed(outcome));
    }

    async fn collect_one(&self, source: &SourceConfig) -> anyhow::Result<Vec<RawRecord>> {
        let collector = self
            .collectors
            .get(source.kind)
            .ok_or_else(|| anyhow::anyhow!("no collector registered for kind {:?}", source.kind))?;
        let mut records = collector.collect(source, &self.cancel).await?;
        for record in &mut records {
            record.insert("source_name".into(), source.name.clone().into());
        }
        Ok(records)
    }

    /// The merge pipeline: normalize, drop linkless records, dedup by link
    /// (last write in collection order wins), then annotate is_new against
    /// the pre-refresh cache and is_read from the store.
    async fn merge_batch(&self, batch: Vec<RawRecord>, sources: &[SourceConfig]) -> Vec<Article> {
        let category_by_source: HashMap<&str, &str> = sources
            .iter()
            .map(|s| (s.name.as_str(), s.category_id.as_str()))
            .collect();

        let pre_refresh_links: HashSet<String> = self
            .cache_tx
            .borrow()
            .iter()
            .map(|article| article.link.clone())
            .collect();
        let read_links = self.store.read_links().await;

        let mut articles: Vec<Article> = Vec::new();
        let mut index_by_link: HashMap<String, usize> = HashMap::new();

        for record in batch {
            let Some(article) = self.normalize(record, &category_by_source) else {
                continue;
            };
            match index_by_link.get(&article.link) {
                // Later records are assumed more complete (e.g. a detail
                // fetch augmenting a list stub) and overwrite in place.
                Some(&index) => articles[index] = article,
                None => {
                    index_by_link.insert(article.link.clone(), articles.len());
                    articles.push(article);
                }
            }
        }

        for article in &mut articles {
            article.is_new = !pre_refresh_links.contains(&article.link);
            article.is_read = read_links.contains(&article.link);
        }

        articles
    }

    fn normalize(
        &self,
        record: RawRecord,
        category_by_source: &HashMap<&str, &str>,
    ) -> Option<Article> {
        let Some(link) = raw_str(&record, "link") else {
            tracing::debug!(
                title = raw_str(&record, "title").unwrap_or("<untitled>"),
                "record without link discarded"
            );
            return None;
        };

        let source_name = raw_str(&record, "source_name").unwrap_or("<unknown>");
        let category_id = category_by_source.get(source_name).copied().unwrap_or("");
        let published_at = raw_str(&record, "published_at").and_then(dates::parse_published);

        Some(Article {
            title: raw_str(&record, "title").unwrap_or("(untitled)").to_string(),
            link: link.to_string(),
            source_name: source_name.to_string(),
            content: raw_str(&record, "content").map(str::to_string),
            summary: raw_str(&record, "summary").map(str::to_string),
            published_at,
            category: self.categories.resolve(category_id).to_string(),
            is_new: false,
            is_read: false,
            raw: record,
        })
    }
}

/// Scraper-kind sources run first (they are slow and benefit from an early
/// start); everything else keeps registry order.
fn order_sources(sources: Vec<SourceConfig>) -> Vec<SourceConfig> {
    let (scrapers, rest): (Vec<_>, Vec<_>) = sources
        .into_iter()
        .filter(|s| s.enabled)
        .partition(|s| s.kind == SourceKind::Scraper);
    scrapers.into_iter().chain(rest).collect()
}
