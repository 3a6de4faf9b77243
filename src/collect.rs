pub mod feed;
pub mod scraper;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::model::{RawRecord, SourceConfig, SourceKind};

/// Cooperative cancellation flag shared between the orchestrator and the
/// collectors it drives.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The contract every source-kind adapter satisfies.
///
/// Implementations must be stateless across invocations (connection pooling
/// aside), poll the cancel flag at a reasonable grain (once per item for
/// multi-item fetches) and return whatever was collected so far when
/// cancellation is observed, and skip single malformed items rather than
/// failing the whole fetch. A returned error marks the source as failed for
/// this pass.
#[async_trait]
pub trait Collector: Send + Sync {
    async fn collect(
        &self,
        source: &SourceConfig,
        cancel: &CancelFlag,
    ) -> anyhow::Result<Vec<RawRecord>>;

    /// Release any held resources. Called once at shutdown.
    async fn close(&self) {}
}

/// Dispatch table from source kind to the adapter that serves it.
#[derive(Default)]
pub struct CollectorSet {
    by_kind: HashMap<SourceKind, Arc<dyn Collector>>,
}

impl CollectorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: SourceKind, collector: Arc<dyn Collector>) {
        self.by_kind.insert(kind, collector);
    }

    pub fn get(&self, kind: SourceKind) -> Option<Arc<dyn Collector>> {
        self.by_kind.get(&kind).cloned()
    }

    pub async fn close_all(&self) {
        for collector in self.by_kind.values() {
            collector.close().await;
        }
    }
}
