use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::collect::{CancelFlag, Collector};
use crate::model::{RawRecord, SourceConfig};

/// Seam for the site-specific scraping machinery (headless browser, HTML
/// extraction). The driver owns whatever session state it needs; the
/// collector owns its lifecycle.
#[async_trait]
pub trait ScrapeDriver: Send + Sync {
    /// One-shot session setup (e.g. launching a browser). Called at most
    /// once per process; a failure here is permanent.
    async fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Fetch raw items for one source. `selector_overrides` on the source
    /// is passed through untouched. Implementations poll `cancel` between
    /// items and return what they have when it fires.
    async fn fetch_items(
        &self,
        source: &SourceConfig,
        cancel: &CancelFlag,
    ) -> anyhow::Result<Vec<RawRecord>>;

    async fn close(&self) {}
}

#[derive(Debug)]
enum DriverState {
    Idle,
    Ready,
    Failed(String),
}

/// Adapter for scraper-kind sources. Initializes its driver lazily on the
/// first collect; a failed init is remembered and every later collect fails
/// fast until shutdown.
pub struct ScraperCollector<D: ScrapeDriver> {
    driver: D,
    state: Mutex<DriverState>,
}

impl<D: ScrapeDriver> ScraperCollector<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            state: Mutex::new(DriverState::Idle),
        }
    }

    async fn ensure_ready(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        match &*state {
            DriverState::Ready => Ok(()),
            DriverState::Failed(message) => Err(anyhow::anyhow!(
                "scraper driver unavailable (init failed earlier): {message}"
            )),
            DriverState::Idle => match self.driver.init().await {
                Ok(()) => {
                    *state = DriverState::Ready;
                    Ok(())
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    tracing::error!(%message, "scraper driver init failed; will not retry");
                    *state = DriverState::Failed(message.clone());
                    Err(anyhow::anyhow!("scraper driver init failed: {message}"))
                }
            },
        }
    }
}

#[async_trait]
impl<D: ScrapeDriver> Collector for ScraperCollector<D> {
    async fn collect(
        &self,
        source: &SourceConfig,
        cancel: &CancelFlag,
    ) -> anyhow::Result<Vec<RawRecord>> {
        self.ensure_ready().await?;
        if cancel.is_cancelled() {
            return Ok(Vec::new());
        }
        self.driver.fetch_items(source, cancel).await
    }

    async fn close(&self) {
        let mut state = self.state.lock().await;
        if matches!(&*state, DriverState::Ready) {
            self.driver.close().await;
        }
        *state = DriverState::Idle;
    }
}
