use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::Utc;
use tokio::fs;
use tokio::sync::Mutex;

use crate::model::{Article, HistoryEntry};

/// Oldest entries beyond this are evicted from the browsing history.
pub const MAX_HISTORY_ENTRIES: usize = 1000;

const SNAPSHOT_PREFIX: &str = "news_";
const SNAPSHOT_SUFFIX: &str = ".json";

/// Crash-safe persistence for article snapshots, the read-status set and the
/// browsing-history log. Every write goes through temp-file-then-rename, so
/// a target path is never observable half-written. Writers to the same
/// logical file are serialized by the per-store mutexes; rename is atomic
/// but the temp-file write is not interlocked on its own.
pub struct DurableStore {
    data_dir: PathBuf,
    read_links: Mutex<HashSet<String>>,
    history_lock: Mutex<()>,
}

impl DurableStore {
    pub async fn open(data_dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(data_dir.join("news"))
            .await
            .with_context(|| format!("create news dir under: {}", data_dir.display()))?;

        let read_links = match read_json::<Vec<String>>(&data_dir.join("read_status")).await {
            Ok(Some(links)) => links.into_iter().collect(),
            Ok(None) => HashSet::new(),
            Err(err) => {
                tracing::warn!(?err, "read_status file unreadable; starting with empty set");
                HashSet::new()
            }
        };

        Ok(Self {
            data_dir,
            read_links: Mutex::new(read_links),
            history_lock: Mutex::new(()),
        })
    }

    fn news_dir(&self) -> PathBuf {
        self.data_dir.join("news")
    }

    fn read_status_path(&self) -> PathBuf {
        self.data_dir.join("read_status")
    }

    fn history_path(&self) -> PathBuf {
        self.data_dir.join("history")
    }

    // --- snapshots ---

    /// Persist a complete article set as a new timestamp-named snapshot.
    /// Older snapshots are retained for audit; the loader targets the most
    /// recent by name ordering.
    pub async fn save_snapshot(&self, articles: &[Article]) -> anyhow::Result<PathBuf> {
        let filename = format!(
            "{SNAPSHOT_PREFIX}{}{SNAPSHOT_SUFFIX}",
            Utc::now().format("%Y%m%d_%H%M%S%3f")
        );
        let path = self.news_dir().join(filename);
        write_json_atomic(&path, &articles)
            .await
            .context("write snapshot")?;
        tracing::info!(path = %path.display(), count = articles.len(), "snapshot saved");
        Ok(path)
    }

    /// Load the most recent snapshot that parses. A corrupted file is
    /// quarantined (renamed, never deleted) and the next older one is
    /// tried; no valid snapshot at all yields an empty set, not an error.
    pub async fn load_latest_snapshot(&self) -> anyhow::Result<Vec<Article>> {
        let mut names = self.snapshot_names().await?;
        names.sort();

        for name in names.into_iter().rev() {
            let path = self.news_dir().join(&name);
            let bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!(path = %path.display(), ?err, "snapshot unreadable; skipping");
                    continue;
                }
            };
            match serde_json::from_slice::<Vec<Article>>(&bytes) {
                Ok(articles) => {
                    tracing::info!(path = %path.display(), count = articles.len(), "snapshot loaded");
                    return Ok(articles);
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "corrupted snapshot; quarantining");
                    self.quarantine(&path).await;
                }
            }
        }

        Ok(Vec::new())
    }

    async fn snapshot_names(&self) -> anyhow::Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(self.news_dir())
            .await
            .context("list news dir")?;
        while let Some(entry) = entries.next_entry().await.context("read news dir entry")? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(SNAPSHOT_PREFIX) && name.ends_with(SNAPSHOT_SUFFIX) {
                names.push(name);
            }
        }
        Ok(names)
    }

    async fn quarantine(&self, path: &Path) {
        let quarantined = PathBuf::from(format!(
            "{}.corrupted_{}",
            path.display(),
            Utc::now().format("%Y%m%d%H%M%S")
        ));
        if let Err(err) = fs::rename(path, &quarantined).await {
            tracing::error!(path = %path.display(), ?err, "failed to quarantine corrupted snapshot");
        }
    }

    // --- read status ---

    pub async fn is_read(&self, link: &str) -> bool {
        self.read_links.lock().await.contains(link)
    }

    /// The full read-link set, for bulk merging during a refresh.
    pub async fn read_links(&self) -> HashSet<String> {
        self.read_links.lock().await.clone()
    }

    /// Idempotent; persists the set atomically when it actually grows.
    pub async fn mark_read(&self, link: &str) -> anyhow::Result<()> {
        let mut links = self.read_links.lock().await;
        if !links.insert(link.to_string()) {
            return Ok(());
        }
        let mut sorted: Vec<&String> = links.iter().collect();
        sorted.sort();
        write_json_atomic(&self.read_status_path(), &sorted)
            .await
            .context("write read_status")
    }

    pub async fn clear_read_status(&self) -> anyhow::Result<()> {
        let mut links = self.read_links.lock().await;
        links.clear();
        write_json_atomic(&self.read_status_path(), &Vec::<String>::new())
            .await
            .context("write read_status")
    }

    // --- browsing history ---

    /// Record a visit: an existing entry for the same link is removed and
    /// the new one inserted at the front, then the log is truncated.
    pub async fn append_history(&self, entry: HistoryEntry) -> anyhow::Result<()> {
        let _guard = self.history_lock.lock().await;
        let mut entries = self.read_history().await?;
        entries.retain(|existing| existing.link != entry.link);
        entries.insert(0, entry);
        entries.truncate(MAX_HISTORY_ENTRIES);
        self.write_history(&entries).await
    }

    /// Entries most-recent-first.
    pub async fn load_history(&self) -> anyhow::Result<Vec<HistoryEntry>> {
        let _guard = self.history_lock.lock().await;
        self.read_history().await
    }

    pub async fn delete_history_entry(&self, link: &str) -> anyhow::Result<()> {
        let _guard = self.history_lock.lock().await;
        let mut entries = self.read_history().await?;
        let before = entries.len();
        entries.retain(|entry| entry.link != link);
        if entries.len() == before {
            return Ok(());
        }
        self.write_history(&entries).await
    }

    pub async fn clear_history(&self) -> anyhow::Result<()> {
        let _guard = self.history_lock.lock().await;
        self.write_history(&[]).await
    }

    async fn read_history(&self) -> anyhow::Result<Vec<HistoryEntry>> {
        Ok(read_json::<Vec<HistoryEntry>>(&self.history_path())
            .await
            .context("read history")?
            .unwrap_or_default())
    }

    async fn write_history(&self, entries: &[HistoryEntry]) -> anyhow::Result<()> {
        write_json_atomic(&self.history_path(), &entries)
            .await
            .context("write history")
    }
}

pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

pub(crate) async fn write_json_atomic<T: serde::Serialize>(
    path: &Path,
    value: &T,
) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
