use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context as _;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::{Mutex, broadcast};

use crate::categories::DEFAULT_CATEGORY_ID;
use crate::model::{SourceConfig, SourceKind};
use crate::presets::{BUILTIN_SCRAPER_NAME, PRESET_FEED_SOURCES, builtin_scraper_source};
use crate::store::{read_json, write_json_atomic};

/// Rejected registry mutation. Surfaced synchronously to the caller and
/// never partially applied.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("a source named {0:?} already exists")]
    DuplicateName(String),
    #[error("a feed source with endpoint {0:?} already exists")]
    DuplicateEndpoint(String),
    #[error("source name must not be empty")]
    EmptyName,
    #[error("feed sources require a non-empty endpoint")]
    EmptyEndpoint,
    #[error("endpoint {0:?} is not a valid http(s) url")]
    InvalidEndpoint(String),
    #[error("built-in source {0:?} cannot be removed; disable it instead")]
    BuiltinRemoval(String),
    #[error("no source named {0:?}")]
    UnknownSource(String),
}

/// Recognized fields for [`SourceRegistry::update`]. Absent fields are left
/// unchanged; optional fields cannot be cleared through a patch.
#[derive(Debug, Clone, Default)]
pub struct SourcePatch {
    pub name: Option<String>,
    pub kind: Option<SourceKind>,
    pub endpoint: Option<String>,
    pub category_id: Option<String>,
    pub enabled: Option<bool>,
    pub notes: Option<String>,
    pub selector_overrides: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone)]
pub enum RegistryEvent {
    SourcesChanged,
}

/// Single source of truth for configured sources. Merges the persisted
/// entries, the preset catalog and the synthesized built-in scraper at load
/// time, then persists the merged result.
pub struct SourceRegistry {
    path: PathBuf,
    sources: Mutex<Vec<SourceConfig>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl SourceRegistry {
    /// Load the registry from `path` (a JSON file; missing is fine).
    pub async fn load(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let persisted: Vec<SourceConfig> = read_json(&path)
            .await
            .with_context(|| format!("read sources file: {}", path.display()))?
            .unwrap_or_default();

        let merged = merge_layers(persisted);
        write_json_atomic(&path, &merged)
            .await
            .context("persist merged sources")?;
        tracing::info!(count = merged.len(), path = %path.display(), "source registry loaded");

        let (events, _) = broadcast::channel(16);
        Ok(Self {
            path,
            sources: Mutex::new(merged),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Defensive copy; mutating the returned value never touches registry
    /// state.
    pub async fn list(&self) -> Vec<SourceConfig> {
        self.sources.lock().await.clone()
    }

    pub async fn get(&self, name: &str) -> Option<SourceConfig> {
        self.sources
            .lock()
            .await
            .iter()
            .find(|s| s.name == name)
            .cloned()
    }

    pub async fn add(&self, mut source: SourceConfig) -> anyhow::Result<()> {
        source.name = source.name.trim().to_string();
        if source.name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        if source.kind == SourceKind::Feed {
            let endpoint = source
                .endpoint
                .as_deref()
                .map(str::trim)
                .unwrap_or_default();
            if endpoint.is_empty() {
                return Err(ValidationError::EmptyEndpoint.into());
            }
            validate_endpoint(endpoint)?;
            source.endpoint = Some(endpoint.to_string());
        }
        if source.category_id.trim().is_empty() {
            source.category_id = DEFAULT_CATEGORY_ID.to_string();
        }
        // Anything added at runtime is a user entry, whatever the caller set.
        source.is_builtin = false;

        let mut sources = self.sources.lock().await;
        if sources.iter().any(|s| s.name == source.name) {
            return Err(ValidationError::DuplicateName(source.name).into());
        }
        if source.kind == SourceKind::Feed
            && sources
                .iter()
                .any(|s| s.kind == SourceKind::Feed && s.endpoint == source.endpoint)
        {
            return Err(ValidationError::DuplicateEndpoint(
                source.endpoint.clone().unwrap_or_default(),
            )
            .into());
        }

        tracing::info!(name = %source.name, kind = %source.kind, "source added");
        sources.push(source);
        sort_sources(&mut sources);
        self.persist_and_notify(&sources).await
    }

    pub async fn remove(&self, name: &str) -> anyhow::Result<()> {
        let mut sources = self.sources.lock().await;
        let Some(index) = sources.iter().position(|s| s.name == name) else {
            return Err(ValidationError::UnknownSource(name.to_string()).into());
        };
        if sources[index].is_builtin {
            return Err(ValidationError::BuiltinRemoval(name.to_string()).into());
        }
        sources.remove(index);
        tracing::info!(name, "source removed");
        self.persist_and_notify(&sources).await
    }

    /// Apply a patch to one source. A no-op patch triggers neither
    /// persistence nor notification.
    pub async fn update(&self, name: &str, patch: SourcePatch) -> anyhow::Result<()> {
        let mut sources = self.sources.lock().await;
        let Some(index) = sources.iter().position(|s| s.name == name) else {
            return Err(ValidationError::UnknownSource(name.to_string()).into());
        };

        let mut updated = sources[index].clone();
        apply_patch(&mut updated, patch, &sources, index)?;

        if updated == sources[index] {
            tracing::debug!(name, "update is a no-op");
            return Ok(());
        }

        tracing::info!(name, new_name = %updated.name, "source updated");
        sources[index] = updated;
        sort_sources(&mut sources);
        self.persist_and_notify(&sources).await
    }

    /// Health bookkeeping after a successful collection.
    pub async fn record_success(&self, name: &str) -> anyhow::Result<()> {
        let mut sources = self.sources.lock().await;
        let Some(source) = sources.iter_mut().find(|s| s.name == name) else {
            return Err(ValidationError::UnknownSource(name.to_string()).into());
        };
        source.last_success_at = Some(Utc::now());
        source.consecutive_error_count = 0;
        source.last_error = None;
        self.persist_and_notify(&sources).await
    }

    /// Health bookkeeping after a failed collection.
    pub async fn record_failure(&self, name: &str, message: &str) -> anyhow::Result<()> {
        let mut sources = self.sources.lock().await;
        let Some(source) = sources.iter_mut().find(|s| s.name == name) else {
            return Err(ValidationError::UnknownSource(name.to_string()).into());
        };
        source.consecutive_error_count += 1;
        source.last_error = Some(message.to_string());
        self.persist_and_notify(&sources).await
    }

    async fn persist_and_notify(&self, sources: &[SourceConfig]) -> anyhow::Result<()> {
        write_json_atomic(&self.path, &sources)
            .await
            .context("persist sources")?;
        let _ = self.events.send(RegistryEvent::SourcesChanged);
        Ok(())
    }
}

/// Layered merge at load time: persisted entries win over the preset
/// catalog on either name or endpoint, and the built-in scraper is only
/// synthesized when nothing claims its reserved name.
fn merge_layers(persisted: Vec<SourceConfig>) -> Vec<SourceConfig> {
    let mut merged: Vec<SourceConfig> = Vec::new();
    for source in persisted {
        if merged.iter().any(|s| s.name == source.name) {
            tracing::warn!(name = %source.name, "duplicate persisted source; ignoring");
            continue;
        }
        merged.push(source);
    }

    for preset in PRESET_FEED_SOURCES {
        let collides = merged.iter().any(|s| {
            s.name == preset.name
                || (s.kind == SourceKind::Feed && s.endpoint.as_deref() == Some(preset.endpoint))
        });
        if collides {
            tracing::debug!(name = preset.name, "preset collides with persisted entry; skipped");
            continue;
        }
        merged.push(preset.to_source());
    }

    if !merged.iter().any(|s| s.name == BUILTIN_SCRAPER_NAME) {
        merged.push(builtin_scraper_source());
    }

    sort_sources(&mut merged);
    merged
}

fn validate_endpoint(endpoint: &str) -> Result<(), ValidationError> {
    let invalid = || ValidationError::InvalidEndpoint(endpoint.to_string());
    let parsed = url::Url::parse(endpoint).map_err(|_| invalid())?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(invalid());
    }
    Ok(())
}

fn sort_sources(sources: &mut [SourceConfig]) {
    sources.sort_by(|a, b| (a.kind.as_str(), &a.name).cmp(&(b.kind.as_str(), &b.name)));
}

fn apply_patch(
    source: &mut SourceConfig,
    patch: SourcePatch,
    all: &[SourceConfig],
    own_index: usize,
) -> Result<(), ValidationError> {
    if let Some(new_name) = patch.name {
        let new_name = new_name.trim().to_string();
        if new_name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if all
            .iter()
            .enumerate()
            .any(|(i, s)| i != own_index && s.name == new_name)
        {
            return Err(ValidationError::DuplicateName(new_name));
        }
        source.name = new_name;
    }

    match patch.kind {
        Some(_) if source.is_builtin => {
            // Protected on built-ins; ignored rather than rejected.
            tracing::warn!(name = %source.name, "ignoring kind change on built-in source");
        }
        Some(kind) => source.kind = kind,
        None => {}
    }

    match patch.endpoint {
        Some(_) if source.is_builtin => {
            tracing::warn!(name = %source.name, "ignoring endpoint change on built-in source");
        }
        Some(endpoint) => {
            let endpoint = endpoint.trim().to_string();
            if source.kind == SourceKind::Feed {
                if endpoint.is_empty() {
                    return Err(ValidationError::EmptyEndpoint);
                }
                validate_endpoint(&endpoint)?;
                if all.iter().enumerate().any(|(i, s)| {
                    i != own_index
                        && s.kind == SourceKind::Feed
                        && s.endpoint.as_deref() == Some(endpoint.as_str())
                }) {
                    return Err(ValidationError::DuplicateEndpoint(endpoint));
                }
            }
            source.endpoint = if endpoint.is_empty() {
                None
            } else {
                Some(endpoint)
            };
        }
        None => {}
    }

    if let Some(category_id) = patch.category_id {
        let category_id = category_id.trim();
        source.category_id = if category_id.is_empty() {
            DEFAULT_CATEGORY_ID.to_string()
        } else {
            category_id.to_string()
        };
    }
    if let Some(enabled) = patch.enabled {
        source.enabled = enabled;
    }
    if let Some(notes) = patch.notes {
        source.notes = Some(notes);
    }
    if let Some(overrides) = patch.selector_overrides {
        source.selector_overrides = overrides;
    }

    Ok(())
}
