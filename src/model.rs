use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::categories::{DEFAULT_CATEGORY_ID, UNCATEGORIZED};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Feed,
    Scraper,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Feed => "feed",
            SourceKind::Scraper => "scraper",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured origin of articles.
///
/// `name` is unique across the registry; for feed sources `endpoint` is
/// unique among feed sources. Built-in entries can be disabled but never
/// removed, and their kind/endpoint never change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_category_id")]
    pub category_id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub is_builtin: bool,
    #[serde(default)]
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub consecutive_error_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Opaque selector map passed through to scraper collectors.
    #[serde(default)]
    pub selector_overrides: BTreeMap<String, String>,
}

fn default_category_id() -> String {
    DEFAULT_CATEGORY_ID.to_string()
}

fn default_enabled() -> bool {
    true
}

impl SourceConfig {
    pub fn feed(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        category_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: SourceKind::Feed,
            endpoint: Some(endpoint.into()),
            category_id: category_id.into(),
            enabled: true,
            is_builtin: false,
            last_success_at: None,
            consecutive_error_count: 0,
            last_error: None,
            notes: None,
            selector_overrides: BTreeMap::new(),
        }
    }

    pub fn scraper(name: impl Into<String>, category_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SourceKind::Scraper,
            endpoint: None,
            category_id: category_id.into(),
            enabled: true,
            is_builtin: false,
            last_success_at: None,
            consecutive_error_count: 0,
            last_error: None,
            notes: None,
            selector_overrides: BTreeMap::new(),
        }
    }
}

/// Untyped record as returned by a collector. External data is schema-loose;
/// only the merge pipeline turns it into an [`Article`].
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// Borrow a string field from a raw record, if present and non-empty.
pub fn raw_str<'a>(record: &'a RawRecord, key: &str) -> Option<&'a str> {
    record
        .get(key)
        .and_then(|value| value.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// A normalized news record. `link` is the global identity key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    pub title: String,
    pub link: String,
    pub source_name: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default = "default_category")]
    pub category: String,
    /// Absent from the pre-refresh cache; transient per refresh.
    #[serde(default)]
    pub is_new: bool,
    #[serde(default)]
    pub is_read: bool,
    /// Original source payload, retained for diagnostics.
    #[serde(default)]
    pub raw: RawRecord,
}

fn default_category() -> String {
    UNCATEGORIZED.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub link: String,
    pub title: String,
    pub source_name: String,
    pub visited_at: DateTime<Utc>,
}

/// Result of one orchestration pass. Reported to observers, never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshOutcome {
    pub succeeded_sources: Vec<String>,
    pub failed_sources: BTreeMap<String, String>,
    /// Enabled sources whose kind had no registered collector. Not failures;
    /// their health counters are left untouched.
    pub skipped_sources: Vec<String>,
    pub article_count: usize,
    pub cancelled: bool,
    pub persist_error: Option<String>,
}

impl RefreshOutcome {
    /// A pass counts as successful unless it was cancelled or every source
    /// failed while at least one was attempted.
    pub fn is_success(&self) -> bool {
        !self.cancelled && (self.succeeded_sources.is_empty() == self.failed_sources.is_empty()
            || !self.succeeded_sources.is_empty())
    }

    pub fn summary(&self) -> String {
        if self.cancelled {
            return "refresh cancelled".to_string();
        }
        let mut message = format!(
            "refresh complete: {} articles from {} sources",
            self.article_count,
            self.succeeded_sources.len()
        );
        if !self.failed_sources.is_empty() {
            let failing = self
                .failed_sources
                .keys()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            message.push_str(&format!(" ({} failed: {failing})", self.failed_sources.len()));
        }
        if !self.skipped_sources.is_empty() {
            message.push_str(&format!(
                " ({} skipped, no collector)",
                self.skipped_sources.len()
            ));
        }
        if let Some(err) = &self.persist_error {
            message.push_str(&format!("; snapshot not persisted: {err}"));
        }
        message
    }
}

/// Typed notifications published by the orchestrator during a pass.
#[derive(Debug, Clone)]
pub enum RefreshEvent {
    Started,
    Progress { done: usize, total: usize },
    Completed(RefreshOutcome),
}
