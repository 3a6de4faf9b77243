use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};

use crate::collect::{CancelFlag, Collector};
use crate::model::{RawRecord, SourceConfig};

const FEED_USER_AGENT: &str = "newswire/0.1";

/// Adapter for feed-kind sources: fetches the endpoint over HTTP and maps
/// each channel item to a raw record. One malformed item never fails the
/// fetch; a network or parse failure of the whole feed does.
pub struct FeedCollector {
    client: reqwest::Client,
}

impl FeedCollector {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build feed http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Collector for FeedCollector {
    async fn collect(
        &self,
        source: &SourceConfig,
        cancel: &CancelFlag,
    ) -> anyhow::Result<Vec<RawRecord>> {
        let endpoint = source
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| anyhow::anyhow!("feed source {:?} has no endpoint", source.name))?;

        let response = self
            .client
            .get(endpoint)
            .header(USER_AGENT, FEED_USER_AGENT)
            .header(ACCEPT, "application/rss+xml, application/xml;q=0.9, */*;q=0.8")
            .send()
            .await
            .with_context(|| format!("GET {endpoint}"))?
            .error_for_status()
            .with_context(|| format!("GET {endpoint}"))?;

        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("read body of {endpoint}"))?;
        let channel = rss::Channel::read_from(&bytes[..])
            .with_context(|| format!("parse feed from {endpoint}"))?;

        let mut records = Vec::new();
        for item in channel.items() {
            // Partial results as soon as cancellation is observed.
            if cancel.is_cancelled() {
                break;
            }
            match map_item(item) {
                Some(record) => records.push(record),
                None => {
                    tracing::debug!(
                        source = %source.name,
                        title = item.title().unwrap_or("<untitled>"),
                        "feed item without link; skipped"
                    );
                }
            }
        }

        Ok(records)
    }
}

fn map_item(item: &rss::Item) -> Option<RawRecord> {
    let link = item
        .link()
        .map(str::trim)
        .filter(|l| !l.is_empty())?
        .to_string();

    let mut record = RawRecord::new();
    record.insert(
        "title".into(),
        item.title().unwrap_or("(untitled)").trim().into(),
    );
    record.insert("link".into(), link.into());
    if let Some(description) = item.description() {
        record.insert("summary".into(), description.into());
    }
    if let Some(content) = item.content() {
        record.insert("content".into(), content.into());
    }
    if let Some(pub_date) = item.pub_date() {
        // Kept in source-native form; the merge pipeline parses it.
        record.insert("published_at".into(), pub_date.into());
    }
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_item_requires_a_link() {
        let mut item = rss::Item::default();
        item.set_title("No link".to_string());
        assert!(map_item(&item).is_none());

        item.set_link("https://example.com/a".to_string());
        item.set_pub_date("Sat, 01 Mar 2025 12:30:00 GMT".to_string());
        let record = map_item(&item).unwrap();
        assert_eq!(record["link"], "https://example.com/a");
        assert_eq!(record["title"], "No link");
        assert_eq!(record["published_at"], "Sat, 01 Mar 2025 12:30:00 GMT");
    }
}
