use crate::model::SourceConfig;

/// Reserved name of the scraper source shipped with the system. A persisted
/// entry claiming this name fully replaces the synthesized one.
pub const BUILTIN_SCRAPER_NAME: &str = "The Paper";
pub const BUILTIN_SCRAPER_CATEGORY_ID: &str = "general";

pub struct PresetSource {
    pub name: &'static str,
    pub endpoint: &'static str,
    pub category_id: &'static str,
}

/// Optional feed sources merged at registry load; skipped on name or
/// endpoint collision with already-persisted entries.
pub const PRESET_FEED_SOURCES: &[PresetSource] = &[
    PresetSource {
        name: "NYT World",
        endpoint: "https://rss.nytimes.com/services/xml/rss/nyt/World.xml",
        category_id: "international",
    },
    PresetSource {
        name: "Washington Post World",
        endpoint: "https://feeds.washingtonpost.com/rss/world",
        category_id: "international",
    },
    PresetSource {
        name: "Guardian World",
        endpoint: "https://www.theguardian.com/world/rss",
        category_id: "international",
    },
    PresetSource {
        name: "BBC News",
        endpoint: "https://feeds.bbci.co.uk/news/rss.xml",
        category_id: "general",
    },
    PresetSource {
        name: "Ars Technica",
        endpoint: "https://feeds.arstechnica.com/arstechnica/index",
        category_id: "technology",
    },
    PresetSource {
        name: "Nature News",
        endpoint: "https://www.nature.com/nature.rss",
        category_id: "science",
    },
];

impl PresetSource {
    pub fn to_source(&self) -> SourceConfig {
        let mut source = SourceConfig::feed(self.name, self.endpoint, self.category_id);
        source.is_builtin = true;
        source
    }
}

/// The built-in scraper source, synthesized only when no persisted entry
/// claims [`BUILTIN_SCRAPER_NAME`].
pub fn builtin_scraper_source() -> SourceConfig {
    let mut source = SourceConfig::scraper(BUILTIN_SCRAPER_NAME, BUILTIN_SCRAPER_CATEGORY_ID);
    source.is_builtin = true;
    source
}
