use std::collections::HashMap;

/// Display value used when a category id cannot be resolved.
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Category id that registry operations coerce blank ids to.
pub const DEFAULT_CATEGORY_ID: &str = "uncategorized";

const STANDARD_CATEGORIES: &[(&str, &str)] = &[
    ("general", "General"),
    ("international", "International"),
    ("technology", "Technology"),
    ("business", "Business"),
    ("politics", "Politics"),
    ("science", "Science"),
    ("sports", "Sports"),
    ("entertainment", "Entertainment"),
    ("health", "Health"),
    ("culture", "Culture"),
];

/// Read-only mapping from category ids to display names.
#[derive(Debug, Clone)]
pub struct CategoryCatalog {
    names: HashMap<String, String>,
}

impl Default for CategoryCatalog {
    fn default() -> Self {
        Self::with_entries(
            STANDARD_CATEGORIES
                .iter()
                .map(|(id, name)| ((*id).to_string(), (*name).to_string())),
        )
    }
}

impl CategoryCatalog {
    pub fn with_entries(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            names: entries.into_iter().collect(),
        }
    }

    /// Resolve a category id to its display name. Unknown or blank ids map
    /// to [`UNCATEGORIZED`] rather than failing.
    pub fn resolve(&self, category_id: &str) -> &str {
        self.names
            .get(category_id.trim())
            .map(String::as_str)
            .unwrap_or(UNCATEGORIZED)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(String::as_str)
    }
}
