use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasEntry {
    pub number: u32,
    pub name: String,
}

/// Read-only lookup tables loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct MappingTables {
    aliases: BTreeMap<String, AliasEntry>,
    collections: BTreeMap<String, String>,
}

impl MappingTables {
    pub fn new(
        aliases: BTreeMap<String, AliasEntry>,
        collections: BTreeMap<String, String>,
    ) -> Self {
        Self {
            aliases,
            collections,
        }
    }

    /// Loads both tables. A missing or unreadable table is logged and left empty.
    pub fn load(alias_path: &Path, collection_path: &Path) -> Self {
        Self {
            aliases: load_table(alias_path, "alias"),
            collections: load_table(collection_path, "collection"),
        }
    }

    pub fn alias(&self, code: &str) -> Option<&AliasEntry> {
        self.aliases.get(code)
    }

    pub fn collection_label(&self, id: &str) -> &str {
        self.collections
            .get(id)
            .map(String::as_str)
            .unwrap_or("unknown")
    }

    /// One `code: number (name)` line per alias.
    pub fn describe_aliases(&self) -> String {
        self.aliases
            .iter()
            .map(|(code, entry)| format!("{code}: {} ({})", entry.number, entry.name))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn load_table<T: for<'de> Deserialize<'de>>(path: &Path, kind: &str) -> BTreeMap<String, T> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "{kind} table unavailable");
            return BTreeMap::new();
        }
    };
    match serde_json::from_str(&content) {
        Ok(table) => table,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "{kind} table is not valid JSON");
            BTreeMap::new()
        }
    }
}
