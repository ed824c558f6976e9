//! Repository documents and the merged item cache.
//!
//! A repository is a JSON index (`Meta` + `Files`) reachable over any
//! transport. The configured repositories live in `Config/Repositories.json`,
//! an ordered map of id to `{ Name, URL }`.

mod cache;
mod store;

pub use cache::{RepositoryCache, Snapshot};
pub use store::{CacheFile, CacheLock, CacheStore, DEFAULT_TTL, SEARCH_INDEX, SNAPSHOT, now_secs};

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// One downloadable file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Key of the item in its repository's `Files` map
    #[serde(default)]
    pub id: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "URL", default)]
    pub url: String,
    #[serde(rename = "Filename", default)]
    pub filename: String,
    /// Repository the item was merged from
    #[serde(rename = "Repository", default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// Everything else (ShortName, Series, Category, Developer, ...)
    #[serde(flatten)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Item {
    /// A metadata field as text; arrays are joined with spaces.
    pub fn field_text(&self, field: &str) -> Option<String> {
        match self.metadata.get(field)? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Array(values) => Some(
                values
                    .iter()
                    .map(|v| match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryMeta {
    #[serde(default)]
    pub id: String,
    #[serde(default, alias = "Name")]
    pub name: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A repository index document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryIndex {
    #[serde(rename = "Meta", default)]
    pub meta: RepositoryMeta,
    #[serde(rename = "Files", default)]
    pub files: BTreeMap<String, Item>,
}

impl RepositoryIndex {
    /// Items with their `id` filled in from the map key.
    pub fn into_items(self) -> impl Iterator<Item = Item> {
        self.files.into_iter().map(|(id, mut item)| {
            item.id = id;
            item
        })
    }
}

/// A configured repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryEntry {
    #[serde(rename = "Name", alias = "name", default)]
    pub name: String,
    #[serde(rename = "URL", alias = "url")]
    pub url: String,
}

/// Configured repositories, in the order they are merged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepositoryList {
    entries: Vec<(String, RepositoryEntry)>,
}

impl RepositoryList {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, id: &str) -> Option<&RepositoryEntry> {
        self.entries.iter().find(|(k, _)| k == id).map(|(_, v)| v)
    }

    /// Replace in place when `id` exists, append otherwise.
    pub fn insert(&mut self, id: String, entry: RepositoryEntry) {
        match self.entries.iter_mut().find(|(k, _)| *k == id) {
            Some(slot) => slot.1 = entry,
            None => self.entries.push((id, entry)),
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<RepositoryEntry> {
        let pos = self.entries.iter().position(|(k, _)| k == id)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RepositoryEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl Serialize for RepositoryList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (id, entry) in &self.entries {
            map.serialize_entry(id, entry)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RepositoryList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ListVisitor;

        impl<'de> Visitor<'de> for ListVisitor {
            type Value = RepositoryList;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of repository id to { Name, URL }")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut list = RepositoryList::default();
                // Document order is merge order
                while let Some((id, entry)) = access.next_entry::<String, RepositoryEntry>()? {
                    list.insert(id, entry);
                }
                Ok(list)
            }
        }

        deserializer.deserialize_map(ListVisitor)
    }
}
