use super::store::{CacheStore, DEFAULT_TTL, SEARCH_INDEX, SNAPSHOT};
use super::{Item, RepositoryEntry, RepositoryIndex, RepositoryList};
use crate::config::Config;
use crate::error::RepositoryError;
use crate::fs_utils::write_atomic;
use crate::output;
use crate::search::{SearchHit, SearchIndex};
use crate::transport::Fetch;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Merged items of every configured repository, keyed by item id.
pub type Snapshot = BTreeMap<String, Item>;

/// Fetches, merges and caches repository indices.
pub struct RepositoryCache<'a> {
    fetcher: &'a dyn Fetch,
    list_path: PathBuf,
    store: CacheStore,
    ttl: Duration,
}

impl<'a> RepositoryCache<'a> {
    pub fn new(config: &Config, fetcher: &'a dyn Fetch) -> Self {
        Self::with_paths(
            &config.paths.repositories_file(),
            &config.paths.cache_dir,
            fetcher,
        )
    }

    pub fn with_paths(list_path: &Path, cache_dir: &Path, fetcher: &'a dyn Fetch) -> Self {
        Self {
            fetcher,
            list_path: list_path.to_path_buf(),
            store: CacheStore::new(cache_dir),
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// The configured repositories, in merge order.
    pub fn repositories(&self) -> Result<RepositoryList, RepositoryError> {
        let content = match std::fs::read(&self.list_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RepositoryError::ListMissing(self.list_path.clone()));
            }
            Err(source) => {
                return Err(RepositoryError::Io {
                    path: self.list_path.clone(),
                    source,
                });
            }
        };
        serde_json::from_slice(&content).map_err(|source| RepositoryError::Parse {
            what: self.list_path.display().to_string(),
            source,
        })
    }

    fn save_repositories(&self, list: &RepositoryList) -> Result<(), RepositoryError> {
        let json = serde_json::to_vec_pretty(list).map_err(|source| RepositoryError::Parse {
            what: self.list_path.display().to_string(),
            source,
        })?;
        write_atomic(&self.list_path, &json).map_err(|source| RepositoryError::Io {
            path: self.list_path.clone(),
            source,
        })
    }

    fn fetch_index(&self, url: &str) -> Result<RepositoryIndex, RepositoryError> {
        let body = self
            .fetcher
            .fetch_bytes(url)
            .map_err(|source| RepositoryError::Fetch {
                url: url.to_string(),
                source,
            })?;
        serde_json::from_slice(&body).map_err(|source| RepositoryError::Parse {
            what: format!("repository index {}", url),
            source,
        })
    }

    /// Fetch every repository, merge, persist and rebuild the search index.
    ///
    /// Repositories are merged in list order, so a later repository wins an
    /// id collision. Any single failure aborts before anything is written.
    pub fn refresh(&self) -> Result<Snapshot, RepositoryError> {
        let repositories = self.repositories()?;
        output::action("Refreshing repositories");

        let mut snapshot = Snapshot::new();
        for (repo_id, entry) in repositories.iter() {
            output::sub_action(&format!("{} ({})", repo_id, entry.url));
            let index = self.fetch_index(&entry.url)?;
            for mut item in index.into_items() {
                item.repository = Some(repo_id.to_string());
                snapshot.insert(item.id.clone(), item);
            }
        }

        let index = SearchIndex::build(&snapshot);
        let _lock = self.store.lock()?;
        self.store.save(&SNAPSHOT, &snapshot)?;
        self.store.save(&SEARCH_INDEX, &index)?;

        output::detail(&format!(
            "{} items from {} repositories",
            snapshot.len(),
            repositories.len()
        ));
        Ok(snapshot)
    }

    /// The cached snapshot, refreshed first when absent or stale.
    pub fn get(&self) -> Result<Snapshot, RepositoryError> {
        if self.store.is_fresh(&SNAPSHOT, self.ttl) {
            match self.store.load::<Snapshot>(&SNAPSHOT) {
                Ok(Some(snapshot)) => return Ok(snapshot),
                Ok(None) => {}
                Err(e) => output::warning(&format!("discarding cached snapshot: {}", e)),
            }
        }
        self.refresh()
    }

    pub fn item_ids(&self) -> Result<Vec<String>, RepositoryError> {
        Ok(self.get()?.into_keys().collect())
    }

    /// Fetch one repository's items directly, bypassing the cache.
    pub fn items_of(&self, repo_id: &str) -> Result<Snapshot, RepositoryError> {
        let repositories = self.repositories()?;
        let entry = repositories
            .get(repo_id)
            .ok_or_else(|| RepositoryError::NotFound(repo_id.to_string()))?;

        let index = self.fetch_index(&entry.url)?;
        Ok(index
            .into_items()
            .map(|mut item| {
                item.repository = Some(repo_id.to_string());
                (item.id.clone(), item)
            })
            .collect())
    }

    /// Validate and register the repository at `url`, then refresh.
    ///
    /// Returns the repository's declared id and its list entry.
    pub fn add_repository(&self, url: &str) -> Result<(String, RepositoryEntry), RepositoryError> {
        let mut repositories = match self.repositories() {
            Ok(list) => list,
            Err(RepositoryError::ListMissing(_)) => RepositoryList::default(),
            Err(e) => return Err(e),
        };

        let index = self.fetch_index(url)?;
        let id = index.meta.id.trim().to_string();
        if id.is_empty() {
            return Err(RepositoryError::InvalidIndex {
                url: url.to_string(),
                reason: "Meta.id is missing".to_string(),
            });
        }
        let entry = RepositoryEntry {
            name: index.meta.name,
            url: url.to_string(),
        };

        repositories.insert(id.clone(), entry.clone());
        self.save_repositories(&repositories)?;
        self.refresh()?;
        Ok((id, entry))
    }

    pub fn remove_repository(&self, id: &str) -> Result<RepositoryEntry, RepositoryError> {
        let mut repositories = self.repositories()?;
        let removed = repositories
            .remove(id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        self.save_repositories(&repositories)?;
        self.refresh()?;
        Ok(removed)
    }

    /// The cached search index, rebuilt from [`get`](Self::get) when stale.
    pub fn search_index(&self) -> Result<SearchIndex, RepositoryError> {
        if let Some(index) = self.fresh_search_index() {
            return Ok(index);
        }
        let snapshot = self.get()?;
        // get() may have refreshed, which rebuilds the index as well
        if let Some(index) = self.fresh_search_index() {
            return Ok(index);
        }

        let index = SearchIndex::build(&snapshot);
        let _lock = self.store.lock()?;
        self.store.save(&SEARCH_INDEX, &index)?;
        Ok(index)
    }

    fn fresh_search_index(&self) -> Option<SearchIndex> {
        if !self.store.is_fresh(&SEARCH_INDEX, self.ttl) {
            return None;
        }
        match self.store.load::<SearchIndex>(&SEARCH_INDEX) {
            Ok(Some(index)) if index.is_current() => Some(index),
            Ok(_) => None,
            Err(e) => {
                output::warning(&format!("discarding cached search index: {}", e));
                None
            }
        }
    }

    pub fn search(&self, query: &str) -> Result<Vec<SearchHit>, RepositoryError> {
        Ok(self.search_index()?.query(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// In-memory fetcher that records every URL requested.
    #[derive(Default)]
    struct FakeFetch {
        bodies: HashMap<String, String>,
        calls: RefCell<Vec<String>>,
    }

    impl FakeFetch {
        fn with(mut self, url: &str, body: &str) -> Self {
            self.bodies.insert(url.to_string(), body.to_string());
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    impl Fetch for FakeFetch {
        fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, TransportError> {
            self.calls.borrow_mut().push(url.to_string());
            self.bodies
                .get(url)
                .map(|b| b.as_bytes().to_vec())
                .ok_or_else(|| TransportError::Connect {
                    url: url.to_string(),
                    reason: "connection refused".to_string(),
                })
        }
    }

    const R1: &str = r#"{ "Meta": { "id": "r1", "name": "One" },
        "Files": { "f1": { "Name": "X", "URL": "http://h/x", "Filename": "x.bin" } } }"#;
    const R2: &str = r#"{ "Meta": { "id": "r2", "name": "Two" },
        "Files": { "f1": { "Name": "X from two", "URL": "http://h2/x", "Filename": "x2.bin" },
                   "f2": { "Name": "Y", "URL": "http://h2/y", "Filename": "y.bin" } } }"#;

    fn write_list(dir: &Path, json: &str) -> PathBuf {
        let path = dir.join("Repositories.json");
        std::fs::write(&path, json).unwrap();
        path
    }

    #[test]
    fn test_missing_list() {
        let dir = TempDir::new().unwrap();
        let fetch = FakeFetch::default();
        let cache = RepositoryCache::with_paths(
            &dir.path().join("Repositories.json"),
            dir.path(),
            &fetch,
        );
        assert!(matches!(cache.refresh(), Err(RepositoryError::ListMissing(_))));
        assert!(matches!(cache.get(), Err(RepositoryError::ListMissing(_))));
    }

    #[test]
    fn test_later_repository_wins() {
        let dir = TempDir::new().unwrap();
        let list = write_list(
            dir.path(),
            r#"{ "r1": { "Name": "One", "URL": "mem://r1" },
                 "r2": { "Name": "Two", "URL": "mem://r2" } }"#,
        );
        let fetch = FakeFetch::default().with("mem://r1", R1).with("mem://r2", R2);
        let cache = RepositoryCache::with_paths(&list, &dir.path().join("Cache"), &fetch);

        let snapshot = cache.refresh().unwrap();
        assert_eq!(snapshot["f1"].name, "X from two");
        assert_eq!(snapshot["f1"].repository.as_deref(), Some("r2"));
        assert_eq!(snapshot.len(), 2);
        assert_eq!(fetch.calls(), vec!["mem://r1", "mem://r2"]);
    }

    #[test]
    fn test_failed_repository_aborts_without_writing() {
        let dir = TempDir::new().unwrap();
        let list = write_list(
            dir.path(),
            r#"{ "r1": { "URL": "mem://r1" }, "down": { "URL": "mem://down" } }"#,
        );
        let fetch = FakeFetch::default().with("mem://r1", R1);
        let cache = RepositoryCache::with_paths(&list, &dir.path().join("Cache"), &fetch);

        let err = cache.refresh().unwrap_err();
        assert!(matches!(err, RepositoryError::Fetch { ref url, .. } if url == "mem://down"));
        assert!(!cache.store().path(SNAPSHOT.data).exists());
    }

    #[test]
    fn test_get_serves_fresh_cache_without_fetching() {
        let dir = TempDir::new().unwrap();
        let list = write_list(dir.path(), r#"{ "r1": { "URL": "mem://r1" } }"#);
        let fetch = FakeFetch::default().with("mem://r1", R1);
        let cache = RepositoryCache::with_paths(&list, &dir.path().join("Cache"), &fetch);

        let first = cache.get().unwrap();
        let second = cache.get().unwrap();
        assert_eq!(first, second);
        assert_eq!(fetch.calls().len(), 1);
    }

    #[test]
    fn test_stale_cache_refetches_each_repository_once() {
        let dir = TempDir::new().unwrap();
        let list = write_list(
            dir.path(),
            r#"{ "r1": { "URL": "mem://r1" }, "r2": { "URL": "mem://r2" } }"#,
        );
        let fetch = FakeFetch::default().with("mem://r1", R1).with("mem://r2", R2);
        let cache = RepositoryCache::with_paths(&list, &dir.path().join("Cache"), &fetch);
        cache.refresh().unwrap();

        std::fs::write(cache.store().path(SNAPSHOT.stamp), "0").unwrap();
        cache.get().unwrap();
        assert_eq!(
            fetch.calls(),
            vec!["mem://r1", "mem://r2", "mem://r1", "mem://r2"]
        );
    }

    #[test]
    fn test_items_of_single_repository() {
        let dir = TempDir::new().unwrap();
        let list = write_list(
            dir.path(),
            r#"{ "r1": { "URL": "mem://r1" }, "r2": { "URL": "mem://r2" } }"#,
        );
        let fetch = FakeFetch::default().with("mem://r1", R1).with("mem://r2", R2);
        let cache = RepositoryCache::with_paths(&list, &dir.path().join("Cache"), &fetch);

        let items = cache.items_of("r1").unwrap();
        assert_eq!(items.keys().collect::<Vec<_>>(), vec!["f1"]);
        assert_eq!(items["f1"].name, "X");
        assert!(matches!(
            cache.items_of("nope"),
            Err(RepositoryError::NotFound(ref id)) if id == "nope"
        ));
    }

    #[test]
    fn test_add_and_remove_repository() {
        let dir = TempDir::new().unwrap();
        let list_path = dir.path().join("Config").join("Repositories.json");
        let fetch = FakeFetch::default().with("mem://r1", R1).with("mem://r2", R2);
        let cache = RepositoryCache::with_paths(&list_path, &dir.path().join("Cache"), &fetch);

        let (id, entry) = cache.add_repository("mem://r1").unwrap();
        assert_eq!(id, "r1");
        assert_eq!(entry.name, "One");
        cache.add_repository("mem://r2").unwrap();

        let ids: Vec<String> = cache
            .repositories()
            .unwrap()
            .iter()
            .map(|(id, _)| id.to_string())
            .collect();
        assert_eq!(ids, vec!["r1", "r2"]);
        assert_eq!(cache.item_ids().unwrap(), vec!["f1", "f2"]);

        cache.remove_repository("r2").unwrap();
        assert_eq!(cache.item_ids().unwrap(), vec!["f1"]);
        assert!(matches!(
            cache.remove_repository("r2"),
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[test]
    fn test_add_repository_without_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        let list_path = dir.path().join("Repositories.json");
        let fetch = FakeFetch::default().with("mem://anon", r#"{ "Files": {} }"#);
        let cache = RepositoryCache::with_paths(&list_path, &dir.path().join("Cache"), &fetch);

        assert!(matches!(
            cache.add_repository("mem://anon"),
            Err(RepositoryError::InvalidIndex { .. })
        ));
        assert!(!list_path.exists());
    }

    #[test]
    fn test_search_rebuilds_stale_index_from_cached_snapshot() {
        let dir = TempDir::new().unwrap();
        let list = write_list(dir.path(), r#"{ "r1": { "URL": "mem://r1" } }"#);
        let fetch = FakeFetch::default().with("mem://r1", R1);
        let cache = RepositoryCache::with_paths(&list, &dir.path().join("Cache"), &fetch);

        let hits = cache.search("X").unwrap();
        assert_eq!(hits[0].id, "f1");
        assert_eq!(fetch.calls().len(), 1);

        // Index expired, snapshot still fresh: rebuilt without fetching
        std::fs::write(cache.store().path(SEARCH_INDEX.stamp), "0").unwrap();
        let hits = cache.search("X").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(fetch.calls().len(), 1);
        assert!(cache.store().is_fresh(&SEARCH_INDEX, DEFAULT_TTL));
    }
}
