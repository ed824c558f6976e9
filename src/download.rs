//! Download orchestration
//!
//! Resolves an item through the repository cache, streams it into the
//! output directory and, when extensions are enabled, hands the result to
//! the processing pipeline.

use crate::config::Config;
use crate::error::DownloadError;
use crate::extensions::{ExtensionStore, Pipeline};
use crate::fs_utils::is_safe_filename;
use crate::output;
use crate::repository::RepositoryCache;
use crate::transport::Transport;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadOptions {
    /// Skip post-processing even when extensions are enabled
    pub no_extensions: bool,
}

/// What a finished download left on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadOutcome {
    /// File written by the transfer
    pub path: PathBuf,
    pub bytes: u64,
    /// Final paths after post-processing; `[path]` when nothing ran
    pub outputs: Vec<PathBuf>,
}

pub struct Downloader<'a> {
    transport: &'a Transport,
    output_dir: PathBuf,
    extensions: Option<ExtensionStore>,
}

impl<'a> Downloader<'a> {
    pub fn new(config: &Config, transport: &'a Transport) -> Self {
        let extensions = config
            .settings
            .extensions_enabled
            .then(|| ExtensionStore::new(&config.paths.extensions_dir));
        Self {
            transport,
            output_dir: config.output_dir().to_path_buf(),
            extensions,
        }
    }

    pub fn with_output_dir(mut self, dir: &Path) -> Self {
        self.output_dir = dir.to_path_buf();
        self
    }

    /// `None` disables post-processing entirely.
    pub fn with_extensions(mut self, store: Option<ExtensionStore>) -> Self {
        self.extensions = store;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Download the item `id` from the cached snapshot.
    pub fn download(
        &self,
        cache: &RepositoryCache<'_>,
        id: &str,
        options: DownloadOptions,
    ) -> Result<DownloadOutcome, DownloadError> {
        let snapshot = cache.get()?;
        let item = snapshot
            .get(id)
            .ok_or_else(|| DownloadError::NotFound(id.to_string()))?;

        output::action(&format!("Downloading {}", display_name(&item.name, id)));
        self.fetch(&item.url, &item.filename, options)
    }

    /// Download an arbitrary URL as `filename`.
    pub fn download_url(
        &self,
        url: &str,
        filename: &str,
        options: DownloadOptions,
    ) -> Result<DownloadOutcome, DownloadError> {
        output::action(&format!("Downloading {}", url));
        self.fetch(url, filename, options)
    }

    fn fetch(
        &self,
        url: &str,
        filename: &str,
        options: DownloadOptions,
    ) -> Result<DownloadOutcome, DownloadError> {
        if !is_safe_filename(filename) {
            return Err(DownloadError::UnsafeFilename(filename.to_string()));
        }
        let path = self.output_dir.join(filename);

        let bytes = self.transport.fetch_to(url, &path)?;
        output::success(&format!("saved {} ({} bytes)", path.display(), bytes));

        let outputs = self.post_process(&path, options)?;
        Ok(DownloadOutcome {
            path,
            bytes,
            outputs,
        })
    }

    fn post_process(&self, path: &Path, options: DownloadOptions) -> Result<Vec<PathBuf>, DownloadError> {
        let store = match &self.extensions {
            Some(store) if !options.no_extensions => store,
            _ => return Ok(vec![path.to_path_buf()]),
        };

        let registry = store.registry()?;
        if registry.is_empty() {
            return Ok(vec![path.to_path_buf()]);
        }
        let outputs = Pipeline::new(&registry).process(path, &self.output_dir)?;
        if outputs != [path.to_path_buf()] {
            for output_path in &outputs {
                output::detail(&format!("-> {}", output_path.display()));
            }
        }
        Ok(outputs)
    }
}

fn display_name<'s>(name: &'s str, id: &'s str) -> &'s str {
    if name.is_empty() { id } else { name }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportOptions;
    use std::time::Duration;
    use tempfile::TempDir;
    use url::Url;

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        transport: Transport,
    }

    /// A file:// repository with one item pointing at a local source file.
    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();

        let source = root.join("source.bin");
        std::fs::write(&source, b"payload").unwrap();
        let source_url = Url::from_file_path(&source).unwrap();

        let index = root.join("index.json");
        std::fs::write(
            &index,
            serde_json::json!({
                "Meta": { "id": "r1", "name": "Local" },
                "Files": {
                    "f1": { "Name": "X", "URL": source_url.as_str(), "Filename": "x.bin" },
                    "evil": { "Name": "E", "URL": source_url.as_str(), "Filename": "../escape.bin" }
                }
            })
            .to_string(),
        )
        .unwrap();
        let index_url = Url::from_file_path(&index).unwrap();
        std::fs::write(
            root.join("Repositories.json"),
            serde_json::json!({ "r1": { "Name": "Local", "URL": index_url.as_str() } }).to_string(),
        )
        .unwrap();

        let transport = Transport::new(TransportOptions {
            allow_insecure: false,
            device_id: "test".to_string(),
            timeout: Duration::from_secs(5),
        });
        Fixture {
            _dir: dir,
            root,
            transport,
        }
    }

    #[test]
    fn test_download_by_id_writes_filename() {
        let fx = fixture();
        let cache = RepositoryCache::with_paths(
            &fx.root.join("Repositories.json"),
            &fx.root.join("Cache"),
            &fx.transport,
        );
        let out_dir = fx.root.join("Downloads");
        let downloader = Downloader {
            transport: &fx.transport,
            output_dir: out_dir.clone(),
            extensions: None,
        };

        let outcome = downloader
            .download(&cache, "f1", DownloadOptions::default())
            .unwrap();
        assert_eq!(outcome.path, out_dir.join("x.bin"));
        assert_eq!(outcome.bytes, 7);
        assert_eq!(outcome.outputs, vec![out_dir.join("x.bin")]);
        assert_eq!(std::fs::read(out_dir.join("x.bin")).unwrap(), b"payload");
    }

    #[test]
    fn test_unknown_id_names_the_id() {
        let fx = fixture();
        let cache = RepositoryCache::with_paths(
            &fx.root.join("Repositories.json"),
            &fx.root.join("Cache"),
            &fx.transport,
        );
        let downloader = Downloader {
            transport: &fx.transport,
            output_dir: fx.root.join("Downloads"),
            extensions: None,
        };

        let err = downloader
            .download(&cache, "missing-id", DownloadOptions::default())
            .unwrap_err();
        assert!(matches!(err, DownloadError::NotFound(ref id) if id == "missing-id"));
        assert!(err.to_string().contains("missing-id"));
    }

    #[test]
    fn test_traversal_filename_refused() {
        let fx = fixture();
        let cache = RepositoryCache::with_paths(
            &fx.root.join("Repositories.json"),
            &fx.root.join("Cache"),
            &fx.transport,
        );
        let downloader = Downloader {
            transport: &fx.transport,
            output_dir: fx.root.join("Downloads"),
            extensions: None,
        };

        let err = downloader
            .download(&cache, "evil", DownloadOptions::default())
            .unwrap_err();
        assert!(matches!(err, DownloadError::UnsafeFilename(_)));
        assert!(!fx.root.join("escape.bin").exists());
    }

    #[test]
    fn test_download_url_runs_pipeline_unless_disabled() {
        let fx = fixture();
        let ext_root = fx.root.join("Extensions");
        let ext = ext_root.join("renamer");
        std::fs::create_dir_all(&ext).unwrap();
        std::fs::write(
            ext.join("package.json"),
            r#"{ "main": "h.rhai", "salt": { "fileExtensions": ["bin"] } }"#,
        )
        .unwrap();
        std::fs::write(
            ext.join("h.rhai"),
            r#"
            fn handleFile(input, output_dir) {
                let out = join_path(output_dir, file_stem(input) + ".txt");
                move_file(input, out);
                [out]
            }
            "#,
        )
        .unwrap();

        let out_dir = fx.root.join("Downloads");
        let downloader = Downloader {
            transport: &fx.transport,
            output_dir: out_dir.clone(),
            extensions: Some(ExtensionStore::new(&ext_root)),
        };
        let url = Url::from_file_path(fx.root.join("source.bin")).unwrap();

        let outcome = downloader
            .download_url(url.as_str(), "a.bin", DownloadOptions::default())
            .unwrap();
        assert_eq!(outcome.outputs, vec![out_dir.join("a.txt")]);
        assert!(!out_dir.join("a.bin").exists());

        let skipped = downloader
            .download_url(url.as_str(), "b.bin", DownloadOptions { no_extensions: true })
            .unwrap();
        assert_eq!(skipped.outputs, vec![out_dir.join("b.bin")]);
        assert!(out_dir.join("b.bin").exists());
    }
}
