//! Shared fixtures for integration tests.

#![allow(dead_code)]

use salt::{Config, Paths, Settings};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

/// A salt root inside a temp directory.
pub struct TestEnv {
    pub dir: TempDir,
    pub config: Config,
}

impl TestEnv {
    /// Plain `http` allowed so mock servers can be reached.
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let paths = Paths::from_root(dir.path().join("Salt"));
        paths.ensure().unwrap();

        let mut settings = Settings::defaults(&paths);
        settings.output = dir.path().join("Downloads");
        settings.allow_insecure_connections = true;

        let config = Config::new(paths, settings, "00000000-test-device");
        Self { dir, config }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.config.output_dir().to_path_buf()
    }

    /// Write `Config/Repositories.json` from `(id, name, url)` triples, in order.
    pub fn write_repositories(&self, repos: &[(&str, &str, &str)]) {
        let mut map = serde_json::Map::new();
        for (id, name, url) in repos {
            map.insert(
                id.to_string(),
                serde_json::json!({ "Name": name, "URL": url }),
            );
        }
        std::fs::write(
            self.config.paths.repositories_file(),
            serde_json::Value::Object(map).to_string(),
        )
        .unwrap();
    }

    /// Create an extension directory with a manifest and handler script.
    pub fn write_extension(&self, id: &str, salt_block: serde_json::Value, script: &str) -> PathBuf {
        let dir = self.config.paths.extensions_dir.join(id);
        write_extension_files(&dir, salt_block, script);
        dir
    }
}

pub fn write_extension_files(dir: &Path, salt_block: serde_json::Value, script: &str) {
    std::fs::create_dir_all(dir).unwrap();
    let manifest = serde_json::json!({
        "name": dir.file_name().unwrap().to_string_lossy(),
        "version": "1.0.0",
        "main": "handler.rhai",
        "salt": salt_block,
    });
    std::fs::write(dir.join("package.json"), manifest.to_string()).unwrap();
    std::fs::write(dir.join("handler.rhai"), script).unwrap();
}

/// Repository index document with `(id, name, url, filename)` items.
pub fn repository_index(repo_id: &str, items: &[(&str, &str, &str, &str)]) -> String {
    let mut files = serde_json::Map::new();
    for (id, name, url, filename) in items {
        files.insert(
            id.to_string(),
            serde_json::json!({ "Name": name, "URL": url, "Filename": filename }),
        );
    }
    serde_json::json!({
        "Meta": { "id": repo_id, "name": repo_id },
        "Files": files,
    })
    .to_string()
}

/// Zip every file under `src`, keeping `src`'s own name as the top-level entry.
pub fn zip_dir(src: &Path, dest: &Path) {
    let base = src.parent().unwrap();
    let mut writer = zip::ZipWriter::new(std::fs::File::create(dest).unwrap());
    let options = zip::write::SimpleFileOptions::default();

    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry.unwrap();
        let name = entry
            .path()
            .strip_prefix(base)
            .unwrap()
            .to_string_lossy()
            .replace('\\', "/");
        if entry.file_type().is_dir() {
            writer.add_directory(name, options).unwrap();
        } else {
            writer.start_file(name, options).unwrap();
            writer
                .write_all(&std::fs::read(entry.path()).unwrap())
                .unwrap();
        }
    }
    writer.finish().unwrap();
}

/// Zip in-memory `(name, contents)` entries.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, contents) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap().into_inner()
}
