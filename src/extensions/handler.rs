//! Capability interface shared by every extension.
//!
//! A handler declares what it can take (a URL scheme, a file extension or a
//! folder shape) and is asked to do the work only after it said yes.

use super::manifest::Manifest;
use super::sandbox::Script;
use crate::error::ExtensionError;
use rhai::Dynamic;
use std::path::{Path, PathBuf};
use url::Url;

const FILE_ENTRIES: &[&str] = &["handleFile", "handle_file"];
const FOLDER_ENTRIES: &[&str] = &["handleFolder", "handle_folder"];
const REQUEST_ENTRIES: &[&str] = &["request"];

/// What a handler is being asked about.
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    /// URL scheme, e.g. `ipfs`
    Protocol(&'a str),
    /// File extension without dot, e.g. `zip` or `tar.gz`
    FileExtension(&'a str),
    /// Existing directory
    Folder(&'a Path),
}

pub trait ExtensionHandler {
    fn id(&self) -> &str;

    fn can_handle(&self, target: &Target<'_>) -> bool;

    /// Script implementing the handler, when there is one.
    fn handler_path(&self) -> Option<PathBuf> {
        None
    }

    /// Process one file, returning the paths it produced.
    fn handle_file(&self, input: &Path, _output_dir: &Path) -> Result<Vec<PathBuf>, ExtensionError> {
        Err(unsupported(self.id(), "handleFile", input))
    }

    /// Process one folder, returning the paths it produced.
    fn handle_folder(
        &self,
        input: &Path,
        _output_dir: &Path,
    ) -> Result<Vec<PathBuf>, ExtensionError> {
        Err(unsupported(self.id(), "handleFolder", input))
    }

    /// Fetch `url` into the file at `body_path`.
    ///
    /// The caller owns `body_path` and streams it to the destination once
    /// this returns, so the body never has to fit in memory.
    fn request(&self, url: &Url, _body_path: &Path) -> Result<(), ExtensionError> {
        Err(ExtensionError::Handler {
            id: self.id().to_string(),
            entry: "request".to_string(),
            reason: format!("cannot fetch {}", url),
        })
    }
}

fn unsupported(id: &str, entry: &str, input: &Path) -> ExtensionError {
    ExtensionError::Handler {
        id: id.to_string(),
        entry: entry.to_string(),
        reason: format!("cannot process {}", input.display()),
    }
}

/// True when all globs of at least one non-empty group match inside `folder`.
pub fn folder_matches(folder: &Path, signatures: &[Vec<String>]) -> bool {
    signatures.iter().any(|group| {
        !group.is_empty() && group.iter().all(|pattern| glob_hits(folder, pattern))
    })
}

fn glob_hits(folder: &Path, pattern: &str) -> bool {
    let base = glob::Pattern::escape(&folder.to_string_lossy());
    let full = format!("{}/{}", base, pattern.trim_start_matches('/'));
    glob::glob(&full)
        .map(|mut paths| paths.any(|p| p.is_ok()))
        .unwrap_or(false)
}

/// An installed extension backed by a Rhai handler script.
#[derive(Debug, Clone)]
pub struct ScriptExtension {
    manifest: Manifest,
    dir: PathBuf,
}

impl ScriptExtension {
    pub fn new(manifest: Manifest, dir: PathBuf) -> Self {
        Self { manifest, dir }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn invoke_paths(
        &self,
        entries: &[&str],
        input: &Path,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, ExtensionError> {
        let script = Script::load(&self.manifest.id, &self.dir, &self.manifest.handler)?;
        let entry = script
            .entry(entries)
            .ok_or_else(|| self.missing_entry(entries))?;

        let value = script.call(
            entry,
            (
                input.to_string_lossy().to_string(),
                output_dir.to_string_lossy().to_string(),
            ),
        )?;
        self.into_paths(value, entry, output_dir)
    }

    fn missing_entry(&self, entries: &[&str]) -> ExtensionError {
        ExtensionError::Handler {
            id: self.manifest.id.clone(),
            entry: entries.first().copied().unwrap_or_default().to_string(),
            reason: format!("handler defines none of: {}", entries.join(", ")),
        }
    }

    /// Accept `()`, one path string or an array of path strings.
    /// Relative paths are taken relative to `output_dir`.
    fn into_paths(
        &self,
        value: Dynamic,
        entry: &str,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, ExtensionError> {
        let bad = |what: &str| ExtensionError::Handler {
            id: self.manifest.id.clone(),
            entry: entry.to_string(),
            reason: format!("expected an array of paths, got {}", what),
        };

        let items = if value.is_unit() {
            Vec::new()
        } else if value.is_string() {
            vec![value]
        } else if let Some(array) = value.clone().try_cast::<rhai::Array>() {
            array
        } else {
            return Err(bad(value.type_name()));
        };

        items
            .into_iter()
            .map(|item| {
                let type_name = item.type_name();
                item.into_string()
                    .map(|s| output_dir.join(s))
                    .map_err(|_| bad(type_name))
            })
            .collect()
    }
}

impl ExtensionHandler for ScriptExtension {
    fn id(&self) -> &str {
        &self.manifest.id
    }

    fn can_handle(&self, target: &Target<'_>) -> bool {
        match target {
            Target::Protocol(scheme) => self.manifest.handles_protocol(scheme),
            Target::FileExtension(ext) => self.manifest.handles_extension(ext),
            Target::Folder(path) => folder_matches(path, &self.manifest.folder_signatures),
        }
    }

    fn handler_path(&self) -> Option<PathBuf> {
        Some(self.dir.join(&self.manifest.handler))
    }

    fn handle_file(&self, input: &Path, output_dir: &Path) -> Result<Vec<PathBuf>, ExtensionError> {
        self.invoke_paths(FILE_ENTRIES, input, output_dir)
    }

    fn handle_folder(&self, input: &Path, output_dir: &Path) -> Result<Vec<PathBuf>, ExtensionError> {
        self.invoke_paths(FOLDER_ENTRIES, input, output_dir)
    }

    /// Calls `request(url, body_path)`. The script writes the body itself
    /// (`http_download`, `write_file`, `append_file`); a small blob or
    /// string it returns instead is written to `body_path` for it.
    fn request(&self, url: &Url, body_path: &Path) -> Result<(), ExtensionError> {
        let script = Script::load(&self.manifest.id, &self.dir, &self.manifest.handler)?;
        let entry = script
            .entry(REQUEST_ENTRIES)
            .ok_or_else(|| self.missing_entry(REQUEST_ENTRIES))?;
        let value = script.call(
            entry,
            (url.to_string(), body_path.to_string_lossy().to_string()),
        )?;

        let returned = if value.is_unit() {
            None
        } else if value.is_blob() {
            value.try_cast::<rhai::Blob>()
        } else if value.is_string() {
            value.into_string().ok().map(String::into_bytes)
        } else {
            return Err(ExtensionError::Handler {
                id: self.manifest.id.clone(),
                entry: entry.to_string(),
                reason: format!(
                    "request must write to its body path or return a blob or a string, got {}",
                    value.type_name()
                ),
            });
        };

        if let Some(body) = returned {
            std::fs::write(body_path, body).map_err(|source| ExtensionError::Io {
                path: body_path.to_path_buf(),
                source,
            })?;
        }
        if !body_path.is_file() {
            return Err(ExtensionError::MissingOutput {
                id: self.manifest.id.clone(),
                path: body_path.to_path_buf(),
            });
        }
        Ok(())
    }
}
