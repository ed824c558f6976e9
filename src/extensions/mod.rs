//! Installed extensions and handler lookup.
//!
//! Each extension is a directory under the extension root holding a
//! `package.json` manifest and a Rhai handler script. The directory name is
//! the extension id.
//!
//! Lookups consult extensions in a fixed order: manifest `priority`
//! (higher first), then id. The first extension that accepts the target
//! wins.

pub mod archive;
mod handler;
mod host;
mod manifest;
mod pipeline;
mod sandbox;

pub use handler::{ExtensionHandler, ScriptExtension, Target, folder_matches};
pub use manifest::{MANIFEST_FILE, Manifest, normalize_extension, normalize_scheme};
pub use pipeline::{DEFAULT_MAX_STEPS, Pipeline, extension_candidates};

use crate::error::ExtensionError;
use crate::fs_utils::is_safe_filename;
use crate::output;
use std::path::{Path, PathBuf};

/// Result of scanning the extension root.
#[derive(Debug, Default)]
pub struct Listing {
    /// Valid extensions in lookup order
    pub extensions: Vec<ScriptExtension>,
    /// Extensions skipped because their manifest could not be used
    pub failures: Vec<ExtensionError>,
}

impl Listing {
    pub fn get(&self, id: &str) -> Option<&Manifest> {
        self.extensions
            .iter()
            .map(|ext| ext.manifest())
            .find(|m| m.id == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.extensions.iter().map(|ext| ext.id()).collect()
    }
}

/// Extension storage root.
#[derive(Debug, Clone)]
pub struct ExtensionStore {
    root: PathBuf,
}

impl ExtensionStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scan installed extensions.
    ///
    /// A missing root means nothing is installed. A broken manifest is
    /// reported and the extension skipped; the rest are still listed.
    pub fn list(&self) -> Result<Listing, ExtensionError> {
        let mut listing = Listing::default();
        if !self.root.is_dir() {
            return Ok(listing);
        }

        let entries = std::fs::read_dir(&self.root).map_err(|source| ExtensionError::Io {
            path: self.root.clone(),
            source,
        })?;

        for entry in entries.filter_map(|e| e.ok()) {
            let dir = entry.path();
            let id = entry.file_name().to_string_lossy().to_string();
            // Hidden entries include in-progress installs
            if id.starts_with('.') || !dir.is_dir() {
                continue;
            }
            match Manifest::load(&id, &dir) {
                Ok(manifest) => listing
                    .extensions
                    .push(ScriptExtension::new(manifest, dir)),
                Err(e) => {
                    output::warning(&e.to_string());
                    listing.failures.push(e);
                }
            }
        }

        listing.extensions.sort_by(|a, b| {
            b.manifest()
                .priority
                .cmp(&a.manifest().priority)
                .then_with(|| a.id().cmp(b.id()))
        });
        Ok(listing)
    }

    /// Handlers in lookup order.
    pub fn registry(&self) -> Result<Registry, ExtensionError> {
        let listing = self.list()?;
        Ok(Registry::from_handlers(
            listing
                .extensions
                .into_iter()
                .map(|ext| Box::new(ext) as Box<dyn ExtensionHandler>)
                .collect(),
        ))
    }

    /// Unpack an extension archive into the root.
    ///
    /// The archive must hold exactly one top-level directory, which becomes
    /// the extension id. Its manifest is validated before anything under
    /// the root changes; an existing extension with the same id is replaced.
    pub fn install(&self, archive_path: &Path) -> Result<Manifest, ExtensionError> {
        let archive_err = |reason: String| ExtensionError::Archive {
            path: archive_path.to_path_buf(),
            reason,
        };

        std::fs::create_dir_all(&self.root).map_err(io_error(&self.root))?;
        let staging = tempfile::Builder::new()
            .prefix(".install-")
            .tempdir_in(&self.root)
            .map_err(io_error(&self.root))?;

        archive::extract(archive_path, staging.path()).map_err(archive_err)?;

        let top_level: Vec<_> = std::fs::read_dir(staging.path())
            .map_err(io_error(staging.path()))?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != "__MACOSX")
            .collect();
        let [entry] = top_level.as_slice() else {
            return Err(archive_err(format!(
                "expected one top-level directory, found {} entries",
                top_level.len()
            )));
        };
        let id = entry.file_name().to_string_lossy().to_string();
        if !entry.path().is_dir() || !is_safe_filename(&id) {
            return Err(archive_err(format!("'{}' is not a valid extension directory", id)));
        }

        let manifest = Manifest::load(&id, &entry.path())?;

        let dest = self.root.join(&id);
        if dest.exists() {
            std::fs::remove_dir_all(&dest).map_err(io_error(&dest))?;
        }
        std::fs::rename(entry.path(), &dest).map_err(io_error(&dest))?;
        Ok(manifest)
    }

    /// Remove an installed extension's directory.
    pub fn uninstall(&self, id: &str) -> Result<(), ExtensionError> {
        let dir = self.root.join(id);
        if !is_safe_filename(id) || !dir.is_dir() {
            return Err(ExtensionError::NotInstalled(id.to_string()));
        }
        std::fs::remove_dir_all(&dir).map_err(|source| ExtensionError::Io { path: dir, source })
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ExtensionError {
    let path = path.to_path_buf();
    move |source| ExtensionError::Io { path, source }
}

/// Ordered handler set used for lookups.
#[derive(Default)]
pub struct Registry {
    handlers: Vec<Box<dyn ExtensionHandler>>,
}

impl Registry {
    /// Handlers are consulted in the order given.
    pub fn from_handlers(handlers: Vec<Box<dyn ExtensionHandler>>) -> Self {
        Self { handlers }
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn lookup(&self, target: &Target<'_>) -> Option<&dyn ExtensionHandler> {
        self.handlers
            .iter()
            .find(|h| h.can_handle(target))
            .map(|h| h.as_ref())
    }

    pub fn lookup_protocol(&self, scheme: &str) -> Option<&dyn ExtensionHandler> {
        self.lookup(&Target::Protocol(scheme))
    }

    /// `".zip"` and `"zip"` find the same handler.
    pub fn lookup_file_extension(&self, ext: &str) -> Option<&dyn ExtensionHandler> {
        self.lookup(&Target::FileExtension(ext))
    }

    pub fn lookup_folder(&self, folder: &Path) -> Option<&dyn ExtensionHandler> {
        self.lookup(&Target::Folder(folder))
    }
}
