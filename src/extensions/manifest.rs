//! Extension manifest (`package.json`) parsing
//!
//! Salt-specific settings live in a `salt` block. `name` and `handler` fall
//! back from that block to the top-level `name`/`main` fields, and the name
//! finally to the directory name.

use crate::error::ExtensionError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Manifest file inside every extension directory
pub const MANIFEST_FILE: &str = "package.json";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageJson {
    name: Option<String>,
    display_name: Option<String>,
    description: Option<String>,
    version: Option<String>,
    author: Option<serde_json::Value>,
    url: Option<String>,
    main: Option<String>,
    salt: Option<SaltBlock>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaltBlock {
    name: Option<String>,
    display_name: Option<String>,
    handler: Option<String>,
    types: Option<Vec<String>>,
    download_protocols: Option<Vec<String>>,
    file_extensions: Option<Vec<String>>,
    folder_files: Option<Vec<Vec<String>>>,
    priority: Option<i64>,
}

/// Normalized view of one installed extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Directory name under the extension storage root
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub version: Option<String>,
    pub author: Option<String>,
    pub url: Option<String>,
    /// Handler script, relative to the extension directory
    pub handler: PathBuf,
    pub types: Vec<String>,
    /// URL schemes, lowercase, without trailing colon
    pub download_protocols: Vec<String>,
    /// File extensions, lowercase, without leading dot
    pub file_extensions: Vec<String>,
    /// Each signature is a group of globs that must all match in a folder
    pub folder_signatures: Vec<Vec<String>>,
    /// Higher values are consulted first
    pub priority: i64,
}

impl Manifest {
    /// Read and normalize `<dir>/package.json`.
    pub fn load(id: &str, dir: &Path) -> Result<Self, ExtensionError> {
        let path = dir.join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&path).map_err(|e| ExtensionError::Manifest {
            id: id.to_string(),
            reason: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::parse(id, &content)
    }

    /// Normalize a manifest document for extension `id`.
    pub fn parse(id: &str, content: &str) -> Result<Self, ExtensionError> {
        let package: PackageJson =
            serde_json::from_str(content).map_err(|e| ExtensionError::Manifest {
                id: id.to_string(),
                reason: e.to_string(),
            })?;
        let salt = package.salt.unwrap_or_default();

        let name = salt
            .name
            .or(package.name)
            .unwrap_or_else(|| id.to_string());
        let display_name = salt
            .display_name
            .or(package.display_name)
            .unwrap_or_else(|| name.clone());
        let handler = salt
            .handler
            .or(package.main)
            .ok_or_else(|| ExtensionError::Manifest {
                id: id.to_string(),
                reason: "no handler (salt.handler or main) declared".to_string(),
            })?;

        Ok(Self {
            id: id.to_string(),
            name,
            display_name,
            description: package.description,
            version: package.version,
            author: package.author.map(author_string),
            url: package.url,
            handler: PathBuf::from(handler),
            types: salt.types.unwrap_or_default(),
            download_protocols: salt
                .download_protocols
                .unwrap_or_default()
                .iter()
                .map(|p| normalize_scheme(p))
                .collect(),
            file_extensions: salt
                .file_extensions
                .unwrap_or_default()
                .iter()
                .map(|e| normalize_extension(e))
                .collect(),
            folder_signatures: salt.folder_files.unwrap_or_default(),
            priority: salt.priority.unwrap_or(0),
        })
    }

    pub fn handles_protocol(&self, scheme: &str) -> bool {
        let scheme = normalize_scheme(scheme);
        self.download_protocols.iter().any(|p| *p == scheme)
    }

    pub fn handles_extension(&self, ext: &str) -> bool {
        let ext = normalize_extension(ext);
        self.file_extensions.iter().any(|e| *e == ext)
    }
}

/// `".ZIP"` and `"zip"` compare equal.
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

/// `"IPFS:"` and `"ipfs"` compare equal.
pub fn normalize_scheme(scheme: &str) -> String {
    scheme.trim().trim_end_matches(':').to_lowercase()
}

/// npm allows `author` as a string or as `{ name, email, url }`.
fn author_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Object(map) => map
            .get("name")
            .and_then(|n| n.as_str())
            .map(str::to_string)
            .unwrap_or_default(),
        other => other.to_string(),
    }
}
