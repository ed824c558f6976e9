//! Error types for each component.
//!
//! Library code returns these; the CLI wraps them in `anyhow`.

use std::path::PathBuf;
use thiserror::Error;

/// Failures while turning a URL into a byte stream.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("no handler found for protocol '{scheme}' ({url})")]
    UnsupportedProtocol { scheme: String, url: String },

    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("request to {url} failed with status {status}")]
    Status { url: String, status: u16 },

    #[error("stream error while reading {url}: {source}")]
    Stream {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("protocol extension failed for {url}: {source}")]
    Extension {
        url: String,
        #[source]
        source: Box<ExtensionError>,
    },
}

/// Failures of installed extensions.
#[derive(Error, Debug)]
pub enum ExtensionError {
    #[error("extension '{id}' has an invalid manifest: {reason}")]
    Manifest { id: String, reason: String },

    #[error("extension '{id}' failed in {entry}: {reason}")]
    Handler {
        id: String,
        entry: String,
        reason: String,
    },

    #[error("extension '{id}' returned a path that does not exist: {}", path.display())]
    MissingOutput { id: String, path: PathBuf },

    #[error("cannot unpack extension archive {}: {reason}", path.display())]
    Archive { path: PathBuf, reason: String },

    #[error("extension '{0}' is not installed")]
    NotInstalled(String),

    #[error("processing pipeline exceeded {0} steps")]
    StepLimit(usize),

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures while reading, fetching or caching repository indices.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("no repositories file found at {}", .0.display())]
    ListMissing(PathBuf),

    #[error("repository '{0}' is not configured")]
    NotFound(String),

    #[error("failed to fetch repository {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("invalid repository index at {url}: {reason}")]
    InvalidIndex { url: String, reason: String },

    #[error("failed to parse {what}: {source}")]
    Parse {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cache IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures of a single download request.
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("refusing unsafe target filename '{0}'")]
    UnsafeFilename(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Extension(#[from] ExtensionError),
}

/// Failures loading or saving settings and identity files.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot determine a data directory; set SALT_HOME")]
    NoDataDir,

    #[error("invalid config file {}: {reason}", path.display())]
    Invalid { path: PathBuf, reason: String },

    #[error("unknown config property '{0}' (valid: outputDir, insecureConnections, extensionsEnabled)")]
    UnknownProperty(String),

    #[error("config IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_failing_target() {
        let err = DownloadError::NotFound("f1".to_string());
        assert_eq!(err.to_string(), "file not found: f1");

        let err = TransportError::UnsupportedProtocol {
            scheme: "ipfs".to_string(),
            url: "ipfs://abc".to_string(),
        };
        assert!(err.to_string().contains("ipfs://abc"));
        assert!(err.to_string().contains("'ipfs'"));
    }

    #[test]
    fn test_download_error_wraps_transparently() {
        let inner = RepositoryError::NotFound("r9".to_string());
        let err: DownloadError = inner.into();
        assert_eq!(err.to_string(), "repository 'r9' is not configured");
    }
}
