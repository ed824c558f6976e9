//! Personal file acquisition tool
//!
//! Salt keeps a list of repositories, each a JSON index of downloadable
//! files. It merges them into a cached snapshot, searches it, and fetches
//! items over `http(s)`, `ftp(s)`, `sftp` or `file` URLs. Installed
//! extensions (Rhai scripts with a `package.json` manifest) can teach it
//! new URL schemes and post-process what was downloaded.
//!
//! # Layout on disk
//!
//! ```text
//! <root>/Config/Settings.toml        user settings
//! <root>/Config/User.toml            device identifier
//! <root>/Config/Repositories.json    configured repositories, in merge order
//! <root>/Cache/                      snapshot, search index and their stamps
//! <root>/Extensions/<id>/            one directory per installed extension
//! ```
//!
//! # Extension handlers
//!
//! A handler script may define any of:
//!
//! ```rhai
//! fn handleFile(input, output_dir) { ... }    // returns a path or an array of paths
//! fn handleFolder(input, output_dir) { ... }
//! fn request(url, body_path) { ... }          // writes the body to body_path
//! ```
//!
//! Scripts run in a fresh engine per call with a fixed set of host
//! functions (file access, archive extraction, HTTP); there is no process
//! execution.

pub mod config;
pub mod download;
pub mod error;
pub mod extensions;
pub mod fs_utils;
pub mod output;
pub mod repository;
pub mod search;
pub mod transport;

pub use config::{Config, Paths, Settings};
pub use download::{DownloadOptions, DownloadOutcome, Downloader};
pub use error::{ConfigError, DownloadError, ExtensionError, RepositoryError, TransportError};
pub use extensions::{ExtensionStore, Pipeline, Registry};
pub use repository::{Item, RepositoryCache, Snapshot};
pub use search::{SearchHit, SearchIndex};
pub use transport::{Fetch, Transport, TransportOptions};
