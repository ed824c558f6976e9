//! URL to byte stream, whatever the scheme.
//!
//! Built-in protocols are tried in registration order (http(s), ftp(s),
//! sftp, file). Any other scheme is handed to the first installed
//! extension declaring it in `downloadProtocols`.
//!
//! Before parsing, the device placeholder (`$SALT_UUID`) in a URL is
//! replaced with this machine's identifier.

mod file;
mod ftp;
mod http;
mod sftp;

pub use file::FileProtocol;
pub use ftp::FtpProtocol;
pub use http::HttpProtocol;
pub use sftp::SftpProtocol;

use crate::config::{Config, DEVICE_ID_PLACEHOLDER};
use crate::error::TransportError;
use crate::extensions::ExtensionStore;
use crate::output;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;
use url::Url;

/// Size of the copy buffer used when streaming to disk
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// A readable byte stream plus its length when the origin reports one.
pub struct Stream {
    reader: Box<dyn Read>,
    length: Option<u64>,
}

impl Stream {
    pub fn new(reader: Box<dyn Read>, length: Option<u64>) -> Self {
        Self { reader, length }
    }

    pub fn length(&self) -> Option<u64> {
        self.length
    }
}

/// Body a protocol extension wrote to disk. The spool file is deleted once
/// the stream is dropped.
struct SpooledBody {
    file: File,
    _spool: NamedTempFile,
}

impl Read for SpooledBody {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

/// Where to connect and who to log in as, taken from a URL's authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SessionTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}

/// A transport for one family of URL schemes.
pub trait Protocol {
    /// Short name for messages
    fn name(&self) -> &str;

    /// Whether this protocol serves `scheme` (lowercase, no colon).
    fn can_handle(&self, scheme: &str) -> bool;

    /// Open `url` as a byte stream.
    fn open(&self, url: &Url) -> Result<Stream, TransportError>;
}

/// Anything that can produce the full body of a URL.
///
/// The repository cache depends on this rather than on [`Transport`].
pub trait Fetch {
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, TransportError>;
}

/// Policy shared by the built-in protocols.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub allow_insecure: bool,
    pub device_id: String,
    pub timeout: Duration,
}

impl TransportOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            allow_insecure: config.settings.allow_insecure_connections,
            device_id: config.device_id.clone(),
            timeout: Duration::from_secs(config.settings.http_timeout_secs),
        }
    }
}

/// Scheme dispatcher.
pub struct Transport {
    device_id: String,
    protocols: Vec<Box<dyn Protocol>>,
    extensions: Option<ExtensionStore>,
}

impl Transport {
    /// Transport with the built-in protocols and no extension fallback.
    pub fn new(options: TransportOptions) -> Self {
        let protocols: Vec<Box<dyn Protocol>> = vec![
            Box::new(HttpProtocol::new(options.allow_insecure, options.timeout)),
            Box::new(FtpProtocol::new(options.allow_insecure)),
            Box::new(SftpProtocol::new(options.timeout)),
            Box::new(FileProtocol),
        ];
        Self {
            device_id: options.device_id,
            protocols,
            extensions: None,
        }
    }

    /// Transport configured from settings, falling back to installed extensions.
    pub fn from_config(config: &Config) -> Self {
        Self::new(TransportOptions::from_config(config))
            .with_extensions(ExtensionStore::new(&config.paths.extensions_dir))
    }

    pub fn with_extensions(mut self, store: ExtensionStore) -> Self {
        self.extensions = Some(store);
        self
    }

    /// Append a protocol; it is consulted after those already registered.
    pub fn register(&mut self, protocol: Box<dyn Protocol>) {
        self.protocols.push(protocol);
    }

    /// First built-in protocol that takes `scheme`.
    fn protocol_for(&self, scheme: &str) -> Option<&dyn Protocol> {
        self.protocols
            .iter()
            .find(|p| p.can_handle(scheme))
            .map(|p| p.as_ref())
    }

    /// Substitute the device placeholder and parse.
    pub fn resolve_url(&self, raw: &str) -> Result<Url, TransportError> {
        let substituted = raw.replace(DEVICE_ID_PLACEHOLDER, &self.device_id);
        Url::parse(&substituted).map_err(|e| TransportError::InvalidUrl {
            url: substituted.clone(),
            reason: e.to_string(),
        })
    }

    /// Open `raw` as a byte stream.
    pub fn open(&self, raw: &str) -> Result<Stream, TransportError> {
        self.open_in(raw, &std::env::temp_dir())
    }

    /// Like [`Transport::open`], spooling extension-served bodies in `spool_dir`.
    fn open_in(&self, raw: &str, spool_dir: &Path) -> Result<Stream, TransportError> {
        let url = self.resolve_url(raw)?;
        let scheme = url.scheme();

        if let Some(protocol) = self.protocol_for(scheme) {
            output::detail(&format!("fetching {} via {}", url, protocol.name()));
            return protocol.open(&url);
        }

        self.open_with_extension(&url, spool_dir)
    }

    /// The handler writes the body into a spool file in `spool_dir`, which
    /// is then read back as the stream.
    fn open_with_extension(&self, url: &Url, spool_dir: &Path) -> Result<Stream, TransportError> {
        let unsupported = || TransportError::UnsupportedProtocol {
            scheme: url.scheme().to_string(),
            url: url.to_string(),
        };

        let store = self.extensions.as_ref().ok_or_else(unsupported)?;
        let registry = store.registry().map_err(|e| TransportError::Extension {
            url: url.to_string(),
            source: Box::new(e),
        })?;
        let handler = registry
            .lookup_protocol(url.scheme())
            .ok_or_else(unsupported)?;

        output::detail(&format!(
            "fetching {} via extension '{}'",
            url,
            handler.id()
        ));

        let io_err = |source: std::io::Error| TransportError::Io {
            path: spool_dir.to_path_buf(),
            source,
        };
        std::fs::create_dir_all(spool_dir).map_err(io_err)?;
        let spool = tempfile::Builder::new()
            .prefix(".salt-request-")
            .tempfile_in(spool_dir)
            .map_err(io_err)?;

        handler
            .request(url, spool.path())
            .map_err(|e| TransportError::Extension {
                url: url.to_string(),
                source: Box::new(e),
            })?;

        let file = spool.reopen().map_err(io_err)?;
        let length = file.metadata().map(|m| m.len()).ok();
        Ok(Stream::new(
            Box::new(SpooledBody {
                file,
                _spool: spool,
            }),
            length,
        ))
    }

    /// Read the whole body into memory.
    pub fn fetch_bytes(&self, raw: &str) -> Result<Vec<u8>, TransportError> {
        let mut stream = self.open(raw)?;
        let mut body = Vec::with_capacity(stream.length().unwrap_or(0).min(16 << 20) as usize);
        stream
            .read_to_end(&mut body)
            .map_err(|source| TransportError::Stream {
                url: raw.to_string(),
                source,
            })?;
        Ok(body)
    }

    /// Stream `raw` straight to `dest`, returning the number of bytes written.
    ///
    /// Bytes go to a temp file beside `dest` which only replaces `dest` once
    /// the source reaches EOF. Any read or write error discards it, so a
    /// failed transfer never leaves a truncated file at `dest`.
    pub fn fetch_to(&self, raw: &str, dest: &Path) -> Result<u64, TransportError> {
        let dir = dest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut stream = self.open_in(raw, dir)?;

        let io_err = |source: std::io::Error| TransportError::Io {
            path: dest.to_path_buf(),
            source,
        };
        crate::fs_utils::ensure_parent_dir(dest).map_err(io_err)?;
        let mut temp = NamedTempFile::new_in(dir).map_err(io_err)?;

        let pb = match stream.length() {
            Some(len) => output::download_progress(len),
            None => output::spinner(&format!("downloading {}", raw)),
        };

        let result = copy_stream(&mut stream, temp.as_file_mut(), raw, dest, |n| pb.inc(n));
        pb.finish_and_clear();
        let written = result?;

        temp.as_file().sync_all().map_err(io_err)?;
        temp.persist(dest).map_err(|e| io_err(e.error))?;
        Ok(written)
    }
}

impl Fetch for Transport {
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        Transport::fetch_bytes(self, url)
    }
}

/// Copy until EOF, attributing read failures to the source URL and write
/// failures to the destination path.
fn copy_stream(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    url: &str,
    dest: &Path,
    mut on_progress: impl FnMut(u64),
) -> Result<u64, TransportError> {
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(TransportError::Stream {
                    url: url.to_string(),
                    source,
                });
            }
        };
        writer
            .write_all(&buffer[..n])
            .map_err(|source| TransportError::Io {
                path: dest.to_path_buf(),
                source,
            })?;
        total += n as u64;
        on_progress(n as u64);
    }
    writer.flush().map_err(|source| TransportError::Io {
        path: dest.to_path_buf(),
        source,
    })?;
    Ok(total)
}

/// Percent-decode a URL component (userinfo or path).
pub(crate) fn decode_component(raw: &str) -> String {
    percent_encoding::percent_decode_str(raw)
        .decode_utf8_lossy()
        .into_owned()
}
