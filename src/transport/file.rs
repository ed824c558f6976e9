//! Local `file://` URLs

use super::{Protocol, Stream};
use crate::error::TransportError;
use std::fs::File;
use std::io::BufReader;
use url::Url;

pub struct FileProtocol;

impl Protocol for FileProtocol {
    fn name(&self) -> &str {
        "file"
    }

    fn can_handle(&self, scheme: &str) -> bool {
        scheme == "file"
    }

    fn open(&self, url: &Url) -> Result<Stream, TransportError> {
        // to_file_path percent-decodes the path
        let path = url
            .to_file_path()
            .map_err(|_| TransportError::InvalidUrl {
                url: url.to_string(),
                reason: "not a local file path".to_string(),
            })?;

        let file = File::open(&path).map_err(|source| TransportError::Io {
            path: path.clone(),
            source,
        })?;
        let length = file.metadata().ok().map(|m| m.len());
        Ok(Stream::new(Box::new(BufReader::new(file)), length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn test_reads_percent_encoded_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("my file.json");
        std::fs::write(&path, "{\"ok\":true}").unwrap();

        let url = Url::from_file_path(&path).unwrap();
        assert!(url.as_str().contains("my%20file.json"));

        let mut stream = FileProtocol.open(&url).unwrap();
        assert_eq!(stream.length(), Some(11));
        let mut body = String::new();
        stream.read_to_string(&mut body).unwrap();
        assert_eq!(body, "{\"ok\":true}");
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let url = Url::from_file_path(dir.path().join("nope.bin")).unwrap();
        let err = FileProtocol.open(&url).err().unwrap();
        assert!(matches!(err, TransportError::Io { .. }));
    }
}
