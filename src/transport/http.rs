//! HTTP and HTTPS via ureq

use super::{Protocol, Stream};
use crate::error::TransportError;
use std::time::Duration;
use url::Url;

const USER_AGENT: &str = concat!("salt/", env!("CARGO_PKG_VERSION"));

pub struct HttpProtocol {
    allow_insecure: bool,
    timeout: Duration,
}

impl HttpProtocol {
    pub fn new(allow_insecure: bool, timeout: Duration) -> Self {
        Self {
            allow_insecure,
            timeout,
        }
    }

    /// Plain http is upgraded to https unless insecure connections are allowed.
    fn effective_url(&self, url: &Url) -> Url {
        let mut url = url.clone();
        if url.scheme() == "http" && !self.allow_insecure {
            url.set_scheme("https").ok();
        }
        url
    }
}

impl Protocol for HttpProtocol {
    fn name(&self) -> &str {
        "http"
    }

    fn can_handle(&self, scheme: &str) -> bool {
        matches!(scheme, "http" | "https")
    }

    fn open(&self, url: &Url) -> Result<Stream, TransportError> {
        let url = self.effective_url(url);

        let response = ureq::get(url.as_str())
            .timeout(self.timeout)
            .set("User-Agent", USER_AGENT)
            .call()
            .map_err(|e| match e {
                ureq::Error::Status(status, _) => TransportError::Status {
                    url: url.to_string(),
                    status,
                },
                ureq::Error::Transport(t) => TransportError::Connect {
                    url: url.to_string(),
                    reason: t.to_string(),
                },
            })?;

        let length = response
            .header("Content-Length")
            .and_then(|v| v.trim().parse::<u64>().ok());
        Ok(Stream::new(response.into_reader(), length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn protocol(allow_insecure: bool) -> HttpProtocol {
        HttpProtocol::new(allow_insecure, Duration::from_secs(5))
    }

    #[test]
    fn test_http_upgraded_when_insecure_disallowed() {
        let url = Url::parse("http://example.com:8080/file.bin").unwrap();
        let effective = protocol(false).effective_url(&url);
        assert_eq!(effective.scheme(), "https");
        assert_eq!(effective.port(), Some(8080));
        assert_eq!(effective.path(), "/file.bin");
    }

    #[test]
    fn test_http_kept_when_insecure_allowed() {
        let url = Url::parse("http://example.com/file.bin").unwrap();
        assert_eq!(protocol(true).effective_url(&url).scheme(), "http");
    }

    #[test]
    fn test_https_untouched() {
        let url = Url::parse("https://example.com/file.bin").unwrap();
        assert_eq!(protocol(false).effective_url(&url), url);
    }

    #[test]
    fn test_nonexistent_domain_is_connect_error() {
        let url = Url::parse("https://this-domain-does-not-exist-12345.invalid/").unwrap();
        let err = protocol(false).open(&url).err().unwrap();
        assert!(matches!(err, TransportError::Connect { .. }));
    }

    mod mock_tests {
        use super::*;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        #[tokio::test]
        async fn test_get_streams_body_with_length() {
            let mock_server = MockServer::start().await;

            Mock::given(method("GET"))
                .and(path("/x.bin"))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(b"0123456789".to_vec()))
                .mount(&mock_server)
                .await;

            let url = Url::parse(&format!("{}/x.bin", mock_server.uri())).unwrap();
            let mut stream = protocol(true).open(&url).unwrap();
            assert_eq!(stream.length(), Some(10));

            let mut body = Vec::new();
            stream.read_to_end(&mut body).unwrap();
            assert_eq!(body, b"0123456789");
        }

        #[tokio::test]
        async fn test_404_is_status_error() {
            let mock_server = MockServer::start().await;

            Mock::given(method("GET"))
                .and(path("/missing"))
                .respond_with(ResponseTemplate::new(404))
                .mount(&mock_server)
                .await;

            let url = Url::parse(&format!("{}/missing", mock_server.uri())).unwrap();
            let err = protocol(true).open(&url).err().unwrap();
            assert!(matches!(err, TransportError::Status { status: 404, .. }));
        }
    }
}
