//! FTP and FTPS via suppaftp
//!
//! Credentials come from the URL userinfo (anonymous when absent). The
//! control connection is upgraded to TLS unless the URL is plain `ftp` and
//! insecure connections are allowed. The session is closed once the data
//! stream reaches EOF.

use super::{Protocol, SessionTarget, Stream, decode_component};
use crate::error::TransportError;
use std::io::Read;
use suppaftp::native_tls::TlsConnector;
use suppaftp::types::FileType;
use suppaftp::{NativeTlsConnector, NativeTlsFtpStream};
use url::Url;

const DEFAULT_FTP_PORT: u16 = 21;

pub struct FtpProtocol {
    allow_insecure: bool,
}

impl FtpProtocol {
    pub fn new(allow_insecure: bool) -> Self {
        Self { allow_insecure }
    }

    fn wants_tls(&self, url: &Url) -> bool {
        url.scheme() == "ftps" || !self.allow_insecure
    }
}

/// Host, port and login for `url`; anonymous with an empty password when
/// the URL carries no user.
pub(crate) fn session_target(url: &Url) -> Result<SessionTarget, TransportError> {
    let host = url.host_str().ok_or_else(|| TransportError::InvalidUrl {
        url: url.to_string(),
        reason: "missing host".to_string(),
    })?;
    let user = match url.username() {
        "" => "anonymous".to_string(),
        name => decode_component(name),
    };
    Ok(SessionTarget {
        host: host.to_string(),
        port: url.port().unwrap_or(DEFAULT_FTP_PORT),
        user,
        password: Some(url.password().map(decode_component).unwrap_or_default()),
    })
}

impl Protocol for FtpProtocol {
    fn name(&self) -> &str {
        "ftp"
    }

    fn can_handle(&self, scheme: &str) -> bool {
        matches!(scheme, "ftp" | "ftps")
    }

    fn open(&self, url: &Url) -> Result<Stream, TransportError> {
        let target = session_target(url)?;
        let host = target.host.as_str();
        let connect_err = |e: &dyn std::fmt::Display| TransportError::Connect {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let mut session =
            NativeTlsFtpStream::connect((host, target.port)).map_err(|e| connect_err(&e))?;

        if self.wants_tls(url) {
            let tls = TlsConnector::new().map_err(|e| connect_err(&e))?;
            session = session
                .into_secure(NativeTlsConnector::from(tls), host)
                .map_err(|e| connect_err(&e))?;
        }

        session
            .login(
                target.user.as_str(),
                target.password.as_deref().unwrap_or_default(),
            )
            .map_err(|e| connect_err(&e))?;
        session
            .transfer_type(FileType::Binary)
            .map_err(|e| connect_err(&e))?;

        // Paths are relative to the login directory
        let decoded = decode_component(url.path());
        let remote_path = decoded.strip_prefix('/').unwrap_or(&decoded).to_string();

        let length = session.size(&remote_path).ok().map(|n| n as u64);
        let data = session
            .retr_as_stream(&remote_path)
            .map_err(|e| connect_err(&e))?;

        Ok(Stream::new(
            Box::new(FtpReader {
                data: Some(Box::new(data)),
                session: Some(session),
            }),
            length,
        ))
    }
}

/// Data connection that finalizes the transfer and logs out at EOF.
struct FtpReader {
    data: Option<Box<dyn Read>>,
    session: Option<NativeTlsFtpStream>,
}

impl FtpReader {
    fn finish(&mut self) -> std::io::Result<()> {
        if let (Some(data), Some(session)) = (self.data.take(), self.session.as_mut()) {
            session
                .finalize_retr_stream(data)
                .map_err(std::io::Error::other)?;
        }
        if let Some(mut session) = self.session.take() {
            session.quit().map_err(std::io::Error::other)?;
        }
        Ok(())
    }
}

impl Read for FtpReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let Some(data) = self.data.as_mut() else {
            return Ok(0);
        };
        let n = data.read(buf)?;
        if n == 0 && !buf.is_empty() {
            // A failed transfer is reported by the server on finalize
            self.finish()?;
        }
        Ok(n)
    }
}

impl Drop for FtpReader {
    fn drop(&mut self) {
        // Reader abandoned before EOF: drop the data connection, then log out
        self.data.take();
        if let Some(mut session) = self.session.take() {
            let _ = session.quit();
        }
    }
}
