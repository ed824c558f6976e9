//! SFTP via ssh2

use super::{Protocol, SessionTarget, Stream, decode_component};
use crate::error::TransportError;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use url::Url;

const DEFAULT_SFTP_PORT: u16 = 22;

pub struct SftpProtocol {
    timeout: Duration,
}

impl SftpProtocol {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// Host, port and login for `url`. A user name is required; without a
/// password the SSH agent is asked instead.
pub(crate) fn session_target(url: &Url) -> Result<SessionTarget, TransportError> {
    let invalid = |reason: &str| TransportError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };
    let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
    if url.username().is_empty() {
        return Err(invalid("sftp URLs need a user name"));
    }
    Ok(SessionTarget {
        host: host.to_string(),
        port: url.port().unwrap_or(DEFAULT_SFTP_PORT),
        user: decode_component(url.username()),
        password: url.password().map(decode_component),
    })
}

impl Protocol for SftpProtocol {
    fn name(&self) -> &str {
        "sftp"
    }

    fn can_handle(&self, scheme: &str) -> bool {
        scheme == "sftp"
    }

    fn open(&self, url: &Url) -> Result<Stream, TransportError> {
        let invalid = |reason: &str| TransportError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };
        let connect_err = |e: &dyn std::fmt::Display| TransportError::Connect {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let target = session_target(url)?;
        let user = target.user.as_str();

        let addr = (target.host.as_str(), target.port)
            .to_socket_addrs()
            .map_err(|e| connect_err(&e))?
            .next()
            .ok_or_else(|| invalid("host did not resolve"))?;
        let tcp = TcpStream::connect_timeout(&addr, self.timeout).map_err(|e| connect_err(&e))?;

        let mut session = ssh2::Session::new().map_err(|e| connect_err(&e))?;
        session.set_timeout(self.timeout.as_millis().min(u32::MAX as u128) as u32);
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| connect_err(&e))?;

        match target.password.as_deref() {
            Some(password) => session
                .userauth_password(user, password)
                .map_err(|e| connect_err(&e))?,
            None => session.userauth_agent(user).map_err(|e| connect_err(&e))?,
        }
        if !session.authenticated() {
            return Err(connect_err(&format!("authentication failed for '{}'", user)));
        }

        // Paths are relative to the login directory
        let decoded = decode_component(url.path());
        let remote_path = decoded.strip_prefix('/').unwrap_or(&decoded).to_string();

        let sftp = session.sftp().map_err(|e| connect_err(&e))?;
        let length = sftp
            .stat(Path::new(&remote_path))
            .ok()
            .and_then(|stat| stat.size);
        let file = sftp
            .open(Path::new(&remote_path))
            .map_err(|e| connect_err(&e))?;

        Ok(Stream::new(
            Box::new(SftpReader {
                file,
                _sftp: sftp,
                _session: session,
            }),
            length,
        ))
    }
}

/// Keeps the SSH session alive for as long as the remote file is read.
///
/// Field order matters: the file handle closes before the channel and session.
struct SftpReader {
    file: ssh2::File,
    _sftp: ssh2::Sftp,
    _session: ssh2::Session,
}

impl Read for SftpReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}
