use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use ssh2::{ErrorCode, Session, Sftp};
use thiserror::Error;

/// SFTP status code for a missing remote path (SSH_FX_NO_SUCH_FILE).
const SFTP_NO_SUCH_FILE: i32 = 2;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const IO_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_PORT: u16 = 22;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("remote path not found: {0}")]
    NotFound(String),
    #[error("cannot resolve {host}:{port}")]
    Resolve { host: String, port: u16 },
    #[error("authentication failed for {username}@{host}")]
    Auth { username: String, host: String },
    #[error("ssh error: {0}")]
    Ssh(#[from] ssh2::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    fn from_sftp(err: ssh2::Error, path: &str) -> Self {
        if matches!(err.code(), ErrorCode::SFTP(SFTP_NO_SUCH_FILE)) {
            StoreError::NotFound(path.to_string())
        } else {
            StoreError::Ssh(err)
        }
    }
}

/// One remote directory entry, observed at a single point in time.
///
/// Entries are ephemeral: the publisher re-uploads files under new names, so
/// an entry is only trusted for the probe cycle that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub size: u64,
    /// Modification time in unix seconds, as reported by the server.
    pub modified: u64,
}

impl RemoteEntry {
    /// Whether two observations of the same path look like the same write.
    pub fn same_stat(&self, other: &RemoteEntry) -> bool {
        self.size == other.size && self.modified == other.modified
    }
}

/// A connected transfer session.
///
/// `fetch` overwrites `dest` in place; on failure the destination may hold a
/// partial file, which the caller must treat as untrusted.
pub trait RemoteStore: Send {
    fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, StoreError>;
    fn stat(&self, path: &str) -> Result<RemoteEntry, StoreError>;
    fn fetch(&self, path: &str, dest: &Path) -> Result<(), StoreError>;
}

/// Produces independent sessions. Sessions are never shared across workers:
/// each in-flight transfer gets its own connection so failures stay isolated.
pub trait StoreFactory: Send + Sync {
    fn connect(&self) -> Result<Box<dyn RemoteStore>, StoreError>;
}

#[derive(Clone, Deserialize)]
pub struct SftpConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl fmt::Debug for SftpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SftpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl StoreFactory for SftpConfig {
    fn connect(&self) -> Result<Box<dyn RemoteStore>, StoreError> {
        Ok(Box::new(SftpClient::connect(self)?))
    }
}

pub struct SftpClient {
    sftp: Sftp,
    // Keeps the underlying SSH session alive for as long as the SFTP
    // channel is in use.
    _session: Session,
}

impl SftpClient {
    pub fn connect(config: &SftpConfig) -> Result<Self, StoreError> {
        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| StoreError::Resolve {
                host: config.host.clone(),
                port: config.port,
            })?;
        let tcp = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
        tcp.set_read_timeout(Some(IO_TIMEOUT))?;
        tcp.set_write_timeout(Some(IO_TIMEOUT))?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;
        session.userauth_password(&config.username, &config.password)?;
        if !session.authenticated() {
            return Err(StoreError::Auth {
                username: config.username.clone(),
                host: config.host.clone(),
            });
        }

        let sftp = session.sftp()?;
        Ok(Self {
            sftp,
            _session: session,
        })
    }
}

impl RemoteStore for SftpClient {
    fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, StoreError> {
        let entries = self
            .sftp
            .readdir(Path::new(dir))
            .map_err(|err| StoreError::from_sftp(err, dir))?;

        let mut out = Vec::new();
        for (path, stat) in entries {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name == "." || name == ".." || !stat.is_file() {
                continue;
            }
            out.push(RemoteEntry {
                name: name.to_string(),
                size: stat.size.unwrap_or(0),
                modified: stat.mtime.unwrap_or(0),
            });
        }
        Ok(out)
    }

    fn stat(&self, path: &str) -> Result<RemoteEntry, StoreError> {
        let stat = self
            .sftp
            .stat(Path::new(path))
            .map_err(|err| StoreError::from_sftp(err, path))?;
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        Ok(RemoteEntry {
            name,
            size: stat.size.unwrap_or(0),
            modified: stat.mtime.unwrap_or(0),
        })
    }

    fn fetch(&self, path: &str, dest: &Path) -> Result<(), StoreError> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut remote = self
            .sftp
            .open(Path::new(path))
            .map_err(|err| StoreError::from_sftp(err, path))?;
        let mut local = File::create(dest)?;

        let mut buf = vec![0u8; 1024 * 1024];
        loop {
            let read = remote.read(&mut buf)?;
            if read == 0 {
                break;
            }
            local.write_all(&buf[..read])?;
        }
        local.flush()?;
        local.sync_all()?;
        Ok(())
    }
}

/// Joins a remote directory and an entry name with POSIX separators.
pub fn remote_join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        return name.to_string();
    }
    format!("{}/{}", dir.trim_end_matches('/'), name)
}
