use std::fs;
use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// `sockaddr_un.sun_path` capacity, including the trailing NUL.
#[cfg(target_os = "linux")]
const SUN_PATH_CAPACITY: usize = 108;
#[cfg(not(target_os = "linux"))]
const SUN_PATH_CAPACITY: usize = 104;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Device and inode of the socket file we created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SocketIdentity {
    dev: u64,
    ino: u64,
}

impl SocketIdentity {
    fn of(metadata: &fs::Metadata) -> Self {
        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }
}

/// Listening end of the local message bus.
///
/// Publishers reach it through [`BusSocket::connect`]; subscribers `bind` one
/// and read envelopes from each accepted stream. The socket file is removed
/// on drop, but only if it is still the one this value created.
pub struct BusSocket {
    listener: UnixListener,
    path: PathBuf,
    identity: SocketIdentity,
}

impl BusSocket {
    /// Owner-only access.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;

    /// Bind a bus socket at `path` with [`DEFAULT_SOCKET_MODE`](Self::DEFAULT_SOCKET_MODE).
    ///
    /// A leftover socket from an earlier run is replaced. Any other kind of
    /// file at `path` is left alone and reported as a bind error.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref();
        ensure_fits(path)?;
        let bind_err = |source: io::Error| TransportError::Bind {
            path: path.to_path_buf(),
            source,
        };

        remove_stale(path).map_err(bind_err)?;
        let listener = UnixListener::bind(path).map_err(bind_err)?;
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(bind_err)?;
        let identity = fs::symlink_metadata(path)
            .map(|metadata| SocketIdentity::of(&metadata))
            .map_err(bind_err)?;

        info!(path = %path.display(), mode = %format!("{mode:o}"), "bus socket bound");
        Ok(Self {
            listener,
            path: path.to_path_buf(),
            identity,
        })
    }

    /// Wait for the next publisher.
    pub fn accept(&self) -> Result<UnixStream> {
        let (stream, _) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(path = %self.path.display(), "publisher accepted");
        Ok(stream)
    }

    /// Wait up to `timeout` for the next publisher. `Ok(None)` means nobody
    /// connected in time, so callers can check for shutdown and call again.
    ///
    /// The returned stream is in blocking mode.
    pub fn accept_timeout(&self, timeout: Duration) -> Result<Option<UnixStream>> {
        self.listener
            .set_nonblocking(true)
            .map_err(TransportError::Accept)?;
        let deadline = Instant::now() + timeout;

        let accepted = loop {
            match self.listener.accept() {
                Ok((stream, _)) => break Ok(Some(stream)),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    let now = Instant::now();
                    if now >= deadline {
                        break Ok(None);
                    }
                    thread::sleep(ACCEPT_POLL_INTERVAL.min(deadline - now));
                }
                Err(err) => break Err(TransportError::Accept(err)),
            }
        };

        self.listener
            .set_nonblocking(false)
            .map_err(TransportError::Accept)?;
        let Some(stream) = accepted? else {
            return Ok(None);
        };
        stream
            .set_nonblocking(false)
            .map_err(TransportError::Accept)?;
        debug!(path = %self.path.display(), "publisher accepted");
        Ok(Some(stream))
    }

    /// Open a stream to a bound bus socket.
    pub fn connect(path: impl AsRef<Path>) -> Result<UnixStream> {
        let path = path.as_ref();
        ensure_fits(path)?;
        let stream = UnixStream::connect(path).map_err(|source| TransportError::Connect {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "connected to bus");
        Ok(stream)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn ensure_fits(path: &Path) -> Result<()> {
    let len = path.as_os_str().len();
    if len < SUN_PATH_CAPACITY {
        return Ok(());
    }
    Err(TransportError::PathTooLong {
        path: path.to_path_buf(),
        len,
        max: SUN_PATH_CAPACITY - 1,
    })
}

fn remove_stale(path: &Path) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    if !metadata.file_type().is_socket() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "path exists and is not a socket",
        ));
    }
    debug!(path = %path.display(), "replacing stale bus socket");
    fs::remove_file(path)
}

impl Drop for BusSocket {
    fn drop(&mut self) {
        let Ok(metadata) = fs::symlink_metadata(&self.path) else {
            return;
        };
        if metadata.file_type().is_socket() && SocketIdentity::of(&metadata) == self.identity {
            let _ = fs::remove_file(&self.path);
        } else {
            debug!(path = %self.path.display(), "bus socket path was replaced; leaving it");
        }
    }
}

impl std::fmt::Debug for BusSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusSocket").field("path", &self.path).finish()
    }
}
