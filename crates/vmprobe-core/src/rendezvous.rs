//! Rendezvous socket paths for split launches.
//!
//! The server binds a unix socket at the rendezvous path and the client dials
//! it. The path must not exist when the server starts, and it must be removed
//! once the client is gone, even if the launch failed half way.
//!
//! Generated paths carry a random suffix, so concurrent launches never share
//! one. A fixed path is also supported; it is guarded by an exclusive lock on
//! `<path>.lock` (the extension is appended, never substituted) so two
//! launches sharing it are rejected rather than racing.

use crate::config::PathsConfig;
use crate::error::{Result, VmProbeError};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Lifecycle of a rendezvous path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Unallocated,
    /// Path cleared and handed to the server.
    Bound,
    Released,
}

fn random_suffix() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Allocates and reclaims rendezvous socket paths under one directory.
#[derive(Debug, Clone)]
pub struct RendezvousSocketManager {
    socket_dir: PathBuf,
    suffix: fn() -> String,
}

impl RendezvousSocketManager {
    /// Manager allocating `<socket_dir>/remotesock-<uuid>` paths.
    pub fn new(socket_dir: impl AsRef<Path>) -> Self {
        Self {
            socket_dir: socket_dir.as_ref().to_path_buf(),
            suffix: random_suffix,
        }
    }

    /// Manager whose generated names end in `suffix()` instead of a uuid.
    #[cfg(test)]
    fn with_suffix(socket_dir: impl AsRef<Path>, suffix: fn() -> String) -> Self {
        Self {
            socket_dir: socket_dir.as_ref().to_path_buf(),
            suffix,
        }
    }

    /// A fresh unique path under the socket directory. Nothing is touched on
    /// disk.
    pub fn generate_path(&self) -> PathBuf {
        self.socket_dir
            .join(format!("{}{}", PathsConfig::SOCKET_PREFIX, (self.suffix)()))
    }

    /// Allocate a unique rendezvous path, clearing any stale leftover.
    pub fn allocate(&self) -> Result<RendezvousSocket> {
        let path = self.generate_path();
        remove_stale(&path)?;
        Ok(RendezvousSocket::bound(path, None))
    }

    /// Claim a caller-chosen fixed path.
    ///
    /// Fails with `RendezvousInUse` while another launch holds the same path.
    pub fn allocate_fixed(&self, path: impl AsRef<Path>) -> Result<RendezvousSocket> {
        let path = path.as_ref().to_path_buf();
        let lock_path = lock_path_for(&path)?;

        let lock = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| VmProbeError::io_with_path(e, &lock_path))?;

        if let Err(e) = lock.try_lock_exclusive() {
            debug!("Lock {} is held: {}", lock_path.display(), e);
            return Err(VmProbeError::RendezvousInUse { path });
        }

        if let Err(e) = remove_stale(&path) {
            drop(lock);
            let _ = fs::remove_file(&lock_path);
            return Err(e);
        }
        Ok(RendezvousSocket::bound(path, Some((lock, lock_path))))
    }

    /// Remove the socket file at `path` if present.
    ///
    /// A missing file is not an error; any other failure is logged and
    /// swallowed, since release runs on cleanup paths.
    pub fn release(path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => debug!("Removed rendezvous socket {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove rendezvous socket {}: {}",
                path.display(),
                e
            ),
        }
    }
}

/// `<path>.lock`, next to the socket.
///
/// Distinct socket names map to distinct locks, and a socket named `*.lock`
/// never doubles as its own lock.
fn lock_path_for(path: &Path) -> Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| VmProbeError::Config {
        message: format!("fixed socket path {} has no file name", path.display()),
    })?;

    let mut lock_name = name.to_os_string();
    lock_name.push(".");
    lock_name.push(PathsConfig::LOCK_EXTENSION);
    Ok(path.with_file_name(lock_name))
}

/// Delete a leftover socket from a previous run.
fn remove_stale(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            warn!("Removed stale rendezvous socket {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(VmProbeError::RendezvousCollision {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// An allocated rendezvous path. Released explicitly or on drop.
#[derive(Debug)]
pub struct RendezvousSocket {
    path: PathBuf,
    state: SocketState,
    lock: Option<(File, PathBuf)>,
}

impl RendezvousSocket {
    fn bound(path: PathBuf, lock: Option<(File, PathBuf)>) -> Self {
        info!("Allocated rendezvous socket {}", path.display());
        Self {
            path,
            state: SocketState::Bound,
            lock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    /// Remove the socket file and drop any fixed-path lock. Idempotent.
    pub fn release(&mut self) {
        if self.state == SocketState::Released {
            return;
        }

        RendezvousSocketManager::release(&self.path);
        if let Some((lock, lock_path)) = self.lock.take() {
            let _ = FileExt::unlock(&lock);
            drop(lock);
            let _ = fs::remove_file(&lock_path);
        }
        self.state = SocketState::Released;
    }

    /// Give up ownership without removing the file, returning the path.
    ///
    /// Used when the server outlives this process and owns the socket.
    pub fn into_path(mut self) -> PathBuf {
        self.state = SocketState::Released;
        std::mem::take(&mut self.path)
    }
}

impl Drop for RendezvousSocket {
    fn drop(&mut self) {
        self.release();
    }
}
