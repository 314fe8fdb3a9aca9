//! Platform-specific process access.
//!
//! Discovery needs two things from the host: the set of live process IDs and,
//! per ID, the raw NUL-separated argument vector. Both are behind the
//! `ProcessTable` trait so the scanner can run against `/proc`, sysinfo, or a
//! fixture in tests.

use crate::config::DiscoveryConfig;
use crate::error::{Result, VmProbeError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tracing::debug;

/// Source of live processes and their command lines.
pub trait ProcessTable: Send + Sync {
    /// List the IDs of all live processes, in ascending order.
    ///
    /// An error here means the whole scan failed.
    fn list_pids(&self) -> Result<Vec<u32>>;

    /// Read the raw argument vector of `pid`.
    ///
    /// Returns `Ok(None)` when the process no longer exists; that is the normal
    /// outcome of process churn during a scan, not an error.
    fn read_cmdline(&self, pid: u32) -> Result<Option<Vec<u8>>>;
}

/// Process table backed by a procfs mount.
#[derive(Debug, Clone)]
pub struct ProcFsTable {
    root: PathBuf,
}

impl ProcFsTable {
    /// Process table rooted at `/proc`.
    pub fn new() -> Self {
        Self::with_root(DiscoveryConfig::PROC_ROOT)
    }

    /// Process table rooted at an arbitrary directory laid out like procfs.
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Default for ProcFsTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for ProcFsTable {
    fn list_pids(&self) -> Result<Vec<u32>> {
        let entries = fs::read_dir(&self.root).map_err(|e| VmProbeError::ScanFailed {
            message: format!("cannot list {}", self.root.display()),
            source: Some(e),
        })?;

        let mut pids: Vec<u32> = entries
            .flatten()
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .collect();
        pids.sort_unstable();
        Ok(pids)
    }

    fn read_cmdline(&self, pid: u32) -> Result<Option<Vec<u8>>> {
        let path = self.root.join(pid.to_string()).join("cmdline");
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if is_vanished(&e) => {
                debug!("Process {} has already terminated", pid);
                Ok(None)
            }
            Err(e) => Err(VmProbeError::io_with_path(e, path)),
        }
    }
}

/// Whether a read error means the process exited under us.
fn is_vanished(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::NotFound {
        return true;
    }

    #[cfg(unix)]
    {
        err.raw_os_error() == Some(nix::errno::Errno::ESRCH as i32)
    }

    #[cfg(not(unix))]
    {
        false
    }
}

/// Process table backed by sysinfo, for hosts without procfs.
///
/// The process list is captured by `list_pids`; `read_cmdline` answers from
/// that snapshot, so a process missing from it reads as vanished.
pub struct SysinfoTable {
    system: RwLock<System>,
}

impl SysinfoTable {
    pub fn new() -> Self {
        Self {
            system: RwLock::new(System::new()),
        }
    }
}

impl Default for SysinfoTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SysinfoTable {
    fn list_pids(&self) -> Result<Vec<u32>> {
        let mut system = self
            .system
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::new().with_cmd(UpdateKind::Always),
        );

        let mut pids: Vec<u32> = system.processes().keys().map(|pid| pid.as_u32()).collect();
        pids.sort_unstable();
        Ok(pids)
    }

    fn read_cmdline(&self, pid: u32) -> Result<Option<Vec<u8>>> {
        let system = self
            .system
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let Some(process) = system.process(sysinfo::Pid::from_u32(pid)) else {
            debug!("Process {} has already terminated", pid);
            return Ok(None);
        };

        // Rebuild the procfs layout: every argument followed by a NUL.
        let mut blob = Vec::new();
        for arg in process.cmd() {
            let arg: &std::ffi::OsStr = arg.as_ref();
            blob.extend_from_slice(arg.as_encoded_bytes());
            blob.push(0);
        }
        Ok(Some(blob))
    }
}

/// Ask a process to terminate with SIGTERM.
///
/// Returns `false` if the process was already gone.
///
/// # Platform Behavior
/// - **Linux/macOS**: `kill(pid, SIGTERM)`
/// - **Other**: not supported, always returns `false`
pub fn terminate_process(pid: u32) -> Result<bool> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid).map_err(|_| VmProbeError::Config {
            message: format!("pid {} out of range", pid),
        })?;

        debug!("Sending SIGTERM to process {}", pid);
        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) => Ok(true),
            Err(nix::errno::Errno::ESRCH) => Ok(false),
            Err(e) => Err(VmProbeError::Io {
                message: format!("failed to send SIGTERM to {}: {}", pid, e),
                path: None,
                source: Some(io::Error::from(e)),
            }),
        }
    }

    #[cfg(not(unix))]
    {
        tracing::warn!("Process termination not implemented for this platform ({})", pid);
        Ok(false)
    }
}
