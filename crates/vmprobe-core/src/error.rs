//! Error types for vmprobe.
//!
//! Discovery and launch share one error enum so the front end can tell a
//! failed scan apart from a failed launch. Per-process problems during a scan
//! never reach this type; they are logged and skipped by the scanner.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

/// Which half of a split launch an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The device-emulation process that listens on the rendezvous socket.
    Server,
    /// The VM process that dials the rendezvous socket.
    Client,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Server => "server",
            Role::Client => "client",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for vmprobe.
#[derive(Debug, Error)]
pub enum VmProbeError {
    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Platform errors
    #[error("Unsupported platform: {arch}")]
    UnsupportedPlatform { arch: String },

    #[error("No QEMU binary found (tried {attempted:?})")]
    BinaryNotFound { attempted: Vec<PathBuf> },

    // Discovery errors
    #[error("Process scan failed: {message}")]
    ScanFailed {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Invalid endpoint '{input}': {reason}")]
    InvalidEndpoint { input: String, reason: String },

    // Rendezvous errors
    #[error("Rendezvous socket {path:?} exists and cannot be removed")]
    RendezvousCollision {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Rendezvous socket {path:?} is already used by another launch")]
    RendezvousInUse { path: PathBuf },

    // Launch errors
    #[error("Failed to spawn {role} process {program:?}")]
    Spawn {
        role: Role,
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Server process exited before it was ready ({status})")]
    ServerExited { status: ExitStatus },

    #[error("Server did not create {path:?} within {waited:?}")]
    ReadinessTimeout { path: PathBuf, waited: Duration },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for vmprobe operations.
pub type Result<T> = std::result::Result<T, VmProbeError>;

impl From<std::io::Error> for VmProbeError {
    fn from(err: std::io::Error) -> Self {
        VmProbeError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl VmProbeError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        VmProbeError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Whether this error aborted a split launch (as opposed to discovery).
    pub fn is_launch_failure(&self) -> bool {
        matches!(
            self,
            VmProbeError::RendezvousCollision { .. }
                | VmProbeError::RendezvousInUse { .. }
                | VmProbeError::Spawn { .. }
                | VmProbeError::ServerExited { .. }
                | VmProbeError::ReadinessTimeout { .. }
        )
    }

    /// Process exit code the front end reports for this error.
    ///
    /// - 2: configuration or platform problem
    /// - 3: process scan failed
    /// - 4: launch failed
    /// - 1: anything else
    pub fn exit_code(&self) -> i32 {
        match self {
            VmProbeError::UnsupportedPlatform { .. }
            | VmProbeError::BinaryNotFound { .. }
            | VmProbeError::InvalidEndpoint { .. }
            | VmProbeError::Config { .. } => 2,

            VmProbeError::ScanFailed { .. } => 3,

            err if err.is_launch_failure() => 4,

            _ => 1,
        }
    }
}
