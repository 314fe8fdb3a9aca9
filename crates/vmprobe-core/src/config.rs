//! Centralized configuration for vmprobe.
//!
//! Compile-time constants for discovery, launch timing and filesystem layout.
//! Per-run settings are injected through `LaunchConfig` and `CandidateSet`.

use crate::error::{Result, VmProbeError};
use std::str::FromStr;
use std::time::Duration;

/// Discovery-related configuration.
pub struct DiscoveryConfig;

impl DiscoveryConfig {
    /// Distribution wrapper shared by every architecture.
    pub const CANDIDATE_LIBEXEC: &'static str = "/usr/libexec/qemu-kvm";
    /// Prefix of the upstream binary; the architecture name is appended.
    pub const SYSTEM_BIN_PREFIX: &'static str = "/usr/bin/qemu-system-";
    pub const PROC_ROOT: &'static str = "/proc";
    pub const EMPTY_RESULT_MESSAGE: &'static str = "No QEMU processes with QMP sockets found";
}

/// Timing for the split launch.
pub struct TimingConfig;

impl TimingConfig {
    /// Upper bound on the wait for the server's rendezvous socket.
    pub const READINESS_TIMEOUT: Duration = Duration::from_secs(10);
    pub const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(100);
    /// Fixed delay used when no readiness signal is available.
    pub const LEGACY_STARTUP_DELAY: Duration = Duration::from_secs(3);
    /// Grace period between SIGTERM and SIGKILL when stopping the server.
    pub const SERVER_STOP_TIMEOUT: Duration = Duration::from_secs(2);
}

/// Filesystem layout.
pub struct PathsConfig;

impl PathsConfig {
    pub const SOCKET_PREFIX: &'static str = "remotesock-";
    pub const LOCK_EXTENSION: &'static str = "lock";
    pub const LOG_EXTENSION: &'static str = "log";
    pub const LOG_TIMESTAMP_FORMAT: &'static str = "%Y%m%d_%H%M%S";
    /// Build directory, relative to the working directory, used when no
    /// executable is given to the launcher.
    pub const DEFAULT_BUILD_DIR: &'static str = "../build";
}

/// Host architectures with a known QEMU binary layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X86_64,
    Aarch64,
}

impl Arch {
    /// Architecture of the running host.
    pub fn current() -> Result<Self> {
        std::env::consts::ARCH.parse()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
        }
    }

    /// File name of the upstream system emulator for this architecture.
    pub fn system_binary_name(&self) -> String {
        format!("qemu-system-{}", self.as_str())
    }
}

impl FromStr for Arch {
    type Err = VmProbeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "x86_64" => Ok(Arch::X86_64),
            "aarch64" => Ok(Arch::Aarch64),
            other => Err(VmProbeError::UnsupportedPlatform {
                arch: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
