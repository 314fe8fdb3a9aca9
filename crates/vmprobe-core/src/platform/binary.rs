//! QEMU executable lookup.
//!
//! A user might symlink one candidate to another, so the same list also
//! drives command-line scope detection (see `CandidateSet::from_paths`).

use crate::config::{Arch, DiscoveryConfig, PathsConfig};
use crate::error::{Result, VmProbeError};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Candidate absolute paths of the QEMU binary, in lookup order.
///
/// # Platform Behavior
/// - **x86_64**: `/usr/libexec/qemu-kvm`, `/usr/bin/qemu-system-x86_64`
/// - **aarch64**: `/usr/libexec/qemu-kvm`, `/usr/bin/qemu-system-aarch64`
pub fn candidate_paths(arch: Arch) -> Vec<PathBuf> {
    vec![
        PathBuf::from(DiscoveryConfig::CANDIDATE_LIBEXEC),
        PathBuf::from(format!(
            "{}{}",
            DiscoveryConfig::SYSTEM_BIN_PREFIX,
            arch.as_str()
        )),
    ]
}

/// Return the first candidate that exists on disk.
pub fn locate_binary(candidates: &[PathBuf]) -> Result<PathBuf> {
    for candidate in candidates {
        if candidate.exists() {
            debug!("Found QEMU binary at {}", candidate.display());
            return Ok(candidate.clone());
        }
        debug!("No QEMU binary at {}", candidate.display());
    }

    Err(VmProbeError::BinaryNotFound {
        attempted: candidates.to_vec(),
    })
}

/// Executable used by the launcher when none is configured: a build tree
/// next to the working directory.
pub fn default_executable(cwd: &Path, arch: Arch) -> PathBuf {
    cwd.join(PathsConfig::DEFAULT_BUILD_DIR)
        .join(arch.system_binary_name())
}
