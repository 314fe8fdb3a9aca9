//! vmprobe core - QMP endpoint discovery and vfio-user split launches.
//!
//! Two independent halves:
//! - [`discovery`] scans the process table for running QEMU instances and
//!   reports the address of each one's QMP control socket.
//! - [`launch`] starts a QEMU device server and a QEMU VM client that share a
//!   device over a vfio-user rendezvous socket.
//!
//! # Example
//!
//! ```rust,no_run
//! use vmprobe_core::{Arch, CandidateSet, EndpointScanner};
//! use vmprobe_core::platform::candidate_paths;
//!
//! fn main() -> vmprobe_core::Result<()> {
//!     let scanner = EndpointScanner::new(CandidateSet::from_paths(&candidate_paths(
//!         Arch::current()?,
//!     )));
//!
//!     let endpoints = scanner.enumerate()?;
//!     println!("Found {} QMP endpoints", endpoints.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod discovery;
pub mod error;
pub mod launch;
pub mod platform;
pub mod rendezvous;

// Re-export commonly used types
pub use config::Arch;
pub use discovery::{
    CandidateSet, DiscoveredEndpoint, DiscoveryRequest, Endpoint, EndpointScanner,
};
pub use error::{Result, Role, VmProbeError};
pub use launch::{
    DetachedPair, DeviceProfile, LaunchConfig, LaunchOutcome, LaunchState, ReadinessProbe,
    SplitLauncher,
};
pub use platform::{ProcFsTable, ProcessTable, SysinfoTable};
pub use rendezvous::{RendezvousSocket, RendezvousSocketManager};
