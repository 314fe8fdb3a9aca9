//! QMP endpoint discovery.
//!
//! Finds the monitor sockets of running QEMU processes by reading their
//! command lines.
//!
//! # Detection Strategy
//!
//! For every live process:
//! 1. **Read** the NUL-separated argument vector (vanished processes are skipped)
//! 2. **Scope** it to known QEMU binaries (`CandidateSet`)
//! 3. **Extract** the endpoint: explicit `-qmp` first, then a control-mode
//!    `-mon` resolved through its `-chardev`
//!
//! # Example
//!
//! ```rust,no_run
//! use vmprobe_core::config::Arch;
//! use vmprobe_core::discovery::{CandidateSet, EndpointScanner};
//! use vmprobe_core::platform::candidate_paths;
//!
//! fn main() -> vmprobe_core::Result<()> {
//!     let candidates = CandidateSet::from_paths(&candidate_paths(Arch::current()?));
//!     let scanner = EndpointScanner::new(candidates);
//!
//!     for endpoint in scanner.enumerate()? {
//!         println!("{}", endpoint.address());
//!     }
//!     Ok(())
//! }
//! ```

mod cmdline;
mod endpoint;
mod extract;
mod scanner;

pub use cmdline::CommandLine;
pub use endpoint::Endpoint;
pub use extract::{
    extract, CandidateSet, ControlMonitorStrategy, EndpointExtractor, EndpointStrategy,
    QmpFlagStrategy,
};
pub use scanner::{DiscoveredEndpoint, DiscoveryRequest, EndpointScanner};
