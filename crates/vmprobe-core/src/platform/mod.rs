//! Platform abstraction layer.
//!
//! All host-specific behavior lives here rather than in the discovery and
//! launch modules:
//! - `binary` - Candidate QEMU executable paths and their lookup
//! - `process` - Process table access and process termination

pub mod binary;
pub mod process;

pub use binary::{candidate_paths, default_executable, locate_binary};
pub use process::{terminate_process, ProcFsTable, ProcessTable, SysinfoTable};
