//! vfio-user split launch.
//!
//! Runs a QEMU device server and a QEMU VM client that meet over a unix
//! rendezvous socket.
//!
//! # Launch Sequence
//!
//! 1. **Allocate** a rendezvous path (unique, or a locked fixed path)
//! 2. **Start** the server and wait until its socket exists
//! 3. **Start** the client pointed at the same path
//! 4. **Wait** for the client, then release the path
//!
//! # Example
//!
//! ```rust,no_run
//! use vmprobe_core::launch::{DeviceProfile, LaunchConfig, SplitLauncher};
//!
//! #[tokio::main]
//! async fn main() -> vmprobe_core::Result<()> {
//!     let config = LaunchConfig::new(
//!         "../build/qemu-system-x86_64",
//!         "/images/ol7.qcow2",
//!         DeviceProfile::megasas("/images/test.qcow2"),
//!     );
//!     let launcher = SplitLauncher::new(config)?;
//!
//!     let outcome = launcher.run().await?;
//!     println!("client exited with {:?}", outcome.exit_code());
//!     Ok(())
//! }
//! ```

mod orchestrator;
mod readiness;
mod spec;

pub use orchestrator::{
    DetachedPair, LaunchConfig, LaunchOutcome, LaunchSettings, LaunchState, SplitLauncher,
};
pub use readiness::{wait_until_ready, ReadinessProbe};
pub use spec::{
    qemu_escape, ClientOptions, DeviceProfile, LaunchPlan, ProcessSpec, QemuLaunchPlan,
    ServerOptions,
};
