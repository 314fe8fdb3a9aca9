//! Split launch orchestration.
//!
//! A launch runs through
//! `Idle -> ServerStarting -> ServerReady -> ClientStarting -> Running -> Terminated`,
//! or ends in `Failed`. The rendezvous socket is allocated before anything is
//! spawned and released on every exit path.

use super::readiness::{wait_until_ready, ReadinessProbe};
use super::spec::{
    ClientOptions, DeviceProfile, LaunchPlan, ProcessSpec, QemuLaunchPlan, ServerOptions,
};
use crate::config::{PathsConfig, TimingConfig};
use crate::error::{Result, Role, VmProbeError};
use crate::platform;
use crate::rendezvous::{RendezvousSocket, RendezvousSocketManager};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Mutex;
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

/// Where a launch is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    Idle,
    ServerStarting,
    ServerReady,
    ClientStarting,
    Running,
    Terminated,
    Failed,
}

/// Launch behavior independent of what is being launched.
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    /// Directory for generated rendezvous sockets.
    pub socket_dir: PathBuf,
    /// Use this exact rendezvous path instead of generating one.
    pub socket_path: Option<PathBuf>,
    pub readiness: ReadinessProbe,
    /// Directory for per-role stdout/stderr logs. Children inherit our stdio
    /// when unset.
    pub log_dir: Option<PathBuf>,
    /// Stop the server once the client has exited.
    pub terminate_server_on_exit: bool,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            socket_dir: std::env::temp_dir(),
            socket_path: None,
            readiness: ReadinessProbe::default(),
            log_dir: None,
            terminate_server_on_exit: false,
        }
    }
}

/// Configuration for a QEMU split launch.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// QEMU binary used for both roles.
    pub executable_path: PathBuf,
    /// Disk image the client boots from.
    pub boot_image: PathBuf,
    /// Device the server emulates.
    pub device: DeviceProfile,
    pub server: ServerOptions,
    pub client: ClientOptions,
    pub settings: LaunchSettings,
}

impl LaunchConfig {
    /// Launch exporting `device` to a VM booting `boot_image`.
    pub fn new(
        executable_path: impl AsRef<Path>,
        boot_image: impl AsRef<Path>,
        device: DeviceProfile,
    ) -> Self {
        Self {
            executable_path: executable_path.as_ref().to_path_buf(),
            boot_image: boot_image.as_ref().to_path_buf(),
            device,
            server: ServerOptions::default(),
            client: ClientOptions::default(),
            settings: LaunchSettings::default(),
        }
    }

    /// Set the emulated device.
    pub fn with_device(mut self, device: DeviceProfile) -> Self {
        self.device = device;
        self
    }

    /// Set the directory generated rendezvous sockets live in.
    pub fn with_socket_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.settings.socket_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Use a fixed rendezvous path.
    pub fn with_socket_path(mut self, path: impl AsRef<Path>) -> Self {
        self.settings.socket_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the readiness probe.
    pub fn with_readiness(mut self, readiness: ReadinessProbe) -> Self {
        self.settings.readiness = readiness;
        self
    }

    /// Set the log directory.
    pub fn with_log_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.settings.log_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Set the client options.
    pub fn with_client(mut self, client: ClientOptions) -> Self {
        self.client = client;
        self
    }

    /// Set the server options.
    pub fn with_server(mut self, server: ServerOptions) -> Self {
        self.server = server;
        self
    }

    /// Stop the server after the client exits.
    pub fn with_terminate_server_on_exit(mut self, terminate: bool) -> Self {
        self.settings.terminate_server_on_exit = terminate;
        self
    }

    /// Check that the binary and images exist.
    pub fn validate(&self) -> Result<()> {
        if !self.executable_path.exists() {
            return Err(VmProbeError::BinaryNotFound {
                attempted: vec![self.executable_path.clone()],
            });
        }

        let images = std::iter::once(self.boot_image.as_path()).chain(self.device.image());
        for image in images {
            if !image.exists() {
                return Err(VmProbeError::Config {
                    message: format!("image not found: {}", image.display()),
                });
            }
        }
        Ok(())
    }

    fn into_parts(self) -> (QemuLaunchPlan, LaunchSettings) {
        let plan = QemuLaunchPlan {
            executable: self.executable_path,
            boot_image: self.boot_image,
            device: self.device,
            server: self.server,
            client: self.client,
        };
        (plan, self.settings)
    }
}

/// Result of a completed launch.
#[derive(Debug)]
pub struct LaunchOutcome {
    /// Exit status of the client.
    pub client_status: ExitStatus,
    /// Rendezvous path the pair used. Already removed.
    pub socket_path: PathBuf,
    pub server_pid: Option<u32>,
    pub client_pid: Option<u32>,
}

impl LaunchOutcome {
    /// Client exit code, `None` if it was killed by a signal.
    pub fn exit_code(&self) -> Option<i32> {
        self.client_status.code()
    }

    pub fn success(&self) -> bool {
        self.client_status.success()
    }
}

/// Result of a detached launch: both processes running, nobody waiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachedPair {
    pub server_pid: Option<u32>,
    pub client_pid: Option<u32>,
    /// Rendezvous path, now owned by the server.
    pub socket_path: PathBuf,
}

/// Runs a server and a client that rendezvous over a unix socket.
pub struct SplitLauncher<P: LaunchPlan = QemuLaunchPlan> {
    plan: P,
    settings: LaunchSettings,
    sockets: RendezvousSocketManager,
    state: Mutex<LaunchState>,
}

impl SplitLauncher<QemuLaunchPlan> {
    /// QEMU launcher. Fails if the binary or an image is missing.
    pub fn new(config: LaunchConfig) -> Result<Self> {
        config.validate()?;
        let (plan, settings) = config.into_parts();
        Ok(Self::with_plan(plan, settings))
    }
}

impl<P: LaunchPlan> SplitLauncher<P> {
    /// Launcher for an arbitrary pair of process specifications.
    pub fn with_plan(plan: P, settings: LaunchSettings) -> Self {
        Self {
            plan,
            sockets: RendezvousSocketManager::new(&settings.socket_dir),
            settings,
            state: Mutex::new(LaunchState::Idle),
        }
    }

    /// Current (or final) state of the most recent launch.
    pub fn state(&self) -> LaunchState {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, next: LaunchState) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        debug!("Launch state {:?} -> {:?}", *state, next);
        *state = next;
    }

    fn allocate_socket(&self) -> Result<RendezvousSocket> {
        match &self.settings.socket_path {
            Some(path) => self.sockets.allocate_fixed(path),
            None => self.sockets.allocate(),
        }
    }

    /// Launch both processes, wait for the client to exit, then release the
    /// rendezvous socket.
    ///
    /// A nonzero client exit is reported in the outcome, not as an error.
    pub async fn run(&self) -> Result<LaunchOutcome> {
        self.transition(LaunchState::Idle);
        let mut socket = self.allocate_socket().inspect_err(|_| {
            self.transition(LaunchState::Failed);
        })?;

        let result = self.run_pair(&socket).await;
        socket.release();

        match result {
            Ok(outcome) => {
                self.transition(LaunchState::Terminated);
                info!(
                    "Client exited with {}, released {}",
                    outcome.client_status,
                    outcome.socket_path.display()
                );
                Ok(outcome)
            }
            Err(e) => {
                self.transition(LaunchState::Failed);
                error!("Launch failed: {}", e);
                Err(e)
            }
        }
    }

    async fn run_pair(&self, socket: &RendezvousSocket) -> Result<LaunchOutcome> {
        let (mut server, mut client) = self.start_pair(socket.path(), false).await?;
        let server_pid = server.id();
        let client_pid = client.id();

        let client_status = client.wait().await?;

        if self.settings.terminate_server_on_exit {
            stop_server(&mut server).await;
        }

        Ok(LaunchOutcome {
            client_status,
            socket_path: socket.path().to_path_buf(),
            server_pid,
            client_pid,
        })
    }

    /// Start server, wait for readiness, start client.
    ///
    /// On any failure after the server is up, the server is stopped before
    /// the error is returned.
    async fn start_pair(&self, socket: &Path, detach: bool) -> Result<(Child, Child)> {
        self.transition(LaunchState::ServerStarting);
        let mut server = self.spawn(Role::Server, &self.plan.server_spec(socket), detach)?;
        info!("Launched server process with PID {:?}", server.id());

        if let Err(e) = wait_until_ready(&self.settings.readiness, socket, &mut server).await {
            stop_server(&mut server).await;
            return Err(e);
        }
        self.transition(LaunchState::ServerReady);

        self.transition(LaunchState::ClientStarting);
        let client = match self.spawn(Role::Client, &self.plan.client_spec(socket), detach) {
            Ok(client) => client,
            Err(e) => {
                stop_server(&mut server).await;
                return Err(e);
            }
        };
        info!("Launched client process with PID {:?}", client.id());
        self.transition(LaunchState::Running);

        Ok((server, client))
    }

    /// Launch both processes and return without waiting for either.
    ///
    /// Each child gets its own process group, so neither is tied to this
    /// process. The rendezvous socket stays on disk for the server; a failed
    /// launch still removes it.
    pub async fn spawn_detached(&self) -> Result<DetachedPair> {
        self.transition(LaunchState::Idle);
        let socket = self.allocate_socket().inspect_err(|_| {
            self.transition(LaunchState::Failed);
        })?;

        match self.start_pair(socket.path(), true).await {
            Ok((server, client)) => {
                let pair = DetachedPair {
                    server_pid: server.id(),
                    client_pid: client.id(),
                    socket_path: socket.into_path(),
                };
                info!("Detached launch running: {:?}", pair);
                Ok(pair)
            }
            Err(e) => {
                self.transition(LaunchState::Failed);
                error!("Launch failed: {}", e);
                Err(e)
            }
        }
    }

    fn spawn(&self, role: Role, spec: &ProcessSpec, detach: bool) -> Result<Child> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        cmd.stdin(Stdio::null());

        if let Some(dir) = &self.settings.log_dir {
            let (stdout, stderr) = open_log(dir, role)?;
            cmd.stdout(stdout);
            cmd.stderr(stderr);
        }

        #[cfg(unix)]
        if detach {
            cmd.process_group(0);
        }
        #[cfg(not(unix))]
        let _ = detach;

        debug!("Spawning {}: {:?} {:?}", role, spec.program, spec.args);
        cmd.spawn().map_err(|source| {
            error!("Failed to spawn {} process: {}", role, source);
            VmProbeError::Spawn {
                role,
                program: spec.program.clone(),
                source,
            }
        })
    }
}

/// Open `<dir>/<role>_<timestamp>.log` for a child's stdout and stderr.
fn open_log(dir: &Path, role: Role) -> Result<(Stdio, Stdio)> {
    fs::create_dir_all(dir).map_err(|e| VmProbeError::io_with_path(e, dir))?;

    let timestamp = chrono::Local::now().format(PathsConfig::LOG_TIMESTAMP_FORMAT);
    let path = dir.join(format!(
        "{}_{}.{}",
        role,
        timestamp,
        PathsConfig::LOG_EXTENSION
    ));

    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| VmProbeError::io_with_path(e, &path))?;
    let stdout_file = file
        .try_clone()
        .map_err(|e| VmProbeError::io_with_path(e, &path))?;

    info!("Logging {} output to {}", role, path.display());
    Ok((Stdio::from(stdout_file), Stdio::from(file)))
}

/// Stop the server: SIGTERM, bounded wait, then SIGKILL.
async fn stop_server(server: &mut Child) {
    if let Ok(Some(status)) = server.try_wait() {
        debug!("Server already exited with {}", status);
        return;
    }

    if let Some(pid) = server.id() {
        if let Err(e) = platform::terminate_process(pid) {
            warn!("Failed to signal server {}: {}", pid, e);
        }
    }

    match tokio::time::timeout(TimingConfig::SERVER_STOP_TIMEOUT, server.wait()).await {
        Ok(Ok(status)) => debug!("Server exited with {}", status),
        Ok(Err(e)) => warn!("Failed to wait for server: {}", e),
        Err(_) => {
            warn!("Server still running, killing it");
            if let Err(e) = server.kill().await {
                warn!("Failed to kill server: {}", e);
            }
        }
    }
}
