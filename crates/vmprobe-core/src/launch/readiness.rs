//! Server readiness wait.
//!
//! The client must not dial the rendezvous socket before the server listens
//! on it. The server creates the socket file when it starts listening, so
//! readiness is observed by polling for that file. A fixed delay remains
//! available for servers that give no observable signal.
//!
//! Readiness is never probed by connecting: a vfio-user server accepts a
//! single client, and a probe connection would take its place.

use crate::config::TimingConfig;
use crate::error::{Result, VmProbeError};
use std::path::Path;
use std::time::Duration;
use tokio::process::Child;
use tracing::{debug, info};

/// How to decide that the server is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessProbe {
    /// Poll for the socket file every `interval`, failing after `timeout`.
    SocketFile { timeout: Duration, interval: Duration },
    /// Sleep for a fixed time.
    FixedDelay(Duration),
}

impl Default for ReadinessProbe {
    fn default() -> Self {
        ReadinessProbe::SocketFile {
            timeout: TimingConfig::READINESS_TIMEOUT,
            interval: TimingConfig::READINESS_POLL_INTERVAL,
        }
    }
}

impl ReadinessProbe {
    pub fn socket_file(timeout: Duration) -> Self {
        ReadinessProbe::SocketFile {
            timeout,
            interval: TimingConfig::READINESS_POLL_INTERVAL.min(timeout),
        }
    }

    /// Fixed startup delay, for servers without a readiness signal.
    pub fn legacy_delay() -> Self {
        ReadinessProbe::FixedDelay(TimingConfig::LEGACY_STARTUP_DELAY)
    }

    /// Upper bound on the time `wait_until_ready` can take.
    pub fn bound(&self) -> Duration {
        match self {
            ReadinessProbe::SocketFile { timeout, .. } => *timeout,
            ReadinessProbe::FixedDelay(delay) => *delay,
        }
    }
}

/// Fail if the server has already exited.
fn check_alive(server: &mut Child) -> Result<()> {
    match server.try_wait()? {
        Some(status) => Err(VmProbeError::ServerExited { status }),
        None => Ok(()),
    }
}

/// Wait until the server behind `socket` is ready for the client.
///
/// Returns `ReadinessTimeout` once the probe's bound elapses without the
/// socket appearing, and `ServerExited` if the server dies first.
pub async fn wait_until_ready(
    probe: &ReadinessProbe,
    socket: &Path,
    server: &mut Child,
) -> Result<()> {
    match *probe {
        ReadinessProbe::FixedDelay(delay) => {
            debug!("Waiting {:?} for the server to start", delay);
            tokio::time::sleep(delay).await;
            check_alive(server)
        }
        ReadinessProbe::SocketFile { timeout, interval } => {
            info!(
                "Waiting up to {:?} for server socket {}",
                timeout,
                socket.display()
            );

            let poll = async {
                loop {
                    if tokio::fs::try_exists(socket).await.unwrap_or(false) {
                        return Ok::<(), VmProbeError>(());
                    }
                    check_alive(server)?;
                    tokio::time::sleep(interval).await;
                }
            };

            match tokio::time::timeout(timeout, poll).await {
                Ok(result) => {
                    if result.is_ok() {
                        info!("Server socket {} is ready", socket.display());
                    }
                    result
                }
                Err(_) => Err(VmProbeError::ReadinessTimeout {
                    path: socket.to_path_buf(),
                    waited: timeout,
                }),
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tempfile::TempDir;
    use tokio::process::Command;

    fn sh(script: &str, socket: &Path) -> Child {
        Command::new("/bin/sh")
            .arg("-c")
            .arg(script)
            .arg("sh")
            .arg(socket)
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    #[tokio::test]
    async fn test_ready_when_socket_appears() {
        let temp_dir = TempDir::new().unwrap();
        let socket = temp_dir.path().join("sock");
        let mut server = sh("sleep 0.2; touch \"$1\"; sleep 5", &socket);

        let probe = ReadinessProbe::socket_file(Duration::from_secs(5));
        wait_until_ready(&probe, &socket, &mut server).await.unwrap();
        assert!(socket.exists());
    }

    #[tokio::test]
    async fn test_timeout_when_socket_never_appears() {
        let temp_dir = TempDir::new().unwrap();
        let socket = temp_dir.path().join("sock");
        let mut server = sh("sleep 5", &socket);

        let probe = ReadinessProbe::SocketFile {
            timeout: Duration::from_millis(300),
            interval: Duration::from_millis(50),
        };
        let err = wait_until_ready(&probe, &socket, &mut server)
            .await
            .unwrap_err();

        match err {
            VmProbeError::ReadinessTimeout { path, waited } => {
                assert_eq!(path, socket);
                assert_eq!(waited, Duration::from_millis(300));
            }
            other => panic!("expected ReadinessTimeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_exit_is_detected() {
        let temp_dir = TempDir::new().unwrap();
        let socket = temp_dir.path().join("sock");
        let mut server = sh("exit 3", &socket);

        let probe = ReadinessProbe::socket_file(Duration::from_secs(5));
        let err = wait_until_ready(&probe, &socket, &mut server)
            .await
            .unwrap_err();

        match err {
            VmProbeError::ServerExited { status } => assert_eq!(status.code(), Some(3)),
            other => panic!("expected ServerExited, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fixed_delay() {
        let temp_dir = TempDir::new().unwrap();
        let socket = temp_dir.path().join("sock");
        let mut server = sh("sleep 5", &socket);

        let probe = ReadinessProbe::FixedDelay(Duration::from_millis(50));
        wait_until_ready(&probe, &socket, &mut server).await.unwrap();
    }

    #[test]
    fn test_probe_bounds() {
        assert_eq!(ReadinessProbe::default().bound(), TimingConfig::READINESS_TIMEOUT);
        assert_eq!(
            ReadinessProbe::legacy_delay().bound(),
            TimingConfig::LEGACY_STARTUP_DELAY
        );
        assert_eq!(
            ReadinessProbe::socket_file(Duration::from_millis(10)),
            ReadinessProbe::SocketFile {
                timeout: Duration::from_millis(10),
                interval: Duration::from_millis(10),
            }
        );
    }
}
