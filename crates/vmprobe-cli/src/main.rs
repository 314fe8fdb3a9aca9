//! vmprobe - QMP endpoint discovery and vfio-user split launches.
//!
//! `vmprobe discover` lists the QMP sockets of running QEMU processes, one
//! address per line, for tools that attach to the monitor. `vmprobe launch`
//! starts a QEMU device server and a QEMU VM client around a shared vfio-user
//! socket and exits with the client's exit code.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vmprobe_core::config::DiscoveryConfig;
use vmprobe_core::launch::{ClientOptions, ServerOptions};
use vmprobe_core::platform::{candidate_paths, default_executable, locate_binary};
use vmprobe_core::{
    Arch, CandidateSet, DeviceProfile, DiscoveryRequest, Endpoint, EndpointScanner, LaunchConfig,
    ProcFsTable, ProcessTable, ReadinessProbe, SplitLauncher, SysinfoTable, VmProbeError,
};

/// Exit code after an interrupt, as a shell reports SIGINT.
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "vmprobe")]
#[command(about = "QMP endpoint discovery and vfio-user split launches for QEMU")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List QMP sockets of running QEMU processes
    Discover(DiscoverArgs),
    /// Launch a vfio-user device server and a VM client
    Launch(LaunchArgs),
}

#[derive(clap::Args, Debug)]
struct DiscoverArgs {
    /// Use this monitor address instead of scanning (unix:PATH, tcp:HOST:PORT)
    #[arg(long)]
    socket: Option<String>,

    /// QEMU executable path to treat as in scope (repeatable; defaults to the
    /// platform's known locations)
    #[arg(long = "candidate")]
    candidates: Vec<PathBuf>,

    /// Where to read process command lines from
    #[arg(long, value_enum, default_value_t = ProcSource::Procfs)]
    proc_source: ProcSource,

    /// Print a JSON array of endpoint objects
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProcSource {
    Procfs,
    Sysinfo,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DeviceKind {
    Megasas,
    E1000,
}

#[derive(clap::Args, Debug)]
struct LaunchArgs {
    /// Boot disk image for the VM client
    #[arg(short, long)]
    boot: PathBuf,

    /// Disk image backing the emulated megasas device
    #[arg(short, long, required_if_eq("device", "megasas"))]
    test: Option<PathBuf>,

    /// QEMU binary (defaults to ../build/qemu-system-<arch>)
    #[arg(long)]
    qemu: Option<PathBuf>,

    /// Device emulated by the server
    #[arg(long, value_enum, default_value_t = DeviceKind::Megasas)]
    device: DeviceKind,

    /// Directory for generated rendezvous sockets
    #[arg(long)]
    socket_dir: Option<PathBuf>,

    /// Fixed rendezvous socket path
    #[arg(long, conflicts_with = "socket_dir")]
    socket_path: Option<PathBuf>,

    /// Readiness timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Sleep a fixed time instead of waiting for the server socket
    #[arg(long, conflicts_with = "timeout_ms")]
    fixed_delay: bool,

    /// Directory for server and client logs
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Start the client as a migration destination on this URI
    #[arg(long)]
    incoming: Option<String>,

    /// Enable migration support on the vfio-user device
    #[arg(long)]
    enable_migration: bool,

    /// Human monitor socket for the server
    #[arg(long)]
    server_monitor: Option<PathBuf>,

    /// Human monitor socket for the client
    #[arg(long)]
    client_monitor: Option<PathBuf>,

    /// Return once both processes are running
    #[arg(long, conflicts_with = "stop_server")]
    detach: bool,

    /// Stop the server after the client exits
    #[arg(long)]
    stop_server: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    let code = match run(args.command).await {
        Ok(code) => code,
        Err(err) => {
            error!("{:#}", err);
            err.downcast_ref::<VmProbeError>()
                .map(VmProbeError::exit_code)
                .unwrap_or(1)
        }
    };
    std::process::exit(code);
}

/// Logs go to stderr so stdout carries only results.
fn init_logging(debug: bool) {
    let log_level = if debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();
}

async fn run(command: Command) -> Result<i32> {
    match command {
        Command::Discover(args) => discover(args),
        Command::Launch(args) => launch(args).await,
    }
}

fn discover(args: DiscoverArgs) -> Result<i32> {
    let arch = Arch::current()?;
    let paths = if args.candidates.is_empty() {
        candidate_paths(arch)
    } else {
        args.candidates.clone()
    };
    let binary = locate_binary(&paths)?;
    info!("Using QEMU binary {}", binary.display());

    let candidates = CandidateSet::from_paths(&paths);
    let request = discovery_request(&args);
    let endpoints = match args.proc_source {
        ProcSource::Procfs => discover_with(ProcFsTable::new(), candidates, &request)?,
        ProcSource::Sysinfo => discover_with(SysinfoTable::new(), candidates, &request)?,
    };

    if endpoints.is_empty() {
        eprintln!("{}", DiscoveryConfig::EMPTY_RESULT_MESSAGE);
        return Ok(0);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&endpoints)?);
    } else {
        for endpoint in &endpoints {
            println!("{}", endpoint.address());
        }
    }
    Ok(0)
}

fn discovery_request(args: &DiscoverArgs) -> DiscoveryRequest {
    match &args.socket {
        Some(address) => DiscoveryRequest::explicit(address.as_str()),
        None => DiscoveryRequest::scan(),
    }
}

fn discover_with<T: ProcessTable>(
    table: T,
    candidates: CandidateSet,
    request: &DiscoveryRequest,
) -> Result<Vec<Endpoint>> {
    let scanner = EndpointScanner::with_table(table, candidates);
    Ok(scanner.discover(request)?)
}

fn launch_config(args: &LaunchArgs) -> Result<LaunchConfig> {
    let executable = match &args.qemu {
        Some(path) => path.clone(),
        None => default_executable(&std::env::current_dir()?, Arch::current()?),
    };

    let device = match args.device {
        DeviceKind::Megasas => {
            let image = args.test.as_ref().ok_or_else(|| VmProbeError::Config {
                message: "the megasas device needs a test image (-t)".to_string(),
            })?;
            DeviceProfile::megasas(image)
        }
        DeviceKind::E1000 => DeviceProfile::e1000(),
    };

    let mut config = LaunchConfig::new(executable, &args.boot, device)
        .with_server(ServerOptions {
            monitor_socket: args.server_monitor.clone(),
        })
        .with_client(ClientOptions {
            monitor_socket: args.client_monitor.clone(),
            enable_migration: args.enable_migration,
            incoming: args.incoming.clone(),
            ..ClientOptions::default()
        })
        .with_terminate_server_on_exit(args.stop_server);

    if let Some(dir) = &args.socket_dir {
        config = config.with_socket_dir(dir);
    }
    if let Some(path) = &args.socket_path {
        config = config.with_socket_path(path);
    }
    if let Some(dir) = &args.log_dir {
        config = config.with_log_dir(dir);
    }
    if args.fixed_delay {
        config = config.with_readiness(ReadinessProbe::legacy_delay());
    } else if let Some(ms) = args.timeout_ms {
        config = config.with_readiness(ReadinessProbe::socket_file(Duration::from_millis(ms)));
    }

    Ok(config)
}

async fn launch(args: LaunchArgs) -> Result<i32> {
    let launcher = SplitLauncher::new(launch_config(&args)?)?;

    if args.detach {
        let pair = launcher.spawn_detached().await?;
        let summary = serde_json::json!({
            "server_pid": pair.server_pid,
            "client_pid": pair.client_pid,
            "socket_path": pair.socket_path,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(0);
    }

    tokio::select! {
        outcome = launcher.run() => {
            let outcome = outcome?;
            match outcome.exit_code() {
                Some(code) => Ok(code),
                None => {
                    warn!("Client terminated by signal: {}", outcome.client_status);
                    Ok(1)
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, releasing rendezvous socket");
            Ok(INTERRUPTED_EXIT_CODE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn launch_args(extra: &[&str]) -> LaunchArgs {
        let mut argv = vec!["vmprobe", "launch", "-b", "boot.qcow2", "-t", "test.qcow2"];
        argv.extend_from_slice(extra);
        match Args::try_parse_from(argv).unwrap().command {
            Command::Launch(args) => args,
            other => panic!("expected launch, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_discover_args() {
        let args = Args::try_parse_from([
            "vmprobe",
            "discover",
            "--candidate",
            "/opt/qemu/bin/qemu-system-x86_64",
            "--proc-source",
            "sysinfo",
            "--json",
        ])
        .unwrap();

        match args.command {
            Command::Discover(args) => {
                assert_eq!(
                    args.candidates,
                    vec![PathBuf::from("/opt/qemu/bin/qemu-system-x86_64")]
                );
                assert!(matches!(args.proc_source, ProcSource::Sysinfo));
                assert!(args.json);
                assert!(args.socket.is_none());
            }
            other => panic!("expected discover, got {:?}", other),
        }
    }

    #[test]
    fn test_launch_config_from_args() {
        let args = launch_args(&[
            "--qemu",
            "/build/qemu-system-x86_64",
            "--device",
            "e1000",
            "--socket-path",
            "/run/remotesock",
            "--timeout-ms",
            "2500",
            "--incoming",
            "tcp:0:4444",
            "--enable-migration",
            "--stop-server",
        ]);
        let config = launch_config(&args).unwrap();

        assert_eq!(config.executable_path, PathBuf::from("/build/qemu-system-x86_64"));
        assert_eq!(config.device, DeviceProfile::e1000());
        assert_eq!(config.settings.socket_path, Some(PathBuf::from("/run/remotesock")));
        assert_eq!(
            config.settings.readiness,
            ReadinessProbe::socket_file(Duration::from_millis(2500))
        );
        assert_eq!(config.client.incoming.as_deref(), Some("tcp:0:4444"));
        assert!(config.client.enable_migration);
        assert!(config.settings.terminate_server_on_exit);
    }

    #[test]
    fn test_fixed_delay_conflicts_with_timeout() {
        let result = Args::try_parse_from([
            "vmprobe",
            "launch",
            "-b",
            "boot.qcow2",
            "-t",
            "test.qcow2",
            "--fixed-delay",
            "--timeout-ms",
            "100",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_e1000_launch_needs_no_test_image() {
        let args = Args::try_parse_from([
            "vmprobe", "launch", "-b", "boot.qcow2", "--device", "e1000", "--qemu", "/build/qemu",
        ])
        .unwrap();
        let Command::Launch(args) = args.command else {
            panic!("expected launch");
        };

        let config = launch_config(&args).unwrap();
        assert_eq!(config.device, DeviceProfile::e1000());
    }

    #[test]
    fn test_megasas_launch_requires_test_image() {
        let result = Args::try_parse_from([
            "vmprobe", "launch", "-b", "boot.qcow2", "--device", "megasas",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_megasas_config_uses_test_image() {
        let args = launch_args(&["--qemu", "/build/qemu"]);
        let config = launch_config(&args).unwrap();
        assert_eq!(config.device, DeviceProfile::megasas("test.qcow2"));
    }

    #[test]
    fn test_socket_option_becomes_explicit_request() {
        let args = Args::try_parse_from(["vmprobe", "discover", "--socket", "unix:/run/vm.qmp"])
            .unwrap();
        let Command::Discover(args) = args.command else {
            panic!("expected discover");
        };
        let request = discovery_request(&args);
        assert_eq!(request.explicit.as_deref(), Some("unix:/run/vm.qmp"));

        // An explicit request never lists processes, so an unreadable table is fine.
        let missing = ProcFsTable::with_root("/nonexistent/vmprobe-proc");
        let endpoints = discover_with(missing, CandidateSet::default(), &request).unwrap();
        assert_eq!(endpoints, vec![Endpoint::unix("/run/vm.qmp").unwrap()]);
    }

    #[test]
    fn test_scan_request_reports_scan_failure() {
        let missing = ProcFsTable::with_root("/nonexistent/vmprobe-proc");
        let err = discover_with(missing, CandidateSet::default(), &DiscoveryRequest::scan())
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<VmProbeError>().map(VmProbeError::exit_code),
            Some(3)
        );
    }

    #[test]
    fn test_fixed_delay_selects_legacy_probe() {
        let args = launch_args(&["--qemu", "/build/qemu", "--fixed-delay"]);
        let config = launch_config(&args).unwrap();
        assert_eq!(config.settings.readiness, ReadinessProbe::legacy_delay());
    }
}
