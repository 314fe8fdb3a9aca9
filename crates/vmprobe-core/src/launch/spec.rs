//! Server and client process specifications.
//!
//! Every specification is a fully materialized argument vector. Nothing goes
//! through a shell, so arguments never need quoting; the only escaping is
//! QEMU's own `,,` for commas inside option values.

use std::path::{Path, PathBuf};

/// An executable plus its discrete arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ProcessSpec {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
        }
    }

    /// Add an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add an option and its value.
    pub fn opt(self, name: &str, value: impl Into<String>) -> Self {
        self.arg(name).arg(value)
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Escape a path for use inside a comma-separated QEMU option value.
pub fn qemu_escape(path: &Path) -> String {
    path.to_string_lossy().replace(',', ",,")
}

/// The device the server process emulates for the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceProfile {
    /// SCSI disk backed by `image`, behind a MegaRAID SAS controller.
    Megasas { image: PathBuf },
    /// e1000 NIC on the tap backend `netdev`.
    E1000 { netdev: String, mac: String },
}

impl DeviceProfile {
    pub const DEFAULT_MAC: &'static str = "C0:C0:C0:C1:2A:C7";
    pub const DEFAULT_NETDEV: &'static str = "net0";

    pub fn megasas(image: impl AsRef<Path>) -> Self {
        DeviceProfile::Megasas {
            image: image.as_ref().to_path_buf(),
        }
    }

    pub fn e1000() -> Self {
        DeviceProfile::E1000 {
            netdev: Self::DEFAULT_NETDEV.to_string(),
            mac: Self::DEFAULT_MAC.to_string(),
        }
    }

    /// QEMU id of the device exported over vfio-user.
    pub fn device_id(&self) -> &'static str {
        match self {
            DeviceProfile::Megasas { .. } => "sas1",
            DeviceProfile::E1000 { .. } => "ether1",
        }
    }

    /// Image file the server needs, if any.
    pub fn image(&self) -> Option<&Path> {
        match self {
            DeviceProfile::Megasas { image } => Some(image),
            DeviceProfile::E1000 { .. } => None,
        }
    }

    fn append_server_args(&self, spec: ProcessSpec) -> ProcessSpec {
        match self {
            DeviceProfile::Megasas { image } => spec
                .opt("-device", format!("megasas,id={}", self.device_id()))
                .opt(
                    "-drive",
                    format!("id=drive_image1,file={}", qemu_escape(image)),
                )
                .opt(
                    "-device",
                    format!(
                        "scsi-hd,id=drive1,drive=drive_image1,bus={}.0,scsi-id=0",
                        self.device_id()
                    ),
                ),
            DeviceProfile::E1000 { netdev, mac } => spec
                .opt(
                    "-device",
                    format!("e1000,netdev={},mac={},id={}", netdev, mac, self.device_id()),
                )
                .opt("-netdev", format!("tap,id={}", netdev)),
        }
    }
}

/// Options of the device-server process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerOptions {
    /// Human monitor socket for the server.
    pub monitor_socket: Option<PathBuf>,
}

/// Options of the VM client process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub name: String,
    pub machine: String,
    pub smp: String,
    pub memory_mib: u32,
    /// Size of the shared memfd RAM backend, in QEMU size syntax.
    pub memfd_size: String,
    pub vnc_display: Option<String>,
    /// Human monitor socket for the client.
    pub monitor_socket: Option<PathBuf>,
    /// Request migration support from the vfio-user device.
    pub enable_migration: bool,
    /// Start as a migration destination listening on this URI.
    pub incoming: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            name: "OL7.4".to_string(),
            machine: "pc,accel=kvm".to_string(),
            smp: "4".to_string(),
            memory_mib: 2048,
            memfd_size: "2G".to_string(),
            vnc_display: Some(":0".to_string()),
            monitor_socket: None,
            enable_migration: false,
            incoming: None,
        }
    }
}

/// Builds the two process specifications around a rendezvous path.
pub trait LaunchPlan: Send + Sync {
    /// Server listening on `socket`.
    fn server_spec(&self, socket: &Path) -> ProcessSpec;

    /// Client dialing `socket`.
    fn client_spec(&self, socket: &Path) -> ProcessSpec;
}

/// QEMU split launch: an `x-remote` machine exporting one device over
/// vfio-user, and a VM attaching it with `vfio-user-pci`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QemuLaunchPlan {
    pub executable: PathBuf,
    pub boot_image: PathBuf,
    pub device: DeviceProfile,
    pub server: ServerOptions,
    pub client: ClientOptions,
}

fn monitor_value(path: &Path) -> String {
    format!("unix:{},server,nowait", qemu_escape(path))
}

impl LaunchPlan for QemuLaunchPlan {
    fn server_spec(&self, socket: &Path) -> ProcessSpec {
        let spec = ProcessSpec::new(&self.executable).opt("-machine", "x-remote,vfio-user=on");
        let mut spec = self.device.append_server_args(spec).arg("-nographic");

        if let Some(monitor) = &self.server.monitor_socket {
            spec = spec.opt("-monitor", monitor_value(monitor));
        }

        spec.opt(
            "-object",
            format!(
                "x-vfio-user-server,id=vfioobj1,type=unix,path={},device={}",
                qemu_escape(socket),
                self.device.device_id()
            ),
        )
    }

    fn client_spec(&self, socket: &Path) -> ProcessSpec {
        let client = &self.client;
        let mut spec = ProcessSpec::new(&self.executable)
            .opt("-name", client.name.as_str())
            .opt("-machine", client.machine.as_str())
            .opt("-smp", client.smp.as_str())
            .opt("-m", client.memory_mib.to_string())
            .opt(
                "-object",
                format!("memory-backend-memfd,id=sysmem-file,size={}", client.memfd_size),
            )
            .opt("-numa", "node,memdev=sysmem-file")
            .opt("-hda", self.boot_image.to_string_lossy());

        if let Some(display) = &client.vnc_display {
            spec = spec.opt("-vnc", display.as_str());
        }

        let mut device = format!("vfio-user-pci,socket={}", qemu_escape(socket));
        if client.enable_migration {
            device.push_str(",x-enable-migration=true");
        }
        spec = spec.opt("-device", device);

        if let Some(monitor) = &client.monitor_socket {
            spec = spec.opt("-monitor", monitor_value(monitor));
        }
        if let Some(uri) = &client.incoming {
            spec = spec.opt("-incoming", uri.as_str());
        }
        spec
    }
}
