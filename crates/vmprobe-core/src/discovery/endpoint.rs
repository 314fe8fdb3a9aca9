//! Control-socket addresses.

use crate::error::{Result, VmProbeError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Address of a QEMU monitor socket.
///
/// Immutable once built; the constructors enforce a non-empty unix path and a
/// 16-bit TCP port. Deserialization goes through the same checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", try_from = "RawEndpoint")]
pub enum Endpoint {
    /// Unix-domain socket at `path`.
    Unix { path: String },
    /// TCP listener at `host:port`. `host` may be empty (all interfaces).
    Tcp { host: String, port: u16 },
}

/// Wire shape of `Endpoint`, before validation.
#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum RawEndpoint {
    Unix { path: String },
    Tcp { host: String, port: u16 },
}

impl TryFrom<RawEndpoint> for Endpoint {
    type Error = VmProbeError;

    fn try_from(raw: RawEndpoint) -> Result<Self> {
        match raw {
            RawEndpoint::Unix { path } => Self::unix(path),
            RawEndpoint::Tcp { host, port } => Ok(Endpoint::Tcp { host, port }),
        }
    }
}

impl Endpoint {
    /// Unix endpoint. Fails on an empty path.
    pub fn unix(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        if path.is_empty() {
            return Err(VmProbeError::InvalidEndpoint {
                input: path,
                reason: "empty socket path".to_string(),
            });
        }
        Ok(Endpoint::Unix { path })
    }

    /// TCP endpoint from a textual port.
    pub fn tcp(host: impl Into<String>, port: &str) -> Result<Self> {
        let host = host.into();
        let port = port
            .parse::<u16>()
            .map_err(|_| VmProbeError::InvalidEndpoint {
                input: format!("{}:{}", host, port),
                reason: format!("'{}' is not a valid port", port),
            })?;
        Ok(Endpoint::Tcp { host, port })
    }

    /// Parse `host:port`, splitting on the last colon.
    pub fn tcp_from_host_port(value: &str) -> Result<Self> {
        let (host, port) = value
            .rsplit_once(':')
            .ok_or_else(|| VmProbeError::InvalidEndpoint {
                input: value.to_string(),
                reason: "expected host:port".to_string(),
            })?;
        Self::tcp(host, port)
    }

    /// The bare address handed to tools that talk to the monitor:
    /// the socket path, or `host:port`.
    pub fn address(&self) -> String {
        match self {
            Endpoint::Unix { path } => path.clone(),
            Endpoint::Tcp { host, port } => format!("{}:{}", host, port),
        }
    }

}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix { path } => write!(f, "unix:{}", path),
            Endpoint::Tcp { host, port } => write!(f, "tcp:{}:{}", host, port),
        }
    }
}

/// Accepts `unix:/path`, `tcp:host:port`, a bare absolute path, or a bare
/// `host:port`.
impl FromStr for Endpoint {
    type Err = VmProbeError;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(path) = s.strip_prefix("unix:") {
            Self::unix(path)
        } else if let Some(rest) = s.strip_prefix("tcp:") {
            Self::tcp_from_host_port(rest)
        } else if s.starts_with('/') {
            Self::unix(s)
        } else {
            Self::tcp_from_host_port(s)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_rejects_empty_path() {
        assert!(Endpoint::unix("").is_err());
        assert!(Endpoint::unix("/tmp/qmp.sock").is_ok());
    }

    #[test]
    fn test_tcp_port_range() {
        assert!(Endpoint::tcp("localhost", "4444").is_ok());
        assert!(Endpoint::tcp("localhost", "65536").is_err());
        assert!(Endpoint::tcp("localhost", "qmp").is_err());
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            "unix:/run/qmp.sock".parse::<Endpoint>().unwrap(),
            Endpoint::Unix {
                path: "/run/qmp.sock".into()
            }
        );
        assert_eq!(
            "/run/qmp.sock".parse::<Endpoint>().unwrap(),
            Endpoint::Unix {
                path: "/run/qmp.sock".into()
            }
        );
        assert_eq!(
            "tcp:127.0.0.1:4444".parse::<Endpoint>().unwrap(),
            Endpoint::Tcp {
                host: "127.0.0.1".into(),
                port: 4444
            }
        );
        assert_eq!(
            "localhost:4444".parse::<Endpoint>().unwrap(),
            Endpoint::Tcp {
                host: "localhost".into(),
                port: 4444
            }
        );
        assert!("unix:".parse::<Endpoint>().is_err());
        assert!("no-port".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_address_and_display() {
        let unix = Endpoint::unix("/tmp/m.sock").unwrap();
        assert_eq!(unix.address(), "/tmp/m.sock");
        assert_eq!(unix.to_string(), "unix:/tmp/m.sock");

        let tcp = Endpoint::tcp("", "4444").unwrap();
        assert_eq!(tcp.address(), ":4444");
        assert_eq!(tcp.to_string(), "tcp::4444");
    }

    #[test]
    fn test_deserialize_validates_unix_path() {
        let empty = serde_json::from_str::<Endpoint>(r#"{"kind":"unix","path":""}"#);
        assert!(empty.is_err());

        let unix: Endpoint =
            serde_json::from_str(r#"{"kind":"unix","path":"/run/qmp.sock"}"#).unwrap();
        assert_eq!(unix, Endpoint::unix("/run/qmp.sock").unwrap());

        let tcp: Endpoint =
            serde_json::from_str(r#"{"kind":"tcp","host":"::1","port":4444}"#).unwrap();
        assert_eq!(tcp.address(), "::1:4444");

        let bad_port = r#"{"kind":"tcp","host":"h","port":70000}"#;
        assert!(serde_json::from_str::<Endpoint>(bad_port).is_err());
    }

    #[test]
    fn test_json_shape() {
        let tcp = Endpoint::tcp("10.0.0.1", "5555").unwrap();
        let json = serde_json::to_value(&tcp).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"kind": "tcp", "host": "10.0.0.1", "port": 5555})
        );
    }
}
