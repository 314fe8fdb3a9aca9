//! Monitor endpoint extraction from a QEMU command line.
//!
//! Extraction is an ordered list of strategies tried after a scope check:
//!
//! 1. **Scope** - the command line must reference a known QEMU binary.
//! 2. **QMP flag** - `-qmp` / `-qmp-pretty` followed (not necessarily
//!    immediately) by a `unix:<path>` or `tcp:<host>:<port>` value.
//! 3. **Control monitor** - `-mon [chardev=]<id>,mode=control`, resolved through
//!    the `-chardev socket,id=<id>,...` declaration to a `path=` or a
//!    `host=`/`port=` pair.
//!
//! The first strategy that yields an endpoint wins, so an explicit QMP flag
//! always takes precedence over a derived control monitor.

use super::cmdline::{field, fields, has_field, is_flag, option_values, CommandLine};
use super::endpoint::Endpoint;
use std::path::PathBuf;
use tracing::debug;

/// Executable path fragments identifying in-scope processes.
///
/// Several paths (and symlinks between them) may name the same binary, so any
/// match puts the process in scope.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CandidateSet {
    patterns: Vec<String>,
}

impl CandidateSet {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::default();
        for pattern in patterns {
            let pattern = pattern.into();
            if !pattern.is_empty() && !set.patterns.contains(&pattern) {
                set.patterns.push(pattern);
            }
        }
        set
    }

    /// Build from the same candidate paths used to locate the binary.
    pub fn from_paths(paths: &[PathBuf]) -> Self {
        Self::new(paths.iter().map(|p| p.to_string_lossy().into_owned()))
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// One rule for deriving an endpoint from the in-scope part of a command line.
pub trait EndpointStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `tokens` starts right after the token naming the QEMU binary.
    fn extract(&self, tokens: &[String]) -> Option<Endpoint>;
}

/// `-qmp unix:/path,...` or `-qmp tcp:host:port,...`.
#[derive(Debug, Default)]
pub struct QmpFlagStrategy;

impl QmpFlagStrategy {
    const FLAGS: [&'static str; 2] = ["qmp", "qmp-pretty"];

    fn parse_value(token: &str) -> Option<Endpoint> {
        // The address ends at the first comma: `unix:/p,server,nowait`.
        let head = fields(token).next()?;
        if let Some(path) = head.strip_prefix("unix:") {
            Endpoint::unix(path).ok()
        } else if let Some(addr) = head.strip_prefix("tcp:") {
            Endpoint::tcp_from_host_port(addr).ok()
        } else {
            None
        }
    }
}

impl EndpointStrategy for QmpFlagStrategy {
    fn name(&self) -> &'static str {
        "qmp-flag"
    }

    fn extract(&self, tokens: &[String]) -> Option<Endpoint> {
        let flag_index = tokens
            .iter()
            .position(|token| Self::FLAGS.iter().any(|flag| is_flag(token, flag)))?;

        tokens[flag_index + 1..]
            .iter()
            .find_map(|token| Self::parse_value(token))
    }
}

/// `-mon chardev=<id>,mode=control` plus `-chardev socket,id=<id>,...`.
#[derive(Debug, Default)]
pub struct ControlMonitorStrategy;

impl ControlMonitorStrategy {
    /// Device identifiers of every control-mode monitor, in order.
    fn control_devices(tokens: &[String]) -> Vec<&str> {
        option_values(tokens, "mon")
            .filter(|(_, value)| has_field(value, "mode", "control"))
            .filter_map(|(_, value)| {
                // `chardev=` may be omitted: `-mon mon0,mode=control`
                field(value, "chardev").or_else(|| fields(value).next())
            })
            .filter(|id| !id.is_empty())
            .collect()
    }

    /// First socket chardev declared with `id=<device>`.
    ///
    /// When several declarations share the id, the earliest on the command
    /// line is used.
    fn find_chardev<'a>(tokens: &'a [String], device: &str) -> Option<&'a str> {
        option_values(tokens, "chardev")
            .map(|(_, value)| value)
            .find(|value| fields(value).next() == Some("socket") && has_field(value, "id", device))
    }

    fn resolve(declaration: &str) -> Option<Endpoint> {
        if let Some(path) = field(declaration, "path") {
            return Endpoint::unix(path).ok();
        }

        let host = field(declaration, "host")?;
        let port = field(declaration, "port")?;
        Endpoint::tcp(host, port).ok()
    }
}

impl EndpointStrategy for ControlMonitorStrategy {
    fn name(&self) -> &'static str {
        "control-monitor"
    }

    fn extract(&self, tokens: &[String]) -> Option<Endpoint> {
        Self::control_devices(tokens).into_iter().find_map(|device| {
            let Some(declaration) = Self::find_chardev(tokens, device) else {
                debug!("No socket chardev declared for monitor device '{}'", device);
                return None;
            };
            Self::resolve(declaration)
        })
    }
}

/// Ordered strategy pipeline with a scope check in front.
pub struct EndpointExtractor {
    candidates: CandidateSet,
    strategies: Vec<Box<dyn EndpointStrategy>>,
}

impl EndpointExtractor {
    /// Extractor with the default strategy order: QMP flag, then control
    /// monitor.
    pub fn new(candidates: CandidateSet) -> Self {
        Self {
            candidates,
            strategies: vec![Box::new(QmpFlagStrategy), Box::new(ControlMonitorStrategy)],
        }
    }

    /// Extractor with a caller-chosen strategy order.
    pub fn with_strategies(
        candidates: CandidateSet,
        strategies: Vec<Box<dyn EndpointStrategy>>,
    ) -> Self {
        Self {
            candidates,
            strategies,
        }
    }

    /// Extract the monitor endpoint from a raw NUL-separated command line.
    pub fn extract(&self, raw: &[u8]) -> Option<Endpoint> {
        self.extract_from(&CommandLine::from_bytes(raw))
    }

    /// Extract the monitor endpoint from an already tokenized command line.
    pub fn extract_from(&self, cmdline: &CommandLine) -> Option<Endpoint> {
        let binary_index = cmdline.position_of_any(self.candidates.patterns())?;
        let tokens = &cmdline.tokens()[binary_index + 1..];

        self.strategies.iter().find_map(|strategy| {
            let endpoint = strategy.extract(tokens)?;
            debug!("Strategy {} found {}", strategy.name(), endpoint);
            Some(endpoint)
        })
    }
}

/// One-shot extraction with the default strategies.
pub fn extract(raw: &[u8], candidates: &CandidateSet) -> Option<Endpoint> {
    EndpointExtractor::new(candidates.clone()).extract(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> CandidateSet {
        CandidateSet::new(["qemu-system-x86_64"])
    }

    fn blob(args: &[&str]) -> Vec<u8> {
        let mut raw = Vec::new();
        for arg in args {
            raw.extend_from_slice(arg.as_bytes());
            raw.push(0);
        }
        raw
    }

    fn unix(path: &str) -> Option<Endpoint> {
        Some(Endpoint::Unix { path: path.into() })
    }

    #[test]
    fn test_candidate_set_dedups_and_skips_empty() {
        let set = CandidateSet::new(["/usr/libexec/qemu-kvm", "", "/usr/libexec/qemu-kvm"]);
        assert_eq!(set.patterns(), &["/usr/libexec/qemu-kvm"]);
    }

    #[test]
    fn test_out_of_scope_process() {
        let raw = blob(&["/usr/bin/python3", "-qmp", "unix:/tmp/q.sock,server"]);
        assert_eq!(extract(&raw, &candidates()), None);
    }

    #[test]
    fn test_empty_candidates_match_nothing() {
        let raw = blob(&["qemu-system-x86_64", "-qmp", "unix:/tmp/q.sock"]);
        assert_eq!(extract(&raw, &CandidateSet::default()), None);
    }

    #[test]
    fn test_qmp_unix() {
        let raw = blob(&["qemu-system-x86_64", "-qmp", "unix:/tmp/q.sock,server,nowait"]);
        assert_eq!(extract(&raw, &candidates()), unix("/tmp/q.sock"));
    }

    #[test]
    fn test_qmp_tcp() {
        let raw = blob(&["qemu-system-x86_64", "-qmp", "tcp:localhost:4444,server,wait=off"]);
        assert_eq!(
            extract(&raw, &candidates()),
            Some(Endpoint::Tcp {
                host: "localhost".into(),
                port: 4444
            })
        );
    }

    #[test]
    fn test_qmp_value_not_adjacent() {
        let raw = blob(&[
            "/usr/bin/qemu-system-x86_64",
            "-qmp",
            "-m",
            "1024",
            "unix:/var/run/vm1.qmp",
        ]);
        assert_eq!(extract(&raw, &candidates()), unix("/var/run/vm1.qmp"));
    }

    #[test]
    fn test_qmp_pretty_and_double_dash() {
        let raw = blob(&["qemu-system-x86_64", "-qmp-pretty", "unix:/tmp/p.sock"]);
        assert_eq!(extract(&raw, &candidates()), unix("/tmp/p.sock"));

        let raw = blob(&["qemu-system-x86_64", "--qmp", "unix:/tmp/d.sock"]);
        assert_eq!(extract(&raw, &candidates()), unix("/tmp/d.sock"));
    }

    #[test]
    fn test_unix_value_before_qmp_is_ignored() {
        let raw = blob(&[
            "qemu-system-x86_64",
            "-monitor",
            "unix:/tmp/hmp.sock,server,nowait",
            "-qmp",
            "unix:/tmp/qmp.sock,server,nowait",
        ]);
        assert_eq!(extract(&raw, &candidates()), unix("/tmp/qmp.sock"));
    }

    #[test]
    fn test_reference_example() {
        let raw = b"qemu-system-x86_64\0-mon\0chardev=mon0,mode=control\0\
                    -chardev\0socket,id=mon0,path=/tmp/m.sock\0";
        assert_eq!(extract(raw, &candidates()), unix("/tmp/m.sock"));
    }

    #[test]
    fn test_control_monitor_tcp() {
        let raw = blob(&[
            "qemu-system-x86_64",
            "-chardev",
            "socket,id=qmp1,host=127.0.0.1,port=5555,server=on,wait=off",
            "-mon",
            "chardev=qmp1,mode=control",
        ]);
        assert_eq!(
            extract(&raw, &candidates()),
            Some(Endpoint::Tcp {
                host: "127.0.0.1".into(),
                port: 5555
            })
        );
    }

    #[test]
    fn test_control_monitor_implied_chardev_key() {
        let raw = blob(&[
            "qemu-system-x86_64",
            "-mon",
            "charmon,mode=control,pretty=on",
            "-chardev",
            "socket,id=charmon,path=/run/libvirt/qemu/vm.monitor,server=on,wait=off",
        ]);
        assert_eq!(
            extract(&raw, &candidates()),
            unix("/run/libvirt/qemu/vm.monitor")
        );
    }

    #[test]
    fn test_readline_monitor_is_not_control() {
        let raw = blob(&[
            "qemu-system-x86_64",
            "-mon",
            "chardev=hmp,mode=readline",
            "-chardev",
            "socket,id=hmp,path=/tmp/hmp.sock",
        ]);
        assert_eq!(extract(&raw, &candidates()), None);
    }

    #[test]
    fn test_missing_chardev_declaration() {
        let raw = blob(&["qemu-system-x86_64", "-mon", "chardev=mon0,mode=control"]);
        assert_eq!(extract(&raw, &candidates()), None);
    }

    #[test]
    fn test_chardev_without_address() {
        let raw = blob(&[
            "qemu-system-x86_64",
            "-mon",
            "chardev=mon0,mode=control",
            "-chardev",
            "socket,id=mon0,server=on",
        ]);
        assert_eq!(extract(&raw, &candidates()), None);
    }

    #[test]
    fn test_chardev_host_without_port() {
        let raw = blob(&[
            "qemu-system-x86_64",
            "-mon",
            "chardev=mon0,mode=control",
            "-chardev",
            "socket,id=mon0,host=localhost",
        ]);
        assert_eq!(extract(&raw, &candidates()), None);
    }

    #[test]
    fn test_non_socket_chardev_is_skipped() {
        let raw = blob(&[
            "qemu-system-x86_64",
            "-mon",
            "chardev=mon0,mode=control",
            "-chardev",
            "pty,id=mon0,path=/dev/pts/9",
        ]);
        assert_eq!(extract(&raw, &candidates()), None);
    }

    #[test]
    fn test_chardev_id_must_match_exactly() {
        let raw = blob(&[
            "qemu-system-x86_64",
            "-mon",
            "chardev=mon0,mode=control",
            "-chardev",
            "socket,id=mon01,path=/tmp/wrong.sock",
            "-chardev",
            "socket,id=mon0,path=/tmp/right.sock",
        ]);
        assert_eq!(extract(&raw, &candidates()), unix("/tmp/right.sock"));
    }

    #[test]
    fn test_duplicate_chardev_ids_first_declaration_wins() {
        let raw = blob(&[
            "qemu-system-x86_64",
            "-chardev",
            "socket,id=mon0,path=/tmp/first.sock",
            "-mon",
            "chardev=mon0,mode=control",
            "-chardev",
            "socket,id=mon0,path=/tmp/second.sock",
        ]);
        assert_eq!(extract(&raw, &candidates()), unix("/tmp/first.sock"));
    }

    #[test]
    fn test_second_control_monitor_used_when_first_unresolvable() {
        let raw = blob(&[
            "qemu-system-x86_64",
            "-mon",
            "chardev=gone,mode=control",
            "-mon",
            "chardev=mon1,mode=control",
            "-chardev",
            "socket,id=mon1,path=/tmp/mon1.sock",
        ]);
        assert_eq!(extract(&raw, &candidates()), unix("/tmp/mon1.sock"));
    }

    #[test]
    fn test_explicit_qmp_wins_over_control_monitor() {
        let raw = blob(&[
            "qemu-system-x86_64",
            "-mon",
            "chardev=mon0,mode=control",
            "-chardev",
            "socket,id=mon0,path=/tmp/derived.sock",
            "-qmp",
            "unix:/tmp/explicit.sock,server,nowait",
        ]);
        assert_eq!(extract(&raw, &candidates()), unix("/tmp/explicit.sock"));
    }

    #[test]
    fn test_malformed_qmp_falls_back_to_control_monitor() {
        let raw = blob(&[
            "qemu-system-x86_64",
            "-qmp",
            "stdio",
            "-mon",
            "chardev=mon0,mode=control",
            "-chardev",
            "socket,id=mon0,path=/tmp/derived.sock",
        ]);
        assert_eq!(extract(&raw, &candidates()), unix("/tmp/derived.sock"));
    }

    #[test]
    fn test_flags_before_binary_are_out_of_scope() {
        let raw = blob(&[
            "wrapper",
            "-qmp",
            "unix:/tmp/wrapper.sock",
            "/usr/bin/qemu-system-x86_64",
            "-m",
            "512",
        ]);
        assert_eq!(extract(&raw, &candidates()), None);
    }

    #[test]
    fn test_custom_strategy_order() {
        let extractor = EndpointExtractor::with_strategies(
            candidates(),
            vec![Box::new(ControlMonitorStrategy), Box::new(QmpFlagStrategy)],
        );
        let raw = blob(&[
            "qemu-system-x86_64",
            "-qmp",
            "unix:/tmp/explicit.sock",
            "-mon",
            "chardev=mon0,mode=control",
            "-chardev",
            "socket,id=mon0,path=/tmp/derived.sock",
        ]);
        assert_eq!(extractor.extract(&raw), unix("/tmp/derived.sock"));
    }
}
