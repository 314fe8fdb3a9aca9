//! Host-wide QMP endpoint discovery.

use super::endpoint::Endpoint;
use super::extract::{CandidateSet, EndpointExtractor};
use crate::error::Result;
use crate::platform::{ProcFsTable, ProcessTable};
use tracing::{debug, info};

/// An endpoint together with the process that exposes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredEndpoint {
    /// Process ID.
    pub pid: u32,
    /// Monitor socket address.
    pub endpoint: Endpoint,
}

/// What to discover.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryRequest {
    /// Use this address instead of scanning the process table.
    pub explicit: Option<String>,
}

impl DiscoveryRequest {
    pub fn scan() -> Self {
        Self::default()
    }

    pub fn explicit(address: impl Into<String>) -> Self {
        Self {
            explicit: Some(address.into()),
        }
    }
}

/// Scans the process table for QEMU processes and their monitor sockets.
pub struct EndpointScanner<T: ProcessTable = ProcFsTable> {
    table: T,
    extractor: EndpointExtractor,
}

impl EndpointScanner<ProcFsTable> {
    /// Scanner over `/proc`.
    pub fn new(candidates: CandidateSet) -> Self {
        Self::with_table(ProcFsTable::new(), candidates)
    }
}

impl<T: ProcessTable> EndpointScanner<T> {
    /// Scanner over an arbitrary process table.
    pub fn with_table(table: T, candidates: CandidateSet) -> Self {
        Self {
            table,
            extractor: EndpointExtractor::new(candidates),
        }
    }

    /// Scanner with a preconfigured extractor.
    pub fn with_extractor(table: T, extractor: EndpointExtractor) -> Self {
        Self { table, extractor }
    }

    /// Scan every live process, in ascending PID order.
    ///
    /// Processes that vanish mid-scan, cannot be read, or expose no monitor
    /// socket are skipped. Only a failure to list processes at all is an error;
    /// an empty result means nothing was found.
    pub fn scan(&self) -> Result<Vec<DiscoveredEndpoint>> {
        let pids = self.table.list_pids()?;
        let mut found = Vec::new();

        for pid in pids {
            let cmdline = match self.table.read_cmdline(pid) {
                Ok(Some(cmdline)) => cmdline,
                Ok(None) => continue,
                Err(e) => {
                    debug!("Skipping process {}: {}", pid, e);
                    continue;
                }
            };

            if let Some(endpoint) = self.extractor.extract(&cmdline) {
                debug!("Process {} exposes {}", pid, endpoint);
                found.push(DiscoveredEndpoint { pid, endpoint });
            }
        }

        info!("Found {} QEMU monitor endpoints", found.len());
        Ok(found)
    }

    /// Ordered monitor endpoints of all in-scope processes.
    pub fn enumerate(&self) -> Result<Vec<Endpoint>> {
        Ok(self.scan()?.into_iter().map(|d| d.endpoint).collect())
    }

    /// Resolve a request: the explicit address if one was given, otherwise
    /// the result of a full scan.
    pub fn discover(&self, request: &DiscoveryRequest) -> Result<Vec<Endpoint>> {
        match &request.explicit {
            Some(address) => {
                let endpoint: Endpoint = address.parse()?;
                info!("Using explicit monitor endpoint {}", endpoint);
                Ok(vec![endpoint])
            }
            None => self.enumerate(),
        }
    }
}
