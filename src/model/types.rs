use std::collections::BTreeSet;
use std::fmt::Display;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::watch::invalid_value;
use crate::watch::CellValue;
use crate::Result;
use crate::UsageError;

/// Network identity of a serving host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostAddress {
    pub hostname: String,
    pub port: u16,
}

impl HostAddress {
    pub fn new(
        hostname: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }
}

impl Display for HostAddress {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

impl FromStr for HostAddress {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || UsageError::InvalidArgument(format!("expected host:port, got '{s}'"));
        let (hostname, port) = s.rsplit_once(':').ok_or_else(invalid)?;
        if hostname.is_empty() || hostname.contains('/') {
            return Err(invalid().into());
        }
        let port = port.parse().map_err(|_| invalid())?;
        Ok(Self::new(hostname, port))
    }
}

/// Serving state of a host. `Offline` is never stored; it is the absence of a state node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HostState {
    #[default]
    Offline,
    Idle,
    Serving,
    Updating,
}

impl HostState {
    fn as_str(&self) -> &'static str {
        match self {
            HostState::Offline => "OFFLINE",
            HostState::Idle => "IDLE",
            HostState::Serving => "SERVING",
            HostState::Updating => "UPDATING",
        }
    }
}

impl CellValue for HostState {
    fn encode(&self) -> Vec<u8> {
        self.as_str().as_bytes().to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        match bytes {
            b"OFFLINE" => Ok(HostState::Offline),
            b"IDLE" => Ok(HostState::Idle),
            b"SERVING" => Ok(HostState::Serving),
            b"UPDATING" => Ok(HostState::Updating),
            _ => Err(invalid_value("host state", bytes)),
        }
    }
}

/// Instruction queued for a host by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostCommand {
    GoToIdle,
    ServeData,
    ExecuteUpdate,
}

impl CellValue for HostCommand {
    fn encode(&self) -> Vec<u8> {
        match self {
            HostCommand::GoToIdle => b"GO_TO_IDLE".to_vec(),
            HostCommand::ServeData => b"SERVE_DATA".to_vec(),
            HostCommand::ExecuteUpdate => b"EXECUTE_UPDATE".to_vec(),
        }
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        match bytes {
            b"GO_TO_IDLE" => Ok(HostCommand::GoToIdle),
            b"SERVE_DATA" => Ok(HostCommand::ServeData),
            b"EXECUTE_UPDATE" => Ok(HostCommand::ExecuteUpdate),
            _ => Err(invalid_value("host command", bytes)),
        }
    }
}

/// Operating mode advertised by the conductor holding a ring group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConductorMode {
    Active,
    Proactive,
    Inactive,
    Offline,
}

impl CellValue for ConductorMode {
    fn encode(&self) -> Vec<u8> {
        match self {
            ConductorMode::Active => b"ACTIVE".to_vec(),
            ConductorMode::Proactive => b"PROACTIVE".to_vec(),
            ConductorMode::Inactive => b"INACTIVE".to_vec(),
            ConductorMode::Offline => b"OFFLINE".to_vec(),
        }
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        match bytes {
            b"ACTIVE" => Ok(ConductorMode::Active),
            b"PROACTIVE" => Ok(ConductorMode::Proactive),
            b"INACTIVE" => Ok(ConductorMode::Inactive),
            b"OFFLINE" => Ok(ConductorMode::Offline),
            _ => Err(invalid_value("conductor mode", bytes)),
        }
    }
}

/// Self-description written by a connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMetadata {
    pub host: String,
    pub client_type: String,
    pub version: String,
    pub connected_at_ms: i64,
}

/// Self-description written by a running partition server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMetadata {
    pub host: String,
    pub version: String,
    pub connected_at_ms: i64,
}

/// Bulk-load statistics of one partition of a domain version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionProperties {
    pub num_bytes: u64,
    pub num_records: u64,
}

/// Serving status of one partition of one domain on one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDomainPartition {
    pub partition: u32,
    /// `None` until the partition has been served at least once
    pub current_version: Option<u32>,
    pub deletable: bool,
}

impl HostDomainPartition {
    pub fn new(partition: u32) -> Self {
        Self {
            partition,
            current_version: None,
            deletable: false,
        }
    }
}

pub type Flags = BTreeSet<String>;
