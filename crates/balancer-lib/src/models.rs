//! Core data models for the load balancer

use serde::{Deserialize, Serialize};

pub type HostId = String;
pub type VmId = String;
pub type PoolId = String;

/// Per-minute samples for one metric; `None` marks a gap in the series
pub type Series = Vec<Option<f64>>;

/// Host as reported by the inventory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    pub pool_id: PoolId,
    pub cpu_count: u32,
}

/// Power state of a VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    Running,
    Paused,
    Suspended,
    Halted,
}

/// VM as reported by the inventory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vm {
    pub id: VmId,
    pub host_id: HostId,
    pub cpu_count: u32,
    pub power_state: PowerState,
}

impl Vm {
    pub fn is_running(&self) -> bool {
        self.power_state == PowerState::Running
    }
}

/// Entity whose statistics are requested from the sampler
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum EntityRef {
    Host(HostId),
    Vm(VmId),
}

impl EntityRef {
    pub fn id(&self) -> &str {
        match self {
            EntityRef::Host(id) | EntityRef::Vm(id) => id,
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityRef::Host(id) => write!(f, "host:{}", id),
            EntityRef::Vm(id) => write!(f, "vm:{}", id),
        }
    }
}

/// Sampling granularity of a stats request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Seconds,
    Minutes,
    Hours,
    Days,
}

/// Raw time-series bundle for a host or VM
///
/// `cpus` holds one series per vCPU, in percent of that vCPU. Memory series
/// are in bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsBundle {
    pub cpus: Vec<Series>,
    pub memory: Series,
    pub memory_free: Series,
}

/// Smoothed resource averages for one entity during one cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceAverages {
    /// CPU usage in percent (0-100)
    pub cpu: f64,
    /// Free memory in bytes
    pub memory_free: f64,
    /// Used memory in bytes
    pub memory: f64,
}

/// Proposed relocation of a VM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationAction {
    pub vm_id: VmId,
    pub source_host: HostId,
    pub destination_host: HostId,
}

impl std::fmt::Display for MigrationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "vm {} from host {} to host {}",
            self.vm_id, self.source_host, self.destination_host
        )
    }
}
