//! Resource statistics and the cluster collaborator
//!
//! This module provides the `ClusterClient` trait through which the engine
//! reads inventory and time-series statistics and issues migrations, plus
//! the averaging functions that turn raw sample windows into the smoothed
//! figures the plans evaluate.

mod averaging;
mod fleet;

pub use averaging::{
    aggregate, aggregate_vm, average, blend, compute_averages, compute_blended_averages,
    compute_vm_averages, normalize_vm_cpu, AveragesMap, DEFAULT_BLEND_RATIO, EXECUTION_DELAY,
    MINUTES_OF_HISTORICAL_DATA,
};
pub use fleet::{FleetSnapshot, InMemoryFleet, SnapshotEntry};

use crate::models::{EntityRef, Granularity, Host, PoolId, StatsBundle, Vm};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::debug;

pub use async_trait::async_trait;

/// Access to the virtualization platform
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List the hosts currently belonging to any of the given pools
    async fn list_hosts(&self, pool_ids: &[PoolId]) -> Result<Vec<Host>>;

    /// List the running VMs on a host
    async fn list_running_vms(&self, host_id: &str) -> Result<Vec<Vm>>;

    /// Fetch the statistics window of a host or VM
    async fn get_stats(&self, entity: &EntityRef, granularity: Granularity) -> Result<StatsBundle>;

    /// Live-migrate a VM to the destination host
    async fn migrate(&self, vm_id: &str, destination: &str) -> Result<()>;
}

/// Fetch minute-granularity stats for every entity concurrently
///
/// Entities whose fetch fails are left out of the result; they may have
/// disappeared since the inventory was read.
pub async fn fetch_stats(
    client: &Arc<dyn ClusterClient>,
    entities: Vec<EntityRef>,
) -> HashMap<String, StatsBundle> {
    let mut tasks = JoinSet::new();

    for entity in entities {
        let client = Arc::clone(client);
        tasks.spawn(async move {
            let result = client.get_stats(&entity, Granularity::Minutes).await;
            (entity, result)
        });
    }

    let mut stats = HashMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((entity, Ok(bundle))) => {
                stats.insert(entity.id().to_string(), bundle);
            }
            Ok((entity, Err(e))) => {
                debug!(entity = %entity, error = %e, "Excluding entity without stats");
            }
            Err(e) => {
                debug!(error = %e, "Stats fetch task did not complete");
            }
        }
    }

    stats
}

/// Host ids as stats request targets
pub fn host_entities(hosts: &[Host]) -> Vec<EntityRef> {
    hosts.iter().map(|h| EntityRef::Host(h.id.clone())).collect()
}

/// VM ids as stats request targets
pub fn vm_entities(vms: &[Vm]) -> Vec<EntityRef> {
    vms.iter().map(|vm| EntityRef::Vm(vm.id.clone())).collect()
}
