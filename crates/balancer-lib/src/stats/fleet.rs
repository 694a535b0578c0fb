//! In-memory cluster client
//!
//! Serves inventory and statistics from a local store and applies
//! migrations by moving VMs between hosts. Used for standalone runs from a
//! JSON fleet snapshot and as the collaborator in tests.

use super::ClusterClient;
use crate::error::ClusterError;
use crate::models::{
    EntityRef, Granularity, Host, HostId, MigrationAction, PoolId, StatsBundle, Vm, VmId,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Statistics of one entity inside a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub entity: EntityRef,
    pub stats: StatsBundle,
}

/// Serializable view of a fleet
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetSnapshot {
    #[serde(default)]
    pub hosts: Vec<Host>,
    #[serde(default)]
    pub vms: Vec<Vm>,
    #[serde(default)]
    pub stats: Vec<SnapshotEntry>,
}

impl FleetSnapshot {
    /// Load a snapshot from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fleet snapshot {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse fleet snapshot {}", path.display()))
    }
}

/// Cluster client backed by in-process maps
#[derive(Default)]
pub struct InMemoryFleet {
    hosts: DashMap<HostId, Host>,
    vms: DashMap<VmId, Vm>,
    stats: DashMap<EntityRef, StatsBundle>,
    failing_stats: DashSet<EntityRef>,
    failing_migrations: DashMap<VmId, String>,
    migrations: Mutex<Vec<MigrationAction>>,
    migrate_calls: AtomicUsize,
    stats_latency_ms: AtomicU64,
}

impl InMemoryFleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a fleet from a snapshot
    pub fn from_snapshot(snapshot: FleetSnapshot) -> Self {
        let fleet = Self::new();
        for host in snapshot.hosts {
            fleet.add_host(host);
        }
        for vm in snapshot.vms {
            fleet.add_vm(vm);
        }
        for entry in snapshot.stats {
            fleet.set_stats(entry.entity, entry.stats);
        }

        info!(
            hosts = fleet.hosts.len(),
            vms = fleet.vms.len(),
            "Loaded fleet snapshot"
        );
        fleet
    }

    pub fn add_host(&self, host: Host) {
        self.hosts.insert(host.id.clone(), host);
    }

    pub fn add_vm(&self, vm: Vm) {
        self.vms.insert(vm.id.clone(), vm);
    }

    /// Remove a host, as if it left the pool
    pub fn remove_host(&self, host_id: &str) -> Option<Host> {
        self.hosts.remove(host_id).map(|(_, h)| h)
    }

    pub fn set_stats(&self, entity: EntityRef, stats: StatsBundle) {
        self.stats.insert(entity, stats);
    }

    /// Make every stats request for `entity` fail
    pub fn fail_stats(&self, entity: EntityRef) {
        self.failing_stats.insert(entity);
    }

    /// Make every migration of `vm_id` fail with `reason`
    pub fn fail_migration(&self, vm_id: impl Into<String>, reason: impl Into<String>) {
        self.failing_migrations.insert(vm_id.into(), reason.into());
    }

    /// Delay every stats response
    pub fn set_stats_latency(&self, latency: Duration) {
        self.stats_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Host currently running a VM
    pub fn vm_host(&self, vm_id: &str) -> Option<HostId> {
        self.vms.get(vm_id).map(|vm| vm.host_id.clone())
    }

    /// Successful migrations, in completion order
    pub async fn migrations(&self) -> Vec<MigrationAction> {
        self.migrations.lock().await.clone()
    }

    /// Number of migration requests received, successful or not
    pub fn migrate_calls(&self) -> usize {
        self.migrate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterClient for InMemoryFleet {
    async fn list_hosts(&self, pool_ids: &[PoolId]) -> Result<Vec<Host>> {
        let mut hosts: Vec<Host> = self
            .hosts
            .iter()
            .filter(|h| pool_ids.contains(&h.pool_id))
            .map(|h| h.value().clone())
            .collect();
        hosts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(hosts)
    }

    async fn list_running_vms(&self, host_id: &str) -> Result<Vec<Vm>> {
        if !self.hosts.contains_key(host_id) {
            return Err(ClusterError::NotFound(format!("host {}", host_id)).into());
        }

        let mut vms: Vec<Vm> = self
            .vms
            .iter()
            .filter(|vm| vm.host_id == host_id && vm.is_running())
            .map(|vm| vm.value().clone())
            .collect();
        vms.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(vms)
    }

    async fn get_stats(&self, entity: &EntityRef, _granularity: Granularity) -> Result<StatsBundle> {
        let latency = self.stats_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.failing_stats.contains(entity) {
            return Err(ClusterError::NoStats(entity.to_string()).into());
        }

        let exists = match entity {
            EntityRef::Host(id) => self.hosts.contains_key(id),
            EntityRef::Vm(id) => self.vms.contains_key(id),
        };
        if !exists {
            return Err(ClusterError::NotFound(entity.to_string()).into());
        }

        self.stats
            .get(entity)
            .map(|s| s.value().clone())
            .ok_or_else(|| ClusterError::NoStats(entity.to_string()).into())
    }

    async fn migrate(&self, vm_id: &str, destination: &str) -> Result<()> {
        self.migrate_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(reason) = self.failing_migrations.get(vm_id) {
            return Err(ClusterError::MigrationFailed {
                vm_id: vm_id.to_string(),
                destination: destination.to_string(),
                reason: reason.value().clone(),
            }
            .into());
        }

        if !self.hosts.contains_key(destination) {
            return Err(ClusterError::NotFound(format!("host {}", destination)).into());
        }

        let source_host = {
            let mut vm = self
                .vms
                .get_mut(vm_id)
                .ok_or_else(|| ClusterError::NotFound(format!("vm {}", vm_id)))?;
            std::mem::replace(&mut vm.host_id, destination.to_string())
        };

        debug!(vm_id = %vm_id, from = %source_host, to = %destination, "VM moved");

        self.migrations.lock().await.push(MigrationAction {
            vm_id: vm_id.to_string(),
            source_host,
            destination_host: destination.to_string(),
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PowerState;
    use std::io::Write;

    fn host(id: &str, pool: &str) -> Host {
        Host {
            id: id.to_string(),
            pool_id: pool.to_string(),
            cpu_count: 4,
        }
    }

    fn vm(id: &str, host_id: &str, power_state: PowerState) -> Vm {
        Vm {
            id: id.to_string(),
            host_id: host_id.to_string(),
            cpu_count: 1,
            power_state,
        }
    }

    #[tokio::test]
    async fn test_list_hosts_filters_by_pool() {
        let fleet = InMemoryFleet::new();
        fleet.add_host(host("h2", "p1"));
        fleet.add_host(host("h1", "p1"));
        fleet.add_host(host("h3", "p2"));

        let hosts = fleet.list_hosts(&["p1".to_string()]).await.unwrap();
        let ids: Vec<_> = hosts.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["h1", "h2"]);
    }

    #[tokio::test]
    async fn test_list_running_vms_skips_halted() {
        let fleet = InMemoryFleet::new();
        fleet.add_host(host("h1", "p1"));
        fleet.add_vm(vm("vm1", "h1", PowerState::Running));
        fleet.add_vm(vm("vm2", "h1", PowerState::Halted));
        fleet.add_vm(vm("vm3", "h2", PowerState::Running));

        let vms = fleet.list_running_vms("h1").await.unwrap();
        assert_eq!(vms.len(), 1);
        assert_eq!(vms[0].id, "vm1");
    }

    #[tokio::test]
    async fn test_stats_of_removed_host_fail() {
        let fleet = InMemoryFleet::new();
        fleet.add_host(host("h1", "p1"));
        fleet.set_stats(EntityRef::Host("h1".into()), StatsBundle::default());

        assert!(fleet
            .get_stats(&EntityRef::Host("h1".into()), Granularity::Minutes)
            .await
            .is_ok());

        fleet.remove_host("h1");
        assert!(fleet
            .get_stats(&EntityRef::Host("h1".into()), Granularity::Minutes)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_migrate_moves_vm_and_records_it() {
        let fleet = InMemoryFleet::new();
        fleet.add_host(host("h1", "p1"));
        fleet.add_host(host("h2", "p1"));
        fleet.add_vm(vm("vm1", "h1", PowerState::Running));

        fleet.migrate("vm1", "h2").await.unwrap();

        assert_eq!(fleet.vm_host("vm1").as_deref(), Some("h2"));
        let log = fleet.migrations().await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].source_host, "h1");
        assert_eq!(fleet.migrate_calls(), 1);
    }

    #[tokio::test]
    async fn test_injected_migration_failure() {
        let fleet = InMemoryFleet::new();
        fleet.add_host(host("h1", "p1"));
        fleet.add_host(host("h2", "p1"));
        fleet.add_vm(vm("vm1", "h1", PowerState::Running));
        fleet.fail_migration("vm1", "storage not shared");

        let err = fleet.migrate("vm1", "h2").await.unwrap_err();
        assert!(err.to_string().contains("storage not shared"));
        assert_eq!(fleet.vm_host("vm1").as_deref(), Some("h1"));
        assert!(fleet.migrations().await.is_empty());
        assert_eq!(fleet.migrate_calls(), 1);
    }

    #[test]
    fn test_snapshot_load_from_file() {
        let snapshot = r#"{
            "hosts": [{"id": "h1", "pool_id": "p1", "cpu_count": 8}],
            "vms": [{"id": "vm1", "host_id": "h1", "cpu_count": 2, "power_state": "running"}],
            "stats": [{
                "entity": {"type": "host", "id": "h1"},
                "stats": {"cpus": [[10.0, null, 20.0]], "memory": [1.0], "memory_free": [2.0]}
            }]
        }"#;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(snapshot.as_bytes()).unwrap();

        let loaded = FleetSnapshot::load(file.path()).unwrap();
        assert_eq!(loaded.hosts.len(), 1);
        assert_eq!(loaded.stats[0].stats.cpus[0], vec![Some(10.0), None, Some(20.0)]);

        let fleet = InMemoryFleet::from_snapshot(loaded);
        assert_eq!(fleet.vm_host("vm1").as_deref(), Some("h1"));
    }

    #[test]
    fn test_snapshot_load_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not json").unwrap();

        assert!(FleetSnapshot::load(file.path()).is_err());
    }
}
