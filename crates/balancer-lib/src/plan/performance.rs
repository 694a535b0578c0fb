//! Performance policy
//!
//! Relieves CPU and memory pressure by moving VMs off the worst host onto
//! the least loaded ones, heaviest VMs first.

use super::{MigrationFailure, Plan, PlanOutcome, ThresholdSet};
use crate::models::{Host, HostId, MigrationAction, ResourceAverages, VmId};
use crate::stats::{
    compute_blended_averages, compute_vm_averages, fetch_stats, normalize_vm_cpu, vm_entities,
    AveragesMap, ClusterClient, DEFAULT_BLEND_RATIO, EXECUTION_DELAY, MINUTES_OF_HISTORICAL_DATA,
};
use anyhow::{Context, Result};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Policy that migrates VMs away from overloaded hosts
#[derive(Debug, Clone, Copy, Default)]
pub struct PerformancePolicy;

impl PerformancePolicy {
    /// A host is under pressure when its CPU reaches the high bound or its
    /// free memory drops to the (inverted) high bound
    pub fn is_violator(&self, thresholds: &ThresholdSet, averages: &ResourceAverages) -> bool {
        averages.cpu >= thresholds.cpu.high || averages.memory_free <= thresholds.memory_free.high
    }

    pub async fn execute(&self, plan: &Plan, client: &Arc<dyn ClusterClient>) -> Result<PlanOutcome> {
        let mut outcome = PlanOutcome::idle(plan);

        let Some(detection) = plan.find_hosts_to_optimize(client).await? else {
            return Ok(outcome);
        };
        outcome.flagged_hosts = detection
            .exceeded_hosts
            .iter()
            .map(|h| h.id.clone())
            .collect();

        let Some(exceeded) = select_worst_host(&detection.exceeded_hosts, &detection.averages)
        else {
            return Ok(outcome);
        };
        let exceeded_id = exceeded.id.clone();
        outcome.exceeded_host = Some(exceeded_id.clone());

        let destinations: Vec<HostId> = detection
            .hosts
            .iter()
            .filter(|h| h.id != exceeded_id && detection.averages.contains_key(&h.id))
            .map(|h| h.id.clone())
            .collect();

        info!(
            plan = %plan.name,
            host_id = %exceeded_id,
            flagged = outcome.flagged_hosts.len(),
            destinations = destinations.len(),
            "Optimizing exceeded host"
        );

        let mut averages = detection.averages;
        let vms = self.vm_averages(client, &exceeded_id).await?;
        outcome.proposed = placement_search(&exceeded_id, &destinations, &mut averages, vms);
        outcome.failures = dispatch_migrations(client, &outcome.proposed).await;

        Ok(outcome)
    }

    /// Blended, vCPU-normalized averages of the running VMs on a host
    async fn vm_averages(
        &self,
        client: &Arc<dyn ClusterClient>,
        host_id: &str,
    ) -> Result<Vec<(VmId, ResourceAverages)>> {
        let vms: Vec<_> = client
            .list_running_vms(host_id)
            .await
            .with_context(|| format!("Failed to list VMs of host {}", host_id))?
            .into_iter()
            .filter(|vm| vm.is_running())
            .collect();

        if vms.is_empty() {
            debug!(host_id = %host_id, "No running VMs to move");
            return Ok(Vec::new());
        }

        let stats = fetch_stats(client, vm_entities(&vms)).await;
        let blended = compute_blended_averages(
            &compute_vm_averages(&stats, EXECUTION_DELAY),
            &compute_vm_averages(&stats, MINUTES_OF_HISTORICAL_DATA),
            DEFAULT_BLEND_RATIO,
        );

        Ok(vms
            .into_iter()
            .filter_map(|vm| {
                let avg = blended.get(&vm.id).copied()?;
                normalize_vm_cpu(avg, vm.cpu_count).map(|avg| (vm.id, avg))
            })
            .collect())
    }
}

/// Linear scan keeping the first item that no later item beats
fn search_best<'a, T>(
    items: impl IntoIterator<Item = &'a T>,
    mut better: impl FnMut(&T, &T) -> bool,
) -> Option<&'a T> {
    items.into_iter().fold(None, |best, item| match best {
        Some(current) if !better(item, current) => Some(current),
        _ => Some(item),
    })
}

fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

/// The most loaded host: highest CPU, then lowest free memory
pub fn select_worst_host<'a>(hosts: &'a [Host], averages: &AveragesMap) -> Option<&'a Host> {
    let with_data = hosts.iter().filter(|h| averages.contains_key(&h.id));

    search_best(with_data, |candidate, current| {
        let a = &averages[&candidate.id];
        let b = &averages[&current.id];
        match cmp_f64(a.cpu, b.cpu) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => a.memory_free < b.memory_free,
        }
    })
}

/// The least loaded host: lowest CPU, then highest free memory
pub fn select_destination<'a>(
    host_ids: &'a [HostId],
    averages: &AveragesMap,
) -> Option<&'a HostId> {
    let with_data = host_ids.iter().filter(|id| averages.contains_key(*id));

    search_best(with_data, |candidate, current| {
        let a = &averages[candidate];
        let b = &averages[current];
        match cmp_f64(a.cpu, b.cpu) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => a.memory_free > b.memory_free,
        }
    })
}

/// Greedy placement of the VMs of an exceeded host
///
/// VMs are taken heaviest CPU first. Each one is offered to the currently
/// least loaded destination; when the move is accepted the running totals
/// in `host_averages` are updated so later VMs see its effect.
pub fn placement_search(
    exceeded_host: &HostId,
    destinations: &[HostId],
    host_averages: &mut AveragesMap,
    mut vms: Vec<(VmId, ResourceAverages)>,
) -> Vec<MigrationAction> {
    let mut actions = Vec::new();

    let Some(mut source) = host_averages.get(exceeded_host).copied() else {
        return actions;
    };

    vms.sort_by(|(_, a), (_, b)| cmp_f64(b.cpu, a.cpu));

    for (vm_id, vm) in vms {
        let Some(destination_id) = select_destination(destinations, host_averages).cloned() else {
            break;
        };
        let destination = host_averages[&destination_id];

        // The memory clause skips when the destination has *more* free
        // memory than the VM uses. See DESIGN.md before changing it.
        if source.cpu - vm.cpu < destination.cpu + vm.cpu || destination.memory_free > vm.memory {
            debug!(
                vm_id = %vm_id,
                destination = %destination_id,
                vm_cpu = vm.cpu,
                vm_memory = vm.memory,
                "VM left in place"
            );
            continue;
        }

        source.cpu -= vm.cpu;
        source.memory_free += vm.memory;
        if let Some(target) = host_averages.get_mut(&destination_id) {
            target.cpu += vm.cpu;
            target.memory_free -= vm.memory;
        }

        debug!(
            vm_id = %vm_id,
            source = %exceeded_host,
            destination = %destination_id,
            "Migration proposed"
        );
        actions.push(MigrationAction {
            vm_id,
            source_host: exceeded_host.clone(),
            destination_host: destination_id,
        });
    }

    host_averages.insert(exceeded_host.clone(), source);
    actions
}

/// Issue every migration concurrently and wait for all of them to settle
///
/// A migration whose task panicked or was cancelled counts as failed.
async fn dispatch_migrations(
    client: &Arc<dyn ClusterClient>,
    actions: &[MigrationAction],
) -> Vec<MigrationFailure> {
    let mut tasks = JoinSet::new();
    let mut pending: HashMap<VmId, MigrationAction> = HashMap::with_capacity(actions.len());

    for action in actions.iter().cloned() {
        pending.insert(action.vm_id.clone(), action.clone());
        let client = Arc::clone(client);
        tasks.spawn(async move {
            let result = client
                .migrate(&action.vm_id, &action.destination_host)
                .await;
            (action, result)
        });
    }

    let mut failures = Vec::new();
    let mut aborted = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((action, Ok(()))) => {
                pending.remove(&action.vm_id);
            }
            Ok((action, Err(e))) => {
                pending.remove(&action.vm_id);
                warn!(
                    vm_id = %action.vm_id,
                    source = %action.source_host,
                    destination = %action.destination_host,
                    error = %e,
                    "Migration failed"
                );
                failures.push(MigrationFailure {
                    action,
                    error: format!("{:#}", e),
                });
            }
            Err(e) => {
                warn!(error = %e, "Migration task did not complete");
                aborted = Some(e.to_string());
            }
        }
    }

    // Whatever never reported back belongs to a task that did not complete
    let reason = aborted.unwrap_or_else(|| "migration task did not complete".to_string());
    failures.extend(pending.into_values().map(|action| MigrationFailure {
        action,
        error: reason.clone(),
    }));

    failures
}
