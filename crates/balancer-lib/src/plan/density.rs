//! Density policy
//!
//! Flags hosts whose CPU usage sits below the low bound, the signal for
//! consolidating their VMs elsewhere. Consolidation itself is not performed:
//! the policy reports its candidates and proposes no migrations.

use super::{Plan, PlanOutcome, ThresholdSet};
use crate::models::ResourceAverages;
use crate::stats::ClusterClient;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

/// Policy that looks for underused hosts
#[derive(Debug, Clone, Copy, Default)]
pub struct DensityPolicy;

impl DensityPolicy {
    pub fn is_violator(&self, thresholds: &ThresholdSet, averages: &ResourceAverages) -> bool {
        averages.cpu < thresholds.cpu.low
    }

    pub async fn execute(&self, plan: &Plan, client: &Arc<dyn ClusterClient>) -> Result<PlanOutcome> {
        let mut outcome = PlanOutcome::idle(plan);

        if let Some(detection) = plan.find_hosts_to_optimize(client).await? {
            outcome.flagged_hosts = detection
                .exceeded_hosts
                .iter()
                .map(|h| h.id.clone())
                .collect();

            info!(
                plan = %plan.name,
                hosts = ?outcome.flagged_hosts,
                "Underused hosts found, consolidation not performed"
            );
        }

        Ok(outcome)
    }
}
