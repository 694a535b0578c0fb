//! Balancing plans
//!
//! A plan binds a policy to a set of pools and a threshold set. Every
//! policy shares the same two-phase detection: a host must breach its
//! thresholds on the most recent sample *and* on a blend of that sample
//! with the trailing 30-minute history before anything is done about it.

mod density;
mod performance;
mod thresholds;

pub use density::DensityPolicy;
pub use performance::{placement_search, select_destination, select_worst_host, PerformancePolicy};
pub use thresholds::{
    Threshold, ThresholdConfig, ThresholdSet, DEFAULT_CRITICAL_CPU, DEFAULT_CRITICAL_MEMORY_FREE,
};

use crate::error::ConfigError;
use crate::models::{Host, HostId, MigrationAction, PoolId};
use crate::stats::{
    compute_averages, compute_blended_averages, fetch_stats, host_entities, AveragesMap,
    ClusterClient, DEFAULT_BLEND_RATIO, EXECUTION_DELAY, MINUTES_OF_HISTORICAL_DATA,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Which policy a plan runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanMode {
    Performance,
    Density,
}

impl FromStr for PlanMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "performance" | "true" => Ok(PlanMode::Performance),
            "density" | "false" => Ok(PlanMode::Density),
            other => Err(format!("unknown plan mode '{}'", other)),
        }
    }
}

// Accepts the boolean form (true = performance) as well as mode names.
impl<'de> Deserialize<'de> for PlanMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Name(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Flag(true) => Ok(PlanMode::Performance),
            Raw::Flag(false) => Ok(PlanMode::Density),
            Raw::Name(name) => name.parse().map_err(serde::de::Error::custom),
        }
    }
}

impl std::fmt::Display for PlanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanMode::Performance => write!(f, "performance"),
            PlanMode::Density => write!(f, "density"),
        }
    }
}

/// Plan as written in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanConfig {
    pub name: String,
    pub mode: PlanMode,
    pub pools: Vec<PoolId>,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
}

/// The closed set of balancing policies
#[derive(Debug, Clone)]
pub enum Policy {
    Performance(PerformancePolicy),
    Density(DensityPolicy),
}

impl Policy {
    pub fn for_mode(mode: PlanMode) -> Self {
        match mode {
            PlanMode::Performance => Policy::Performance(PerformancePolicy),
            PlanMode::Density => Policy::Density(DensityPolicy),
        }
    }

    pub fn mode(&self) -> PlanMode {
        match self {
            Policy::Performance(_) => PlanMode::Performance,
            Policy::Density(_) => PlanMode::Density,
        }
    }

    /// Hosts among `hosts` that violate the policy's predicate
    ///
    /// Hosts without averages are never returned. Pure: the same inputs
    /// always yield the same hosts, in input order.
    pub fn check_thresholds(
        &self,
        thresholds: &ThresholdSet,
        hosts: &[Host],
        averages: &AveragesMap,
    ) -> Vec<Host> {
        hosts
            .iter()
            .filter(|host| {
                averages.get(&host.id).is_some_and(|avg| match self {
                    Policy::Performance(p) => p.is_violator(thresholds, avg),
                    Policy::Density(d) => d.is_violator(thresholds, avg),
                })
            })
            .cloned()
            .collect()
    }
}

/// Result of the two-phase detection
#[derive(Debug, Clone)]
pub struct Detection {
    /// Hosts breaching thresholds on both passes
    pub exceeded_hosts: Vec<Host>,
    /// Blended averages of every in-scope host with data
    pub averages: AveragesMap,
    /// Every in-scope host
    pub hosts: Vec<Host>,
}

/// A migration that the cluster refused or could not complete
#[derive(Debug, Clone, Serialize)]
pub struct MigrationFailure {
    pub action: MigrationAction,
    pub error: String,
}

/// What one plan did during one cycle
#[derive(Debug, Clone, Serialize)]
pub struct PlanOutcome {
    pub plan: String,
    pub mode: PlanMode,
    /// Hosts flagged by the detection
    pub flagged_hosts: Vec<HostId>,
    /// Host selected for remediation
    pub exceeded_host: Option<HostId>,
    /// Migrations proposed by the placement search
    pub proposed: Vec<MigrationAction>,
    /// Proposed migrations that did not complete
    pub failures: Vec<MigrationFailure>,
}

impl PlanOutcome {
    pub fn idle(plan: &Plan) -> Self {
        Self {
            plan: plan.name.clone(),
            mode: plan.mode(),
            flagged_hosts: Vec::new(),
            exceeded_host: None,
            proposed: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn completed(&self) -> usize {
        self.proposed.len() - self.failures.len()
    }
}

/// A named policy bound to a set of pools
#[derive(Debug, Clone)]
pub struct Plan {
    pub name: String,
    pub pool_ids: Vec<PoolId>,
    pub thresholds: ThresholdSet,
    pub policy: Policy,
}

impl Plan {
    /// Build a plan, checking the parts that do not depend on other plans
    pub fn new(config: &PlanConfig) -> Result<Self, ConfigError> {
        if config.name.trim().is_empty() {
            return Err(ConfigError::EmptyPlanName);
        }
        if config.pools.is_empty() {
            return Err(ConfigError::EmptyScope {
                plan: config.name.clone(),
            });
        }

        let checks = [
            ("cpu", config.thresholds.critical_cpu()),
            ("memory_free", config.thresholds.critical_memory_free()),
        ];
        for (metric, value) in checks {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidThreshold {
                    plan: config.name.clone(),
                    metric,
                    value,
                });
            }
        }

        Ok(Self {
            name: config.name.clone(),
            pool_ids: config.pools.clone(),
            thresholds: config.thresholds.resolve(),
            policy: Policy::for_mode(config.mode),
        })
    }

    pub fn mode(&self) -> PlanMode {
        self.policy.mode()
    }

    /// Run one evaluation cycle of this plan
    pub async fn execute(&self, client: &Arc<dyn ClusterClient>) -> Result<PlanOutcome> {
        match &self.policy {
            Policy::Performance(policy) => policy.execute(self, client).await,
            Policy::Density(policy) => policy.execute(self, client).await,
        }
    }

    /// Two-phase detection of the hosts this plan should act on
    ///
    /// Returns `None` when no host breaches the thresholds on both passes.
    pub async fn find_hosts_to_optimize(
        &self,
        client: &Arc<dyn ClusterClient>,
    ) -> Result<Option<Detection>> {
        let hosts = client
            .list_hosts(&self.pool_ids)
            .await
            .with_context(|| format!("Failed to list hosts of plan '{}'", self.name))?;

        if hosts.is_empty() {
            debug!(plan = %self.name, "No hosts in scope");
            return Ok(None);
        }

        let stats = fetch_stats(client, host_entities(&hosts)).await;

        let now = compute_averages(&stats, EXECUTION_DELAY);
        let candidates = self.policy.check_thresholds(&self.thresholds, &hosts, &now);
        if candidates.is_empty() {
            debug!(plan = %self.name, hosts = hosts.len(), "No exceeded hosts");
            return Ok(None);
        }

        let before = compute_averages(&stats, MINUTES_OF_HISTORICAL_DATA);
        let averages = compute_blended_averages(&now, &before, DEFAULT_BLEND_RATIO);

        let exceeded_hosts = self
            .policy
            .check_thresholds(&self.thresholds, &candidates, &averages);
        if exceeded_hosts.is_empty() {
            debug!(
                plan = %self.name,
                candidates = candidates.len(),
                "Candidates recovered in the trailing window"
            );
            return Ok(None);
        }

        Ok(Some(Detection {
            exceeded_hosts,
            averages,
            hosts,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceAverages;

    const MIB: f64 = 1024.0 * 1024.0;

    fn host(id: &str) -> Host {
        Host {
            id: id.to_string(),
            pool_id: "p1".to_string(),
            cpu_count: 4,
        }
    }

    fn averages(entries: &[(&str, f64, f64)]) -> AveragesMap {
        entries
            .iter()
            .map(|(id, cpu, free)| {
                (
                    id.to_string(),
                    ResourceAverages {
                        cpu: *cpu,
                        memory_free: *free,
                        memory: 0.0,
                    },
                )
            })
            .collect()
    }

    fn config(name: &str, mode: PlanMode, pools: &[&str]) -> PlanConfig {
        PlanConfig {
            name: name.to_string(),
            mode,
            pools: pools.iter().map(|p| p.to_string()).collect(),
            thresholds: ThresholdConfig::default(),
        }
    }

    #[test]
    fn test_performance_predicate() {
        let policy = Policy::for_mode(PlanMode::Performance);
        let thresholds = ThresholdSet::default();
        let hosts = vec![host("busy"), host("tight"), host("fine"), host("edge")];
        let avgs = averages(&[
            ("busy", 80.0, 1024.0 * MIB),
            ("tight", 10.0, 50.0 * MIB),
            ("fine", 50.0, 1024.0 * MIB),
            ("edge", thresholds.cpu.high, 1024.0 * MIB),
        ]);

        let flagged: Vec<_> = policy
            .check_thresholds(&thresholds, &hosts, &avgs)
            .into_iter()
            .map(|h| h.id)
            .collect();
        assert_eq!(flagged, vec!["busy", "tight", "edge"]);
    }

    #[test]
    fn test_memory_free_at_high_bound_is_violator() {
        let policy = Policy::for_mode(PlanMode::Performance);
        let avgs = averages(&[("h1", 10.0, 80.0 * MIB)]);
        let flagged = policy.check_thresholds(&ThresholdSet::default(), &[host("h1")], &avgs);
        assert_eq!(flagged.len(), 1);
    }

    #[test]
    fn test_hosts_within_bounds_never_flagged() {
        let policy = Policy::for_mode(PlanMode::Performance);
        let thresholds = ThresholdSet::default();

        for cpu in [0.5, 20.0, 50.0, 76.4] {
            for free in [80.1 * MIB, 512.0 * MIB, 64.0 * 1024.0 * MIB] {
                let avgs = averages(&[("h1", cpu, free)]);
                assert!(policy
                    .check_thresholds(&thresholds, &[host("h1")], &avgs)
                    .is_empty());
            }
        }
    }

    #[test]
    fn test_hosts_without_data_never_flagged() {
        let policy = Policy::for_mode(PlanMode::Performance);
        let avgs = averages(&[]);
        assert!(policy
            .check_thresholds(&ThresholdSet::default(), &[host("h1")], &avgs)
            .is_empty());
    }

    #[test]
    fn test_check_thresholds_is_idempotent() {
        let policy = Policy::for_mode(PlanMode::Performance);
        let thresholds = ThresholdSet::default();
        let hosts = vec![host("h1"), host("h2"), host("h3")];
        let avgs = averages(&[
            ("h1", 95.0, 1024.0 * MIB),
            ("h2", 20.0, 1024.0 * MIB),
            ("h3", 30.0, 10.0 * MIB),
        ]);

        let first = policy.check_thresholds(&thresholds, &hosts, &avgs);
        let second = policy.check_thresholds(&thresholds, &hosts, &avgs);
        assert_eq!(first, second);

        let again = policy.check_thresholds(&thresholds, &first, &avgs);
        assert_eq!(first, again);
    }

    #[test]
    fn test_density_predicate_flags_underused_hosts() {
        let policy = Policy::for_mode(PlanMode::Density);
        let hosts = vec![host("idle"), host("busy")];
        let avgs = averages(&[("idle", 5.0, 1024.0 * MIB), ("busy", 60.0, 1024.0 * MIB)]);

        let flagged = policy.check_thresholds(&ThresholdSet::default(), &hosts, &avgs);
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].id, "idle");
    }

    #[test]
    fn test_plan_mode_deserializes_from_bool_or_name() {
        let from_bool: PlanMode = serde_json::from_str("true").unwrap();
        assert_eq!(from_bool, PlanMode::Performance);

        let from_false: PlanMode = serde_json::from_str("false").unwrap();
        assert_eq!(from_false, PlanMode::Density);

        let from_name: PlanMode = serde_json::from_str("\"Density\"").unwrap();
        assert_eq!(from_name, PlanMode::Density);

        assert!(serde_json::from_str::<PlanMode>("\"turbo\"").is_err());
    }

    #[test]
    fn test_plan_config_deserialize() {
        let raw = r#"{"name": "main", "mode": true, "pools": ["p1", "p2"]}"#;
        let config: PlanConfig = serde_json::from_str(raw).unwrap();

        assert_eq!(config.mode, PlanMode::Performance);
        assert_eq!(config.pools, vec!["p1", "p2"]);
        assert_eq!(config.thresholds, ThresholdConfig::default());
    }

    #[test]
    fn test_plan_new_validates_config() {
        assert!(Plan::new(&config("main", PlanMode::Performance, &["p1"])).is_ok());

        assert_eq!(
            Plan::new(&config(" ", PlanMode::Performance, &["p1"])).unwrap_err(),
            ConfigError::EmptyPlanName
        );
        assert!(matches!(
            Plan::new(&config("main", PlanMode::Performance, &[])),
            Err(ConfigError::EmptyScope { .. })
        ));

        let mut bad = config("main", PlanMode::Performance, &["p1"]);
        bad.thresholds.cpu = Some(-1.0);
        assert!(matches!(
            Plan::new(&bad),
            Err(ConfigError::InvalidThreshold { metric: "cpu", .. })
        ));
    }

    #[test]
    fn test_plan_thresholds_resolved_at_construction() {
        let mut cfg = config("main", PlanMode::Density, &["p1"]);
        cfg.thresholds.memory_free = Some(128.0 * MIB);

        let plan = Plan::new(&cfg).unwrap();
        assert_eq!(plan.mode(), PlanMode::Density);
        assert_eq!(plan.thresholds.memory_free.high, 160.0 * MIB);
        assert_eq!(plan.thresholds.cpu, ThresholdSet::default().cpu);
    }
}
