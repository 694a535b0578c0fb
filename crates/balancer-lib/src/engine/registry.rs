//! Plan registry and cycle execution
//!
//! Holds the active plan set, replaces it atomically on reconfiguration,
//! and runs every plan concurrently once per cycle. A single-slot guard
//! keeps cycles from overlapping.

use crate::error::ConfigError;
use crate::health::HealthRegistry;
use crate::observability::{BalancerMetrics, StructuredLogger};
use crate::plan::{Plan, PlanConfig, PlanOutcome};
use crate::stats::ClusterClient;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A plan whose execution returned an error or panicked
#[derive(Debug, Clone, Serialize)]
pub struct PlanFailure {
    pub plan: String,
    pub error: String,
}

/// Everything that happened during one cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcomes: Vec<PlanOutcome>,
    pub failed_plans: Vec<PlanFailure>,
}

impl CycleReport {
    pub fn migrations_proposed(&self) -> usize {
        self.outcomes.iter().map(|o| o.proposed.len()).sum()
    }

    pub fn migrations_failed(&self) -> usize {
        self.outcomes.iter().map(|o| o.failures.len()).sum()
    }
}

/// Build the plan set, rejecting it as a whole on the first problem
pub fn build_plans(configs: &[PlanConfig]) -> Result<Vec<Plan>, ConfigError> {
    if configs.is_empty() {
        return Err(ConfigError::NoPlans);
    }

    let mut names = HashSet::new();
    let mut pool_owners: HashMap<&str, &str> = HashMap::new();
    let mut plans = Vec::with_capacity(configs.len());

    for config in configs {
        let plan = Plan::new(config)?;

        if !names.insert(config.name.as_str()) {
            return Err(ConfigError::DuplicatePlanName(config.name.clone()));
        }

        for pool in &config.pools {
            if let Some(owner) = pool_owners.insert(pool.as_str(), config.name.as_str()) {
                return Err(ConfigError::DuplicatePool {
                    pool: pool.clone(),
                    first: owner.to_string(),
                    second: config.name.clone(),
                });
            }
        }

        plans.push(plan);
    }

    Ok(plans)
}

/// Owner of the configured plans
pub struct Balancer {
    client: Arc<dyn ClusterClient>,
    plans: RwLock<Vec<Arc<Plan>>>,
    /// Held for the whole duration of a cycle by the task running it
    cycle_guard: Arc<Mutex<()>>,
    metrics: BalancerMetrics,
    logger: StructuredLogger,
    health: Option<HealthRegistry>,
}

impl Balancer {
    /// Create a balancer with no plans
    pub fn new(client: Arc<dyn ClusterClient>, logger: StructuredLogger) -> Self {
        Self {
            client,
            plans: RwLock::new(Vec::new()),
            cycle_guard: Arc::new(Mutex::new(())),
            metrics: BalancerMetrics::new(),
            logger,
            health: None,
        }
    }

    /// Report cycle results to a health registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Replace the plan set
    ///
    /// Validation happens before anything is touched; a rejected set leaves
    /// the previous plans active. The swap waits for an in-flight cycle.
    pub async fn configure(&self, configs: &[PlanConfig]) -> Result<(), ConfigError> {
        let plans = match build_plans(configs) {
            Ok(plans) => plans,
            Err(e) => {
                self.logger.log_configuration_rejected(&e.to_string());
                return Err(e);
            }
        };
        let plans: Vec<Arc<Plan>> = plans.into_iter().map(Arc::new).collect();

        let _cycle = self.cycle_guard.lock().await;
        self.metrics.set_plans_configured(plans.len() as i64);
        self.logger.log_configured(&plans);
        *self.plans.write().await = plans;

        Ok(())
    }

    /// Snapshot of the active plans
    pub async fn plans(&self) -> Vec<Arc<Plan>> {
        self.plans.read().await.clone()
    }

    /// Whether a cycle is in flight
    pub fn is_busy(&self) -> bool {
        self.cycle_guard.try_lock().is_err()
    }

    /// Run one cycle over every plan
    ///
    /// Returns `None` without doing anything when a cycle is already
    /// running. The cycle runs in its own task: dropping the returned
    /// future does not stop it, and the guard stays held until it ends.
    pub async fn execute(&self) -> Option<CycleReport> {
        let Ok(guard) = Arc::clone(&self.cycle_guard).try_lock_owned() else {
            debug!("Cycle already running, skipping");
            self.metrics.inc_cycles_skipped();
            return None;
        };

        let cycle = Cycle {
            client: Arc::clone(&self.client),
            plans: self.plans().await,
            metrics: self.metrics.clone(),
            logger: self.logger.clone(),
            health: self.health.clone(),
        };

        let handle = tokio::spawn(async move {
            let _guard = guard;
            cycle.run().await
        });

        match handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "Cycle task ended abnormally");
                None
            }
        }
    }
}

/// Everything one cycle needs, detached from the balancer
struct Cycle {
    client: Arc<dyn ClusterClient>,
    plans: Vec<Arc<Plan>>,
    metrics: BalancerMetrics,
    logger: StructuredLogger,
    health: Option<HealthRegistry>,
}

impl Cycle {
    async fn run(self) -> CycleReport {
        let started_at = Utc::now();
        let start = Instant::now();

        let handles: Vec<(String, JoinHandle<Result<PlanOutcome>>)> = self
            .plans
            .iter()
            .map(|plan| {
                let plan = Arc::clone(plan);
                let client = Arc::clone(&self.client);
                let name = plan.name.clone();
                let handle = tokio::spawn(async move { plan.execute(&client).await });
                (name, handle)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        let mut failed_plans = Vec::new();

        for (name, handle) in handles {
            let error = match handle.await {
                Ok(Ok(outcome)) => {
                    self.record_outcome(&outcome);
                    outcomes.push(outcome);
                    continue;
                }
                Ok(Err(e)) => format!("{:#}", e),
                Err(e) => format!("plan task aborted: {}", e),
            };

            self.logger.log_plan_failure(&name, &error);
            self.metrics.inc_plan_failures();
            failed_plans.push(PlanFailure { plan: name, error });
        }

        let elapsed = start.elapsed();
        let report = CycleReport {
            started_at,
            duration_ms: elapsed.as_millis() as u64,
            outcomes,
            failed_plans,
        };

        self.metrics.observe_cycle(elapsed.as_secs_f64());
        self.metrics.set_hosts_flagged(
            report
                .outcomes
                .iter()
                .map(|o| o.flagged_hosts.len() as i64)
                .sum(),
        );
        self.logger.log_cycle(
            report.outcomes.len() + report.failed_plans.len(),
            report.migrations_proposed(),
            report.failed_plans.len(),
            report.duration_ms,
        );

        if let Some(health) = &self.health {
            let failed: Vec<String> = report.failed_plans.iter().map(|f| f.plan.clone()).collect();
            health.record_cycle(&failed).await;
        }

        report
    }

    fn record_outcome(&self, outcome: &PlanOutcome) {
        for action in &outcome.proposed {
            self.logger.log_migration(&outcome.plan, action);
        }
        for failure in &outcome.failures {
            self.logger
                .log_migration_failed(&outcome.plan, &failure.action, &failure.error);
        }

        self.metrics
            .add_migrations_proposed(outcome.proposed.len() as u64);
        self.metrics
            .add_migrations_failed(outcome.failures.len() as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{PlanMode, ThresholdConfig};

    fn config(name: &str, pools: &[&str]) -> PlanConfig {
        PlanConfig {
            name: name.to_string(),
            mode: PlanMode::Performance,
            pools: pools.iter().map(|p| p.to_string()).collect(),
            thresholds: ThresholdConfig::default(),
        }
    }

    #[test]
    fn test_build_plans_rejects_overlapping_pools() {
        let result = build_plans(&[config("a", &["p1", "p2"]), config("b", &["p2", "p3"])]);

        assert_eq!(
            result.unwrap_err(),
            ConfigError::DuplicatePool {
                pool: "p2".to_string(),
                first: "a".to_string(),
                second: "b".to_string(),
            }
        );
    }

    #[test]
    fn test_build_plans_rejects_pool_repeated_within_plan() {
        let result = build_plans(&[config("a", &["p1", "p1"])]);
        assert!(matches!(result, Err(ConfigError::DuplicatePool { .. })));
    }

    #[test]
    fn test_build_plans_rejects_empty_set() {
        assert_eq!(build_plans(&[]).unwrap_err(), ConfigError::NoPlans);
    }

    #[test]
    fn test_build_plans_rejects_duplicate_names() {
        let result = build_plans(&[config("a", &["p1"]), config("a", &["p2"])]);
        assert_eq!(
            result.unwrap_err(),
            ConfigError::DuplicatePlanName("a".to_string())
        );
    }

    #[test]
    fn test_build_plans_disjoint_scopes() {
        let plans = build_plans(&[config("a", &["p1", "p2"]), config("b", &["p3"])]).unwrap();
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[1].pool_ids, vec!["p3"]);
    }
}
