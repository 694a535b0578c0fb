//! Observability infrastructure for the load balancer
//!
//! Provides:
//! - Prometheus metrics (cycle latency, migrations, plan failures, skipped ticks)
//! - Structured JSON logging with tracing

use crate::models::MigrationAction;
use crate::plan::Plan;
use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge,
};
use std::sync::{Arc, OnceLock};
use tracing::{error, info, warn};

/// Histogram buckets for cycle durations (in seconds)
const CYCLE_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<BalancerMetricsInner> = OnceLock::new();

struct BalancerMetricsInner {
    cycle_duration_seconds: Histogram,
    cycles_total: IntCounter,
    cycles_skipped: IntCounter,
    migrations_proposed: IntCounter,
    migrations_failed: IntCounter,
    plan_failures: IntCounter,
    plans_configured: IntGauge,
    hosts_flagged: IntGauge,
}

impl BalancerMetricsInner {
    fn new() -> Self {
        Self {
            cycle_duration_seconds: register_histogram!(
                "load_balancer_cycle_duration_seconds",
                "Time spent evaluating all plans in one cycle",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_duration_seconds"),

            cycles_total: register_int_counter!(
                "load_balancer_cycles_total",
                "Total number of evaluation cycles run"
            )
            .expect("Failed to register cycles_total"),

            cycles_skipped: register_int_counter!(
                "load_balancer_cycles_skipped_total",
                "Ticks dropped because a cycle was still running"
            )
            .expect("Failed to register cycles_skipped"),

            migrations_proposed: register_int_counter!(
                "load_balancer_migrations_proposed_total",
                "Total number of VM migrations proposed"
            )
            .expect("Failed to register migrations_proposed"),

            migrations_failed: register_int_counter!(
                "load_balancer_migrations_failed_total",
                "Total number of VM migrations that did not complete"
            )
            .expect("Failed to register migrations_failed"),

            plan_failures: register_int_counter!(
                "load_balancer_plan_failures_total",
                "Total number of plan executions that failed"
            )
            .expect("Failed to register plan_failures"),

            plans_configured: register_int_gauge!(
                "load_balancer_plans_configured",
                "Number of plans currently configured"
            )
            .expect("Failed to register plans_configured"),

            hosts_flagged: register_int_gauge!(
                "load_balancer_hosts_flagged",
                "Hosts flagged by the last cycle across all plans"
            )
            .expect("Failed to register hosts_flagged"),
        }
    }
}

/// Balancer metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct BalancerMetrics {
    _private: (),
}

impl Default for BalancerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BalancerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(BalancerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &BalancerMetricsInner {
        GLOBAL_METRICS.get_or_init(BalancerMetricsInner::new)
    }

    pub fn observe_cycle(&self, duration_secs: f64) {
        self.inner().cycle_duration_seconds.observe(duration_secs);
        self.inner().cycles_total.inc();
    }

    pub fn inc_cycles_skipped(&self) {
        self.inner().cycles_skipped.inc();
    }

    pub fn add_migrations_proposed(&self, count: u64) {
        self.inner().migrations_proposed.inc_by(count);
    }

    pub fn add_migrations_failed(&self, count: u64) {
        self.inner().migrations_failed.inc_by(count);
    }

    pub fn inc_plan_failures(&self) {
        self.inner().plan_failures.inc();
    }

    pub fn set_plans_configured(&self, count: i64) {
        self.inner().plans_configured.set(count);
    }

    pub fn set_hosts_flagged(&self, count: i64) {
        self.inner().hosts_flagged.set(count);
    }
}

/// Structured logger for balancer events
///
/// Provides consistent event-tagged logging for configuration changes,
/// migrations, and plan failures.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, plans: usize) {
        info!(
            event = "balancer_started",
            instance = %self.instance,
            version = %version,
            plans = plans,
            "Load balancer started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "balancer_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Load balancer shutting down"
        );
    }

    /// Log a newly applied plan set
    pub fn log_configured(&self, plans: &[Arc<Plan>]) {
        for plan in plans {
            info!(
                event = "plan_configured",
                instance = %self.instance,
                plan = %plan.name,
                mode = %plan.mode(),
                pools = ?plan.pool_ids,
                critical_cpu = plan.thresholds.cpu.critical,
                critical_memory_free = plan.thresholds.memory_free.critical,
                "Plan configured"
            );
        }
    }

    pub fn log_configuration_rejected(&self, reason: &str) {
        warn!(
            event = "configuration_rejected",
            instance = %self.instance,
            reason = %reason,
            "Plan configuration rejected, keeping previous plans"
        );
    }

    pub fn log_migration(&self, plan: &str, action: &MigrationAction) {
        info!(
            event = "migration_requested",
            instance = %self.instance,
            plan = %plan,
            vm_id = %action.vm_id,
            source = %action.source_host,
            destination = %action.destination_host,
            "Migration requested"
        );
    }

    pub fn log_migration_failed(&self, plan: &str, action: &MigrationAction, reason: &str) {
        warn!(
            event = "migration_failed",
            instance = %self.instance,
            plan = %plan,
            vm_id = %action.vm_id,
            source = %action.source_host,
            destination = %action.destination_host,
            reason = %reason,
            "Migration failed, not retried"
        );
    }

    pub fn log_plan_failure(&self, plan: &str, reason: &str) {
        error!(
            event = "plan_execution_failed",
            instance = %self.instance,
            plan = %plan,
            reason = %reason,
            "Plan execution failed"
        );
    }

    pub fn log_cycle(&self, plans: usize, migrations: usize, failed_plans: usize, elapsed_ms: u64) {
        info!(
            event = "cycle_completed",
            instance = %self.instance,
            plans = plans,
            migrations = migrations,
            failed_plans = failed_plans,
            elapsed_ms = elapsed_ms,
            "Balancing cycle complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balancer_metrics_creation() {
        // Metrics live in the global Prometheus registry and are registered
        // once per process; every handle shares them.
        let metrics = BalancerMetrics::new();
        let other = metrics.clone();

        metrics.observe_cycle(0.2);
        metrics.inc_cycles_skipped();
        metrics.add_migrations_proposed(3);
        other.add_migrations_failed(1);
        other.inc_plan_failures();
        other.set_plans_configured(2);
        other.set_hosts_flagged(1);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("lb-0");
        assert_eq!(logger.instance, "lb-0");
    }
}
