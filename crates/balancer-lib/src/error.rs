//! Error types shared across the balancer

use thiserror::Error;

/// Rejection of a plan set at configure time
///
/// A rejected configuration is never partially applied.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("at least one plan is required")]
    NoPlans,

    #[error("plan name must not be empty")]
    EmptyPlanName,

    #[error("plan name '{0}' is used more than once")]
    DuplicatePlanName(String),

    #[error("plan '{plan}' has no pools")]
    EmptyScope { plan: String },

    #[error("pool '{pool}' is claimed by both plan '{first}' and plan '{second}'")]
    DuplicatePool {
        pool: String,
        first: String,
        second: String,
    },

    #[error("plan '{plan}' has an invalid {metric} threshold: {value}")]
    InvalidThreshold {
        plan: String,
        metric: &'static str,
        value: f64,
    },
}

/// Failures reported by a cluster client
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("no statistics available for {0}")]
    NoStats(String),

    #[error("migration of vm {vm_id} to host {destination} failed: {reason}")]
    MigrationFailed {
        vm_id: String,
        destination: String,
        reason: String,
    },
}
