//! Load balancer service wiring
//!
//! Configuration loading, the HTTP API, and the construction of the
//! balancer and its scheduler from configuration.

pub mod api;
pub mod config;

use anyhow::{Context, Result};
use balancer_lib::{
    engine::{Balancer, CycleScheduler, SchedulerConfig},
    health::HealthRegistry,
    observability::StructuredLogger,
    stats::ClusterClient,
};
use config::BalancerConfig;
use std::sync::Arc;

/// Build the balancer with its configured plans and wrap it in a scheduler
///
/// Fails when the plan set is rejected, including when it is empty.
pub async fn build_scheduler(
    config: &BalancerConfig,
    client: Arc<dyn ClusterClient>,
    health: &HealthRegistry,
    logger: StructuredLogger,
) -> Result<Arc<CycleScheduler>> {
    let balancer = Balancer::new(client, logger).with_health(health.clone());
    balancer
        .configure(&config.plans)
        .await
        .context("Invalid plan configuration")?;

    Ok(Arc::new(
        CycleScheduler::new(
            Arc::new(balancer),
            SchedulerConfig {
                interval: config.interval(),
            },
        )
        .with_health(health.clone()),
    ))
}
