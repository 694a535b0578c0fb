//! Load Balancer - VM placement service for virtualization pools
//!
//! This binary evaluates the configured plans once per interval and
//! migrates VMs off overloaded hosts.

use anyhow::Result;
use balancer_lib::{
    health::{components, HealthRegistry},
    observability::StructuredLogger,
    stats::{ClusterClient, FleetSnapshot, InMemoryFleet},
};
use load_balancer::{api, build_scheduler, config::BalancerConfig};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const BALANCER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting load-balancer");

    let config = BalancerConfig::load()?;
    info!(
        instance = %config.instance_name,
        interval_secs = config.interval_secs,
        plans = config.plans.len(),
        "Balancer configured"
    );

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::SCHEDULER).await;
    health_registry.register(components::ENGINE).await;
    health_registry.register(components::CLUSTER).await;

    let fleet = match &config.fleet_snapshot {
        Some(path) => InMemoryFleet::from_snapshot(FleetSnapshot::load(path)?),
        None => {
            warn!("No fleet snapshot configured, starting with an empty fleet");
            health_registry
                .set_degraded(components::CLUSTER, "No fleet snapshot loaded")
                .await;
            InMemoryFleet::new()
        }
    };
    let client: Arc<dyn ClusterClient> = Arc::new(fleet);

    let logger = StructuredLogger::new(&config.instance_name);
    let scheduler = build_scheduler(&config, client, &health_registry, logger.clone()).await?;

    if config.enabled {
        scheduler.start().await;
    } else {
        health_registry
            .set_degraded(components::SCHEDULER, "Balancing timer disabled")
            .await;
    }

    logger.log_startup(BALANCER_VERSION, config.plans.len());

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        Arc::clone(&scheduler),
    ));

    // Mark balancer as ready after initialization
    health_registry.set_ready(true).await;

    // Start health and metrics server
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    health_registry.set_ready(false).await;
    scheduler.stop().await;
    api_handle.abort();
    info!("Shutting down");

    Ok(())
}
