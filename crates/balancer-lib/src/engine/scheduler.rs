//! Periodic cycle scheduler
//!
//! Drives `Balancer::execute` on a fixed interval. Ticks that arrive while
//! a cycle is still running are dropped, never queued. Stopping the timer
//! waits for the cycle in flight; reconfiguration stops the timer, swaps
//! the plans, and restarts it if it was running.

use super::Balancer;
use crate::error::ConfigError;
use crate::health::{components, HealthRegistry};
use crate::plan::PlanConfig;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for the cycle scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between cycles (default: 60 seconds)
    pub interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

struct Timer {
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Enable/disable control around a balancer
pub struct CycleScheduler {
    balancer: Arc<Balancer>,
    config: SchedulerConfig,
    timer: Mutex<Option<Timer>>,
    health: Option<HealthRegistry>,
}

impl CycleScheduler {
    pub fn new(balancer: Arc<Balancer>, config: SchedulerConfig) -> Self {
        Self {
            balancer,
            config,
            timer: Mutex::new(None),
            health: None,
        }
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn balancer(&self) -> &Arc<Balancer> {
        &self.balancer
    }

    /// Whether the timer is running
    pub async fn is_enabled(&self) -> bool {
        self.timer.lock().await.is_some()
    }

    /// Start the timer; returns false when it was already running
    pub async fn start(&self) -> bool {
        let mut timer = self.timer.lock().await;
        if timer.is_some() {
            return false;
        }

        let (shutdown, rx) = broadcast::channel(1);
        let handle = tokio::spawn(run(Arc::clone(&self.balancer), self.config.interval, rx));
        *timer = Some(Timer { shutdown, handle });

        info!(
            interval_secs = self.config.interval.as_secs(),
            "Balancing timer started"
        );
        if let Some(health) = &self.health {
            health.set_healthy(components::SCHEDULER).await;
        }

        true
    }

    /// Stop the timer, waiting for a running cycle to finish
    ///
    /// Returns false when the timer was not running. Configured plans are
    /// kept.
    pub async fn stop(&self) -> bool {
        let Some(timer) = self.timer.lock().await.take() else {
            return false;
        };

        let _ = timer.shutdown.send(());
        if let Err(e) = timer.handle.await {
            warn!(error = %e, "Balancing timer task ended abnormally");
        }

        info!("Balancing timer stopped");
        if let Some(health) = &self.health {
            health
                .set_degraded(components::SCHEDULER, "Balancing timer disabled")
                .await;
        }

        true
    }

    /// Replace the plan set with the timer out of the way
    pub async fn reconfigure(&self, configs: &[PlanConfig]) -> Result<(), ConfigError> {
        let was_running = self.stop().await;
        let result = self.balancer.configure(configs).await;
        if was_running {
            self.start().await;
        }
        result
    }
}

async fn run(balancer: Arc<Balancer>, period: Duration, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.recv() => {
                debug!("Balancing timer received shutdown");
                break;
            }
            _ = ticker.tick() => {
                if let Some(report) = balancer.execute().await {
                    debug!(
                        plans = report.outcomes.len(),
                        migrations = report.migrations_proposed(),
                        elapsed_ms = report.duration_ms,
                        "Scheduled cycle complete"
                    );
                }
            }
        }
    }
}
