//! Load balancer library for virtual machine pools
//!
//! This crate provides the core functionality for:
//! - Smoothing host and VM statistics over sample windows
//! - Threshold-based detection of overloaded and underused hosts
//! - Greedy VM placement and migration dispatch
//! - Plan registry and the periodic cycle scheduler
//! - Health checks and observability

pub mod engine;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod plan;
pub mod stats;

pub use engine::{Balancer, CycleReport, CycleScheduler, PlanFailure, SchedulerConfig};
pub use error::{ClusterError, ConfigError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{BalancerMetrics, StructuredLogger};
pub use plan::{Plan, PlanConfig, PlanMode, PlanOutcome};
pub use stats::{ClusterClient, InMemoryFleet};
