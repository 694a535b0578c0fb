//! Cycle orchestration
//!
//! The `Balancer` owns the configured plans and runs them; the
//! `CycleScheduler` drives it on a timer with enable/disable controls.

mod registry;
mod scheduler;


pub use registry::{build_plans, Balancer, CycleReport, PlanFailure};
pub use scheduler::{CycleScheduler, SchedulerConfig};
