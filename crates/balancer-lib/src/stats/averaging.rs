//! Window averaging over resource samples
//!
//! Samples that are missing or exactly zero are treated as "no data": they
//! add nothing to the sum and are left out of the count. A window without a
//! single valid sample has no average at all, and the entity it belongs to
//! is dropped from the cycle.

use crate::models::{ResourceAverages, StatsBundle};
use std::collections::HashMap;

/// Number of most recent points used for the immediate average
pub const EXECUTION_DELAY: usize = 1;

/// Number of points in the trailing history window
pub const MINUTES_OF_HISTORICAL_DATA: usize = 30;

/// Weight of the immediate average when blending with the trailing one
pub const DEFAULT_BLEND_RATIO: f64 = 0.75;

/// Cycle-scoped averages keyed by host or VM id
pub type AveragesMap = HashMap<String, ResourceAverages>;

/// Mean of the last `window` samples of `series`
///
/// Returns `None` when the window holds no valid sample.
pub fn average(series: &[Option<f64>], window: usize) -> Option<f64> {
    let start = series.len().saturating_sub(window);

    let (sum, count) = series[start..]
        .iter()
        .fold((0.0, 0usize), |(sum, count), sample| match sample {
            Some(value) if *value != 0.0 && !value.is_nan() => (sum + value, count + 1),
            _ => (sum, count),
        });

    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Averages of one stats bundle over the last `window` points
///
/// Host CPU is the average of the per-vCPU averages.
pub fn aggregate(stats: &StatsBundle, window: usize) -> Option<ResourceAverages> {
    let per_core: Vec<Option<f64>> = stats.cpus.iter().map(|s| average(s, window)).collect();

    Some(ResourceAverages {
        cpu: average(&per_core, per_core.len())?,
        memory_free: average(&stats.memory_free, window)?,
        memory: average(&stats.memory, window)?,
    })
}

/// VM averages over the last `window` points
///
/// Placement only reads a VM's CPU and used memory, so a VM that reports no
/// free memory (no guest tools) keeps a zero figure instead of being dropped.
pub fn aggregate_vm(stats: &StatsBundle, window: usize) -> Option<ResourceAverages> {
    let per_core: Vec<Option<f64>> = stats.cpus.iter().map(|s| average(s, window)).collect();

    Some(ResourceAverages {
        cpu: average(&per_core, per_core.len())?,
        memory_free: average(&stats.memory_free, window).unwrap_or(0.0),
        memory: average(&stats.memory, window)?,
    })
}

/// Averages for every entity that has data in the window
pub fn compute_averages(stats: &HashMap<String, StatsBundle>, window: usize) -> AveragesMap {
    collect_averages(stats, window, aggregate)
}

/// Averages for every VM that has CPU and memory data in the window
pub fn compute_vm_averages(stats: &HashMap<String, StatsBundle>, window: usize) -> AveragesMap {
    collect_averages(stats, window, aggregate_vm)
}

fn collect_averages(
    stats: &HashMap<String, StatsBundle>,
    window: usize,
    reduce: fn(&StatsBundle, usize) -> Option<ResourceAverages>,
) -> AveragesMap {
    stats
        .iter()
        .filter_map(|(id, bundle)| reduce(bundle, window).map(|avg| (id.clone(), avg)))
        .collect()
}

/// Weighted combination of an immediate and a trailing average
pub fn blend(short: &ResourceAverages, long: &ResourceAverages, ratio: f64) -> ResourceAverages {
    let weighted = |a: f64, b: f64| ratio * a + (1.0 - ratio) * b;

    ResourceAverages {
        cpu: weighted(short.cpu, long.cpu),
        memory_free: weighted(short.memory_free, long.memory_free),
        memory: weighted(short.memory, long.memory),
    }
}

/// Blend two averages maps; only ids present in both survive
pub fn compute_blended_averages(
    short: &AveragesMap,
    long: &AveragesMap,
    ratio: f64,
) -> AveragesMap {
    short
        .iter()
        .filter_map(|(id, now)| {
            long.get(id)
                .map(|before| (id.clone(), blend(now, before, ratio)))
        })
        .collect()
}

/// Express a VM's CPU usage in host-comparable terms
///
/// A VM reports usage per vCPU; dividing by its vCPU count makes it
/// comparable with host figures. A VM without vCPUs has no usable figure.
pub fn normalize_vm_cpu(averages: ResourceAverages, cpu_count: u32) -> Option<ResourceAverages> {
    if cpu_count == 0 {
        return None;
    }

    Some(ResourceAverages {
        cpu: averages.cpu / cpu_count as f64,
        ..averages
    })
}
