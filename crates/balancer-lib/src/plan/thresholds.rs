//! Operating bounds derived from critical thresholds

use serde::{Deserialize, Serialize};

/// Default critical CPU usage in percent
pub const DEFAULT_CRITICAL_CPU: f64 = 90.0;

/// Default critical free memory in bytes (64 MiB)
pub const DEFAULT_CRITICAL_MEMORY_FREE: f64 = 64.0 * 1024.0 * 1024.0;

const CPU_HIGH_FACTOR: f64 = 0.85;
const CPU_LOW_FACTOR: f64 = 0.25;

// Free memory runs the other way: the "high" bound sits above critical and
// a host is under pressure when it falls below it.
const MEMORY_FREE_HIGH_FACTOR: f64 = 1.25;
const MEMORY_FREE_LOW_FACTOR: f64 = 20.0;

/// Critical value and its derived bounds for one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub critical: f64,
    pub high: f64,
    pub low: f64,
}

/// Bounds for every metric a plan evaluates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSet {
    pub cpu: Threshold,
    pub memory_free: Threshold,
}

impl ThresholdSet {
    pub fn new(critical_cpu: f64, critical_memory_free: f64) -> Self {
        Self {
            cpu: Threshold {
                critical: critical_cpu,
                high: critical_cpu * CPU_HIGH_FACTOR,
                low: critical_cpu * CPU_LOW_FACTOR,
            },
            memory_free: Threshold {
                critical: critical_memory_free,
                high: critical_memory_free * MEMORY_FREE_HIGH_FACTOR,
                low: critical_memory_free * MEMORY_FREE_LOW_FACTOR,
            },
        }
    }
}

impl Default for ThresholdSet {
    fn default() -> Self {
        Self::new(DEFAULT_CRITICAL_CPU, DEFAULT_CRITICAL_MEMORY_FREE)
    }
}

/// Critical overrides accepted in plan configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Critical CPU usage in percent
    #[serde(default)]
    pub cpu: Option<f64>,
    /// Critical free memory in bytes
    #[serde(default)]
    pub memory_free: Option<f64>,
}

impl ThresholdConfig {
    pub fn critical_cpu(&self) -> f64 {
        self.cpu.unwrap_or(DEFAULT_CRITICAL_CPU)
    }

    pub fn critical_memory_free(&self) -> f64 {
        self.memory_free.unwrap_or(DEFAULT_CRITICAL_MEMORY_FREE)
    }

    pub fn resolve(&self) -> ThresholdSet {
        ThresholdSet::new(self.critical_cpu(), self.critical_memory_free())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: f64 = 1024.0 * 1024.0;

    #[test]
    fn test_default_cpu_bounds() {
        let thresholds = ThresholdSet::default();
        assert_eq!(thresholds.cpu.critical, 90.0);
        assert!((thresholds.cpu.high - 76.5).abs() < 1e-9);
        assert!((thresholds.cpu.low - 22.5).abs() < 1e-9);
    }

    #[test]
    fn test_default_memory_free_bounds_are_inverted() {
        let thresholds = ThresholdSet::default();
        assert_eq!(thresholds.memory_free.critical, 64.0 * MIB);
        assert_eq!(thresholds.memory_free.high, 80.0 * MIB);
        assert_eq!(thresholds.memory_free.low, 1280.0 * MIB);

        // For free memory "high" sits above critical, unlike cpu
        assert!(thresholds.memory_free.high > thresholds.memory_free.critical);
        assert!(thresholds.cpu.high < thresholds.cpu.critical);
    }

    #[test]
    fn test_config_overrides() {
        let config = ThresholdConfig {
            cpu: Some(80.0),
            memory_free: None,
        };

        let thresholds = config.resolve();
        assert!((thresholds.cpu.high - 68.0).abs() < 1e-9);
        assert_eq!(thresholds.memory_free, ThresholdSet::default().memory_free);
    }
}
