//! Latency statistics for a session's probe samples

use serde::{Deserialize, Serialize};

/// Summary statistics over latency samples, all in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LatencyStatistics {
    /// Number of samples
    pub sample_count: usize,
    /// Mean latency
    pub avg_ms: f64,
    /// Jitter: population standard deviation of the samples
    pub jitter_ms: f64,
    /// Smallest sample
    pub min_ms: f64,
    /// Largest sample
    pub max_ms: f64,
}

impl LatencyStatistics {
    /// Compute statistics; every field is 0 when there are no samples
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let (min_ms, max_ms) = samples.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });

        Self {
            sample_count: samples.len(),
            avg_ms: mean(samples),
            jitter_ms: population_std_dev(samples),
            min_ms,
            max_ms,
        }
    }
}

/// Arithmetic mean, 0 for an empty slice
pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Population standard deviation, 0 for fewer than two samples
pub fn population_std_dev(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let avg = mean(samples);
    let variance = samples.iter().map(|v| (v - avg) * (v - avg)).sum::<f64>() / samples.len() as f64;
    variance.sqrt()
}
