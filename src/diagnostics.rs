//! Diagnostic engine
//!
//! Side-effect-free scoring over completed series. Missing samples (`None`)
//! are excluded, never treated as zero, and every degenerate input resolves
//! to a neutral value instead of NaN or infinity.
//!
//! - Contention score: Pearson correlation of host scheduling pressure with
//!   the target workload's aggregated CPU
//! - Kernel/User ratio: mean privileged % over mean user %
//! - Memory slope: least-squares slope of private bytes per interval
//! - Priority deviation: rounded mean base priority against a baseline

use crate::config::AnalysisConfig;
use crate::reader::ProcessSeries;
use serde::{Deserialize, Serialize};
use std::fmt;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Host classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
    /// Expected counters were absent, so the score means nothing
    DataMissing,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Healthy => "Healthy",
            Self::Warning => "Warning",
            Self::Critical => "Critical",
            Self::DataMissing => "DataMissing",
        };
        f.pad(label)
    }
}

/// Per-process metrics for one capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessMetricSummary {
    /// Instance label (`sqlservr`, `sqlservr#1`), not an OS pid
    pub instance: String,
    pub avg_cpu: f64,
    pub kernel_user_ratio: f64,
    /// Bytes per interval
    pub memory_slope: f64,
    pub peak_memory: f64,
    /// Rounded mean base priority, if the counter was present
    pub base_priority: Option<i64>,
    pub is_target: bool,
    /// Kernel/User ratio above threshold (filter-driver interference)
    pub kernel_interference: bool,
    /// Memory slope above the leak threshold
    pub memory_leak_suspected: bool,
    /// Base priority minus the expected baseline, when they differ
    pub priority_deviation: Option<i64>,
}

/// Mean of the present values
pub fn mean(values: &[Option<f64>]) -> Option<f64> {
    let (sum, count) = values
        .iter()
        .flatten()
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Round to `decimals` places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Pearson correlation coefficient of two equal-length samples
///
/// Returns 0 for fewer than 2 points, mismatched lengths, or zero variance.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len();
    if n < 2 || n != b.len() {
        return 0.0;
    }

    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;

    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    let denominator = (var_a * var_b).sqrt();
    if denominator == 0.0 || !denominator.is_finite() {
        return 0.0;
    }
    (cov / denominator).clamp(-1.0, 1.0)
}

/// Contention score: correlation of scheduling pressure with workload CPU
///
/// Only intervals where both series have a value take part. Rounded to three
/// decimals; a score that rounds to zero is always `+0.0`.
pub fn contention_score(pressure: &[Option<f64>], workload_cpu: &[Option<f64>]) -> f64 {
    let (a, b): (Vec<f64>, Vec<f64>) = pressure
        .iter()
        .zip(workload_cpu)
        .filter_map(|(p, c)| Some(((*p)?, (*c)?)))
        .unzip();
    round_to(pearson(&a, &b), 3) + 0.0
}

/// Least-squares slope of `values` against interval index
///
/// Fewer than `min_samples` present values gives 0.
pub fn linear_slope(values: &[Option<f64>], min_samples: usize) -> f64 {
    let points: Vec<(f64, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i as f64, v)))
        .collect();
    if points.len() < min_samples.max(2) {
        return 0.0;
    }

    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;

    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (x, y) in &points {
        sxy += (x - mean_x) * (y - mean_y);
        sxx += (x - mean_x) * (x - mean_x);
    }

    if sxx == 0.0 {
        return 0.0;
    }
    let slope = sxy / sxx;
    if slope.is_finite() {
        slope
    } else {
        0.0
    }
}

/// Mean privileged % over mean user %; 0 when user time is zero or absent
pub fn kernel_user_ratio(privileged: &[Option<f64>], user: &[Option<f64>]) -> f64 {
    let avg_user = mean(user).unwrap_or(0.0);
    if avg_user == 0.0 {
        return 0.0;
    }
    mean(privileged).unwrap_or(0.0) / avg_user
}

/// Rounded mean base priority minus `expected`, `None` when equal or absent
pub fn priority_deviation(priority: &[Option<f64>], expected: i64) -> Option<i64> {
    let observed = mean(priority)?.round() as i64;
    (observed != expected).then_some(observed - expected)
}

/// Bytes to MiB
pub fn bytes_to_mb(bytes: f64) -> f64 {
    bytes / BYTES_PER_MB
}

/// Threshold classification of a contention score
pub fn classify(score: f64, config: &AnalysisConfig) -> HealthStatus {
    if score > config.critical_threshold {
        HealthStatus::Critical
    } else if score > config.warning_threshold {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    }
}

/// Per-interval sum of several CPU series
///
/// An interval is `None` only when no series has a value there.
pub fn aggregate_cpu<'a>(series: impl IntoIterator<Item = &'a [Option<f64>]>, len: usize) -> Vec<Option<f64>> {
    let mut total = vec![None; len];
    for values in series {
        for (slot, value) in total.iter_mut().zip(values) {
            if let Some(v) = value {
                *slot = Some(slot.unwrap_or(0.0) + v);
            }
        }
    }
    total
}

/// Summarize one process instance
pub fn summarize_process(
    instance: &str,
    series: &ProcessSeries,
    is_target: bool,
    config: &AnalysisConfig,
) -> ProcessMetricSummary {
    let ku_ratio = kernel_user_ratio(&series.privileged, &series.user);
    let memory_slope = linear_slope(&series.private_bytes, config.min_slope_samples);
    let peak_memory = series
        .private_bytes
        .iter()
        .flatten()
        .copied()
        .fold(0.0, f64::max);
    let base_priority = mean(&series.base_priority).map(|p| p.round() as i64);

    ProcessMetricSummary {
        instance: instance.to_string(),
        avg_cpu: round_to(mean(&series.cpu).unwrap_or(0.0), 2),
        kernel_user_ratio: round_to(ku_ratio, 3),
        memory_slope,
        peak_memory,
        base_priority,
        is_target,
        kernel_interference: ku_ratio > config.kernel_user_threshold,
        memory_leak_suspected: bytes_to_mb(memory_slope) > config.leak_threshold_mb,
        priority_deviation: priority_deviation(&series.base_priority, config.expected_base_priority),
    }
}
