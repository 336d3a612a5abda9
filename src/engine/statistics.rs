//! Statistical primitives: unbiasing constants and the three sigma
//! estimation methods selected by subgroup size.
//!
//! All arithmetic here uses `f64` throughout; rounding to 4 decimal places
//! is a persistence-layer concern, not something this module does.

/// d2 unbiasing constants for subgroup sizes 2-10, used by the range
/// method and by the moving-range method (which uses the n = 2 entry).
/// Indexed so `D2[n]` is the constant for subgroup size `n` (index 0/1
/// unused).
const D2: [f64; 11] = [
    0.0, 0.0, 1.128, 1.693, 2.059, 2.326, 2.534, 2.704, 2.847, 2.970, 3.078,
];

/// c4 unbiasing constants for subgroup sizes 11-25, used by the
/// standard-deviation method. Beyond the tabulated range the asymptotic
/// approximation `4(n-1) / (4n-3)` is used instead.
const C4: [f64; 26] = [
    0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
    0.9727, 0.9754, 0.9776, 0.9794, 0.9810, 0.9823, 0.9835, 0.9845, 0.9854, 0.9862,
    0.9869, 0.9876, 0.9882, 0.9887, 0.9892,
];

pub fn d2(n: usize) -> f64 {
    if n < D2.len() {
        D2[n]
    } else {
        // Asymptotic approximation for subgroup sizes beyond the table.
        3.472 + 0.026 * n as f64
    }
}

pub fn c4(n: usize) -> f64 {
    if n < C4.len() && C4[n] > 0.0 {
        C4[n]
    } else {
        let n = n as f64;
        4.0 * (n - 1.0) / (4.0 * n - 3.0)
    }
}

/// The sigma-estimation method selected for a characteristic's subgroup
/// size, and the computed result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigmaMethod {
    /// n == 1: average moving range divided by d2(2).
    MovingRange,
    /// 2 <= n <= 10: mean subgroup range divided by d2(n).
    Range,
    /// n > 10: mean subgroup standard deviation divided by c4(n).
    StandardDeviation,
}

impl SigmaMethod {
    pub fn for_subgroup_size(n: u32) -> Self {
        match n {
            0 | 1 => SigmaMethod::MovingRange,
            2..=10 => SigmaMethod::Range,
            _ => SigmaMethod::StandardDeviation,
        }
    }
}

/// Estimate process sigma from a series of subgroup means (for the
/// moving-range method, `n == 1` samples) or provide the other two
/// estimators over complete subgroup data.
///
/// `means` is the per-sample mean; `ranges` and `std_devs` are parallel
/// per-sample values used by the range/std-dev methods respectively, and
/// are ignored by the method that doesn't need them.
pub fn estimate_sigma(method: SigmaMethod, means: &[f64], ranges: &[f64], subgroup_size: u32) -> Option<f64> {
    match method {
        SigmaMethod::MovingRange => {
            if means.len() < 2 {
                return None;
            }
            let moving_ranges: Vec<f64> = means.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
            let mean_mr = moving_ranges.iter().sum::<f64>() / moving_ranges.len() as f64;
            Some(mean_mr / d2(2))
        }
        SigmaMethod::Range => {
            if ranges.is_empty() {
                return None;
            }
            let mean_range = ranges.iter().sum::<f64>() / ranges.len() as f64;
            Some(mean_range / d2(subgroup_size as usize))
        }
        SigmaMethod::StandardDeviation => {
            if ranges.is_empty() {
                return None;
            }
            // `ranges` holds per-subgroup standard deviations for this method.
            let mean_std = ranges.iter().sum::<f64>() / ranges.len() as f64;
            Some(mean_std / c4(subgroup_size as usize))
        }
    }
}

/// Sample standard deviation (n-1 denominator) of a subgroup's raw
/// measurements, used as an input to the standard-deviation sigma method.
pub fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() as f64 - 1.0);
    variance.sqrt()
}

/// sigma of the mean (standard error) for Shewhart limits: `sigma / sqrt(n)`.
pub fn sigma_of_mean(sigma: f64, n: u32) -> f64 {
    if n == 0 {
        return sigma;
    }
    sigma / (n as f64).sqrt()
}

/// Round to 4 decimal places. Only ever called at the persistence
/// boundary — never between intermediate calculations.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
