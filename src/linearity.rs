use crate::regression::{linear_regression, Regression};
use crate::Sample;

/// Regions shorter than this are never considered linear.
pub const MIN_LINEAR_POINTS: usize = 10;
/// Minimum coefficient of determination of a linear region.
pub const MIN_R_SQUARED: f64 = 0.85;
/// Maximum coefficient of variation of the point-to-point slopes.
pub const MAX_SLOPE_CV: f64 = 0.5;
/// Maximum ratio of current range to mean absolute current.
pub const MAX_CURRENT_VARIABILITY: f64 = 1.0;

/// Consecutive samples closer than this in voltage contribute no slope.
const DUPLICATE_VOLTAGE: f64 = 1e-6;
const NEAR_ZERO: f64 = 1e-12;

/// Everything the classifier measured about a region.
#[derive(Debug, Clone, Copy)]
pub struct LinearityReport {
    pub regression: Regression,
    pub slope_cv: f64,
    pub current_variability: f64,
    pub is_linear: bool,
}

/// Coefficient of variation of the slopes between consecutive samples.
///
/// Infinite when there are no usable pairs or the mean slope is essentially zero.
pub fn slope_coefficient_of_variation(points: &[Sample]) -> f64 {
    let slopes: Vec<f64> = points
        .windows(2)
        .filter_map(|pair| {
            let dv = pair[1].voltage - pair[0].voltage;
            if dv.abs() <= DUPLICATE_VOLTAGE {
                return None;
            }
            let slope = (pair[1].current - pair[0].current) / dv;
            slope.is_finite().then_some(slope)
        })
        .collect();

    if slopes.is_empty() {
        return f64::INFINITY;
    }
    let mean = slopes.iter().sum::<f64>() / slopes.len() as f64;
    if mean.abs() < NEAR_ZERO {
        return f64::INFINITY;
    }
    let variance =
        slopes.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / slopes.len() as f64;
    variance.sqrt() / mean.abs()
}

/// Current range relative to the mean absolute current.
pub fn current_variability(points: &[Sample]) -> f64 {
    let currents: Vec<f64> = points
        .iter()
        .map(|s| s.current)
        .filter(|c| c.is_finite())
        .collect();
    if currents.is_empty() {
        return f64::INFINITY;
    }
    let min = currents.iter().copied().fold(f64::INFINITY, f64::min);
    let max = currents.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    let mean_abs = currents.iter().map(|c| c.abs()).sum::<f64>() / currents.len() as f64;

    if mean_abs < NEAR_ZERO {
        if range < NEAR_ZERO {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        range / mean_abs
    }
}

pub fn classify(points: &[Sample]) -> LinearityReport {
    let regression = linear_regression(points);
    if points.len() < MIN_LINEAR_POINTS {
        return LinearityReport {
            regression,
            slope_cv: f64::INFINITY,
            current_variability: f64::INFINITY,
            is_linear: false,
        };
    }

    let slope_cv = slope_coefficient_of_variation(points);
    let current_variability = current_variability(points);
    let is_linear = regression.r_squared > MIN_R_SQUARED
        && slope_cv < MAX_SLOPE_CV
        && current_variability < MAX_CURRENT_VARIABILITY;

    LinearityReport {
        regression,
        slope_cv,
        current_variability,
        is_linear,
    }
}

/// Whether `points` behave like a straight baseline segment.
///
/// A high R² alone passes on almost-constant noise, so the slope consistency
/// and current stability checks must hold as well.
pub fn is_linear_region(points: &[Sample]) -> bool {
    classify(points).is_linear
}
