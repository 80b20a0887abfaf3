use crate::baseline::{assemble_separate, forward_reference_peak, reverse_reference_peak};
use crate::region::{edge_slice, FALLBACK_FRACTION};
use crate::regression::{linear_regression, Regression};
use crate::segments::MIN_PEAK_CLEARANCE;
use crate::{sorted_by_voltage, BaselineError, Peak, Sample, ScanDirection, SeparateBaseline};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Tunable thresholds for the fixed-window scan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowedScanParams {
    pub window_size: usize,
    pub r2_threshold: f64,
    pub max_abs_slope: f64,
}

impl Default for WindowedScanParams {
    fn default() -> Self {
        Self {
            window_size: 8,
            r2_threshold: 0.90,
            max_abs_slope: 5.0,
        }
    }
}

impl WindowedScanParams {
    pub fn validate(&self) -> Result<(), BaselineError> {
        if self.window_size < 2 {
            return Err(BaselineError::InvalidParameter(format!(
                "window size must be at least 2, got {}",
                self.window_size
            )));
        }
        if !(0.0..=1.0).contains(&self.r2_threshold) {
            return Err(BaselineError::InvalidParameter(format!(
                "R² threshold must lie in [0, 1], got {}",
                self.r2_threshold
            )));
        }
        if !(self.max_abs_slope.is_finite() && self.max_abs_slope >= 0.0) {
            return Err(BaselineError::InvalidParameter(format!(
                "maximum slope must be finite and non-negative, got {}",
                self.max_abs_slope
            )));
        }
        Ok(())
    }
}

/// A run of consecutive accepted windows, merged.
#[derive(Debug, Clone)]
pub struct ProposedRegion {
    /// First and last index (inclusive) in the voltage-sorted trace.
    pub start_index: usize,
    pub end_index: usize,
    pub start_voltage: f64,
    pub end_voltage: f64,
    pub points: Vec<Sample>,
    pub regression: Regression,
}

impl ProposedRegion {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Slide a window of `params.window_size` samples over the sorted trace and
/// propose the stretches where every window fits well and stays shallow.
///
/// Longest proposals come first.
pub fn scan_windows(
    trace: &[Sample],
    params: &WindowedScanParams,
) -> Result<Vec<ProposedRegion>, BaselineError> {
    params.validate()?;
    let sorted = sorted_by_voltage(trace);
    let n = sorted.len();
    let w = params.window_size;
    if n < w {
        return Ok(Vec::new());
    }

    let mut spans: Vec<(usize, usize)> = Vec::new();
    for start in 0..=(n - w) {
        let fit = linear_regression(&sorted[start..start + w]);
        if fit.r_squared < params.r2_threshold || fit.slope.abs() > params.max_abs_slope {
            continue;
        }
        let end = start + w - 1;
        match spans.last_mut() {
            Some((_, hi)) if start <= *hi + 1 => *hi = (*hi).max(end),
            _ => spans.push((start, end)),
        }
    }

    let mut regions: Vec<ProposedRegion> = spans
        .into_iter()
        .map(|(lo, hi)| {
            let points = sorted[lo..=hi].to_vec();
            ProposedRegion {
                start_index: lo,
                end_index: hi,
                start_voltage: sorted[lo].voltage,
                end_voltage: sorted[hi].voltage,
                regression: linear_regression(&points),
                points,
            }
        })
        .collect();
    regions.sort_by(|a, b| b.len().cmp(&a.len()));

    debug!(
        "windowed scan (window {}, R² >= {}, |slope| <= {}) proposed {} regions",
        w,
        params.r2_threshold,
        params.max_abs_slope,
        regions.len()
    );
    Ok(regions)
}

fn proposal_points(
    trace: &[Sample],
    reference: Option<f64>,
    direction: ScanDirection,
    params: &WindowedScanParams,
) -> Result<Vec<Sample>, BaselineError> {
    let regions = scan_windows(trace, params)?;
    let chosen = regions.into_iter().find(|r| match (reference, direction) {
        (None, _) => true,
        (Some(peak), ScanDirection::Forward) => peak - r.end_voltage > MIN_PEAK_CLEARANCE,
        (Some(peak), ScanDirection::Reverse) => r.start_voltage - peak > MIN_PEAK_CLEARANCE,
    });

    Ok(match chosen {
        Some(region) => region.points,
        None => {
            if !trace.is_empty() {
                warn!("{:?} scan: no proposed region, using edge of scan", direction);
            }
            edge_slice(&sorted_by_voltage(trace), FALLBACK_FRACTION, direction)
        }
    })
}

/// Dual-scan baseline whose source regions come from the windowed scan.
pub fn auto_detect_baseline(
    forward: &[Sample],
    reverse: &[Sample],
    peaks: &[Peak],
    params: &WindowedScanParams,
) -> Result<SeparateBaseline, BaselineError> {
    let forward_points = proposal_points(
        forward,
        forward_reference_peak(peaks),
        ScanDirection::Forward,
        params,
    )?;
    let reverse_points = proposal_points(
        reverse,
        reverse_reference_peak(peaks),
        ScanDirection::Reverse,
        params,
    )?;
    assemble_separate(forward, reverse, forward_points, reverse_points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PeakType;
    use approx::assert_abs_diff_eq;

    fn bump_trace() -> Vec<Sample> {
        (0..200)
            .map(|i| {
                let v = -0.5 + i as f64 / 199.0;
                let bump = 30.0 * (-((v - 0.1) / 0.03).powi(2) / 2.0).exp();
                Sample::new(v, 2.0 * v + 1.0 + bump)
            })
            .collect()
    }

    #[test]
    fn invalid_params_are_rejected() {
        let trace = bump_trace();
        for params in [
            WindowedScanParams {
                window_size: 1,
                ..Default::default()
            },
            WindowedScanParams {
                r2_threshold: 1.5,
                ..Default::default()
            },
            WindowedScanParams {
                max_abs_slope: f64::NAN,
                ..Default::default()
            },
        ] {
            assert!(matches!(
                scan_windows(&trace, &params),
                Err(BaselineError::InvalidParameter(_))
            ));
        }
    }

    #[test]
    fn proposals_straddle_the_peak() {
        let regions = scan_windows(&bump_trace(), &WindowedScanParams::default()).unwrap();
        assert_eq!(regions.len(), 2);
        assert!(regions[0].len() >= regions[1].len());
        assert!(regions[0].end_voltage < 0.05);
        assert!(regions[1].start_voltage > 0.15);
        for region in &regions {
            assert_abs_diff_eq!(region.regression.slope, 2.0, epsilon = 0.1);
            assert_eq!(region.len(), region.end_index - region.start_index + 1);
        }
    }

    #[test]
    fn strict_slope_limit_rejects_everything() {
        let params = WindowedScanParams {
            max_abs_slope: 1.0,
            ..Default::default()
        };
        assert!(scan_windows(&bump_trace(), &params).unwrap().is_empty());
    }

    #[test]
    fn short_trace_has_no_proposals() {
        let trace: Vec<Sample> = (0..5).map(|i| Sample::new(i as f64, i as f64)).collect();
        assert!(scan_windows(&trace, &WindowedScanParams::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn auto_detect_uses_region_before_peak() {
        let forward = bump_trace();
        let peaks = [Peak {
            voltage: 0.1,
            current: 31.2,
            kind: PeakType::Oxidation,
        }];
        let result =
            auto_detect_baseline(&forward, &[], &peaks, &WindowedScanParams::default()).unwrap();
        assert!(result
            .forward_source_points
            .iter()
            .all(|p| p.voltage < 0.08));
        assert_abs_diff_eq!(result.forward_regression.slope, 2.0, epsilon = 0.1);
        assert_eq!(result.reverse_source_points, result.forward_source_points);
    }
}
