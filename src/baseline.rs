use crate::linearity::{classify, MIN_LINEAR_POINTS, MIN_R_SQUARED};
use crate::region::{edge_slice, find_baseline_region};
use crate::regression::linear_regression;
use crate::segments::MAX_BASELINE_SLOPE;
use crate::{
    cmp_f64, sorted_by_voltage, BaselineError, Peak, PeakType, Sample, ScanDirection,
    SeparateBaseline, SimpleBaseline,
};
use log::{debug, warn};

/// Share of a scan used as baseline when it has no reference peak.
pub const NO_PEAK_FRACTION: f64 = 0.2;
/// Distance from a peak (in volts) beyond which a region counts as clear of it.
pub const PEAK_DISTANCE_SCALE: f64 = 0.1;
/// Single-scan search tries region sizes from this share of the trace...
pub const SINGLE_SCAN_MAX_FRACTION: f64 = 0.4;
/// ...down to this share.
pub const SINGLE_SCAN_MIN_FRACTION: f64 = 0.1;
pub const SINGLE_SCAN_SIZE_STEP: usize = 5;
/// Edge share used when the single-scan search finds nothing.
pub const SINGLE_SCAN_EDGE_FRACTION: f64 = 0.15;
pub const SINGLE_SCAN_LAST_RESORT_FRACTION: f64 = 0.1;

pub(crate) fn usable_count(points: &[Sample]) -> usize {
    points.iter().filter(|s| s.is_finite()).count()
}

/// The most negative oxidation peak, which a forward baseline must precede.
pub fn forward_reference_peak(peaks: &[Peak]) -> Option<f64> {
    peaks
        .iter()
        .filter(|p| p.kind == PeakType::Oxidation && p.voltage.is_finite())
        .map(|p| p.voltage)
        .min_by(|a, b| cmp_f64(*a, *b))
}

/// The most positive reduction peak, which a reverse baseline must follow.
pub fn reverse_reference_peak(peaks: &[Peak]) -> Option<f64> {
    peaks
        .iter()
        .filter(|p| p.kind == PeakType::Reduction && p.voltage.is_finite())
        .map(|p| p.voltage)
        .max_by(|a, b| cmp_f64(*a, *b))
}

fn side_points(
    trace: &[Sample],
    reference: Option<f64>,
    direction: ScanDirection,
    min_size: usize,
) -> Vec<Sample> {
    match reference {
        Some(peak_voltage) => {
            find_baseline_region(trace, peak_voltage, direction, min_size).points
        }
        None => {
            debug!("{:?} scan has no reference peak, using edge of scan", direction);
            edge_slice(&sorted_by_voltage(trace), NO_PEAK_FRACTION, direction)
        }
    }
}

/// Fit each side's source points and extrapolate over that side's own trace.
///
/// A side with fewer than two usable points borrows the other side's points.
pub(crate) fn assemble_separate(
    forward: &[Sample],
    reverse: &[Sample],
    forward_points: Vec<Sample>,
    reverse_points: Vec<Sample>,
) -> Result<SeparateBaseline, BaselineError> {
    let forward_usable = usable_count(&forward_points);
    let reverse_usable = usable_count(&reverse_points);

    let (forward_source_points, reverse_source_points) =
        match (forward_usable >= 2, reverse_usable >= 2) {
            (true, true) => (forward_points, reverse_points),
            (true, false) => {
                warn!(
                    "reverse baseline has {} usable points, borrowing {} forward points",
                    reverse_usable, forward_usable
                );
                (forward_points.clone(), forward_points)
            }
            (false, true) => {
                warn!(
                    "forward baseline has {} usable points, borrowing {} reverse points",
                    forward_usable, reverse_usable
                );
                (reverse_points.clone(), reverse_points)
            }
            (false, false) => {
                let mut combined = forward_points;
                combined.extend(reverse_points);
                if usable_count(&combined) < 2 {
                    return Err(BaselineError::InsufficientData {
                        forward: forward_usable,
                        reverse: reverse_usable,
                    });
                }
                warn!("both scans short of points, pooling {} points", combined.len());
                (combined.clone(), combined)
            }
        };

    let forward_regression = linear_regression(&forward_source_points);
    let reverse_regression = linear_regression(&reverse_source_points);
    debug!(
        "forward baseline {:.4}·V + {:.4} (R² {:.4}), reverse {:.4}·V + {:.4} (R² {:.4})",
        forward_regression.slope,
        forward_regression.intercept,
        forward_regression.r_squared,
        reverse_regression.slope,
        reverse_regression.intercept,
        reverse_regression.r_squared
    );

    Ok(SeparateBaseline {
        forward_curve: forward_regression.extrapolate(forward),
        reverse_curve: reverse_regression.extrapolate(reverse),
        forward_regression,
        reverse_regression,
        forward_source_points,
        reverse_source_points,
    })
}

/// Independent baselines for the forward and reverse halves of a cycle.
///
/// The forward baseline is searched before the most negative oxidation peak,
/// the reverse one after the most positive reduction peak.
pub fn calculate_dual_baseline(
    forward: &[Sample],
    reverse: &[Sample],
    peaks: &[Peak],
    min_segment_size: usize,
) -> Result<SeparateBaseline, BaselineError> {
    let forward_points = side_points(
        forward,
        forward_reference_peak(peaks),
        ScanDirection::Forward,
        min_segment_size,
    );
    let reverse_points = side_points(
        reverse,
        reverse_reference_peak(peaks),
        ScanDirection::Reverse,
        min_segment_size,
    );
    assemble_separate(forward, reverse, forward_points, reverse_points)
}

/// Gap between the voltage interval `[low, high]` and the closest peak.
fn distance_to_nearest_peak(low: f64, high: f64, peaks: &[Peak]) -> Option<f64> {
    peaks
        .iter()
        .filter(|p| p.voltage.is_finite())
        .map(|p| {
            if p.voltage < low {
                low - p.voltage
            } else if p.voltage > high {
                p.voltage - high
            } else {
                0.0
            }
        })
        .min_by(|a, b| cmp_f64(*a, *b))
}

fn edge_points(sorted: &[Sample], fraction: f64) -> Vec<Sample> {
    let n = sorted.len();
    let count = ((n as f64 * fraction).round() as usize).min(n / 2);
    let mut points = sorted[..count].to_vec();
    points.extend_from_slice(&sorted[n - count..]);
    points
}

/// Baseline for a trace whose forward and reverse scans are not separated.
///
/// Searches every region between 40 % and 10 % of the trace for the flattest
/// linear stretch away from the peaks. Without one, the baseline joins the
/// two ends of the trace.
pub fn calculate_single_baseline(
    trace: &[Sample],
    peaks: &[Peak],
) -> Result<SimpleBaseline, BaselineError> {
    let usable = usable_count(trace);
    if usable < 2 {
        return Err(BaselineError::TooFewSamples {
            found: usable,
            needed: 2,
        });
    }

    let sorted = sorted_by_voltage(trace);
    let n = sorted.len();
    let largest = (n as f64 * SINGLE_SCAN_MAX_FRACTION) as usize;
    let smallest = ((n as f64 * SINGLE_SCAN_MIN_FRACTION) as usize).max(MIN_LINEAR_POINTS);

    let mut best: Option<(f64, &[Sample])> = None;
    let mut size = largest;
    while size >= smallest {
        for start in 0..=(n - size) {
            let window = &sorted[start..start + size];
            let report = classify(window);
            if !report.is_linear || report.regression.slope.abs() > MAX_BASELINE_SLOPE {
                continue;
            }

            let peak_fraction = distance_to_nearest_peak(
                window[0].voltage,
                window[size - 1].voltage,
                peaks,
            )
            .map_or(1.0, |d| (d / PEAK_DISTANCE_SCALE).min(1.0));
            let linearity = ((report.regression.r_squared - MIN_R_SQUARED)
                / (1.0 - MIN_R_SQUARED))
                .clamp(0.0, 1.0);
            let flatness = 1.0 / (1.0 + report.regression.slope.abs());
            let score = 0.4 * linearity
                + 0.4 * flatness
                + 0.1 * (size as f64 / n as f64)
                + 0.1 * peak_fraction;

            if best.map_or(true, |(top, _)| score > top) {
                best = Some((score, window));
            }
        }
        if size < SINGLE_SCAN_SIZE_STEP {
            break;
        }
        size -= SINGLE_SCAN_SIZE_STEP;
    }

    let source_points = match best {
        Some((score, window)) => {
            debug!(
                "single-scan baseline region {:.4}..{:.4} V, {} points, score {:.4}",
                window[0].voltage,
                window[window.len() - 1].voltage,
                window.len(),
                score
            );
            window.to_vec()
        }
        None => {
            let mut points = edge_points(&sorted, SINGLE_SCAN_EDGE_FRACTION);
            if usable_count(&points) < 2 {
                let count = ((n as f64 * SINGLE_SCAN_LAST_RESORT_FRACTION).round() as usize)
                    .clamp(1, n / 2);
                points = sorted[..count].to_vec();
                points.extend_from_slice(&sorted[n - count..]);
            }
            warn!(
                "no linear region in single scan, joining {} edge points",
                points.len()
            );
            points
        }
    };

    let regression = linear_regression(&source_points);
    Ok(SimpleBaseline {
        curve: regression.extrapolate(trace),
        regression,
        source_points,
    })
}

/// Baseline fitted to the samples inside a user-chosen voltage window.
pub fn baseline_from_range(
    trace: &[Sample],
    low: f64,
    high: f64,
) -> Result<SimpleBaseline, BaselineError> {
    if !(low.is_finite() && high.is_finite()) || low >= high {
        return Err(BaselineError::InvalidParameter(format!(
            "baseline range {low}..{high} V is empty or not finite"
        )));
    }
    let source_points: Vec<Sample> = trace
        .iter()
        .filter(|s| s.voltage >= low && s.voltage <= high)
        .copied()
        .collect();
    let usable = usable_count(&source_points);
    if usable < 2 {
        return Err(BaselineError::TooFewSamples {
            found: usable,
            needed: 2,
        });
    }

    let regression = linear_regression(&source_points);
    Ok(SimpleBaseline {
        curve: regression.extrapolate(trace),
        regression,
        source_points,
    })
}
