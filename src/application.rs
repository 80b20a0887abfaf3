use crate::{BaselineError, BaselineResult, Peak, Sample, ScanDirection};
use serde::Serialize;

/// Voltages closer than this are considered the same sample position.
pub const VOLTAGE_TOLERANCE: f64 = 1e-9;

/// Subtract `baseline` from `data` sample by sample.
///
/// Both curves must have the same length and the same voltage at every index.
/// A NaN voltage only matches another NaN.
pub fn subtract_baseline(
    data: &[Sample],
    baseline: &[Sample],
) -> Result<Vec<Sample>, BaselineError> {
    if data.len() != baseline.len() {
        return Err(BaselineError::LengthMismatch {
            data: data.len(),
            baseline: baseline.len(),
        });
    }

    data.iter()
        .zip(baseline)
        .enumerate()
        .map(|(index, (d, b))| {
            if !voltages_aligned(d.voltage, b.voltage) {
                return Err(BaselineError::VoltageMismatch {
                    index,
                    data: d.voltage,
                    baseline: b.voltage,
                });
            }
            Ok(Sample::new(d.voltage, d.current - b.current))
        })
        .collect()
}

fn voltages_aligned(a: f64, b: f64) -> bool {
    a == b || (a - b).abs() <= VOLTAGE_TOLERANCE || (a.is_nan() && b.is_nan())
}

/// Height of `peak` above the baseline sample nearest in voltage.
///
/// Returns 0 when the baseline is empty or the peak has no finite position.
pub fn calculate_peak_height(peak: &Peak, baseline: &[Sample]) -> f64 {
    if !(peak.voltage.is_finite() && peak.current.is_finite()) {
        return 0.0;
    }
    let nearest = baseline
        .iter()
        .filter(|s| s.is_finite())
        .fold(None::<&Sample>, |best, s| match best {
            Some(b) if (b.voltage - peak.voltage).abs() <= (s.voltage - peak.voltage).abs() => {
                Some(b)
            }
            _ => Some(s),
        });
    nearest.map_or(0.0, |s| peak.current - s.current)
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PeakHeight {
    pub peak: Peak,
    pub height: f64,
}

/// Measure every peak against the curve matching its type.
pub fn peak_heights(peaks: &[Peak], baseline: &BaselineResult) -> Vec<PeakHeight> {
    peaks
        .iter()
        .map(|peak| PeakHeight {
            peak: *peak,
            height: calculate_peak_height(peak, baseline.curve_for(peak.kind)),
        })
        .collect()
}

/// Baseline-corrected trace, one entry per scan in the result.
#[derive(Debug, Clone, Serialize)]
pub struct CorrectedScan {
    pub direction: Option<ScanDirection>,
    pub samples: Vec<Sample>,
}

/// Subtract a baseline result from the scans it was computed for.
///
/// The simple form was fitted over the forward scan followed by the reverse
/// scan, so the two are corrected as one trace in that order.
pub fn correct_traces(
    forward: &[Sample],
    reverse: &[Sample],
    baseline: &BaselineResult,
) -> Result<Vec<CorrectedScan>, BaselineError> {
    match baseline {
        BaselineResult::Separate(sep) => Ok(vec![
            CorrectedScan {
                direction: Some(ScanDirection::Forward),
                samples: subtract_baseline(forward, &sep.forward_curve)?,
            },
            CorrectedScan {
                direction: Some(ScanDirection::Reverse),
                samples: subtract_baseline(reverse, &sep.reverse_curve)?,
            },
        ]),
        BaselineResult::Simple(simple) => {
            let mut whole = forward.to_vec();
            whole.extend_from_slice(reverse);
            Ok(vec![CorrectedScan {
                direction: None,
                samples: subtract_baseline(&whole, &simple.curve)?,
            }])
        }
    }
}
