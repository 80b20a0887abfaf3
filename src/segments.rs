use crate::linearity::{classify, LinearityReport};
use crate::regression::Regression;
use crate::{cmp_f64, sorted_by_voltage, Sample, ScanDirection};
use log::{debug, trace};

pub const DEFAULT_MIN_SEGMENT_SIZE: usize = 10;
/// Largest window the enumerator will try.
pub const MAX_SEGMENT_SIZE: usize = 40;
/// Stride of both the start index and the window size.
pub const ENUMERATION_STRIDE: usize = 3;
/// Windows narrower than this (in volts) are not trusted.
pub const MIN_SEGMENT_SPAN: f64 = 0.015;
/// A candidate overlapping an accepted segment by more than this fraction
/// of the smaller span is a duplicate.
pub const MAX_OVERLAP_FRACTION: f64 = 0.6;
/// Baselines are never steeper than this (current units per volt).
pub const MAX_BASELINE_SLOPE: f64 = 5.0;
/// Required gap between a baseline segment and its reference peak, in volts.
pub const MIN_PEAK_CLEARANCE: f64 = 0.02;
pub const FORWARD_OPTIMAL_DISTANCE: f64 = 0.10;
pub const REVERSE_OPTIMAL_DISTANCE: f64 = 0.08;

/// A contiguous run of voltage-sorted samples that passed the linearity test.
#[derive(Debug, Clone)]
pub struct Segment {
    pub points: Vec<Sample>,
    /// Index of the first point in the voltage-sorted trace.
    pub start_index: usize,
    pub start_voltage: f64,
    pub end_voltage: f64,
    pub size: usize,
    pub regression: Regression,
    pub r_squared: f64,
    pub abs_slope: f64,
    pub voltage_span: f64,
    pub current_range: f64,
    pub current_variability: f64,
    pub quality: f64,
}

impl Segment {
    fn from_window(
        window: &[Sample],
        start_index: usize,
        report: &LinearityReport,
        min_size: usize,
    ) -> Self {
        let start_voltage = window[0].voltage;
        let end_voltage = window[window.len() - 1].voltage;
        let voltage_span = end_voltage - start_voltage;
        let (min_i, max_i) = window
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| {
                (lo.min(s.current), hi.max(s.current))
            });
        let abs_slope = report.regression.slope.abs();
        let size = window.len();

        let size_bonus = (size as f64 / min_size as f64 + 1.0).ln();
        let span_bonus = (voltage_span / 0.05).min(2.0);
        let stability_bonus = 1.0 / (1.0 + report.current_variability);
        let flatness_bonus = 1.0 / (1.0 + abs_slope);
        let quality = report.regression.r_squared
            * size_bonus
            * span_bonus
            * stability_bonus
            * flatness_bonus;

        Segment {
            points: window.to_vec(),
            start_index,
            start_voltage,
            end_voltage,
            size,
            regression: report.regression,
            r_squared: report.regression.r_squared,
            abs_slope,
            voltage_span,
            current_range: max_i - min_i,
            current_variability: report.current_variability,
            quality,
        }
    }

    /// Length of the voltage interval shared with `other`.
    pub fn overlap_with(&self, other: &Segment) -> f64 {
        let lo = self.start_voltage.max(other.start_voltage);
        let hi = self.end_voltage.min(other.end_voltage);
        (hi - lo).max(0.0)
    }
}

/// Find every linear window of `trace`, ranked by descending quality.
///
/// Windows start every [`ENUMERATION_STRIDE`] samples and grow from `min_size`
/// to [`MAX_SEGMENT_SIZE`] by the same stride. Cost is quadratic in the trace
/// length; traces of a few hundred points are the expected input.
pub fn enumerate_segments(trace: &[Sample], min_size: usize) -> Vec<Segment> {
    let min_size = min_size.max(2);
    let sorted = sorted_by_voltage(trace);
    let n = sorted.len();
    let mut accepted: Vec<Segment> = Vec::new();
    let mut tested = 0usize;

    for start in (0..n).step_by(ENUMERATION_STRIDE) {
        let max_size = MAX_SEGMENT_SIZE.min(n - start);
        if max_size < min_size {
            break;
        }
        for size in (min_size..=max_size).step_by(ENUMERATION_STRIDE) {
            let window = &sorted[start..start + size];
            let span = window[size - 1].voltage - window[0].voltage;
            if !(span >= MIN_SEGMENT_SPAN) {
                continue;
            }
            tested += 1;

            let report = classify(window);
            if !report.is_linear {
                continue;
            }
            let candidate = Segment::from_window(window, start, &report, min_size);

            let duplicate = accepted.iter().any(|seg| {
                let smaller = seg.voltage_span.min(candidate.voltage_span);
                candidate.overlap_with(seg) > MAX_OVERLAP_FRACTION * smaller
            });
            if duplicate {
                continue;
            }

            trace!(
                "segment {:.4}..{:.4} V, {} points, quality {:.4}",
                candidate.start_voltage,
                candidate.end_voltage,
                candidate.size,
                candidate.quality
            );
            accepted.push(candidate);
        }
    }

    // Stable sort so equal qualities keep enumeration order
    accepted.sort_by(|a, b| cmp_f64(b.quality, a.quality));
    debug!(
        "enumerated {} windows over {} points, {} linear segments kept",
        tested,
        n,
        accepted.len()
    );
    accepted
}

/// Signed clearance between `segment` and the peak on the side the scan requires.
pub fn peak_clearance(segment: &Segment, peak_voltage: f64, direction: ScanDirection) -> f64 {
    match direction {
        ScanDirection::Forward => peak_voltage - segment.end_voltage,
        ScanDirection::Reverse => segment.start_voltage - peak_voltage,
    }
}

fn selection_score(segment: &Segment, distance: f64, direction: ScanDirection) -> f64 {
    let optimum = match direction {
        ScanDirection::Forward => FORWARD_OPTIMAL_DISTANCE,
        ScanDirection::Reverse => REVERSE_OPTIMAL_DISTANCE,
    };
    let flatness = 1.0 / (1.0 + segment.abs_slope);
    let position = 1.0 / (1.0 + (distance - optimum).abs());
    let stability = 1.0 / (1.0 + segment.current_variability);
    0.45 * segment.r_squared + 0.35 * flatness + 0.15 * position + 0.05 * stability
}

/// Pick the flattest, best-placed segment on the baseline side of the peak.
///
/// Forward baselines must end, and reverse baselines start, more than
/// [`MIN_PEAK_CLEARANCE`] away from `peak_voltage`. Ties go to the earlier segment.
pub fn select_best_segment(
    segments: &[Segment],
    peak_voltage: f64,
    direction: ScanDirection,
) -> Option<&Segment> {
    let mut best: Option<(f64, &Segment)> = None;

    for segment in segments {
        if segment.abs_slope > MAX_BASELINE_SLOPE {
            continue;
        }
        let distance = peak_clearance(segment, peak_voltage, direction);
        if !(distance > MIN_PEAK_CLEARANCE) {
            continue;
        }
        let score = selection_score(segment, distance, direction);
        if best.map_or(true, |(top, _)| score > top) {
            best = Some((score, segment));
        }
    }

    if let Some((score, segment)) = best {
        debug!(
            "{:?} baseline segment {:.4}..{:.4} V chosen (score {:.4}, slope {:.4})",
            direction, segment.start_voltage, segment.end_voltage, score, segment.regression.slope
        );
    }
    best.map(|(_, segment)| segment)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Baseline `2v + 1` with a narrow bump at `center`.
    fn trace_with_bump(center: f64) -> Vec<Sample> {
        (0..200)
            .map(|i| {
                let v = -0.5 + i as f64 / 199.0;
                let bump = 30.0 * (-((v - center) / 0.03).powi(2) / 2.0).exp();
                Sample::new(v, 2.0 * v + 1.0 + bump)
            })
            .collect()
    }

    #[test]
    fn enumerated_segments_are_ranked_and_distinct() {
        let segments = enumerate_segments(&trace_with_bump(0.1), DEFAULT_MIN_SEGMENT_SIZE);
        assert!(!segments.is_empty());

        for pair in segments.windows(2) {
            assert!(pair[0].quality >= pair[1].quality);
        }
        for (i, a) in segments.iter().enumerate() {
            assert!(a.voltage_span >= MIN_SEGMENT_SPAN);
            assert!(a.size >= DEFAULT_MIN_SEGMENT_SIZE && a.size <= MAX_SEGMENT_SIZE);
            for b in &segments[i + 1..] {
                let smaller = a.voltage_span.min(b.voltage_span);
                assert!(a.overlap_with(b) <= MAX_OVERLAP_FRACTION * smaller + 1e-12);
            }
        }
    }

    #[test]
    fn enumeration_skips_the_peak() {
        let segments = enumerate_segments(&trace_with_bump(0.1), DEFAULT_MIN_SEGMENT_SIZE);
        assert!(segments
            .iter()
            .all(|s| s.end_voltage < 0.0 || s.start_voltage > 0.2));
    }

    #[test]
    fn too_short_trace_yields_nothing() {
        let trace: Vec<Sample> = (0..8).map(|i| Sample::new(i as f64 * 0.01, 1.0)).collect();
        assert!(enumerate_segments(&trace, DEFAULT_MIN_SEGMENT_SIZE).is_empty());
    }

    #[test]
    fn narrow_windows_are_rejected() {
        // 40 points inside 10 mV
        let trace: Vec<Sample> = (0..40)
            .map(|i| {
                let v = i as f64 * 0.00025;
                Sample::new(v, 2.0 * v + 1.0)
            })
            .collect();
        assert!(enumerate_segments(&trace, DEFAULT_MIN_SEGMENT_SIZE).is_empty());
    }

    #[test]
    fn selector_respects_peak_clearance() {
        let trace = trace_with_bump(0.1);
        let segments = enumerate_segments(&trace, DEFAULT_MIN_SEGMENT_SIZE);
        for peak in [-0.3, -0.1, 0.1, 0.3] {
            if let Some(seg) = select_best_segment(&segments, peak, ScanDirection::Forward) {
                assert!(peak - seg.end_voltage > MIN_PEAK_CLEARANCE);
            }
            if let Some(seg) = select_best_segment(&segments, peak, ScanDirection::Reverse) {
                assert!(seg.start_voltage - peak > MIN_PEAK_CLEARANCE);
            }
        }
    }

    #[test]
    fn selector_returns_none_without_admissible_side() {
        let segments = enumerate_segments(&trace_with_bump(0.1), DEFAULT_MIN_SEGMENT_SIZE);
        assert!(select_best_segment(&segments, -0.6, ScanDirection::Forward).is_none());
        assert!(select_best_segment(&segments, 0.6, ScanDirection::Reverse).is_none());
    }

    #[test]
    fn selector_rejects_steep_segments() {
        let steep: Vec<Sample> = (0..60)
            .map(|i| {
                let v = 0.1 + i as f64 * 0.002;
                Sample::new(v, 8.0 * v + 5.0)
            })
            .collect();
        let segments = enumerate_segments(&steep, DEFAULT_MIN_SEGMENT_SIZE);
        assert!(!segments.is_empty());
        assert!(select_best_segment(&segments, 0.5, ScanDirection::Forward).is_none());
    }

    #[test]
    fn selector_prefers_flat_over_steep() {
        // Steep but linear ramp followed by a flat shelf, both before the peak
        let trace: Vec<Sample> = (0..120)
            .map(|i| {
                let v = -0.6 + i as f64 * 0.005;
                let current = if v < -0.3 { 4.0 * v + 6.0 } else { 0.2 * v + 4.86 };
                Sample::new(v, current)
            })
            .collect();
        let segments = enumerate_segments(&trace, DEFAULT_MIN_SEGMENT_SIZE);
        let chosen = select_best_segment(&segments, 0.2, ScanDirection::Forward).unwrap();
        assert!(chosen.start_voltage >= -0.3 - 1e-9);
        assert!(chosen.abs_slope < 1.0);
    }
}
