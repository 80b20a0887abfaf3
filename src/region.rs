use crate::segments::{enumerate_segments, select_best_segment};
use crate::{sorted_by_voltage, Sample, ScanDirection};
use log::{debug, warn};

/// Share of the sorted trace used when no segment qualifies.
pub const FALLBACK_FRACTION: f64 = 0.3;

/// How a baseline source region was obtained.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegionSource {
    /// A linear segment chosen by the selector.
    Segment {
        start_voltage: f64,
        end_voltage: f64,
        quality: f64,
    },
    /// Enumeration found linear segments but none on the baseline side of the peak.
    NoAdmissibleSegment,
    /// Enumeration found no linear segment at all.
    NoLinearSegment,
}

#[derive(Debug, Clone)]
pub struct BaselineRegion {
    pub points: Vec<Sample>,
    pub source: RegionSource,
}

impl BaselineRegion {
    pub fn is_fallback(&self) -> bool {
        !matches!(self.source, RegionSource::Segment { .. })
    }
}

/// Leading (forward) or trailing (reverse) `fraction` of voltage-sorted `sorted`.
///
/// At least one sample is returned whenever `sorted` is non-empty.
pub fn edge_slice(sorted: &[Sample], fraction: f64, direction: ScanDirection) -> Vec<Sample> {
    let n = sorted.len();
    if n == 0 {
        return Vec::new();
    }
    let count = ((n as f64 * fraction).round() as usize).clamp(1, n);
    match direction {
        ScanDirection::Forward => sorted[..count].to_vec(),
        ScanDirection::Reverse => sorted[n - count..].to_vec(),
    }
}

/// Locate the samples a baseline for one scan direction should be fitted to.
///
/// Tries the best linear segment on the baseline side of `peak_voltage`; when
/// there is none, falls back to the first (forward) or last (reverse) 30 % of
/// the trace as-is.
pub fn find_baseline_region(
    trace: &[Sample],
    peak_voltage: f64,
    direction: ScanDirection,
    min_size: usize,
) -> BaselineRegion {
    let segments = enumerate_segments(trace, min_size);

    let source = if segments.is_empty() {
        RegionSource::NoLinearSegment
    } else if let Some(segment) = select_best_segment(&segments, peak_voltage, direction) {
        return BaselineRegion {
            points: segment.points.clone(),
            source: RegionSource::Segment {
                start_voltage: segment.start_voltage,
                end_voltage: segment.end_voltage,
                quality: segment.quality,
            },
        };
    } else {
        RegionSource::NoAdmissibleSegment
    };

    let points = edge_slice(&sorted_by_voltage(trace), FALLBACK_FRACTION, direction);
    if !trace.is_empty() {
        warn!(
            "{:?} baseline: {:?} near peak at {:.4} V, using {} edge points",
            direction,
            source,
            peak_voltage,
            points.len()
        );
    } else {
        debug!("{:?} baseline: empty trace", direction);
    }
    BaselineRegion { points, source }
}
