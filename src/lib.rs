pub mod application;
pub mod baseline;
pub mod config;
pub mod data_loading;
pub mod linearity;
pub mod output;
pub mod region;
pub mod regression;
pub mod segments;
pub mod windowed;

use regression::Regression;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BaselineError {
    #[error("insufficient baseline data: {forward} forward, {reverse} reverse points usable")]
    InsufficientData { forward: usize, reverse: usize },
    #[error("need at least {needed} usable samples, found {found}")]
    TooFewSamples { found: usize, needed: usize },
    #[error("trace has {data} samples but baseline has {baseline}")]
    LengthMismatch { data: usize, baseline: usize },
    #[error("voltage mismatch at index {index}: trace {data} V, baseline {baseline} V")]
    VoltageMismatch {
        index: usize,
        data: f64,
        baseline: f64,
    },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// One (voltage, current) reading of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub voltage: f64,
    pub current: f64,
}

impl Sample {
    pub fn new(voltage: f64, current: f64) -> Self {
        Self { voltage, current }
    }

    pub fn is_finite(&self) -> bool {
        self.voltage.is_finite() && self.current.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeakType {
    Oxidation,
    Reduction,
}

/// A peak detected upstream, normalized to voltage/current/type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    #[serde(alias = "x")]
    pub voltage: f64,
    #[serde(alias = "y")]
    pub current: f64,
    #[serde(rename = "type")]
    pub kind: PeakType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanDirection {
    Forward,
    Reverse,
}

/// Baselines built independently for the forward and reverse scans.
#[derive(Debug, Clone, Serialize)]
pub struct SeparateBaseline {
    pub forward_curve: Vec<Sample>,
    pub reverse_curve: Vec<Sample>,
    pub forward_regression: Regression,
    pub reverse_regression: Regression,
    pub forward_source_points: Vec<Sample>,
    pub reverse_source_points: Vec<Sample>,
}

/// A single baseline spanning one undivided trace.
#[derive(Debug, Clone, Serialize)]
pub struct SimpleBaseline {
    pub curve: Vec<Sample>,
    pub regression: Regression,
    pub source_points: Vec<Sample>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "form", rename_all = "lowercase")]
pub enum BaselineResult {
    Separate(SeparateBaseline),
    Simple(SimpleBaseline),
}

impl BaselineResult {
    /// Curve a peak of the given type should be measured against.
    pub fn curve_for(&self, kind: PeakType) -> &[Sample] {
        match self {
            BaselineResult::Separate(sep) => match kind {
                PeakType::Oxidation => &sep.forward_curve,
                PeakType::Reduction => &sep.reverse_curve,
            },
            BaselineResult::Simple(simple) => &simple.curve,
        }
    }
}

/// Copy of `points` ordered by ascending voltage. Non-finite voltages sort last.
pub fn sorted_by_voltage(points: &[Sample]) -> Vec<Sample> {
    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| {
        a.voltage
            .partial_cmp(&b.voltage)
            .unwrap_or_else(|| a.voltage.is_nan().cmp(&b.voltage.is_nan()))
    });
    sorted
}

pub(crate) fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_accepts_chart_field_names() {
        let peak: Peak =
            serde_json::from_str(r#"{"x": 0.12, "y": 3.5, "type": "oxidation"}"#).unwrap();
        assert_eq!(peak.voltage, 0.12);
        assert_eq!(peak.current, 3.5);
        assert_eq!(peak.kind, PeakType::Oxidation);
    }

    #[test]
    fn sorting_does_not_touch_input() {
        let trace = vec![
            Sample::new(0.3, 1.0),
            Sample::new(f64::NAN, 2.0),
            Sample::new(-0.1, 3.0),
        ];
        let sorted = sorted_by_voltage(&trace);
        assert_eq!(sorted[0].voltage, -0.1);
        assert_eq!(sorted[1].voltage, 0.3);
        assert!(sorted[2].voltage.is_nan());
        assert_eq!(trace[0].voltage, 0.3);
    }
}
