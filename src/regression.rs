use crate::Sample;
use log::trace;
use serde::Serialize;

/// Denominators below this are treated as zero voltage spread.
const DEGENERATE_DENOMINATOR: f64 = 1e-12;

/// Ordinary least-squares fit of current against voltage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Regression {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

impl Regression {
    fn flat(mean_current: f64) -> Self {
        Self {
            slope: 0.0,
            intercept: if mean_current.is_finite() {
                mean_current
            } else {
                0.0
            },
            r_squared: 0.0,
        }
    }

    /// Evaluate the fitted line at `voltage`.
    pub fn predict(&self, voltage: f64) -> f64 {
        self.slope * voltage + self.intercept
    }

    /// Evaluate the line at every voltage of `trace`.
    pub fn extrapolate(&self, trace: &[Sample]) -> Vec<Sample> {
        trace
            .iter()
            .map(|s| Sample::new(s.voltage, self.predict(s.voltage)))
            .collect()
    }
}

/// Fit `current = slope * voltage + intercept` over the finite samples of `points`.
///
/// Never fails. Fewer than two finite samples, a near-zero voltage spread or
/// any non-finite intermediate all yield a flat line through the mean current
/// with `r_squared = 0`. `r_squared` is clamped to be non-negative.
pub fn linear_regression(points: &[Sample]) -> Regression {
    let finite: Vec<&Sample> = points.iter().filter(|s| s.is_finite()).collect();
    let n = finite.len() as f64;

    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_xx, mut sum_yy) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for s in &finite {
        sum_x += s.voltage;
        sum_y += s.current;
        sum_xy += s.voltage * s.current;
        sum_xx += s.voltage * s.voltage;
        sum_yy += s.current * s.current;
    }

    if finite.is_empty() {
        return Regression::flat(0.0);
    }
    let mean_y = sum_y / n;
    if finite.len() < 2 {
        return Regression::flat(mean_y);
    }

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator.abs() < DEGENERATE_DENOMINATOR {
        trace!("degenerate fit over {} points (denominator {:e})", finite.len(), denominator);
        return Regression::flat(mean_y);
    }

    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;

    let (ss_res, ss_tot) = finite.iter().fold((0.0, 0.0), |(res, tot), s| {
        let predicted = slope * s.voltage + intercept;
        (
            res + (s.current - predicted).powi(2),
            tot + (s.current - mean_y).powi(2),
        )
    });
    // Rounding noise on constant current must not read as explained variance
    let r_squared = if ss_tot > f64::EPSILON * sum_yy {
        (1.0 - ss_res / ss_tot).max(0.0)
    } else {
        0.0
    };

    if !(slope.is_finite() && intercept.is_finite() && r_squared.is_finite()) {
        return Regression::flat(mean_y);
    }

    Regression {
        slope,
        intercept,
        r_squared,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn line(slope: f64, intercept: f64, n: usize) -> Vec<Sample> {
        (0..n)
            .map(|i| {
                let v = -0.4 + 0.01 * i as f64;
                Sample::new(v, slope * v + intercept)
            })
            .collect()
    }

    #[test]
    fn recovers_exact_line() {
        let fit = linear_regression(&line(-3.5, 0.25, 50));
        assert_abs_diff_eq!(fit.slope, -3.5, epsilon = 1e-6);
        assert_abs_diff_eq!(fit.intercept, 0.25, epsilon = 1e-6);
        assert_abs_diff_eq!(fit.r_squared, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn constant_current_has_no_explanatory_power() {
        let fit = linear_regression(&line(0.0, 4.2, 20));
        assert_abs_diff_eq!(fit.slope, 0.0, epsilon = 1e-9);
        assert_eq!(fit.r_squared, 0.0);
        assert!(fit.intercept.is_finite());
    }

    #[test]
    fn identical_voltages_fall_back_to_mean() {
        let points = vec![
            Sample::new(0.1, 1.0),
            Sample::new(0.1, 2.0),
            Sample::new(0.1, 6.0),
        ];
        let fit = linear_regression(&points);
        assert_eq!(fit.slope, 0.0);
        assert_abs_diff_eq!(fit.intercept, 3.0, epsilon = 1e-12);
        assert_eq!(fit.r_squared, 0.0);
    }

    #[test]
    fn single_point_is_flat_through_it() {
        let fit = linear_regression(&[Sample::new(0.2, 7.0)]);
        assert_eq!(fit.slope, 0.0);
        assert_eq!(fit.intercept, 7.0);
        assert_eq!(fit.r_squared, 0.0);

        let empty = linear_regression(&[]);
        assert_eq!(empty.intercept, 0.0);
    }

    #[test]
    fn non_finite_samples_are_skipped() {
        let mut points = line(2.0, 1.0, 30);
        points.push(Sample::new(f64::NAN, 1.0));
        points.push(Sample::new(0.5, f64::INFINITY));
        let fit = linear_regression(&points);
        assert_abs_diff_eq!(fit.slope, 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(fit.intercept, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn r_squared_is_never_negative() {
        let points: Vec<Sample> = (0..40)
            .map(|i| {
                let v = i as f64 * 0.01;
                Sample::new(v, if i % 2 == 0 { 1.0 } else { -1.0 })
            })
            .collect();
        let fit = linear_regression(&points);
        assert!(fit.r_squared >= 0.0);
        assert!(fit.r_squared < 0.1);
    }

    #[test]
    fn extrapolates_over_trace_voltages() {
        let fit = Regression {
            slope: 2.0,
            intercept: 1.0,
            r_squared: 1.0,
        };
        let curve = fit.extrapolate(&[Sample::new(-0.5, 9.0), Sample::new(0.5, -9.0)]);
        assert_eq!(curve, vec![Sample::new(-0.5, 0.0), Sample::new(0.5, 2.0)]);
    }
}
