use crate::application::{correct_traces, PeakHeight};
use crate::data_loading::CvTrace;
use crate::regression::Regression;
use crate::{BaselineResult, Sample};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Everything computed for one trace file.
#[derive(Debug, Clone, Serialize)]
pub struct TraceReport {
    pub source: PathBuf,
    pub generated_at: DateTime<Utc>,
    pub mode: String,
    pub forward_samples: usize,
    pub reverse_samples: usize,
    pub baseline: BaselineResult,
    pub peak_heights: Vec<PeakHeight>,
}

/// Write voltage, raw current, baseline and corrected current for every sample.
///
/// The file lands next to `base_path` as `<stem>_<trace_id>_baseline.<ext>`.
pub fn write_baseline_csv(
    base_path: &str,
    trace_id: &str,
    trace: &CvTrace,
    baseline: &BaselineResult,
) -> Result<PathBuf> {
    let path = Path::new(base_path);
    let dir = path.parent().unwrap_or(Path::new("."));

    // Create directory if it doesn't exist
    std::fs::create_dir_all(dir)?;

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("results");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("csv");

    let filename = format!("{}_{}_baseline.{}", stem, trace_id, ext);
    let full_path = dir.join(filename);

    println!("Writing results to {}", full_path.display());
    let file = File::create(&full_path)
        .with_context(|| format!("Failed to create {}", full_path.display()))?;
    let mut writer = csv::Writer::from_writer(file);

    writer.write_record(["scan", "voltage", "current", "baseline", "corrected"])?;

    let corrected = correct_traces(&trace.forward, &trace.reverse, baseline)?;
    let corrected: Vec<Sample> = corrected.into_iter().flat_map(|c| c.samples).collect();
    let curve: Vec<Sample> = match baseline {
        BaselineResult::Separate(sep) => sep
            .forward_curve
            .iter()
            .chain(sep.reverse_curve.iter())
            .copied()
            .collect(),
        BaselineResult::Simple(simple) => simple.curve.clone(),
    };

    let labels = std::iter::repeat("forward")
        .take(trace.forward.len())
        .chain(std::iter::repeat("reverse").take(trace.reverse.len()));
    for (((label, raw), base), corr) in labels
        .zip(trace.all())
        .zip(curve.iter())
        .zip(corrected.iter())
    {
        writer.write_record(&[
            label.to_string(),
            raw.voltage.to_string(),
            raw.current.to_string(),
            base.current.to_string(),
            corr.current.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(full_path)
}

pub fn write_json_report(path: &Path, reports: &[TraceReport]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), reports)?;
    println!("Wrote report for {} traces to {}", reports.len(), path.display());
    Ok(())
}

fn print_regression(label: &str, regression: &Regression, source_points: usize) {
    println!(
        "  {:<8} slope {:>10.4}  intercept {:>10.4}  R² {:.4}  ({} points)",
        label, regression.slope, regression.intercept, regression.r_squared, source_points
    );
}

pub fn print_summary(report: &TraceReport) {
    println!("\nBaseline for {} ({} mode):", report.source.display(), report.mode);
    println!(
        "  {} forward / {} reverse samples",
        report.forward_samples, report.reverse_samples
    );
    match &report.baseline {
        BaselineResult::Separate(sep) => {
            print_regression(
                "forward",
                &sep.forward_regression,
                sep.forward_source_points.len(),
            );
            print_regression(
                "reverse",
                &sep.reverse_regression,
                sep.reverse_source_points.len(),
            );
        }
        BaselineResult::Simple(simple) => {
            print_regression("trace", &simple.regression, simple.source_points.len());
        }
    }

    if report.peak_heights.is_empty() {
        return;
    }
    println!("  Peak        Voltage     Current      Height");
    println!("  ------------------------------------------");
    for h in &report.peak_heights {
        println!(
            "  {:<10} {:>8.4} {:>11.4} {:>11.4}",
            format!("{:?}", h.peak.kind),
            h.peak.voltage,
            h.peak.current,
            h.height
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::calculate_dual_baseline;
    use crate::segments::DEFAULT_MIN_SEGMENT_SIZE;
    use tempfile::TempDir;

    fn cycle() -> CvTrace {
        let forward: Vec<Sample> = (0..60)
            .map(|i| {
                let v = -0.3 + i as f64 * 0.01;
                Sample::new(v, 0.5 * v + 2.0)
            })
            .collect();
        let reverse: Vec<Sample> = forward
            .iter()
            .rev()
            .map(|s| Sample::new(s.voltage, s.current - 3.0))
            .collect();
        CvTrace { forward, reverse }
    }

    #[test]
    fn baseline_csv_has_one_row_per_sample() {
        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join("out").join("run.csv");
        let trace = cycle();
        let baseline = BaselineResult::Separate(
            calculate_dual_baseline(&trace.forward, &trace.reverse, &[], DEFAULT_MIN_SEGMENT_SIZE)
                .unwrap(),
        );

        let path =
            write_baseline_csv(prefix.to_str().unwrap(), "cycle", &trace, &baseline).unwrap();
        assert_eq!(path.file_name().unwrap(), "run_cycle_baseline.csv");

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), trace.len());
        assert_eq!(&rows[0][0], "forward");
        assert_eq!(&rows[trace.forward.len()][0], "reverse");

        // Both scans are exact lines, so the corrected current vanishes
        for row in &rows {
            let corrected: f64 = row[4].parse().unwrap();
            assert!(corrected.abs() < 1e-9);
        }
    }

    #[test]
    fn json_report_round_trips_through_serde() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.json");
        let trace = cycle();
        let baseline = BaselineResult::Separate(
            calculate_dual_baseline(&trace.forward, &trace.reverse, &[], DEFAULT_MIN_SEGMENT_SIZE)
                .unwrap(),
        );
        let report = TraceReport {
            source: PathBuf::from("cycle.csv"),
            generated_at: Utc::now(),
            mode: "dual".to_string(),
            forward_samples: trace.forward.len(),
            reverse_samples: trace.reverse.len(),
            baseline,
            peak_heights: Vec::new(),
        };

        write_json_report(&path, &[report]).unwrap();
        let value: serde_json::Value =
            serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        assert_eq!(value[0]["baseline"]["form"], "separate");
        assert_eq!(value[0]["forward_samples"], 60);
        let slope = value[0]["baseline"]["forward_regression"]["slope"].as_f64().unwrap();
        assert!((slope - 0.5).abs() < 1e-9);
    }
}
