use anyhow::{bail, Result};
use chrono::Utc;
use clap::Parser;
use cv_baseline::application::peak_heights;
use cv_baseline::baseline::{
    baseline_from_range, calculate_dual_baseline, calculate_single_baseline,
};
use cv_baseline::config::{Args, BaselineMode};
use cv_baseline::data_loading::{find_trace_files, load_peaks, load_trace, CvTrace};
use cv_baseline::output::{print_summary, write_baseline_csv, write_json_report, TraceReport};
use cv_baseline::windowed::auto_detect_baseline;
use cv_baseline::{BaselineResult, Peak};
use log::{debug, info};

fn compute_baseline(
    trace: &CvTrace,
    peaks: &[Peak],
    args: &Args,
) -> Result<(BaselineResult, String)> {
    if let Some(range) = args.range {
        let simple = baseline_from_range(&trace.all(), range.low, range.high)?;
        return Ok((BaselineResult::Simple(simple), "range".to_string()));
    }

    let result = match args.mode {
        BaselineMode::Dual => BaselineResult::Separate(calculate_dual_baseline(
            &trace.forward,
            &trace.reverse,
            peaks,
            args.min_segment_size,
        )?),
        BaselineMode::Single => {
            BaselineResult::Simple(calculate_single_baseline(&trace.all(), peaks)?)
        }
        BaselineMode::Auto => BaselineResult::Separate(auto_detect_baseline(
            &trace.forward,
            &trace.reverse,
            peaks,
            &args.windowed_params(),
        )?),
    };
    Ok((result, args.mode.name().to_string()))
}

fn main() -> Result<()> {
    // Initialize logger
    env_logger::init();

    let args = Args::parse();
    debug!("{:?}", args);

    let peaks = match &args.peaks {
        Some(path) => load_peaks(path)?,
        None => Vec::new(),
    };
    println!("Using {} peaks", peaks.len());

    let files = find_trace_files(&args.input_path)?;
    let mut reports = Vec::new();
    let mut failed = 0;

    for path in &files {
        println!("Loading file: {}", path.display());
        let trace = match load_trace(path) {
            Ok(trace) => trace,
            Err(e) => {
                eprintln!("Warning: Skipping {}: {:#}", path.display(), e);
                failed += 1;
                continue;
            }
        };

        let (baseline, mode) = match compute_baseline(&trace, &peaks, &args) {
            Ok(computed) => computed,
            Err(e) => {
                eprintln!("Warning: No baseline for {}: {:#}", path.display(), e);
                failed += 1;
                continue;
            }
        };

        let report = TraceReport {
            source: path.clone(),
            generated_at: Utc::now(),
            mode,
            forward_samples: trace.forward.len(),
            reverse_samples: trace.reverse.len(),
            peak_heights: peak_heights(&peaks, &baseline),
            baseline,
        };
        print_summary(&report);

        if let Some(prefix) = &args.csv_output {
            let trace_id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("trace");
            write_baseline_csv(prefix, trace_id, &trace, &report.baseline)?;
        }
        reports.push(report);
    }

    if let Some(json_path) = &args.json_output {
        write_json_report(json_path, &reports)?;
    }

    info!("{} traces processed, {} failed", reports.len(), failed);
    if reports.is_empty() {
        bail!("No trace could be processed ({} failed)", failed);
    }
    Ok(())
}
