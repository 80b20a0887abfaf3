use crate::linearity::MIN_LINEAR_POINTS;
use crate::{Peak, Sample, ScanDirection};
use anyhow::{bail, Context, Result};
use log::{debug, warn};
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Deserialize)]
struct TraceRecord {
    #[serde(alias = "x", alias = "potential", alias = "Voltage")]
    voltage: f64,
    #[serde(alias = "y", alias = "Current")]
    current: f64,
    #[serde(default)]
    scan: Option<ScanDirection>,
}

/// One CV cycle, split into its two sweep directions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CvTrace {
    pub forward: Vec<Sample>,
    pub reverse: Vec<Sample>,
}

impl CvTrace {
    /// Forward scan followed by the reverse scan.
    pub fn all(&self) -> Vec<Sample> {
        let mut all = self.forward.clone();
        all.extend_from_slice(&self.reverse);
        all
    }

    pub fn len(&self) -> usize {
        self.forward.len() + self.reverse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Split a cycle at its turning point, the first sample of maximum voltage.
///
/// The turning point belongs to the forward scan. A cycle that sweeps
/// negative first leaves the forward scan nearly empty; that is logged,
/// and the baseline calculators borrow from the longer side.
pub fn split_scans(trace: &[Sample]) -> CvTrace {
    let turn = trace
        .iter()
        .enumerate()
        .filter(|(_, s)| s.voltage.is_finite())
        .fold(None::<(usize, f64)>, |best, (i, s)| match best {
            Some((_, v)) if v >= s.voltage => best,
            _ => Some((i, s.voltage)),
        })
        .map(|(i, _)| i);

    let cv = match turn {
        Some(i) => CvTrace {
            forward: trace[..=i].to_vec(),
            reverse: trace[i + 1..].to_vec(),
        },
        None => CvTrace {
            forward: trace.to_vec(),
            reverse: Vec::new(),
        },
    };

    let shorter = cv.forward.len().min(cv.reverse.len());
    if !cv.reverse.is_empty() && shorter < MIN_LINEAR_POINTS {
        warn!(
            "turning point at sample {} leaves {} forward / {} reverse samples",
            cv.forward.len() - 1,
            cv.forward.len(),
            cv.reverse.len()
        );
    }
    cv
}

/// Read a trace CSV with `voltage,current` columns and an optional `scan` column.
///
/// Without a `scan` column the cycle is split at its turning point.
pub fn load_trace(path: &Path) -> Result<CvTrace> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open trace: {}", path.display()))?;

    let mut records = Vec::new();
    for (row, result) in reader.deserialize::<TraceRecord>().enumerate() {
        match result {
            Ok(record) => records.push(record),
            Err(e) => warn!("Skipping malformed row {} in {}: {}", row + 1, path.display(), e),
        }
    }
    if records.is_empty() {
        bail!("No samples found in {}", path.display());
    }

    let labelled = records.iter().filter(|r| r.scan.is_some()).count();
    let trace = if labelled == 0 {
        let samples: Vec<Sample> = records
            .iter()
            .map(|r| Sample::new(r.voltage, r.current))
            .collect();
        split_scans(&samples)
    } else if labelled == records.len() {
        let mut trace = CvTrace::default();
        for r in &records {
            let sample = Sample::new(r.voltage, r.current);
            match r.scan {
                Some(ScanDirection::Reverse) => trace.reverse.push(sample),
                _ => trace.forward.push(sample),
            }
        }
        trace
    } else {
        bail!(
            "{} labels {} of {} rows with a scan direction; label all or none",
            path.display(),
            labelled,
            records.len()
        );
    };

    debug!(
        "Loaded {}: {} forward, {} reverse samples",
        path.display(),
        trace.forward.len(),
        trace.reverse.len()
    );
    Ok(trace)
}

pub fn load_peaks(path: &Path) -> Result<Vec<Peak>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open peaks: {}", path.display()))?;
    let peaks: Vec<Peak> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse peaks: {}", path.display()))?;
    Ok(peaks)
}

/// The CSV files to process: `input` itself, or every `.csv` below it.
pub fn find_trace_files(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        bail!("Input path does not exist: {}", input.display());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(input) {
        let entry = entry?;
        let path = entry.path();
        let is_csv = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        if entry.file_type().is_file() && is_csv {
            println!("Indexing file: {}", path.display());
            files.push(path.to_path_buf());
        }
    }
    files.sort();

    if files.is_empty() {
        bail!("No CSV traces found in {}", input.display());
    }
    Ok(files)
}
