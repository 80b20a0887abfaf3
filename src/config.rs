use crate::segments::DEFAULT_MIN_SEGMENT_SIZE;
use crate::windowed::WindowedScanParams;
use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselineMode {
    Dual,   // Separate forward/reverse baselines from segment search (default)
    Single, // One baseline over the undivided trace
    Auto,   // Separate baselines from the windowed scan
}

impl FromStr for BaselineMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dual" | "separate" => Ok(BaselineMode::Dual),
            "single" | "simple" => Ok(BaselineMode::Single),
            "auto" | "windowed" => Ok(BaselineMode::Auto),
            _ => Err(format!(
                "Invalid baseline mode: {}. Use dual (default), single or auto",
                s
            )),
        }
    }
}

impl BaselineMode {
    pub fn name(&self) -> &'static str {
        match self {
            BaselineMode::Dual => "dual",
            BaselineMode::Single => "single",
            BaselineMode::Auto => "auto",
        }
    }
}

/// Voltage window for a manually chosen baseline, written `LOW:HIGH`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoltageRange {
    pub low: f64,
    pub high: f64,
}

impl FromStr for VoltageRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (low, high) = s
            .split_once(':')
            .ok_or_else(|| format!("Invalid voltage range: {}. Expected LOW:HIGH", s))?;
        let low: f64 = low
            .trim()
            .parse()
            .map_err(|_| format!("Invalid lower voltage: {}", low))?;
        let high: f64 = high
            .trim()
            .parse()
            .map_err(|_| format!("Invalid upper voltage: {}", high))?;
        if !(low < high) {
            return Err(format!("Voltage range {}:{} is empty", low, high));
        }
        Ok(VoltageRange { low, high })
    }
}

/// Estimate and subtract cyclic-voltammetry baselines
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// CSV trace file or directory of CSV traces
    #[arg(help = "CSV trace file or directory of CSV traces")]
    pub input_path: PathBuf,

    /// JSON file with the detected peaks (voltage/x, current/y, type)
    #[arg(long)]
    pub peaks: Option<PathBuf>,

    /// Baseline mode (dual [default], single, auto)
    #[arg(long, default_value = "dual")]
    pub mode: BaselineMode,

    /// Fit the baseline over this voltage window instead of searching (e.g. -0.4:-0.1)
    #[arg(long, allow_hyphen_values = true)]
    pub range: Option<VoltageRange>,

    /// Minimum number of points in an enumerated baseline segment
    #[arg(long, default_value_t = DEFAULT_MIN_SEGMENT_SIZE)]
    pub min_segment_size: usize,

    /// Window size for the windowed scan (auto mode)
    #[arg(long, env = "CV_BASELINE_WINDOW_SIZE", default_value = "8")]
    pub window_size: usize,

    /// Minimum R² of a window in the windowed scan
    #[arg(long, env = "CV_BASELINE_R2_THRESHOLD", default_value = "0.90")]
    pub r2_threshold: f64,

    /// Maximum absolute slope of a window in the windowed scan
    #[arg(long, env = "CV_BASELINE_MAX_ABS_SLOPE", default_value = "5.0")]
    pub max_abs_slope: f64,

    /// CSV output file prefix (e.g. /path/to/output/prefix)
    #[arg(long)]
    pub csv_output: Option<String>,

    /// Path of the JSON report
    #[arg(long)]
    pub json_output: Option<PathBuf>,
}

impl Args {
    pub fn windowed_params(&self) -> WindowedScanParams {
        WindowedScanParams {
            window_size: self.window_size,
            r2_threshold: self.r2_threshold,
            max_abs_slope: self.max_abs_slope,
        }
    }
}
