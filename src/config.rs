use crate::cavi::CaviCalibration;
use crate::vop::AnthropometricModel;
use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Line prefix written by the acquisition software in front of every sample.
pub const DEFAULT_REPLAY_MARKER: &str = "Datos recibidos de Arduino:";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub line_freq_hz: f64,
    pub notch_quality: f64,
    pub highpass_cutoff_hz: f64,
    pub lowpass_cutoff_hz: f64,
    /// Low-pass cutoff used for the live display only
    pub preview_lowpass_cutoff_hz: f64,
    pub order: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            line_freq_hz: 50.0,
            notch_quality: 30.0,
            highpass_cutoff_hz: 0.5,
            lowpass_cutoff_hz: 16.0,
            preview_lowpass_cutoff_hz: 20.0,
            order: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PeakConfig {
    /// Minimum prominence on the normalized brachial channel
    pub proximal_prominence: f64,
    /// Minimum prominence on the normalized tibial channel
    pub distal_prominence: f64,
    /// Minimum separation between peaks, in samples
    pub min_distance: usize,
    /// Accepted transit times, seconds
    pub min_transit_s: f64,
    pub max_transit_s: f64,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self {
            proximal_prominence: 0.3,
            distal_prominence: 0.1,
            min_distance: 1,
            min_transit_s: 0.1,
            max_transit_s: 0.5,
        }
    }
}

/// Every tunable of the analysis pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Sample rate assumed for replayed log files
    pub replay_sample_rate_hz: f64,
    /// Sample rate of the live device stream
    pub live_sample_rate_hz: f64,
    /// Notch replayed files as well (live streams are always notched)
    pub notch_on_replay: bool,
    pub filter: FilterConfig,
    pub peaks: PeakConfig,
    /// Velocities at or above this are discarded, m/s
    pub max_velocity_m_s: f64,
    /// Accepted beat-to-beat intervals for heart rate, seconds
    pub min_beat_interval_s: f64,
    pub max_beat_interval_s: f64,
    pub anthropometric: AnthropometricModel,
    pub cavi: CaviCalibration,
    /// Live-mode retention horizon; `None` keeps the whole session
    pub retention_ms: Option<f64>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            replay_sample_rate_hz: 50.0,
            live_sample_rate_hz: 200.0,
            notch_on_replay: false,
            filter: FilterConfig::default(),
            peaks: PeakConfig::default(),
            max_velocity_m_s: 40.0,
            min_beat_interval_s: 0.6,
            max_beat_interval_s: 1.0,
            anthropometric: AnthropometricModel::default(),
            cavi: CaviCalibration::default(),
            retention_ms: None,
        }
    }
}

impl AnalysisConfig {
    /// Load a JSON config; missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Apply command-line overrides on top of this config.
    pub fn with_overrides(mut self, args: &Args) -> Self {
        if let Some(rate) = args.sample_rate {
            self.replay_sample_rate_hz = rate;
        }
        if let Some(rate) = args.live_sample_rate {
            self.live_sample_rate_hz = rate;
        }
        if args.notch {
            self.notch_on_replay = true;
        }
        if let Some(cutoff) = args.lowpass_cutoff {
            self.filter.lowpass_cutoff_hz = cutoff;
        }
        if let Some(cutoff) = args.highpass_cutoff {
            self.filter.highpass_cutoff_hz = cutoff;
        }
        if let Some(freq) = args.line_freq {
            self.filter.line_freq_hz = freq;
        }
        self
    }
}

/// Estimate pulse wave velocity and CAVI from two-channel pulse recordings
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log file or directory of log files to replay (ignored with --stream)
    #[arg(help = "Log file or directory of .txt log files to replay")]
    pub input_path: Option<PathBuf>,

    /// Read live device records (JSON lines) from stdin instead of replaying files
    #[arg(long)]
    pub stream: bool,

    /// Measurement duration requested from the device in stream mode, seconds
    #[arg(long, default_value = "35")]
    pub duration: u32,

    /// Subject height in cm
    #[arg(long)]
    pub height: f64,

    /// Subject age in years
    #[arg(long)]
    pub age: u32,

    /// Systolic blood pressure in mmHg
    #[arg(long)]
    pub systolic: f64,

    /// Diastolic blood pressure in mmHg
    #[arg(long)]
    pub diastolic: f64,

    /// Subject name, carried to exports
    #[arg(long)]
    pub name: Option<String>,

    /// Free-text observation, carried to exports
    #[arg(long)]
    pub observation: Option<String>,

    /// JSON file with analysis settings
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Sample rate of replayed files in Hz (default 50)
    #[arg(long)]
    pub sample_rate: Option<f64>,

    /// Sample rate of the live stream in Hz (default 200)
    #[arg(long)]
    pub live_sample_rate: Option<f64>,

    /// Apply the mains notch to replayed files too
    #[arg(long)]
    pub notch: bool,

    /// Mains frequency in Hz (default 50)
    #[arg(long)]
    pub line_freq: Option<f64>,

    /// Low-pass cutoff in Hz (default 16)
    #[arg(long)]
    pub lowpass_cutoff: Option<f64>,

    /// High-pass cutoff in Hz (default 0.5)
    #[arg(long)]
    pub highpass_cutoff: Option<f64>,

    /// Marker preceding the JSON payload on each log line
    #[arg(long, default_value = DEFAULT_REPLAY_MARKER)]
    pub marker: String,

    /// CSV output file prefix (e.g. /path/to/output/prefix)
    #[arg(long)]
    pub csv_output: Option<String>,

    /// Print each session result as JSON
    #[arg(long)]
    pub json: bool,
}
