use crate::{adc_to_volts, Sample};
use anyhow::{Context, Result};
use log::{debug, info};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Payload of one logged sample: device milliseconds and both channels in volts.
#[derive(Debug, Deserialize)]
struct ReplayRecord {
    t: f64,
    braquial: f64,
    tibial: f64,
}

/// One reading pushed by the acquisition device, raw 12-bit ADC codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DeviceReading {
    pub pin32: u16,
    pub pin35: u16,
    /// Device milliseconds
    pub timestamp: i64,
}

impl DeviceReading {
    /// Brachial on pin 32, tibial on pin 35.
    pub fn to_sample(&self) -> Sample {
        Sample::new(
            self.timestamp as f64,
            adc_to_volts(self.pin32),
            adc_to_volts(self.pin35),
        )
    }
}

/// Parse a device message. Malformed JSON and codes above 4095 give `None`.
pub fn parse_device_message(message: &str) -> Option<DeviceReading> {
    let reading: DeviceReading = match serde_json::from_str(message.trim()) {
        Ok(reading) => reading,
        Err(e) => {
            debug!("Skipping malformed device message: {}", e);
            return None;
        }
    };

    if reading.pin32 as f64 > crate::ADC_MAX || reading.pin35 as f64 > crate::ADC_MAX {
        debug!(
            "Skipping reading outside ADC range: pin32={} pin35={}",
            reading.pin32, reading.pin35
        );
        return None;
    }

    Some(reading)
}

/// Extract the sample from a log line of the form `<marker> {"t":..,"braquial":..,"tibial":..}`.
pub fn parse_replay_line(line: &str, marker: &str) -> Option<Sample> {
    let (_, payload) = line.split_once(marker)?;
    let record: ReplayRecord = serde_json::from_str(payload.trim()).ok()?;
    if !(record.t.is_finite() && record.braquial.is_finite() && record.tibial.is_finite()) {
        return None;
    }
    Some(Sample::new(record.t, record.braquial, record.tibial))
}

/// Read every marked sample from a log. Lines without the marker or with a
/// malformed payload are skipped.
pub fn read_replay<R: BufRead>(reader: R, marker: &str) -> Result<Vec<Sample>> {
    let mut samples = Vec::new();
    let mut skipped = 0;

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read line {}", line_num + 1))?;
        if !line.contains(marker) {
            continue;
        }
        match parse_replay_line(&line, marker) {
            Some(sample) => samples.push(sample),
            None => {
                skipped += 1;
                debug!("Skipping malformed record on line {}", line_num + 1);
            }
        }
    }

    if skipped > 0 {
        debug!("Skipped {} malformed records", skipped);
    }

    Ok(samples)
}

pub fn read_replay_file(path: &Path, marker: &str) -> Result<Vec<Sample>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    let samples = read_replay(BufReader::new(file), marker)
        .with_context(|| format!("Failed to read log: {}", path.display()))?;

    info!("Loaded {} samples from {}", samples.len(), path.display());
    Ok(samples)
}

/// All `.txt` logs under `dir`, sorted by path.
pub fn find_replay_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("txt"))
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort();
    files
}
