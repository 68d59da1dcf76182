use crate::reference::ReferenceReport;
use crate::session::SessionResult;
use crate::SubjectProfile;
use anyhow::{Context, Result};
use log::info;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Everything exported for one session.
#[derive(Debug, Serialize)]
pub struct SessionExport<'a> {
    pub label: &'a str,
    pub profile: &'a SubjectProfile,
    pub result: &'a SessionResult,
    pub reference: ReferenceReport,
}

impl<'a> SessionExport<'a> {
    pub fn new(label: &'a str, profile: &'a SubjectProfile, result: &'a SessionResult) -> Self {
        Self {
            label,
            profile,
            result,
            reference: ReferenceReport::build(profile, result),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize session result")
    }
}

fn optional(value: Option<f64>) -> String {
    value.map(|v| format!("{:.4}", v)).unwrap_or_default()
}

/// `<dir>/<stem>_<label>_<kind>.<ext>` next to the given prefix.
fn output_path(base_path: &str, label: &str, kind: &str) -> Result<PathBuf> {
    let path = Path::new(base_path);
    let dir = path.parent().unwrap_or(Path::new("."));

    // Create directory if it doesn't exist
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("results");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("csv");

    Ok(dir.join(format!("{}_{}_{}.{}", stem, label, kind, ext)))
}

/// Write the summary row and the per-match rows of a session as two CSV files.
///
/// A match's velocity is reported even when it was rejected by the velocity
/// ceiling (`max_velocity_m_s`, configurable); the `accepted` column tells
/// them apart.
pub fn write_session_csv(
    base_path: &str,
    export: &SessionExport,
    max_velocity: f64,
) -> Result<(PathBuf, PathBuf)> {
    let summary_path = output_path(base_path, export.label, "summary")?;
    info!("Writing summary to {}", summary_path.display());
    let mut writer = csv::Writer::from_path(&summary_path)
        .with_context(|| format!("Failed to create {}", summary_path.display()))?;

    writer.write_record([
        "completed_at",
        "name",
        "height_cm",
        "age_years",
        "systolic_mmhg",
        "diastolic_mmhg",
        "vop_median_m_s",
        "vop_count",
        "heart_rate_bpm",
        "spectral_heart_rate_bpm",
        "cavi",
        "age_group",
        "deviation_percent",
        "interpretation",
        "observation",
    ])?;

    let profile = export.profile;
    let result = export.result;
    let reference = &export.reference;
    writer.write_record([
        result.completed_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        profile.name.clone().unwrap_or_default(),
        profile.height_cm.to_string(),
        profile.age_years.to_string(),
        profile.systolic_mmhg.to_string(),
        profile.diastolic_mmhg.to_string(),
        optional(result.vop_median),
        result.vop_samples.len().to_string(),
        format!("{:.1}", result.heart_rate_bpm),
        optional(result.spectral_heart_rate_bpm),
        optional(result.cavi),
        reference.age_group.unwrap_or_default().to_string(),
        reference
            .deviation_percent
            .map(|d| format!("{:.1}", d))
            .unwrap_or_default(),
        reference
            .interpretation
            .map(|i| i.to_string())
            .unwrap_or_default(),
        profile.observation.clone().unwrap_or_default(),
    ])?;
    writer.flush()?;

    let matches_path = output_path(base_path, export.label, "matches")?;
    info!("Writing pulse matches to {}", matches_path.display());
    let mut writer = csv::Writer::from_path(&matches_path)
        .with_context(|| format!("Failed to create {}", matches_path.display()))?;

    writer.write_record([
        "proximal_time_s",
        "distal_time_s",
        "transit_time_s",
        "velocity_m_s",
        "accepted",
    ])?;
    for m in &result.matches {
        let velocity = result.path_length_m / m.transit_time;
        writer.write_record([
            format!("{:.4}", m.proximal_time),
            format!("{:.4}", m.distal_time),
            format!("{:.4}", m.transit_time),
            format!("{:.4}", velocity),
            (velocity < max_velocity).to_string(),
        ])?;
    }
    writer.flush()?;

    Ok((summary_path, matches_path))
}
