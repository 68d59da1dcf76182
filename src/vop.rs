use crate::peak_matching::PulseMatch;
use log::debug;
use serde::{Deserialize, Serialize};

/// A linear regression `slope * height_cm + intercept`, in centimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearRegression {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearRegression {
    /// Evaluated length in metres
    fn length_m(&self, height_cm: f64) -> f64 {
        (self.slope * height_cm + self.intercept) / 100.0
    }
}

/// Height-based estimates of the arterial segments between the two sensors.
///
/// Defaults follow the regressions used by cardio-ankle devices; they are
/// population proxies and should be reviewed before clinical use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnthropometricModel {
    /// Heart to brachial sensor
    pub heart_brachial: LinearRegression,
    /// Heart to femoral bifurcation
    pub heart_femoral: LinearRegression,
    /// Femoral to ankle
    pub femoral_ankle: LinearRegression,
}

impl Default for AnthropometricModel {
    fn default() -> Self {
        Self {
            heart_brachial: LinearRegression {
                slope: 0.220,
                intercept: -2.07,
            },
            heart_femoral: LinearRegression {
                slope: 0.564,
                intercept: -18.4,
            },
            femoral_ankle: LinearRegression {
                slope: 0.249,
                intercept: 30.7,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SegmentLengths {
    pub heart_brachial_m: f64,
    pub heart_femoral_m: f64,
    pub femoral_ankle_m: f64,
}

impl SegmentLengths {
    /// Distance travelled by the pulse to the ankle minus the distance to the arm.
    pub fn path_length_m(&self) -> f64 {
        self.femoral_ankle_m + self.heart_femoral_m - self.heart_brachial_m
    }
}

impl AnthropometricModel {
    pub fn segments(&self, height_cm: f64) -> SegmentLengths {
        SegmentLengths {
            heart_brachial_m: self.heart_brachial.length_m(height_cm),
            heart_femoral_m: self.heart_femoral.length_m(height_cm),
            femoral_ankle_m: self.femoral_ankle.length_m(height_cm),
        }
    }

    pub fn path_length_m(&self, height_cm: f64) -> f64 {
        self.segments(height_cm).path_length_m()
    }
}

/// Pulse wave velocities (m/s) for a set of transit times (s).
///
/// Velocities at or above `max_velocity` are dropped. The whole distribution
/// is returned so callers can aggregate robustly.
pub fn velocities(transit_times: &[f64], path_length_m: f64, max_velocity: f64) -> Vec<f64> {
    let candidates: Vec<f64> = transit_times
        .iter()
        .filter(|&&t| t > 0.0)
        .map(|&t| path_length_m / t)
        .collect();
    if candidates.len() < transit_times.len() {
        debug!(
            "Ignored {} non-positive transit times",
            transit_times.len() - candidates.len()
        );
    }

    let (accepted, too_fast): (Vec<f64>, Vec<f64>) =
        candidates.into_iter().partition(|&v| v < max_velocity);
    if !too_fast.is_empty() {
        debug!(
            "Rejected {} of {} velocities at or above {} m/s",
            too_fast.len(),
            too_fast.len() + accepted.len(),
            max_velocity
        );
    }

    accepted
}

/// Velocities for matched pulses given the subject height.
pub fn estimate_vop(
    matches: &[PulseMatch],
    height_cm: f64,
    model: &AnthropometricModel,
    max_velocity: f64,
) -> Vec<f64> {
    let transit_times: Vec<f64> = matches.iter().map(|m| m.transit_time).collect();
    velocities(&transit_times, model.path_length_m(height_cm), max_velocity)
}
