pub mod cavi;
pub mod config;
pub mod data_loading;
pub mod heart_analysis;
pub mod output;
pub mod peak_matching;
pub mod preprocessing;
pub mod reference;
pub mod sample_buffer;
pub mod session;
pub mod vop;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Full-scale code of the device's 12-bit ADC
pub const ADC_MAX: f64 = 4095.0;
/// ADC reference voltage
pub const ADC_VREF: f64 = 3.3;

/// Convert a raw ADC code to volts.
pub fn adc_to_volts(code: u16) -> f64 {
    code as f64 / ADC_MAX * ADC_VREF
}

/// One synchronous reading of both sensor sites.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Device-relative milliseconds
    pub timestamp_ms: f64,
    /// Brachial (proximal) channel, volts
    pub proximal: f64,
    /// Tibial (distal) channel, volts
    pub distal: f64,
}

impl Sample {
    pub fn new(timestamp_ms: f64, proximal: f64, distal: f64) -> Self {
        Self {
            timestamp_ms,
            proximal,
            distal,
        }
    }
}

/// Parallel arrays over a waveform, times in seconds from the first sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelArrays {
    pub times_s: Vec<f64>,
    pub proximal: Vec<f64>,
    pub distal: Vec<f64>,
}

impl ChannelArrays {
    pub fn from_samples(samples: &[Sample]) -> Self {
        let t0 = samples.first().map(|s| s.timestamp_ms).unwrap_or(0.0);
        Self {
            times_s: samples.iter().map(|s| (s.timestamp_ms - t0) / 1000.0).collect(),
            proximal: samples.iter().map(|s| s.proximal).collect(),
            distal: samples.iter().map(|s| s.distal).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.times_s.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times_s.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProfileError {
    #[error("invalid subject profile: {}", .0.join("; "))]
    OutOfRange(Vec<String>),
}

/// Anthropometric and blood-pressure inputs for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectProfile {
    pub height_cm: f64,
    pub age_years: u32,
    pub systolic_mmhg: f64,
    pub diastolic_mmhg: f64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub observation: Option<String>,
}

impl SubjectProfile {
    pub fn new(height_cm: f64, age_years: u32, systolic_mmhg: f64, diastolic_mmhg: f64) -> Self {
        Self {
            height_cm,
            age_years,
            systolic_mmhg,
            diastolic_mmhg,
            name: None,
            observation: None,
        }
    }

    /// Check the entry ranges accepted by the measurement form.
    pub fn validate(&self) -> Result<(), ProfileError> {
        let mut problems = Vec::new();

        if !(60.0..=250.0).contains(&self.height_cm) {
            problems.push(format!("height {} cm outside 60-250 cm", self.height_cm));
        }
        if !(5..=70).contains(&self.age_years) {
            problems.push(format!("age {} outside 5-70 years", self.age_years));
        }
        if !(70.0..=250.0).contains(&self.systolic_mmhg) {
            problems.push(format!(
                "systolic {} mmHg outside 70-250 mmHg",
                self.systolic_mmhg
            ));
        }
        if !(40.0..=150.0).contains(&self.diastolic_mmhg) {
            problems.push(format!(
                "diastolic {} mmHg outside 40-150 mmHg",
                self.diastolic_mmhg
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ProfileError::OutOfRange(problems))
        }
    }
}
