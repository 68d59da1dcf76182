use serde::{Deserialize, Serialize};

/// Empirical CAVI calibration, `CAVI = scale * ln(sys/dia) * vop^2 / (sys - dia) + offset`.
///
/// The defaults are the values commonly quoted for VaSera-type devices
/// (pressures in mmHg, velocity in m/s). They still need checking against an
/// authoritative source before clinical use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaviCalibration {
    pub scale: f64,
    pub offset: f64,
}

impl Default for CaviCalibration {
    fn default() -> Self {
        Self {
            scale: 0.234,
            offset: 4.93,
        }
    }
}

impl CaviCalibration {
    /// `None` when the index is undefined: non-positive pulse pressure,
    /// non-positive pressures, or non-finite inputs.
    pub fn cavi(&self, vop: f64, systolic: f64, diastolic: f64) -> Option<f64> {
        if !(vop.is_finite() && systolic.is_finite() && diastolic.is_finite()) {
            return None;
        }
        if systolic <= 0.0 || diastolic <= 0.0 || systolic <= diastolic {
            return None;
        }

        let value =
            self.scale * (systolic / diastolic).ln() * vop.powi(2) / (systolic - diastolic) + self.offset;
        value.is_finite().then_some(value)
    }
}

/// CAVI with the default calibration.
pub fn cavi(vop: f64, systolic: f64, diastolic: f64) -> Option<f64> {
    CaviCalibration::default().cavi(vop, systolic, diastolic)
}
