use crate::session::SessionResult;
use crate::SubjectProfile;
use serde::Serialize;
use std::fmt;

/// Expected pulse wave velocity for an age group, m/s.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AgeReference {
    pub label: &'static str,
    pub min_age: u32,
    pub max_age: u32,
    pub min_vop: f64,
    pub max_vop: f64,
}

impl AgeReference {
    pub fn midpoint(&self) -> f64 {
        (self.min_vop + self.max_vop) / 2.0
    }

    pub fn contains(&self, vop: f64) -> bool {
        (self.min_vop..=self.max_vop).contains(&vop)
    }
}

pub const AGE_REFERENCES: [AgeReference; 5] = [
    AgeReference { label: "<30", min_age: 0, max_age: 29, min_vop: 4.7, max_vop: 7.6 },
    AgeReference { label: "30-39", min_age: 30, max_age: 39, min_vop: 3.8, max_vop: 9.2 },
    AgeReference { label: "40-49", min_age: 40, max_age: 49, min_vop: 4.6, max_vop: 9.8 },
    AgeReference { label: "50-59", min_age: 50, max_age: 59, min_vop: 4.5, max_vop: 12.1 },
    AgeReference { label: "60-69", min_age: 60, max_age: 69, min_vop: 5.5, max_vop: 15.0 },
];

/// `None` from 70 years on, where no reference is tabulated.
pub fn reference_for_age(age_years: u32) -> Option<&'static AgeReference> {
    AGE_REFERENCES
        .iter()
        .find(|r| (r.min_age..=r.max_age).contains(&age_years))
}

/// Signed deviation from the group midpoint, percent.
pub fn deviation_percent(vop: f64, reference: &AgeReference) -> f64 {
    let mid = reference.midpoint();
    (vop - mid) / mid * 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VopInterpretation {
    WellBelow,
    SlightlyBelow,
    WithinExpected,
    SlightlyAbove,
    WellAbove,
}

impl fmt::Display for VopInterpretation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            VopInterpretation::WellBelow => "well below the expected range",
            VopInterpretation::SlightlyBelow => "slightly below the expected value",
            VopInterpretation::WithinExpected => "within the expected value",
            VopInterpretation::SlightlyAbove => "slightly above the expected value",
            VopInterpretation::WellAbove => "well above the expected range",
        };
        f.write_str(text)
    }
}

pub fn interpret(vop: f64, reference: &AgeReference) -> VopInterpretation {
    if vop < reference.min_vop {
        VopInterpretation::WellBelow
    } else if vop > reference.max_vop {
        VopInterpretation::WellAbove
    } else if deviation_percent(vop, reference).abs() <= 10.0 {
        VopInterpretation::WithinExpected
    } else if vop < reference.midpoint() {
        VopInterpretation::SlightlyBelow
    } else {
        VopInterpretation::SlightlyAbove
    }
}

/// Session outcome placed against the subject's age group.
#[derive(Debug, Clone, Serialize)]
pub struct ReferenceReport {
    pub age_group: Option<&'static str>,
    pub expected_min_vop: Option<f64>,
    pub expected_max_vop: Option<f64>,
    pub deviation_percent: Option<f64>,
    pub interpretation: Option<VopInterpretation>,
}

impl ReferenceReport {
    pub fn build(profile: &SubjectProfile, result: &SessionResult) -> Self {
        let reference = reference_for_age(profile.age_years);
        let compared = reference.zip(result.vop_median);

        Self {
            age_group: reference.map(|r| r.label),
            expected_min_vop: reference.map(|r| r.min_vop),
            expected_max_vop: reference.map(|r| r.max_vop),
            deviation_percent: compared.map(|(r, vop)| deviation_percent(vop, r)),
            interpretation: compared.map(|(r, vop)| interpret(vop, r)),
        }
    }
}
