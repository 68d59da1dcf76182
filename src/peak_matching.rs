use crate::config::PeakConfig;
use crate::preprocessing::{normalize, FilteredWaveform};
use log::debug;
use serde::Serialize;

/// A local maximum of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Peak {
    pub index: usize,
    pub prominence: f64,
}

/// Peaks of one channel in ascending index order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PeakSet {
    pub peaks: Vec<Peak>,
}

impl PeakSet {
    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn indices(&self) -> Vec<usize> {
        self.peaks.iter().map(|p| p.index).collect()
    }

    /// Peak positions looked up in a time axis.
    pub fn times(&self, times_s: &[f64]) -> Vec<f64> {
        self.peaks
            .iter()
            .filter_map(|p| times_s.get(p.index).copied())
            .collect()
    }
}

/// A brachial pulse paired with the tibial pulse that followed it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PulseMatch {
    pub proximal_time: f64,
    pub distal_time: f64,
    pub transit_time: f64,
}

impl PulseMatch {
    pub fn new(proximal_time: f64, distal_time: f64) -> Self {
        Self {
            proximal_time,
            distal_time,
            transit_time: distal_time - proximal_time,
        }
    }
}

/// Local maxima, including flat tops (reported at their midpoint).
fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut maxima = Vec::new();
    if x.len() < 3 {
        return maxima;
    }

    let i_max = x.len() - 1;
    let mut i = 1;
    while i < i_max {
        if x[i - 1] < x[i] {
            // Skip over a plateau
            let mut i_ahead = i + 1;
            while i_ahead < i_max && x[i_ahead] == x[i] {
                i_ahead += 1;
            }

            if x[i_ahead] < x[i] {
                let left_edge = i;
                let right_edge = i_ahead - 1;
                maxima.push((left_edge + right_edge) / 2);
                i = i_ahead;
            }
        }
        i += 1;
    }

    maxima
}

/// Height of a peak above the higher of its two bases. Each base is the
/// lowest point between the peak and the nearest higher sample on that side
/// (or the signal edge).
fn prominence(x: &[f64], peak: usize) -> f64 {
    let height = x[peak];

    let mut left_min = height;
    let mut i = peak;
    while i > 0 && x[i - 1] <= height {
        i -= 1;
        left_min = left_min.min(x[i]);
    }

    let mut right_min = height;
    let mut i = peak;
    while i + 1 < x.len() && x[i + 1] <= height {
        i += 1;
        right_min = right_min.min(x[i]);
    }

    height - left_min.max(right_min)
}

/// Drop lower peaks that sit closer than `distance` samples to a higher one.
fn select_by_distance(x: &[f64], peaks: &[usize], distance: usize) -> Vec<usize> {
    if distance <= 1 || peaks.len() < 2 {
        return peaks.to_vec();
    }

    let mut keep = vec![true; peaks.len()];
    let mut priority: Vec<usize> = (0..peaks.len()).collect();
    priority.sort_by(|&a, &b| x[peaks[b]].total_cmp(&x[peaks[a]]));

    for &i in &priority {
        if !keep[i] {
            continue;
        }
        let mut j = i;
        while j > 0 && peaks[i] - peaks[j - 1] < distance {
            keep[j - 1] = false;
            j -= 1;
        }
        let mut j = i + 1;
        while j < peaks.len() && peaks[j] - peaks[i] < distance {
            keep[j] = false;
            j += 1;
        }
    }

    peaks
        .iter()
        .zip(keep)
        .filter(|(_, k)| *k)
        .map(|(&p, _)| p)
        .collect()
}

/// Find peaks with at least `min_prominence`, separated by `min_distance` samples.
pub fn find_peaks(x: &[f64], min_prominence: f64, min_distance: usize) -> PeakSet {
    let candidates = select_by_distance(x, &local_maxima(x), min_distance);

    let peaks = candidates
        .into_iter()
        .map(|index| Peak {
            index,
            prominence: prominence(x, index),
        })
        .filter(|p| p.prominence >= min_prominence)
        .collect();

    PeakSet { peaks }
}

/// Normalize a filtered channel and detect its pulse peaks.
pub fn detect_channel_peaks(filtered: &[f64], min_prominence: f64, min_distance: usize) -> PeakSet {
    find_peaks(&normalize(filtered), min_prominence, min_distance)
}

/// Pair every proximal peak with the nearest later distal peak and keep the
/// pairs whose transit time lies in `[min_transit, max_transit]`.
///
/// With an irregular rhythm the nearest later distal peak can belong to the
/// next beat; such pairs are only caught by the transit window.
pub fn match_pulses(
    proximal_times: &[f64],
    distal_times: &[f64],
    min_transit: f64,
    max_transit: f64,
) -> Vec<PulseMatch> {
    let mut matches = Vec::new();

    for &tp in proximal_times {
        let nearest = distal_times
            .iter()
            .copied()
            .filter(|&td| td - tp > 0.0)
            .min_by(|a, b| (a - tp).total_cmp(&(b - tp)));

        if let Some(td) = nearest {
            let candidate = PulseMatch::new(tp, td);
            if (min_transit..=max_transit).contains(&candidate.transit_time) {
                matches.push(candidate);
            }
        }
    }

    matches
}

/// Peaks of both channels plus the accepted matches.
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub proximal_peaks: PeakSet,
    pub distal_peaks: PeakSet,
    pub proximal_times: Vec<f64>,
    pub matches: Vec<PulseMatch>,
}

pub fn match_waveform(waveform: &FilteredWaveform, config: &PeakConfig) -> MatchOutcome {
    let proximal_peaks =
        detect_channel_peaks(&waveform.proximal, config.proximal_prominence, config.min_distance);
    let distal_peaks =
        detect_channel_peaks(&waveform.distal, config.distal_prominence, config.min_distance);

    let proximal_times = proximal_peaks.times(&waveform.times_s);
    let distal_times = distal_peaks.times(&waveform.times_s);

    let matches = match_pulses(
        &proximal_times,
        &distal_times,
        config.min_transit_s,
        config.max_transit_s,
    );

    debug!(
        "Peaks: {} proximal, {} distal -> {} matches",
        proximal_peaks.len(),
        distal_peaks.len(),
        matches.len()
    );

    MatchOutcome {
        proximal_peaks,
        distal_peaks,
        proximal_times,
        matches,
    }
}
