use crate::preprocessing::median;
use log::{debug, trace};
use rustfft::{num_complex::Complex, FftPlanner};
use std::f64::consts::PI;

/// Create a Hann window of the specified size
fn create_hann_window(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / size as f64).cos()))
        .collect()
}

/// Beat-to-beat intervals (seconds) from ascending peak times.
pub fn calc_rr(peak_times: &[f64]) -> Vec<f64> {
    peak_times.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Heart rate from brachial peak times.
///
/// Intervals outside `[min_interval, max_interval]` seconds are discarded
/// (missed or doubled beats); the rate is `60 / median` of the rest. Returns
/// `0.0` when no interval survives, meaning the rate could not be determined.
pub fn heart_rate_from_peaks(peak_times: &[f64], min_interval: f64, max_interval: f64) -> f64 {
    let rr_list = calc_rr(peak_times);
    let valid_rr: Vec<f64> = rr_list
        .iter()
        .copied()
        .filter(|rr| (min_interval..=max_interval).contains(rr))
        .collect();

    debug!(
        "Heart rate: {}/{} intervals within {:.2}-{:.2} s",
        valid_rr.len(),
        rr_list.len(),
        min_interval,
        max_interval
    );

    match median(&valid_rr) {
        Some(rr) if rr > 0.0 => 60.0 / rr,
        _ => 0.0,
    }
}

/// Heart rate from the dominant spectral line of a conditioned pulse signal.
///
/// Used as a cross-check of the peak-based estimate. Only bins between
/// `min_bpm` and `max_bpm` are considered; `None` when the signal is too short
/// to resolve that band or carries no power.
pub fn spectral_heart_rate(signal: &[f64], sample_rate: f64, min_bpm: f64, max_bpm: f64) -> Option<f64> {
    if signal.len() < 4 || sample_rate <= 0.0 {
        return None;
    }

    // Apply Hann window
    let window = create_hann_window(signal.len());
    let mut buffer: Vec<Complex<f64>> = signal
        .iter()
        .zip(window.iter())
        .map(|(&s, &w)| Complex::new(s * w, 0.0))
        .collect();

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(signal.len());
    fft.process(&mut buffer);

    let freq_resolution = sample_rate / signal.len() as f64;
    let nyquist_bin = signal.len() / 2;
    let min_bin = ((min_bpm / 60.0) / freq_resolution).ceil().max(1.0) as usize;
    let max_bin = (((max_bpm / 60.0) / freq_resolution).floor() as usize).min(nyquist_bin);

    if min_bin > max_bin {
        trace!(
            "Spectral resolution {:.3} Hz too coarse for {}-{} bpm",
            freq_resolution,
            min_bpm,
            max_bpm
        );
        return None;
    }

    let (peak_bin, peak_power) = (min_bin..=max_bin)
        .map(|bin| (bin, buffer[bin].norm_sqr()))
        .max_by(|a, b| a.1.total_cmp(&b.1))?;

    if !(peak_power > 0.0) {
        return None;
    }

    Some(peak_bin as f64 * freq_resolution * 60.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heart_rate_uses_median_interval() {
        // Intervals 0.8, 0.82, 0.79
        let peaks = [0.0, 0.8, 1.62, 2.41];
        let bpm = heart_rate_from_peaks(&peaks, 0.6, 1.0);
        assert!((bpm - 75.0).abs() < 1e-6);
    }

    #[test]
    fn test_long_interval_excluded() {
        // Intervals 0.8, 0.82, 1.5, 0.79; the 1.5 s gap is a missed beat
        let peaks = [0.0, 0.8, 1.62, 3.12, 3.91];
        let bpm = heart_rate_from_peaks(&peaks, 0.6, 1.0);
        assert!((bpm - 75.0).abs() < 1e-6);
    }

    #[test]
    fn test_no_valid_interval_gives_zero() {
        assert_eq!(heart_rate_from_peaks(&[], 0.6, 1.0), 0.0);
        assert_eq!(heart_rate_from_peaks(&[1.0], 0.6, 1.0), 0.0);
        assert_eq!(heart_rate_from_peaks(&[0.0, 1.5, 3.0], 0.6, 1.0), 0.0);
    }

    #[test]
    fn test_spectral_heart_rate_finds_pulse_frequency() {
        let sample_rate = 50.0;
        // 1.25 Hz = 75 bpm, 20 s of signal gives 0.05 Hz bins
        let signal: Vec<f64> = (0..1000)
            .map(|i| (2.0 * PI * 1.25 * i as f64 / sample_rate).sin())
            .collect();

        let bpm = spectral_heart_rate(&signal, sample_rate, 40.0, 180.0).unwrap();
        assert!((bpm - 75.0).abs() < 3.1);
    }

    #[test]
    fn test_spectral_heart_rate_degenerate_input() {
        assert!(spectral_heart_rate(&[], 50.0, 40.0, 180.0).is_none());
        assert!(spectral_heart_rate(&[0.0; 256], 50.0, 40.0, 180.0).is_none());
        // Four samples at 50 Hz resolve only 12.5 Hz bins
        assert!(spectral_heart_rate(&[1.0, 0.0, -1.0, 0.0], 50.0, 40.0, 180.0).is_none());
    }
}
