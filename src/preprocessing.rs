use crate::config::FilterConfig;
use crate::ChannelArrays;
use log::{debug, warn};
use sci_rs::signal::filter::design::{butter_dyn, DigitalFilter, FilterBandType, FilterOutputType, Sos};
use sci_rs::signal::filter::sosfiltfilt_dyn;
use std::f64::consts::PI;

/// Signals shorter than this are returned untouched by `notch`.
pub const NOTCH_MIN_LEN: usize = 15;

/// Filtered view of a waveform. Always derived from the full raw arrays,
/// never patched in place: the filters run forward and backward, so every
/// new sample can change every output value.
#[derive(Debug, Clone, Default)]
pub struct FilteredWaveform {
    pub times_s: Vec<f64>,
    pub proximal: Vec<f64>,
    pub distal: Vec<f64>,
}

impl FilteredWaveform {
    pub fn len(&self) -> usize {
        self.times_s.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times_s.is_empty()
    }

    /// Samples whose time offset lies in `[start_s, start_s + duration_s]`.
    pub fn window(&self, start_s: f64, duration_s: f64) -> FilteredWaveform {
        let end_s = start_s + duration_s;
        let lo = self.times_s.partition_point(|&t| t < start_s);
        let hi = self.times_s.partition_point(|&t| t <= end_s).max(lo);
        FilteredWaveform {
            times_s: self.times_s[lo..hi].to_vec(),
            proximal: self.proximal[lo..hi].to_vec(),
            distal: self.distal[lo..hi].to_vec(),
        }
    }
}

/// Design notch or peak digital filter.
///
/// Parameters:
/// - w0: Frequency to remove from the signal, in the same units as fs.
/// - q: Quality factor, q = w0/bw where bw is the -3 dB bandwidth.
/// - ftype: The type of IIR filter to design ("notch" or "peak")
/// - fs: The sampling frequency of the digital system
///
/// Returns `None` when w0 does not lie strictly between 0 and Nyquist.
fn design_notch_peak_filter(w0: f64, q: f64, ftype: &str, fs: f64) -> Option<(Vec<f64>, Vec<f64>)> {
    if fs <= 0.0 || q <= 0.0 {
        return None;
    }

    // Normalize to Nyquist
    let w0 = 2.0 * w0 / fs;
    if !(w0 > 0.0 && w0 < 1.0) {
        return None;
    }

    let bw = w0 / q * PI;
    let w0 = w0 * PI;

    let beta = (bw / 2.0).tan();
    let gain = 1.0 / (1.0 + beta);

    let b = match ftype {
        "notch" => [1.0, -2.0 * w0.cos(), 1.0].iter().map(|x| x * gain).collect(),
        "peak" => [1.0, 0.0, -1.0].iter().map(|x| x * (1.0 - gain)).collect(),
        _ => return None,
    };
    let a = vec![1.0, -2.0 * gain * w0.cos(), 2.0 * gain - 1.0];

    Some((b, a))
}

/// Convert second-order transfer function coefficients to a single section
fn tf2sos(b: &[f64], a: &[f64]) -> Vec<Sos<f64>> {
    vec![Sos::new(
        [b[0] / a[0], b[1] / a[0], b[2] / a[0]],
        [1.0, a[1] / a[0], a[2] / a[0]],
    )]
}

/// Zero-phase removal of mains interference.
pub fn notch(signal: &[f64], line_freq: f64, quality: f64, sample_rate: f64) -> Vec<f64> {
    if signal.len() < NOTCH_MIN_LEN {
        return signal.to_vec();
    }

    let Some((b, a)) = design_notch_peak_filter(line_freq, quality, "notch", sample_rate) else {
        warn!(
            "Skipping notch: {} Hz is not below Nyquist for a {} Hz stream",
            line_freq, sample_rate
        );
        return signal.to_vec();
    };

    sosfiltfilt_dyn(signal.iter(), &tf2sos(&b, &a))
}

fn butterworth(
    signal: &[f64],
    cutoff: f64,
    order: usize,
    sample_rate: f64,
    band: FilterBandType,
) -> Vec<f64> {
    if order == 0 || signal.len() < order + 1 {
        return signal.to_vec();
    }

    let nyquist = 0.5 * sample_rate;
    if !(cutoff > 0.0 && cutoff < nyquist) {
        warn!(
            "Skipping Butterworth filter: cutoff {} Hz outside (0, {}) Hz",
            cutoff, nyquist
        );
        return signal.to_vec();
    }

    let filter = butter_dyn(
        order,
        vec![cutoff],
        Some(band),
        Some(false),
        Some(FilterOutputType::Sos),
        Some(sample_rate),
    );
    let DigitalFilter::Sos(sos) = filter else {
        warn!("Butterworth design did not return second-order sections");
        return signal.to_vec();
    };

    // Forward-backward needs more samples than the odd extension on each side.
    let padlen = 3 * (order + 1).max(2 * sos.sos.len() + 1);
    if signal.len() <= padlen {
        debug!(
            "Signal of {} samples too short to filter (pad length {})",
            signal.len(),
            padlen
        );
        return signal.to_vec();
    }

    sosfiltfilt_dyn(signal.iter(), &sos.sos)
}

pub fn lowpass(signal: &[f64], cutoff: f64, order: usize, sample_rate: f64) -> Vec<f64> {
    butterworth(signal, cutoff, order, sample_rate, FilterBandType::Lowpass)
}

pub fn highpass(signal: &[f64], cutoff: f64, order: usize, sample_rate: f64) -> Vec<f64> {
    butterworth(signal, cutoff, order, sample_rate, FilterBandType::Highpass)
}

/// `lowpass(highpass(notch(raw)))`, with the notch stage optional.
pub fn condition(signal: &[f64], config: &FilterConfig, sample_rate: f64, apply_notch: bool) -> Vec<f64> {
    let notched = if apply_notch {
        notch(signal, config.line_freq_hz, config.notch_quality, sample_rate)
    } else {
        signal.to_vec()
    };
    let high = highpass(&notched, config.highpass_cutoff_hz, config.order, sample_rate);
    lowpass(&high, config.lowpass_cutoff_hz, config.order, sample_rate)
}

/// Apply `condition` to both channels.
pub fn condition_channels(
    arrays: &ChannelArrays,
    config: &FilterConfig,
    sample_rate: f64,
    apply_notch: bool,
) -> FilteredWaveform {
    debug!(
        "Conditioning {} samples at {} Hz (notch: {})",
        arrays.len(),
        sample_rate,
        apply_notch
    );
    FilteredWaveform {
        times_s: arrays.times_s.clone(),
        proximal: condition(&arrays.proximal, config, sample_rate, apply_notch),
        distal: condition(&arrays.distal, config, sample_rate, apply_notch),
    }
}

pub fn mean_std(data: &[f64]) -> (f64, f64) {
    let n = data.len() as f64;
    if n == 0.0 {
        return (0.0, 0.0);
    }

    let mean = data.iter().sum::<f64>() / n;
    let variance = data
        .iter()
        .map(|&x| {
            let diff = x - mean;
            diff * diff
        })
        .sum::<f64>()
        / n;

    (mean, variance.sqrt())
}

/// Z-score normalization (population standard deviation). A flat or empty
/// signal normalizes to zeros.
pub fn normalize(signal: &[f64]) -> Vec<f64> {
    let (mean, std) = mean_std(signal);
    if !(std > 0.0) || !std.is_finite() {
        return vec![0.0; signal.len()];
    }
    signal.iter().map(|&x| (x - mean) / std).collect()
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, sample_rate: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / sample_rate).sin())
            .collect()
    }

    fn rms(data: &[f64]) -> f64 {
        (data.iter().map(|x| x * x).sum::<f64>() / data.len() as f64).sqrt()
    }

    #[test]
    fn test_short_signals_pass_through() {
        let short: Vec<f64> = (0..NOTCH_MIN_LEN - 1).map(|i| i as f64 * 0.3).collect();
        assert_eq!(notch(&short, 50.0, 30.0, 200.0), short);

        let tiny = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(lowpass(&tiny, 16.0, 4, 50.0), tiny);
        assert_eq!(highpass(&tiny, 0.5, 4, 50.0), tiny);

        // Longer than order + 1 but not longer than the pad length
        let padded: Vec<f64> = (0..15).map(|i| (i as f64).sin()).collect();
        assert_eq!(lowpass(&padded, 16.0, 4, 50.0), padded);
        assert_eq!(highpass(&padded, 0.5, 4, 50.0), padded);
    }

    #[test]
    fn test_invalid_frequencies_pass_through() {
        let signal = sine(1.0, 50.0, 200);
        // 50 Hz mains cannot be notched out of a 50 Hz stream
        assert_eq!(notch(&signal, 50.0, 30.0, 50.0), signal);
        assert_eq!(lowpass(&signal, 30.0, 4, 50.0), signal);
    }

    #[test]
    fn test_filters_are_deterministic() {
        let signal: Vec<f64> = (0..500)
            .map(|i| (i as f64 * 0.07).sin() + 0.3 * (i as f64 * 1.9).cos())
            .collect();
        let config = FilterConfig::default();

        let first = condition(&signal, &config, 200.0, true);
        let second = condition(&signal, &config, 200.0, true);
        assert_eq!(first, second);
        assert_eq!(first.len(), signal.len());
    }

    #[test]
    fn test_notch_attenuates_mains() {
        let mains = sine(50.0, 200.0, 2000);
        let filtered = notch(&mains, 50.0, 30.0, 200.0);
        let inner = &filtered[400..1600];
        assert!(rms(inner) < 0.1 * rms(&mains[400..1600]));
    }

    #[test]
    fn test_lowpass_keeps_pulse_band() {
        let pulse = sine(1.0, 50.0, 1000);
        let noise = sine(22.0, 50.0, 1000);
        let mixed: Vec<f64> = pulse.iter().zip(&noise).map(|(p, n)| p + n).collect();

        let filtered = lowpass(&mixed, 16.0, 4, 50.0);
        let residual: Vec<f64> = filtered[200..800]
            .iter()
            .zip(&pulse[200..800])
            .map(|(f, p)| f - p)
            .collect();
        assert!(rms(&residual) < 0.1);
    }

    #[test]
    fn test_highpass_removes_offset() {
        let signal: Vec<f64> = sine(1.2, 50.0, 1000).iter().map(|x| x + 1.65).collect();
        let filtered = highpass(&signal, 0.5, 4, 50.0);
        let (mean, _) = mean_std(&filtered[200..800]);
        assert!(mean.abs() < 0.05);
    }

    #[test]
    fn test_normalize_flat_signal() {
        assert_eq!(normalize(&[2.0, 2.0, 2.0]), vec![0.0, 0.0, 0.0]);
        assert!(normalize(&[]).is_empty());

        let z = normalize(&[1.0, 2.0, 3.0]);
        let (mean, std) = mean_std(&z);
        assert!(mean.abs() < 1e-12);
        assert!((std - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[0.8, 0.82, 0.79]), Some(0.8));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
    }

    #[test]
    fn test_filtered_window() {
        let waveform = FilteredWaveform {
            times_s: vec![0.0, 1.0, 2.0, 3.0],
            proximal: vec![0.0, 1.0, 2.0, 3.0],
            distal: vec![3.0, 2.0, 1.0, 0.0],
        };
        let window = waveform.window(1.0, 1.0);
        assert_eq!(window.times_s, vec![1.0, 2.0]);
        assert_eq!(window.distal, vec![2.0, 1.0]);
        assert!(waveform.window(10.0, 5.0).is_empty());
    }
}
