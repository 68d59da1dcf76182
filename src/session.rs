//! Measurement lifecycle.
//!
//! `SessionController` is the only owner of mutable session state. A session
//! moves `Idle -> Acquiring -> Processing -> Complete` for live measurements,
//! or `Idle -> Processing -> Complete` when a logged file is replayed. Any
//! state can return to `Idle` through `reset`.

use crate::config::AnalysisConfig;
use crate::heart_analysis::{heart_rate_from_peaks, spectral_heart_rate};
use crate::peak_matching::{match_waveform, PulseMatch};
use crate::preprocessing::{condition_channels, lowpass, median, notch, FilteredWaveform};
use crate::sample_buffer::{OutOfOrderError, SampleBuffer};
use crate::vop::estimate_vop;
use crate::{ChannelArrays, Sample, SubjectProfile};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Samples required before the live preview is filtered.
pub const PREVIEW_MIN_SAMPLES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Acquiring,
    Processing,
    Complete,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Acquiring => "acquiring",
            SessionState::Processing => "processing",
            SessionState::Complete => "complete",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        state: SessionState,
        action: &'static str,
    },
    #[error(transparent)]
    OutOfOrder(#[from] OutOfOrderError),
}

/// Commands sent to the acquisition device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TransportCommand {
    StartMeasurement { duration: u32 },
    StopMeasurement,
}

/// Where the samples of a session came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleSource {
    Live,
    Replay,
}

/// Outcome of one processed session. Never modified after creation.
#[derive(Debug, Clone, Serialize)]
pub struct SessionResult {
    /// Accepted pulse wave velocities, m/s
    pub vop_samples: Vec<f64>,
    /// `None` when no pulse could be matched
    pub vop_median: Option<f64>,
    /// `0.0` when the rate could not be determined
    pub heart_rate_bpm: f64,
    /// `None` when undefined for the given pressures or without a VOP
    pub cavi: Option<f64>,
    pub matches: Vec<PulseMatch>,
    pub proximal_peak_count: usize,
    pub distal_peak_count: usize,
    pub sample_count: usize,
    pub sample_rate_hz: f64,
    pub path_length_m: f64,
    pub spectral_heart_rate_bpm: Option<f64>,
    pub source: SampleSource,
    pub completed_at: DateTime<Utc>,
}

impl SessionResult {
    pub fn has_vop(&self) -> bool {
        self.vop_median.is_some()
    }
}

/// Run the full pipeline over a frozen waveform.
///
/// Short or empty input is not an error: the filters pass it through and the
/// result simply carries no velocities, a zero heart rate and no CAVI.
pub fn analyze_waveform(
    arrays: &ChannelArrays,
    profile: &SubjectProfile,
    config: &AnalysisConfig,
    sample_rate: f64,
    apply_notch: bool,
    source: SampleSource,
) -> SessionResult {
    let filtered = condition_channels(arrays, &config.filter, sample_rate, apply_notch);
    let outcome = match_waveform(&filtered, &config.peaks);

    let path_length_m = config.anthropometric.path_length_m(profile.height_cm);
    let vop_samples = estimate_vop(
        &outcome.matches,
        profile.height_cm,
        &config.anthropometric,
        config.max_velocity_m_s,
    );
    let vop_median = median(&vop_samples);

    let heart_rate_bpm = heart_rate_from_peaks(
        &outcome.proximal_times,
        config.min_beat_interval_s,
        config.max_beat_interval_s,
    );
    let spectral_heart_rate_bpm = spectral_heart_rate(&filtered.proximal, sample_rate, 40.0, 180.0);

    let cavi = vop_median.and_then(|vop| {
        config
            .cavi
            .cavi(vop, profile.systolic_mmhg, profile.diastolic_mmhg)
    });

    match vop_median {
        Some(vop) => info!(
            "VOP {:.2} m/s from {} velocities, HR {:.0} bpm, CAVI {}",
            vop,
            vop_samples.len(),
            heart_rate_bpm,
            cavi.map(|c| format!("{:.2}", c)).unwrap_or_else(|| "N/A".to_string())
        ),
        None => warn!(
            "No valid pulse matches in {} samples; VOP unavailable",
            arrays.len()
        ),
    }

    SessionResult {
        vop_samples,
        vop_median,
        heart_rate_bpm,
        cavi,
        matches: outcome.matches,
        proximal_peak_count: outcome.proximal_peaks.len(),
        distal_peak_count: outcome.distal_peaks.len(),
        sample_count: arrays.len(),
        sample_rate_hz: sample_rate,
        path_length_m,
        spectral_heart_rate_bpm,
        source,
        completed_at: Utc::now(),
    }
}

pub struct SessionController {
    config: AnalysisConfig,
    state: SessionState,
    profile: Option<SubjectProfile>,
    buffer: SampleBuffer,
    source: SampleSource,
    requested_duration_s: Option<u32>,
    /// Device time of the first sample of the current acquisition
    acquisition_start_ms: Option<f64>,
    result: Option<SessionResult>,
}

impl SessionController {
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            buffer: SampleBuffer::with_retention(config.retention_ms),
            config,
            state: SessionState::Idle,
            profile: None,
            source: SampleSource::Replay,
            requested_duration_s: None,
            acquisition_start_ms: None,
            result: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn profile(&self) -> Option<&SubjectProfile> {
        self.profile.as_ref()
    }

    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    pub fn result(&self) -> Option<&SessionResult> {
        self.result.as_ref()
    }

    fn invalid(&self, action: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            state: self.state,
            action,
        }
    }

    /// Sessions may only begin from `Idle` or after a completed one.
    fn begin(
        &mut self,
        profile: SubjectProfile,
        source: SampleSource,
        action: &'static str,
    ) -> Result<(), SessionError> {
        if !matches!(self.state, SessionState::Idle | SessionState::Complete) {
            return Err(self.invalid(action));
        }
        let retention_ms = match source {
            SampleSource::Live => self.config.retention_ms,
            SampleSource::Replay => None,
        };
        self.buffer = SampleBuffer::with_retention(retention_ms);
        self.acquisition_start_ms = None;
        self.result = None;
        self.profile = Some(profile);
        self.source = source;
        Ok(())
    }

    /// Open a new live measurement and return the command for the device.
    pub fn start_acquisition(
        &mut self,
        profile: SubjectProfile,
        duration_s: u32,
    ) -> Result<TransportCommand, SessionError> {
        self.begin(profile, SampleSource::Live, "start acquisition")?;
        self.requested_duration_s = Some(duration_s);
        self.state = SessionState::Acquiring;
        info!("Acquisition started for {} s", duration_s);
        Ok(TransportCommand::StartMeasurement {
            duration: duration_s,
        })
    }

    pub fn push_sample(&mut self, sample: Sample) -> Result<(), SessionError> {
        if self.state != SessionState::Acquiring {
            return Err(self.invalid("append samples"));
        }
        self.buffer.append(sample)?;
        self.acquisition_start_ms.get_or_insert(sample.timestamp_ms);
        Ok(())
    }

    /// Whether the device clock has covered the requested duration since the
    /// first sample of this acquisition. Independent of the retention horizon.
    pub fn duration_elapsed(&self) -> bool {
        if self.state != SessionState::Acquiring {
            return false;
        }
        match (
            self.requested_duration_s,
            self.acquisition_start_ms,
            self.buffer.last_timestamp(),
        ) {
            (Some(duration), Some(start), Some(last)) => last - start >= duration as f64 * 1000.0,
            _ => false,
        }
    }

    /// End acquisition (duration reached, external stop or end of input)
    /// and freeze the waveform.
    pub fn stop_acquisition(&mut self) -> Result<TransportCommand, SessionError> {
        if self.state != SessionState::Acquiring {
            return Err(self.invalid("stop acquisition"));
        }
        self.state = SessionState::Processing;
        info!(
            "Acquisition stopped with {} samples over {:.1} s",
            self.buffer.len(),
            self.buffer.duration_ms() / 1000.0
        );
        Ok(TransportCommand::StopMeasurement)
    }

    /// Load a whole recording at once, skipping acquisition.
    ///
    /// Samples that go back in time are rejected and returned; the rest of
    /// the recording is kept.
    pub fn load_replay(
        &mut self,
        profile: SubjectProfile,
        samples: impl IntoIterator<Item = Sample>,
    ) -> Result<Vec<OutOfOrderError>, SessionError> {
        self.begin(profile, SampleSource::Replay, "load a replay")?;
        self.requested_duration_s = None;

        let mut rejected = Vec::new();
        for sample in samples {
            if let Err(err) = self.buffer.append(sample) {
                debug!("Rejected replay sample: {}", err);
                rejected.push(err);
            }
        }
        if !rejected.is_empty() {
            warn!("Rejected {} out-of-order samples", rejected.len());
        }

        self.state = SessionState::Processing;
        Ok(rejected)
    }

    fn sample_rate(&self) -> f64 {
        let configured = match self.source {
            SampleSource::Live => self.config.live_sample_rate_hz,
            SampleSource::Replay => self.config.replay_sample_rate_hz,
        };
        if let Some(estimated) = self.buffer.estimated_sample_rate() {
            if (estimated - configured).abs() > 0.2 * configured {
                warn!(
                    "Timestamps suggest {:.1} Hz but {:.1} Hz is configured",
                    estimated, configured
                );
            }
        }
        configured
    }

    /// Filter, match and estimate over the frozen waveform.
    pub fn process(&mut self) -> Result<&SessionResult, SessionError> {
        if self.state != SessionState::Processing {
            return Err(self.invalid("process"));
        }
        let Some(profile) = self.profile.as_ref() else {
            return Err(self.invalid("process without a subject profile"));
        };

        let apply_notch = match self.source {
            SampleSource::Live => true,
            SampleSource::Replay => self.config.notch_on_replay,
        };
        let result = analyze_waveform(
            &self.buffer.as_arrays(),
            profile,
            &self.config,
            self.sample_rate(),
            apply_notch,
            self.source,
        );

        self.state = SessionState::Complete;
        Ok(&*self.result.insert(result))
    }

    /// Live display: notch and low-pass the whole buffer, then return the
    /// trailing `window_s` seconds.
    ///
    /// The whole buffer is refiltered on every call; zero-phase filters cannot
    /// be updated incrementally. Returns `None` outside acquisition or before
    /// `PREVIEW_MIN_SAMPLES` samples have arrived.
    pub fn preview(&self, window_s: f64) -> Option<FilteredWaveform> {
        if self.state != SessionState::Acquiring || self.buffer.len() < PREVIEW_MIN_SAMPLES {
            return None;
        }

        let arrays = self.buffer.as_arrays();
        let filter = &self.config.filter;
        let rate = self.config.live_sample_rate_hz;
        let condition = |channel: &[f64]| {
            let notched = notch(channel, filter.line_freq_hz, filter.notch_quality, rate);
            lowpass(&notched, filter.preview_lowpass_cutoff_hz, filter.order, rate)
        };

        let filtered = FilteredWaveform {
            proximal: condition(&arrays.proximal),
            distal: condition(&arrays.distal),
            times_s: arrays.times_s,
        };
        let end = filtered.times_s.last().copied().unwrap_or(0.0);
        let start = (end - window_s).max(0.0);
        Some(filtered.window(start, end - start))
    }

    /// Drop everything and return to `Idle`.
    pub fn reset(&mut self) {
        self.buffer = SampleBuffer::with_retention(self.config.retention_ms);
        self.profile = None;
        self.result = None;
        self.requested_duration_s = None;
        self.acquisition_start_ms = None;
        self.state = SessionState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> SubjectProfile {
        SubjectProfile::new(170.0, 40, 120.0, 80.0)
    }

    /// Gaussian pulses at `rate_hz` on both channels, distal delayed by `delay_s`.
    fn pulse_train(duration_s: f64, sample_rate: f64, rate_hz: f64, delay_s: f64) -> Vec<Sample> {
        let n = (duration_s * sample_rate) as usize;
        let period = 1.0 / rate_hz;
        let pulse = |t: f64| {
            let phase = t.rem_euclid(period) - 0.3 * period;
            (-phase * phase / (2.0 * 0.05 * 0.05)).exp()
        };
        (0..n)
            .map(|i| {
                let t = i as f64 / sample_rate;
                Sample::new(
                    1_000.0 + t * 1000.0,
                    1.2 + 0.5 * pulse(t),
                    1.0 + 0.3 * pulse(t - delay_s),
                )
            })
            .collect()
    }

    #[test]
    fn test_command_serialization() {
        let start = serde_json::to_string(&TransportCommand::StartMeasurement { duration: 35 }).unwrap();
        assert_eq!(start, r#"{"action":"start_measurement","duration":35}"#);
        let stop = serde_json::to_string(&TransportCommand::StopMeasurement).unwrap();
        assert_eq!(stop, r#"{"action":"stop_measurement"}"#);
    }

    #[test]
    fn test_live_lifecycle() {
        let mut session = SessionController::new(AnalysisConfig::default());
        assert_eq!(session.state(), SessionState::Idle);

        let command = session.start_acquisition(profile(), 10).unwrap();
        assert_eq!(command, TransportCommand::StartMeasurement { duration: 10 });
        assert_eq!(session.state(), SessionState::Acquiring);

        for sample in pulse_train(10.0, 200.0, 1.2, 0.2) {
            session.push_sample(sample).unwrap();
        }
        assert!(!session.duration_elapsed());
        session.push_sample(Sample::new(11_000.0, 1.2, 1.0)).unwrap();
        assert!(session.duration_elapsed());

        assert_eq!(session.stop_acquisition().unwrap(), TransportCommand::StopMeasurement);
        assert_eq!(session.state(), SessionState::Processing);

        let result = session.process().unwrap();
        assert_eq!(result.source, SampleSource::Live);
        assert_eq!(result.sample_count, 2001);
        assert!(result.has_vop());
        assert_eq!(session.state(), SessionState::Complete);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut session = SessionController::new(AnalysisConfig::default());

        assert!(matches!(
            session.push_sample(Sample::new(0.0, 0.0, 0.0)),
            Err(SessionError::InvalidTransition { .. })
        ));
        assert!(session.stop_acquisition().is_err());
        assert!(session.process().is_err());

        session.start_acquisition(profile(), 5).unwrap();
        assert!(session.start_acquisition(profile(), 5).is_err());
        assert!(session.load_replay(profile(), Vec::new()).is_err());
        assert!(session.process().is_err());
    }

    #[test]
    fn test_duration_elapsed_with_short_retention() {
        let config = AnalysisConfig {
            retention_ms: Some(5_000.0),
            ..AnalysisConfig::default()
        };
        let mut session = SessionController::new(config);
        session.start_acquisition(profile(), 10).unwrap();

        let mut elapsed_at = None;
        for i in 0..6000 {
            let t = 2_000.0 + i as f64 * 5.0;
            session.push_sample(Sample::new(t, 1.0, 1.0)).unwrap();
            if session.duration_elapsed() {
                elapsed_at = Some(t);
                break;
            }
        }

        assert_eq!(elapsed_at, Some(12_000.0));
        assert_eq!(session.buffer().duration_ms(), 5_000.0);

        // A new acquisition measures from its own first sample
        session.stop_acquisition().unwrap();
        session.process().unwrap();
        session.start_acquisition(profile(), 1).unwrap();
        session.push_sample(Sample::new(50_000.0, 1.0, 1.0)).unwrap();
        assert!(!session.duration_elapsed());
        session.push_sample(Sample::new(51_000.0, 1.0, 1.0)).unwrap();
        assert!(session.duration_elapsed());
    }

    #[test]
    fn test_out_of_order_sample_surfaces() {
        let mut session = SessionController::new(AnalysisConfig::default());
        session.start_acquisition(profile(), 5).unwrap();
        session.push_sample(Sample::new(100.0, 1.0, 1.0)).unwrap();

        let err = session.push_sample(Sample::new(50.0, 1.0, 1.0)).unwrap_err();
        assert!(matches!(err, SessionError::OutOfOrder(_)));
        assert_eq!(session.buffer().len(), 1);
        assert_eq!(session.state(), SessionState::Acquiring);
    }

    #[test]
    fn test_replay_skips_acquisition() {
        let mut session = SessionController::new(AnalysisConfig::default());
        let mut samples = pulse_train(20.0, 50.0, 1.0, 0.25);
        samples.insert(10, Sample::new(0.0, 1.0, 1.0));

        let rejected = session.load_replay(profile(), samples).unwrap();
        assert_eq!(rejected.len(), 1);
        assert_eq!(session.state(), SessionState::Processing);

        let result = session.process().unwrap();
        assert_eq!(result.source, SampleSource::Replay);
        assert_eq!(result.sample_count, 1000);
        assert!(result.has_vop());
        assert!(result.cavi.is_some());
    }

    #[test]
    fn test_empty_session_completes_without_results() {
        let mut session = SessionController::new(AnalysisConfig::default());
        session.start_acquisition(profile(), 35).unwrap();
        session.stop_acquisition().unwrap();

        let result = session.process().unwrap();
        assert!(result.vop_samples.is_empty());
        assert_eq!(result.vop_median, None);
        assert_eq!(result.heart_rate_bpm, 0.0);
        assert_eq!(result.cavi, None);
        assert_eq!(session.state(), SessionState::Complete);
    }

    #[test]
    fn test_new_session_starts_clean() {
        let mut session = SessionController::new(AnalysisConfig::default());
        session
            .load_replay(profile(), pulse_train(10.0, 50.0, 1.0, 0.25))
            .unwrap();
        session.process().unwrap();
        assert!(session.result().is_some());

        session.start_acquisition(profile(), 5).unwrap();
        assert!(session.result().is_none());
        assert!(session.buffer().is_empty());

        session.reset();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.profile().is_none());
    }

    #[test]
    fn test_preview_window() {
        let mut session = SessionController::new(AnalysisConfig::default());
        assert!(session.preview(5.0).is_none());

        session.start_acquisition(profile(), 35).unwrap();
        let samples = pulse_train(8.0, 200.0, 1.0, 0.2);
        for sample in &samples[..PREVIEW_MIN_SAMPLES - 1] {
            session.push_sample(*sample).unwrap();
        }
        assert!(session.preview(5.0).is_none());

        for sample in &samples[PREVIEW_MIN_SAMPLES - 1..] {
            session.push_sample(*sample).unwrap();
        }
        let preview = session.preview(5.0).unwrap();
        let first = preview.times_s[0];
        let last = *preview.times_s.last().unwrap();
        assert!(first >= 2.99 - 1e-9);
        assert!((last - 7.995).abs() < 1e-9);
        assert_eq!(preview.proximal.len(), preview.times_s.len());
    }
}
