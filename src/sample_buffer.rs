use crate::{ChannelArrays, Sample};
use log::trace;
use thiserror::Error;

/// Raised when a sample would break the time ordering of the buffer: its
/// timestamp is older than the last stored one or not finite. `last_ms` is
/// `-inf` for an empty buffer.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("sample at {timestamp_ms} ms does not follow the last stored sample at {last_ms} ms")]
pub struct OutOfOrderError {
    pub timestamp_ms: f64,
    pub last_ms: f64,
}

/// Time-ordered store of two-channel samples.
///
/// In replay mode the buffer keeps everything. In live mode a retention
/// horizon can be set to drop samples older than `last - retention`; the
/// oldest retained sample then becomes t0 for `as_arrays`.
#[derive(Debug, Clone, Default)]
pub struct SampleBuffer {
    samples: Vec<Sample>,
    retention_ms: Option<f64>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention_ms: Option<f64>) -> Self {
        Self {
            samples: Vec::new(),
            retention_ms,
        }
    }

    pub fn append(&mut self, sample: Sample) -> Result<(), OutOfOrderError> {
        let last_ms = self.last_timestamp().unwrap_or(f64::NEG_INFINITY);
        if !sample.timestamp_ms.is_finite() || sample.timestamp_ms < last_ms {
            return Err(OutOfOrderError {
                timestamp_ms: sample.timestamp_ms,
                last_ms,
            });
        }
        self.samples.push(sample);

        if let Some(retention) = self.retention_ms {
            let horizon = sample.timestamp_ms - retention;
            let stale = self.samples.partition_point(|s| s.timestamp_ms < horizon);
            if stale > 0 {
                trace!("Dropping {} samples older than {:.0} ms", stale, horizon);
                self.samples.drain(..stale);
            }
        }

        Ok(())
    }

    /// Samples with `timestamp_ms` in `[start_ms, start_ms + duration_ms]`.
    pub fn window(&self, start_ms: f64, duration_ms: f64) -> &[Sample] {
        let end_ms = start_ms + duration_ms;
        let lo = self.samples.partition_point(|s| s.timestamp_ms < start_ms);
        let hi = self.samples.partition_point(|s| s.timestamp_ms <= end_ms);
        if lo >= hi {
            return &[];
        }
        &self.samples[lo..hi]
    }

    pub fn as_arrays(&self) -> ChannelArrays {
        ChannelArrays::from_samples(&self.samples)
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn first_timestamp(&self) -> Option<f64> {
        self.samples.first().map(|s| s.timestamp_ms)
    }

    pub fn last_timestamp(&self) -> Option<f64> {
        self.samples.last().map(|s| s.timestamp_ms)
    }

    /// Span covered by the buffer in device milliseconds.
    pub fn duration_ms(&self) -> f64 {
        match (self.first_timestamp(), self.last_timestamp()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }

    /// Sample rate implied by the median inter-sample interval.
    pub fn estimated_sample_rate(&self) -> Option<f64> {
        let intervals: Vec<f64> = self
            .samples
            .windows(2)
            .map(|w| w[1].timestamp_ms - w[0].timestamp_ms)
            .filter(|&dt| dt > 0.0)
            .collect();

        crate::preprocessing::median(&intervals).map(|dt| 1000.0 / dt)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(t: f64) -> Sample {
        Sample::new(t, t / 1000.0, -t / 1000.0)
    }

    #[test]
    fn test_append_rejects_older_timestamp() {
        let mut buffer = SampleBuffer::new();
        buffer.append(sample(10.0)).unwrap();
        buffer.append(sample(10.0)).unwrap();

        let err = buffer.append(sample(9.0)).unwrap_err();
        assert_eq!(err.timestamp_ms, 9.0);
        assert_eq!(err.last_ms, 10.0);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_append_rejects_non_finite_timestamp() {
        let mut buffer = SampleBuffer::new();
        assert!(buffer.append(sample(f64::NAN)).is_err());
        assert!(buffer.is_empty());

        buffer.append(sample(100.0)).unwrap();
        let err = buffer.append(sample(f64::NAN)).unwrap_err();
        assert!(err.timestamp_ms.is_nan());
        assert_eq!(err.last_ms, 100.0);
        assert!(buffer.append(sample(f64::INFINITY)).is_err());

        // Ordering still holds against the last finite sample
        assert!(buffer.append(sample(1.0)).is_err());
        buffer.append(sample(120.0)).unwrap();

        let stored: Vec<f64> = buffer.samples().iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(stored, vec![100.0, 120.0]);
    }

    #[test]
    fn test_window_is_inclusive_and_ordered() {
        let mut buffer = SampleBuffer::new();
        for t in [0.0, 5.0, 10.0, 15.0, 20.0] {
            buffer.append(sample(t)).unwrap();
        }

        let window: Vec<f64> = buffer.window(5.0, 10.0).iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(window, vec![5.0, 10.0, 15.0]);

        assert!(buffer.window(100.0, 10.0).is_empty());
        assert!(SampleBuffer::new().window(0.0, 10.0).is_empty());
    }

    #[test]
    fn test_as_arrays_offsets_from_first_sample() {
        let mut buffer = SampleBuffer::new();
        for t in [1000.0, 1020.0, 1040.0] {
            buffer.append(sample(t)).unwrap();
        }

        let arrays = buffer.as_arrays();
        assert_eq!(arrays.times_s, vec![0.0, 0.02, 0.04]);
        assert_eq!(arrays.proximal, vec![1.0, 1.02, 1.04]);
        assert_eq!(arrays.distal.len(), 3);
    }

    #[test]
    fn test_retention_drops_old_samples() {
        let mut buffer = SampleBuffer::with_retention(Some(100.0));
        for i in 0..30 {
            buffer.append(sample(i as f64 * 10.0)).unwrap();
        }

        assert_eq!(buffer.first_timestamp(), Some(190.0));
        assert_eq!(buffer.last_timestamp(), Some(290.0));
        assert_eq!(buffer.duration_ms(), 100.0);
    }

    #[test]
    fn test_estimated_sample_rate() {
        let mut buffer = SampleBuffer::new();
        assert!(buffer.estimated_sample_rate().is_none());

        for i in 0..50 {
            buffer.append(sample(i as f64 * 20.0)).unwrap();
        }
        let rate = buffer.estimated_sample_rate().unwrap();
        assert!((rate - 50.0).abs() < 1e-9);
    }
}
