//! Audio analysis utilities for short-time RMS extraction and noise floor
//! estimation.

/// Short-time RMS envelope of a stretch of mono audio.
///
/// Values are linear (not dB) and non-negative. `start_ms` anchors the
/// first frame to absolute track time so detections inside a chunk can be
/// reported in track coordinates.
#[derive(Debug, Clone)]
pub struct RmsSeries {
    /// Linear RMS value per analysis frame
    pub values: Vec<f32>,
    /// Hop duration between consecutive frames in milliseconds
    pub hop_ms: f64,
    /// Absolute track time of the first frame in milliseconds
    pub start_ms: u64,
}

impl RmsSeries {
    /// Compute the RMS envelope of mono audio.
    ///
    /// # Arguments
    /// * `audio` - Mono samples in [-1.0, 1.0]
    /// * `frame_samples` - Analysis window length in samples
    /// * `hop_samples` - Step between window starts in samples
    /// * `sample_rate` - Sample rate in Hz
    /// * `start_ms` - Absolute track time of `audio[0]` in milliseconds
    ///
    /// # Returns
    /// An `RmsSeries` with one value per full window. Audio shorter than
    /// one window yields an empty series.
    pub fn compute(
        audio: &[f32],
        frame_samples: usize,
        hop_samples: usize,
        sample_rate: u32,
        start_ms: u64,
    ) -> RmsSeries {
        let hop_ms = if sample_rate > 0 {
            hop_samples as f64 * 1000.0 / sample_rate as f64
        } else {
            0.0
        };
        RmsSeries {
            values: compute_rms_series(audio, frame_samples, hop_samples),
            hop_ms,
            start_ms,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Absolute track time of a frame index in milliseconds.
    pub fn time_at(&self, frame: usize) -> u64 {
        self.start_ms + (frame as f64 * self.hop_ms).round() as u64
    }
}

/// Noise floor estimate over the leading frames of an RMS series.
#[derive(Debug, Clone, Copy)]
pub struct NoiseFloor {
    /// Median RMS of the estimation window (linear)
    pub floor: f32,
    /// Standard deviation of the estimation window (linear)
    pub sigma: f32,
}

/// Downmix interleaved multi-channel samples to mono by averaging channels.
pub fn mix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let ch = channels as usize;
    samples
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Compute linear short-time RMS values over mono audio.
///
/// One value is produced per full analysis window; trailing samples that
/// do not fill a window are dropped.
///
/// # Arguments
/// * `audio` - Mono samples
/// * `frame_samples` - Analysis window length in samples
/// * `hop_samples` - Step between window starts in samples
///
/// # Returns
/// Linear RMS values, empty if the audio is shorter than one window or
/// either length is zero.
pub fn compute_rms_series(audio: &[f32], frame_samples: usize, hop_samples: usize) -> Vec<f32> {
    if frame_samples == 0 || hop_samples == 0 || audio.len() < frame_samples {
        return Vec::new();
    }

    let count = (audio.len() - frame_samples) / hop_samples + 1;
    let mut values = Vec::with_capacity(count);
    for i in 0..count {
        let start = i * hop_samples;
        let window = &audio[start..start + frame_samples];
        let sum_squares: f64 = window.iter().map(|&s| (s as f64) * (s as f64)).sum();
        values.push((sum_squares / frame_samples as f64).sqrt() as f32);
    }
    values
}

/// Estimate the noise floor from the leading frames of an RMS series.
///
/// The floor is the median of the window, which keeps brief pre-roll
/// transients (clicks, count-ins) from inflating the estimate. Sigma is
/// the standard deviation of the same window.
///
/// # Arguments
/// * `values` - Linear RMS values
/// * `window_frames` - Number of leading frames to estimate over
///
/// # Returns
/// A `NoiseFloor`; both fields are 0.0 when the window is empty.
pub fn estimate_noise_floor(values: &[f32], window_frames: usize) -> NoiseFloor {
    let window = &values[..window_frames.min(values.len())];
    if window.is_empty() {
        return NoiseFloor {
            floor: 0.0,
            sigma: 0.0,
        };
    }

    let mut sorted = window.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let floor = sorted[sorted.len() / 2];

    let mean = window.iter().sum::<f32>() / window.len() as f32;
    let variance = window
        .iter()
        .map(|&v| {
            let d = v - mean;
            d * d
        })
        .sum::<f32>()
        / window.len() as f32;

    NoiseFloor {
        floor,
        sigma: variance.sqrt(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, amplitude: f32, sample_rate: u32, samples: usize) -> Vec<f32> {
        (0..samples)
            .map(|i| {
                let t = i as f64 / sample_rate as f64;
                amplitude * (2.0 * std::f64::consts::PI * freq * t).sin() as f32
            })
            .collect()
    }

    #[test]
    fn test_rms_of_square_wave_equals_amplitude() {
        let audio: Vec<f32> = (0..1000).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        let values = compute_rms_series(&audio, 100, 100);
        assert_eq!(values.len(), 10);
        for v in values {
            assert!((v - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_rms_of_sine_matches_closed_form() {
        // 441 Hz at 44100 Hz has a 100-sample period, so a 1000-sample
        // window covers exactly ten periods.
        let audio = sine(441.0, 0.8, 44100, 4000);
        let values = compute_rms_series(&audio, 1000, 1000);
        let expected = 0.8 / 2.0_f32.sqrt();
        for v in values {
            assert!((v - expected).abs() < 1e-3, "rms {} vs {}", v, expected);
        }
    }

    #[test]
    fn test_series_length_follows_frame_and_hop() {
        let audio = vec![0.0; 1000];
        assert_eq!(compute_rms_series(&audio, 250, 100).len(), 8);
        assert_eq!(compute_rms_series(&audio, 1000, 100).len(), 1);
    }

    #[test]
    fn test_audio_shorter_than_frame_yields_empty_series() {
        let audio = vec![0.1; 99];
        assert!(compute_rms_series(&audio, 100, 50).is_empty());
        assert!(compute_rms_series(&[], 100, 50).is_empty());
    }

    #[test]
    fn test_zero_frame_or_hop_yields_empty_series() {
        let audio = vec![0.1; 500];
        assert!(compute_rms_series(&audio, 0, 100).is_empty());
        assert!(compute_rms_series(&audio, 100, 0).is_empty());
    }

    #[test]
    fn test_silence_yields_zero_rms_and_zero_floor() {
        let audio = vec![0.0; 2000];
        let values = compute_rms_series(&audio, 100, 100);
        assert!(values.iter().all(|&v| v == 0.0));
        let floor = estimate_noise_floor(&values, values.len());
        assert_eq!(floor.floor, 0.0);
        assert_eq!(floor.sigma, 0.0);
    }

    #[test]
    fn test_noise_floor_median_ignores_spike() {
        let mut values = vec![0.01_f32; 80];
        values[40] = 0.9;
        let floor = estimate_noise_floor(&values, values.len());
        assert!((floor.floor - 0.01).abs() < 1e-6);
        // The spike shows up in sigma instead.
        assert!(floor.sigma > 0.05);
    }

    #[test]
    fn test_noise_floor_on_empty_window() {
        let floor = estimate_noise_floor(&[], 80);
        assert_eq!(floor.floor, 0.0);
        assert_eq!(floor.sigma, 0.0);

        let floor = estimate_noise_floor(&[0.1, 0.2], 0);
        assert_eq!(floor.floor, 0.0);
        assert_eq!(floor.sigma, 0.0);
    }

    #[test]
    fn test_noise_floor_window_shorter_than_requested() {
        let values = vec![0.02, 0.03, 0.04];
        let floor = estimate_noise_floor(&values, 100);
        assert!((floor.floor - 0.03).abs() < 1e-6);
    }

    #[test]
    fn test_mix_to_mono_averages_channels() {
        let stereo = vec![1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        let mono = mix_to_mono(&stereo, 2);
        assert_eq!(mono, vec![0.5, 0.5, 0.0]);

        let already_mono = vec![0.1, 0.2, 0.3];
        assert_eq!(mix_to_mono(&already_mono, 1), already_mono);
    }

    #[test]
    fn test_time_at_uses_hop_and_origin() {
        let series = RmsSeries {
            values: vec![0.0; 10],
            hop_ms: 10.0,
            start_ms: 5000,
        };
        assert_eq!(series.time_at(0), 5000);
        assert_eq!(series.time_at(7), 5070);
    }

    #[test]
    fn test_compute_carries_chunk_origin() {
        let audio = sine(441.0, 0.5, 44100, 44100);
        let series = RmsSeries::compute(&audio, 1102, 441, 44100, 12000);
        assert_eq!(series.start_ms, 12000);
        assert!((series.hop_ms - 10.0).abs() < 1e-9);
        assert!(!series.is_empty());
    }
}
