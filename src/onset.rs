//! Onset detection over an RMS series.
//!
//! Finds the first silence-to-sound transition of a vocal stem. Detection
//! runs in two passes:
//! 1. **Transition rule**: enough consecutive silence frames, then a rise
//!    that is confirmed by a sustained above-threshold run starting within
//!    a short lookahead
//! 2. **Fallback rule**: if no such transition exists (vocals from frame
//!    zero), the earliest sustained above-threshold run counts
//!
//! A confirmed onset is then refined backward over frames that already sit
//! above a lower exit threshold, so the reported time lands on the start of
//! the attack rather than the frame that first cleared the full threshold.

use crate::audio_analysis::{NoiseFloor, RmsSeries};
use crate::confidence::ConfidencePolicy;

// Avoids a zero denominator when the noise floor estimate is exact silence.
const FLOOR_EPSILON: f32 = 1e-6;

/// A detected vocal onset with its measured strength factors.
#[derive(Debug, Clone)]
pub struct OnsetCandidate {
    /// Absolute track time of the onset in milliseconds
    pub time_ms: u64,
    /// Linear RMS at the confirmed onset frame
    pub rms: f32,
    /// How long the signal stayed above threshold, in milliseconds
    pub sustain_ms: f64,
    /// Onset level over the noise floor in dB
    pub snr_db: f32,
    /// Per-frame RMS slope across the attack
    pub rise: f32,
    /// Confidence score in [0, 1]
    pub confidence: f32,
}

/// Frame-domain detection parameters.
///
/// Durations are expressed in frames for one concrete hop length; see
/// `DetectionConfig::onset_params` for the millisecond-to-frame mapping.
#[derive(Debug, Clone, Copy)]
pub struct OnsetParams {
    /// Multiplier on sigma above the noise floor
    pub snr_multiplier: f32,
    /// Absolute linear RMS the threshold never drops below
    pub abs_threshold: f32,
    /// Consecutive below-threshold frames required before a transition
    pub min_silence_frames: usize,
    /// Consecutive above-threshold frames required to confirm an onset
    pub min_sound_frames: usize,
    /// How far past a rise the sustained run may start
    pub lookahead_frames: usize,
    /// Backward refinement limit in frames
    pub hysteresis_frames: usize,
}

/// The adaptive detection threshold for one chunk.
///
/// Sits `snr_multiplier` sigmas above the estimated floor but never below
/// the absolute minimum, which keeps residual instrument bleed in quiet
/// stems from triggering.
pub fn detection_threshold(floor: &NoiseFloor, params: &OnsetParams) -> f32 {
    (floor.floor + params.snr_multiplier * floor.sigma).max(params.abs_threshold)
}

/// Find the first sustained silence-to-sound transition in an RMS series.
///
/// Returns `None` when the series is empty or nothing clears the threshold
/// long enough. The candidate's `time_ms` is in absolute track coordinates.
pub fn detect_onset(
    series: &RmsSeries,
    floor: &NoiseFloor,
    params: &OnsetParams,
    policy: ConfidencePolicy,
) -> Option<OnsetCandidate> {
    if series.is_empty() {
        return None;
    }

    let threshold = detection_threshold(floor, params);
    let above: Vec<bool> = series.values.iter().map(|&v| v > threshold).collect();

    let run_start = find_transition(&above, params).or_else(|| find_first_run(&above, params))?;
    let onset = refine_backward(&series.values, run_start, floor, threshold, params);

    let candidate = measure_candidate(series, floor, &above, run_start, onset, params, policy);
    log::debug!(
        "onset at {}ms: rms={:.4} sustain={:.0}ms snr={:.1}dB rise={:.4} confidence={:.2}",
        candidate.time_ms,
        candidate.rms,
        candidate.sustain_ms,
        candidate.snr_db,
        candidate.rise,
        candidate.confidence
    );
    Some(candidate)
}

/// Transition rule: a rise preceded by `min_silence_frames` of silence,
/// confirmed by a sustained run starting within `lookahead_frames`.
fn find_transition(above: &[bool], params: &OnsetParams) -> Option<usize> {
    let mut silence_run = 0usize;
    for (i, &is_above) in above.iter().enumerate() {
        if !is_above {
            silence_run += 1;
            continue;
        }
        if silence_run >= params.min_silence_frames {
            if let Some(start) = confirm_rise(above, i, params) {
                return Some(start);
            }
        }
        silence_run = 0;
    }
    None
}

/// Check whether a sustained run begins within the lookahead of a rise.
fn confirm_rise(above: &[bool], rise: usize, params: &OnsetParams) -> Option<usize> {
    for start in rise..=rise + params.lookahead_frames {
        if start + params.min_sound_frames > above.len() {
            return None;
        }
        if above[start..start + params.min_sound_frames].iter().all(|&a| a) {
            return Some(start);
        }
    }
    None
}

/// Fallback rule: the earliest sustained run, with no silence precondition.
/// Covers tracks where vocals are already present at the start of the
/// analyzed stretch.
fn find_first_run(above: &[bool], params: &OnsetParams) -> Option<usize> {
    if params.min_sound_frames > above.len() {
        return None;
    }
    (0..=above.len() - params.min_sound_frames)
        .find(|&s| above[s..s + params.min_sound_frames].iter().all(|&a| a))
}

/// Walk backward from the confirmed run start over frames that already sit
/// above the exit threshold, bounded by `hysteresis_frames`. The exit
/// threshold is halfway between floor and the full threshold, so the soft
/// start of an attack is folded into the onset.
fn refine_backward(
    values: &[f32],
    run_start: usize,
    floor: &NoiseFloor,
    threshold: f32,
    params: &OnsetParams,
) -> usize {
    let exit = floor.floor + 0.5 * (threshold - floor.floor);
    let lowest = run_start.saturating_sub(params.hysteresis_frames);
    let mut k = run_start;
    while k > lowest && values[k - 1] > exit {
        k -= 1;
    }
    k
}

fn measure_candidate(
    series: &RmsSeries,
    floor: &NoiseFloor,
    above: &[bool],
    run_start: usize,
    onset: usize,
    params: &OnsetParams,
    policy: ConfidencePolicy,
) -> OnsetCandidate {
    let values = &series.values;
    let len = values.len();

    let rms = values[run_start];

    let mut sustain_frames = 0usize;
    let mut j = run_start;
    while j < len && above[j] {
        sustain_frames += 1;
        j += 1;
    }
    let sustain_ms = sustain_frames as f64 * series.hop_ms;

    let snr_db = 20.0 * (rms / floor.floor.max(FLOOR_EPSILON)).log10();

    // Attack slope from the frame before the refined onset up to the peak
    // of the confirmation run.
    let run_end = (run_start + params.min_sound_frames).min(len);
    let base = if onset > 0 { values[onset - 1] } else { 0.0 };
    let peak = values[run_start..run_end]
        .iter()
        .fold(values[run_start], |acc, &v| acc.max(v));
    let attack_frames = (run_end - onset).max(1);
    let rise = ((peak - base) / attack_frames as f32).max(0.0);

    let confidence = policy.score(rms, sustain_ms, snr_db, rise);

    OnsetCandidate {
        time_ms: series.time_at(onset),
        rms,
        sustain_ms,
        snr_db,
        rise,
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: Vec<f32>) -> RmsSeries {
        RmsSeries {
            values,
            hop_ms: 10.0,
            start_ms: 0,
        }
    }

    fn params() -> OnsetParams {
        OnsetParams {
            snr_multiplier: 6.0,
            abs_threshold: 0.02,
            min_silence_frames: 10,
            min_sound_frames: 5,
            lookahead_frames: 10,
            hysteresis_frames: 5,
        }
    }

    fn quiet_floor() -> NoiseFloor {
        NoiseFloor {
            floor: 0.005,
            sigma: 0.001,
        }
    }

    fn step(silence: usize, level: f32, sound: usize) -> Vec<f32> {
        let mut v = vec![0.005; silence];
        v.extend(std::iter::repeat(level).take(sound));
        v
    }

    #[test]
    fn test_detects_transition_after_silence() {
        let s = series(step(20, 0.3, 30));
        let c = detect_onset(&s, &quiet_floor(), &params(), ConfidencePolicy::default());
        let c = c.unwrap();
        assert_eq!(c.time_ms, 200);
        assert!((c.rms - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_ignores_brief_click_before_real_onset() {
        let mut values = vec![0.005; 20];
        values.extend([0.3, 0.3]); // two-frame click, too short to confirm
        values.extend(vec![0.005; 20]);
        values.extend(vec![0.3; 30]);
        let s = series(values);
        let c = detect_onset(&s, &quiet_floor(), &params(), ConfidencePolicy::default());
        assert_eq!(c.unwrap().time_ms, 420);
    }

    #[test]
    fn test_fallback_when_vocals_start_immediately() {
        let s = series(vec![0.3; 40]);
        let c = detect_onset(&s, &quiet_floor(), &params(), ConfidencePolicy::default());
        assert_eq!(c.unwrap().time_ms, 0);
    }

    #[test]
    fn test_empty_series_yields_none() {
        let s = series(Vec::new());
        assert!(detect_onset(&s, &quiet_floor(), &params(), ConfidencePolicy::default()).is_none());
    }

    #[test]
    fn test_pure_silence_yields_none() {
        let s = series(vec![0.001; 100]);
        assert!(detect_onset(&s, &quiet_floor(), &params(), ConfidencePolicy::default()).is_none());
    }

    #[test]
    fn test_absolute_floor_suppresses_low_level_bleed() {
        // Floor estimate is zero, so only the absolute minimum holds the
        // threshold up. Residual bleed at 0.015 must not trigger.
        let floor = NoiseFloor {
            floor: 0.0,
            sigma: 0.0,
        };
        let bleed = series(vec![0.015; 60]);
        assert!(detect_onset(&bleed, &floor, &params(), ConfidencePolicy::default()).is_none());

        let vocals = series(step(20, 0.05, 30));
        assert!(detect_onset(&vocals, &floor, &params(), ConfidencePolicy::default()).is_some());
    }

    #[test]
    fn test_higher_threshold_never_moves_onset_earlier() {
        let floor = NoiseFloor {
            floor: 0.01,
            sigma: 0.02,
        };
        let mut values = vec![0.005; 20];
        values.extend([0.1, 0.2, 0.3, 0.4, 0.5]);
        values.extend(vec![0.5; 30]);
        let s = series(values);

        let relaxed = detect_onset(&s, &floor, &params(), ConfidencePolicy::default()).unwrap();
        let mut strict_params = params();
        strict_params.snr_multiplier = 12.0;
        let strict = detect_onset(&s, &floor, &strict_params, ConfidencePolicy::default()).unwrap();
        assert!(strict.time_ms >= relaxed.time_ms);
    }

    #[test]
    fn test_higher_abs_threshold_never_moves_onset_earlier() {
        // At 0.2 the absolute minimum dominates the adaptive term
        // (0.01 + 6 * 0.02), so it is the knob under test here.
        let floor = NoiseFloor {
            floor: 0.01,
            sigma: 0.02,
        };
        let mut values = vec![0.005; 20];
        values.extend([0.1, 0.2, 0.3, 0.4, 0.5]);
        values.extend(vec![0.5; 30]);
        let s = series(values);

        let relaxed = detect_onset(&s, &floor, &params(), ConfidencePolicy::default()).unwrap();
        let mut strict_params = params();
        strict_params.abs_threshold = 0.2;
        let strict = detect_onset(&s, &floor, &strict_params, ConfidencePolicy::default()).unwrap();
        assert!(strict.time_ms >= relaxed.time_ms);
    }

    #[test]
    fn test_hysteresis_walks_back_over_soft_attack() {
        // Three frames at 0.015 sit above the exit threshold (0.0125) but
        // below the full threshold (0.02); the onset should include them.
        let mut values = vec![0.005; 20];
        values.extend(vec![0.015; 3]);
        values.extend(vec![0.3; 30]);
        let s = series(values);
        let c = detect_onset(&s, &quiet_floor(), &params(), ConfidencePolicy::default());
        assert_eq!(c.unwrap().time_ms, 200);
    }

    #[test]
    fn test_hysteresis_is_bounded() {
        let mut values = vec![0.005; 20];
        values.extend(vec![0.015; 3]);
        values.extend(vec![0.3; 30]);
        let s = series(values);
        let mut p = params();
        p.hysteresis_frames = 2;
        let c = detect_onset(&s, &quiet_floor(), &p, ConfidencePolicy::default());
        assert_eq!(c.unwrap().time_ms, 210);
    }

    #[test]
    fn test_rise_near_series_end_is_not_confirmed() {
        // Only three above frames fit before the series ends; the overlap
        // of the next chunk is expected to pick this onset up instead.
        let s = series(step(20, 0.3, 3));
        assert!(detect_onset(&s, &quiet_floor(), &params(), ConfidencePolicy::default()).is_none());
    }

    #[test]
    fn test_candidate_factors_and_confidence() {
        let floor = NoiseFloor {
            floor: 0.0,
            sigma: 0.0,
        };
        let mut values = vec![0.0; 20];
        values.extend(vec![0.5; 40]);
        let s = series(values);
        let c = detect_onset(&s, &floor, &params(), ConfidencePolicy::default()).unwrap();

        assert_eq!(c.time_ms, 200);
        assert!((c.rms - 0.5).abs() < 1e-6);
        assert!((c.sustain_ms - 400.0).abs() < 1e-9);
        assert!(c.snr_db > 20.0);
        assert!(c.rise >= 0.01);
        // rms and snr and rise saturate, sustain contributes 400/2000.
        assert!((c.confidence - 0.80).abs() < 1e-3);
    }

    #[test]
    fn test_time_reported_in_track_coordinates() {
        let mut s = series(step(20, 0.3, 30));
        s.start_ms = 30_000;
        let c = detect_onset(&s, &quiet_floor(), &params(), ConfidencePolicy::default());
        assert_eq!(c.unwrap().time_ms, 30_200);
    }
}
