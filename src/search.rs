//! Bidirectional onset search around an expected gap position.
//!
//! Song metadata often carries a gap value that is roughly right but off by
//! seconds. The search therefore starts in a small window around that value
//! and widens it step by step, accepting the candidate closest to the
//! expectation once one lies strictly inside the current radius. Without a
//! hint the track is scanned linearly from the start.

use crate::config::DetectionConfig;
use crate::error::Result;
use crate::onset::OnsetCandidate;
use crate::scanner::{ChunkScanner, ScanOutcome};
use crate::separation::VocalSeparator;
use crate::track::TrackAudio;

/// Final verdict of one detection run
#[derive(Debug, Clone)]
pub enum DetectionOutcome {
    /// An onset was accepted as the vocal start
    Found(OnsetCandidate),
    /// The searched range contained no usable onset
    NotFound,
    /// The cancellation predicate fired between chunks
    Cancelled,
}

/// Everything one detection run produced.
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub outcome: DetectionOutcome,
    /// Every distinct onset seen during the run, in track order, including
    /// the accepted one
    pub candidates: Vec<OnsetCandidate>,
    /// Search iterations performed; 0 for a linear scan
    pub iterations: u32,
    /// Separation calls spent on this run
    pub separations: u32,
}

impl DetectionResult {
    /// Accepted onset time in milliseconds, if the run found one.
    pub fn gap_ms(&self) -> Option<u64> {
        match &self.outcome {
            DetectionOutcome::Found(candidate) => Some(candidate.time_ms),
            _ => None,
        }
    }

    /// Confidence of the accepted onset, if the run found one.
    pub fn confidence(&self) -> Option<f32> {
        match &self.outcome {
            DetectionOutcome::Found(candidate) => Some(candidate.confidence),
            _ => None,
        }
    }
}

/// Turns chunk scans into a final detection verdict.
pub struct GapDetector {
    config: DetectionConfig,
}

impl GapDetector {
    /// Creates a detector after validating the configuration.
    pub fn new(config: DetectionConfig) -> Result<GapDetector> {
        config.validate()?;
        Ok(GapDetector { config })
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Runs one detection over `track` with the given separation backend.
    ///
    /// With an `expected_ms` hint the search starts `initial_radius_ms`
    /// around the hint and widens until the candidate closest to the hint
    /// lies strictly inside the current radius. When the iteration limit
    /// runs out the earliest candidate seen wins; an empty candidate list
    /// means no vocals were found. Without a hint the track is scanned
    /// linearly and the first confirmed onset wins.
    ///
    /// `cancel` is polled between chunks; a cancellation surfaces as a
    /// `Cancelled` outcome carrying whatever candidates were already
    /// collected.
    pub fn detect(
        &self,
        track: &TrackAudio,
        separator: &mut dyn VocalSeparator,
        expected_ms: Option<u64>,
        cancel: &dyn Fn() -> bool,
    ) -> Result<DetectionResult> {
        match expected_ms {
            Some(expected) => self.detect_around(track, separator, expected, cancel),
            None => self.detect_linear(track, separator, cancel),
        }
    }

    fn detect_linear(
        &self,
        track: &TrackAudio,
        separator: &mut dyn VocalSeparator,
        cancel: &dyn Fn() -> bool,
    ) -> Result<DetectionResult> {
        let mut scanner = ChunkScanner::new(&self.config);
        let outcome = scanner.scan_linear(track, separator, cancel)?;
        let separations = scanner.separations();

        let result = match outcome {
            ScanOutcome::Found(candidate) => DetectionResult {
                candidates: vec![candidate.clone()],
                outcome: DetectionOutcome::Found(candidate),
                iterations: 0,
                separations,
            },
            ScanOutcome::Exhausted => DetectionResult {
                outcome: DetectionOutcome::NotFound,
                candidates: Vec::new(),
                iterations: 0,
                separations,
            },
            ScanOutcome::Cancelled => DetectionResult {
                outcome: DetectionOutcome::Cancelled,
                candidates: Vec::new(),
                iterations: 0,
                separations,
            },
        };
        Ok(result)
    }

    fn detect_around(
        &self,
        track: &TrackAudio,
        separator: &mut dyn VocalSeparator,
        expected_ms: u64,
        cancel: &dyn Fn() -> bool,
    ) -> Result<DetectionResult> {
        let duration = track.duration_ms();
        let mut scanner = ChunkScanner::new(&self.config);
        let mut candidates: Vec<OnsetCandidate> = Vec::new();
        let mut scanned: Option<(u64, u64)> = None;
        let mut radius = self.config.initial_radius_ms;
        let mut iterations = 0u32;

        while iterations < self.config.max_iterations {
            iterations += 1;
            let window_start = expected_ms.saturating_sub(radius);
            let window_end = expected_ms.saturating_add(radius).min(duration);

            // Once both edges are clamped, growing the radius no longer
            // changes the window and rescanning it would find nothing new.
            if scanned != Some((window_start, window_end)) {
                let scan =
                    scanner.scan_window(track, separator, window_start, window_end, cancel)?;
                merge_candidates(&mut candidates, scan.candidates, self.config.dedup_ms);
                if scan.cancelled {
                    return Ok(DetectionResult {
                        outcome: DetectionOutcome::Cancelled,
                        candidates,
                        iterations,
                        separations: scanner.separations(),
                    });
                }
                scanned = Some((window_start, window_end));
            } else {
                log::debug!(
                    "search window unchanged at radius {}ms, not rescanning",
                    radius
                );
            }

            if let Some(best) = closest_to(&candidates, expected_ms) {
                let distance = best.time_ms.abs_diff(expected_ms);
                if distance < radius {
                    let accepted = best.clone();
                    log::info!(
                        "accepted onset at {}ms, {}ms from expected {}ms (iteration {})",
                        accepted.time_ms,
                        distance,
                        expected_ms,
                        iterations
                    );
                    return Ok(DetectionResult {
                        outcome: DetectionOutcome::Found(accepted),
                        candidates,
                        iterations,
                        separations: scanner.separations(),
                    });
                }
                log::debug!(
                    "closest onset {}ms is {}ms from expected, outside radius {}ms",
                    best.time_ms,
                    distance,
                    radius
                );
            }
            radius = radius.saturating_add(self.config.radius_increment_ms);
        }

        let separations = scanner.separations();
        if let Some(earliest) = candidates.first().cloned() {
            // Candidates can only evade acceptance by sitting exactly on a
            // window edge; report the earliest rather than nothing.
            log::info!(
                "no onset inside the search radius after {} iterations, using earliest at {}ms",
                iterations,
                earliest.time_ms
            );
            return Ok(DetectionResult {
                outcome: DetectionOutcome::Found(earliest),
                candidates,
                iterations,
                separations,
            });
        }

        log::info!(
            "no onset found around {}ms after {} iterations",
            expected_ms,
            iterations
        );
        Ok(DetectionResult {
            outcome: DetectionOutcome::NotFound,
            candidates,
            iterations,
            separations,
        })
    }
}

/// Folds newly scanned onsets into the running list, dropping any within
/// `dedup_ms` of an already known onset. The list stays in track order.
fn merge_candidates(known: &mut Vec<OnsetCandidate>, found: Vec<OnsetCandidate>, dedup_ms: u64) {
    for candidate in found {
        let duplicate = known
            .iter()
            .any(|k| k.time_ms.abs_diff(candidate.time_ms) < dedup_ms);
        if !duplicate {
            known.push(candidate);
        }
    }
    known.sort_by_key(|c| c.time_ms);
}

fn closest_to(candidates: &[OnsetCandidate], expected_ms: u64) -> Option<&OnsetCandidate> {
    candidates
        .iter()
        .min_by_key(|c| c.time_ms.abs_diff(expected_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::separation::PassthroughSeparator;
    use std::cell::Cell;

    const RATE: u32 = 8000;

    fn test_config() -> DetectionConfig {
        DetectionConfig {
            chunk_ms: 2_000,
            overlap_ms: 1_000,
            noise_floor_ms: 400.0,
            min_silence_ms: 200.0,
            min_voiced_ms: 300.0,
            initial_radius_ms: 2_000,
            radius_increment_ms: 2_000,
            max_iterations: 3,
            ..DetectionConfig::default()
        }
    }

    /// Mono track of `total_ms` with a 440 Hz tone in `[from_ms, to_ms)`.
    fn tone_track(total_ms: u64, from_ms: u64, to_ms: u64) -> TrackAudio {
        let total = (total_ms * RATE as u64 / 1000) as usize;
        let from = (from_ms * RATE as u64 / 1000) as usize;
        let to = (to_ms * RATE as u64 / 1000) as usize;
        let samples = (0..total)
            .map(|i| {
                if i >= from && i < to {
                    let t = i as f64 / RATE as f64;
                    0.5 * (2.0 * std::f64::consts::PI * 440.0 * t).sin() as f32
                } else {
                    0.0
                }
            })
            .collect();
        TrackAudio::from_samples(samples, RATE, 1)
    }

    /// Vocal phrases in [500, 1500) and [5500, 6500) over an 8 s track.
    fn two_phrase_track() -> TrackAudio {
        let total = (8_000u64 * RATE as u64 / 1000) as usize;
        let samples: Vec<f32> = (0..total)
            .map(|i| {
                let ms = i as u64 * 1000 / RATE as u64;
                let in_tone = (500..1_500).contains(&ms) || (5_500..6_500).contains(&ms);
                if in_tone {
                    let t = i as f64 / RATE as f64;
                    0.5 * (2.0 * std::f64::consts::PI * 440.0 * t).sin() as f32
                } else {
                    0.0
                }
            })
            .collect();
        TrackAudio::from_samples(samples, RATE, 1)
    }

    fn never() -> impl Fn() -> bool {
        || false
    }

    fn cand(time_ms: u64) -> OnsetCandidate {
        OnsetCandidate {
            time_ms,
            rms: 0.1,
            sustain_ms: 800.0,
            snr_db: 20.0,
            rise: 0.01,
            confidence: 0.5,
        }
    }

    #[test]
    fn test_linear_detection_reports_first_onset() {
        let detector = GapDetector::new(test_config()).unwrap();
        let track = tone_track(4_000, 500, 1_500);
        let mut sep = PassthroughSeparator;

        let result = detector.detect(&track, &mut sep, None, &never()).unwrap();

        let gap = result.gap_ms().unwrap();
        assert!((gap as i64 - 500).abs() <= 30);
        assert_eq!(result.iterations, 0);
        assert_eq!(result.separations, 1);
        assert_eq!(result.candidates.len(), 1);
        assert!(result.confidence().unwrap() > 0.0);
    }

    #[test]
    fn test_linear_detection_exhausts_silent_track() {
        let detector = GapDetector::new(test_config()).unwrap();
        let track = tone_track(4_000, 0, 0);
        let mut sep = PassthroughSeparator;

        let result = detector.detect(&track, &mut sep, None, &never()).unwrap();

        assert!(matches!(result.outcome, DetectionOutcome::NotFound));
        assert!(result.candidates.is_empty());
        assert_eq!(result.separations, 4);
    }

    #[test]
    fn test_linear_detection_finds_onset_at_chunk_boundary() {
        // The onset coincides with a chunk edge; the first chunk ends right
        // where the tone starts and the overlapping second chunk carries
        // enough leading silence to confirm it.
        let detector = GapDetector::new(test_config()).unwrap();
        let track = tone_track(6_000, 2_000, 4_000);
        let mut sep = PassthroughSeparator;

        let result = detector.detect(&track, &mut sep, None, &never()).unwrap();

        let gap = result.gap_ms().unwrap();
        assert!((gap as i64 - 2_000).abs() <= 30, "onset at {}ms", gap);
        assert_eq!(result.separations, 2);
    }

    #[test]
    fn test_detection_is_deterministic() {
        let detector = GapDetector::new(test_config()).unwrap();
        let track = two_phrase_track();

        let mut first_sep = PassthroughSeparator;
        let first = detector
            .detect(&track, &mut first_sep, Some(5_000), &never())
            .unwrap();
        let mut second_sep = PassthroughSeparator;
        let second = detector
            .detect(&track, &mut second_sep, Some(5_000), &never())
            .unwrap();

        assert_eq!(first.gap_ms(), second.gap_ms());
        assert_eq!(first.iterations, second.iterations);
        assert_eq!(first.separations, second.separations);
        assert_eq!(first.candidates.len(), second.candidates.len());
    }

    #[test]
    fn test_hinted_search_accepts_near_expected() {
        // Expected gap at 5000ms, real onset at 5500ms; the first window
        // already contains it.
        let detector = GapDetector::new(test_config()).unwrap();
        let track = tone_track(8_000, 5_500, 6_500);
        let mut sep = PassthroughSeparator;

        let result = detector
            .detect(&track, &mut sep, Some(5_000), &never())
            .unwrap();

        let gap = result.gap_ms().unwrap();
        assert!((gap as i64 - 5_500).abs() <= 30);
        assert_eq!(result.iterations, 1);
        assert_eq!(result.candidates.len(), 1);
    }

    #[test]
    fn test_hinted_search_widens_radius_until_found() {
        // Expected gap far from the real onset; the window must grow twice
        // before it reaches the vocals at 500ms.
        let detector = GapDetector::new(test_config()).unwrap();
        let track = tone_track(8_000, 500, 1_500);
        let mut sep = PassthroughSeparator;

        let result = detector
            .detect(&track, &mut sep, Some(6_000), &never())
            .unwrap();

        let gap = result.gap_ms().unwrap();
        assert!((gap as i64 - 500).abs() <= 30);
        assert_eq!(result.iterations, 3);
        assert_eq!(result.separations, 18);
    }

    #[test]
    fn test_hinted_search_prefers_closest_over_earliest() {
        // An early false phrase at 500ms and the real entry at 5500ms. With
        // the hint near the second one the closer candidate wins even though
        // the other is earlier.
        let mut config = test_config();
        config.initial_radius_ms = 6_000;
        let detector = GapDetector::new(config).unwrap();
        let track = two_phrase_track();
        let mut sep = PassthroughSeparator;

        let result = detector
            .detect(&track, &mut sep, Some(5_000), &never())
            .unwrap();

        let gap = result.gap_ms().unwrap();
        assert!((gap as i64 - 5_500).abs() <= 30);
        assert_eq!(result.iterations, 1);
        assert_eq!(result.candidates.len(), 2);
    }

    #[test]
    fn test_hinted_search_not_found_reports_iterations() {
        // Silent track: every window comes back empty, and once the grown
        // window collapses to the same clamped range it is not rescanned.
        let detector = GapDetector::new(test_config()).unwrap();
        let track = tone_track(8_000, 0, 0);
        let mut sep = PassthroughSeparator;

        let result = detector
            .detect(&track, &mut sep, Some(4_000), &never())
            .unwrap();

        assert!(matches!(result.outcome, DetectionOutcome::NotFound));
        assert!(result.candidates.is_empty());
        assert_eq!(result.iterations, 3);
        assert_eq!(result.separations, 12);
    }

    #[test]
    fn test_hinted_search_cancelled_keeps_partial_candidates() {
        let mut config = test_config();
        config.initial_radius_ms = 6_000;
        let detector = GapDetector::new(config).unwrap();
        let track = two_phrase_track();
        let mut sep = PassthroughSeparator;

        // Cancel before the second chunk of the first window.
        let polls = Cell::new(0u32);
        let cancel = || {
            polls.set(polls.get() + 1);
            polls.get() > 1
        };

        let result = detector
            .detect(&track, &mut sep, Some(5_000), &cancel)
            .unwrap();

        assert!(matches!(result.outcome, DetectionOutcome::Cancelled));
        assert_eq!(result.candidates.len(), 1);
        assert!((result.candidates[0].time_ms as i64 - 500).abs() <= 30);
        assert_eq!(result.iterations, 1);
        assert_eq!(result.separations, 1);
        assert!(result.gap_ms().is_none());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = test_config();
        config.overlap_ms = config.chunk_ms;
        assert!(GapDetector::new(config).is_err());
    }

    #[test]
    fn test_merge_drops_duplicates_within_window() {
        let mut known = Vec::new();
        merge_candidates(&mut known, vec![cand(1_000), cand(1_500)], 1_000);
        assert_eq!(known.len(), 1);
        assert_eq!(known[0].time_ms, 1_000);

        merge_candidates(&mut known, vec![cand(2_600)], 1_000);
        assert_eq!(known.len(), 2);
        assert_eq!(known[1].time_ms, 2_600);
    }

    #[test]
    fn test_merge_keeps_first_seen_on_overlap() {
        let mut known = vec![cand(5_480)];
        merge_candidates(&mut known, vec![cand(5_500), cand(9_000)], 1_000);
        assert_eq!(known.len(), 2);
        assert_eq!(known[0].time_ms, 5_480);
        assert_eq!(known[1].time_ms, 9_000);
    }

    #[test]
    fn test_closest_candidate_tie_prefers_earlier() {
        let list = vec![cand(4_000), cand(6_000)];
        assert_eq!(closest_to(&list, 5_000).unwrap().time_ms, 4_000);
        assert_eq!(closest_to(&list, 5_900).unwrap().time_ms, 6_000);
        assert!(closest_to(&[], 1_000).is_none());
    }

    #[test]
    fn test_result_accessors() {
        let found = DetectionResult {
            outcome: DetectionOutcome::Found(cand(1_200)),
            candidates: vec![cand(1_200)],
            iterations: 1,
            separations: 2,
        };
        assert_eq!(found.gap_ms(), Some(1_200));
        assert_eq!(found.confidence(), Some(0.5));

        let missed = DetectionResult {
            outcome: DetectionOutcome::NotFound,
            candidates: Vec::new(),
            iterations: 3,
            separations: 9,
        };
        assert_eq!(missed.gap_ms(), None);
        assert_eq!(missed.confidence(), None);
    }
}
