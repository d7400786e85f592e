//! Chunked separation scanning.
//!
//! Separating a whole track through Demucs is far more expensive than the
//! RMS analysis that follows, so the track is processed in overlapping
//! chunks and separation stops as soon as the caller has what it needs.
//! The overlap keeps an onset that straddles a chunk edge detectable in
//! the next chunk, where it sits far enough from the edge to confirm.

use crate::audio_analysis::{estimate_noise_floor, RmsSeries};
use crate::config::DetectionConfig;
use crate::error::Result;
use crate::onset::{detect_onset, OnsetCandidate};
use crate::separation::VocalSeparator;
use crate::track::TrackAudio;

/// Result of a linear scan across the track
#[derive(Debug)]
pub enum ScanOutcome {
    /// First confirmed onset, scanning stopped early
    Found(OnsetCandidate),
    /// The whole range was scanned without a confirmed onset
    Exhausted,
    /// A cancellation signal was observed between chunks
    Cancelled,
}

/// Result of scanning one window for all candidates
#[derive(Debug, Default)]
pub struct WindowScan {
    /// Every confirmed onset, in chunk order
    pub candidates: Vec<OnsetCandidate>,
    /// True when the scan stopped early on cancellation; `candidates`
    /// holds whatever was found up to that point
    pub cancelled: bool,
}

/// Drives separation and onset detection chunk by chunk.
pub struct ChunkScanner<'a> {
    config: &'a DetectionConfig,
    separations: u32,
}

impl<'a> ChunkScanner<'a> {
    pub fn new(config: &'a DetectionConfig) -> ChunkScanner<'a> {
        ChunkScanner {
            config,
            separations: 0,
        }
    }

    /// Number of separation calls made so far
    pub fn separations(&self) -> u32 {
        self.separations
    }

    /// Scan the whole track front to back, stopping at the first confirmed
    /// onset. The cancellation predicate is polled between chunks only; a
    /// running separation is never interrupted.
    pub fn scan_linear(
        &mut self,
        track: &TrackAudio,
        separator: &mut dyn VocalSeparator,
        cancel: &dyn Fn() -> bool,
    ) -> Result<ScanOutcome> {
        let end_ms = track.duration_ms();
        let hop = self.config.chunk_hop_ms();

        let mut start_ms = 0u64;
        while start_ms < end_ms {
            if cancel() {
                log::info!("scan cancelled before chunk at {}ms", start_ms);
                return Ok(ScanOutcome::Cancelled);
            }
            let chunk_end = (start_ms + self.config.chunk_ms).min(end_ms);
            if let Some(candidate) = self.analyze_chunk(track, separator, start_ms, chunk_end)? {
                return Ok(ScanOutcome::Found(candidate));
            }
            start_ms += hop;
        }

        Ok(ScanOutcome::Exhausted)
    }

    /// Scan `[start_ms, end_ms)` and collect every confirmed onset. Unlike
    /// the linear scan this does not stop at the first hit; the caller
    /// needs all candidates of the window to pick the best one.
    pub fn scan_window(
        &mut self,
        track: &TrackAudio,
        separator: &mut dyn VocalSeparator,
        start_ms: u64,
        end_ms: u64,
        cancel: &dyn Fn() -> bool,
    ) -> Result<WindowScan> {
        let mut scan = WindowScan::default();
        let hop = self.config.chunk_hop_ms();

        let mut chunk_start = start_ms;
        while chunk_start < end_ms {
            if cancel() {
                log::info!("window scan cancelled before chunk at {}ms", chunk_start);
                scan.cancelled = true;
                return Ok(scan);
            }
            let chunk_end = (chunk_start + self.config.chunk_ms).min(end_ms);
            if let Some(candidate) = self.analyze_chunk(track, separator, chunk_start, chunk_end)? {
                scan.candidates.push(candidate);
            }
            chunk_start += hop;
        }

        Ok(scan)
    }

    /// Separate one chunk and run onset detection on its vocal stem.
    fn analyze_chunk(
        &mut self,
        track: &TrackAudio,
        separator: &mut dyn VocalSeparator,
        start_ms: u64,
        end_ms: u64,
    ) -> Result<Option<OnsetCandidate>> {
        let chunk = track.chunk(start_ms, end_ms);
        if chunk.frames() == 0 {
            return Ok(None);
        }

        self.separations += 1;
        let vocals = separator.separate_vocals(&chunk)?;

        let series = RmsSeries::compute(
            &vocals,
            self.config.frame_samples(chunk.sample_rate),
            self.config.hop_samples(chunk.sample_rate),
            chunk.sample_rate,
            chunk.start_ms,
        );
        let floor = estimate_noise_floor(&series.values, self.config.noise_floor_frames());

        let candidate = detect_onset(
            &series,
            &floor,
            &self.config.onset_params(),
            self.config.policy,
        );
        log::debug!(
            "chunk {}..{}ms: floor={:.4} sigma={:.4} -> {}",
            start_ms,
            end_ms,
            floor.floor,
            floor.sigma,
            match &candidate {
                Some(c) => format!("onset at {}ms", c.time_ms),
                None => "no onset".to_string(),
            }
        );
        Ok(candidate)
    }
}
