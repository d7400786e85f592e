//! Track audio loading and millisecond-range slicing.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{DetectionError, Result};

/// One contiguous stretch of a track, positioned in absolute track time.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Absolute track time of the first sample in milliseconds
    pub start_ms: u64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
}

impl AudioChunk {
    /// Number of sample frames (all channels counted as one frame)
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            0
        } else {
            self.frames() as u64 * 1000 / self.sample_rate as u64
        }
    }
}

/// A fully decoded track held in memory as interleaved f32 samples.
///
/// Decoding the whole file once up front keeps chunk slicing cheap; only
/// the expensive separation step is chunked.
pub struct TrackAudio {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl TrackAudio {
    /// Decode an audio file (MP3, FLAC, WAV, OGG) into memory.
    pub fn load(path: &Path) -> Result<TrackAudio> {
        let file = File::open(path).map_err(|e| DetectionError::AudioRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| DetectionError::UnsupportedFormat(e.to_string()))?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
            .ok_or_else(|| DetectionError::UnsupportedFormat("No audio track found".to_string()))?;

        let track_id = track.id;

        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| DetectionError::UnsupportedFormat("Unknown sample rate".to_string()))?;

        let channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(2);

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| DetectionError::UnsupportedFormat(e.to_string()))?;

        let mut samples: Vec<f32> = Vec::new();
        let mut sample_buf: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => {
                    log::warn!("Error reading packet: {}", e);
                    break;
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(e) => {
                    log::warn!("Error decoding packet: {}", e);
                    continue;
                }
            };

            if sample_buf.is_none() {
                let spec = *decoded.spec();
                let duration = decoded.capacity() as u64;
                sample_buf = Some(SampleBuffer::new(duration, spec));
            }

            if let Some(ref mut buf) = sample_buf {
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
        }

        let audio = TrackAudio {
            samples,
            sample_rate,
            channels,
        };
        log::debug!(
            "loaded {:?}: {}ms, {}Hz, {} channels",
            path,
            audio.duration_ms(),
            sample_rate,
            channels
        );
        Ok(audio)
    }

    /// Wrap already decoded interleaved samples.
    pub fn from_samples(samples: Vec<f32>, sample_rate: u32, channels: u16) -> TrackAudio {
        TrackAudio {
            samples,
            sample_rate,
            channels,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            0
        } else {
            self.frames() as u64 * 1000 / self.sample_rate as u64
        }
    }

    /// Slice the half-open range `[start_ms, end_ms)`, clamped to the track.
    pub fn chunk(&self, start_ms: u64, end_ms: u64) -> AudioChunk {
        let total = self.frames();
        let start_frame = (self.ms_to_frame(start_ms)).min(total);
        let end_frame = (self.ms_to_frame(end_ms)).min(total).max(start_frame);
        let ch = self.channels.max(1) as usize;
        AudioChunk {
            start_ms,
            sample_rate: self.sample_rate,
            channels: self.channels,
            samples: self.samples[start_frame * ch..end_frame * ch].to_vec(),
        }
    }

    fn ms_to_frame(&self, ms: u64) -> usize {
        (ms * self.sample_rate as u64 / 1000) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track_1s_mono() -> TrackAudio {
        // 1000ms ramp so sample values encode their own position.
        let samples: Vec<f32> = (0..1000).map(|i| i as f32 / 1000.0).collect();
        TrackAudio::from_samples(samples, 1000, 1)
    }

    #[test]
    fn test_duration_from_samples() {
        let track = track_1s_mono();
        assert_eq!(track.duration_ms(), 1000);
        assert_eq!(track.frames(), 1000);

        let stereo = TrackAudio::from_samples(vec![0.0; 88200], 44100, 2);
        assert_eq!(stereo.duration_ms(), 1000);
        assert_eq!(stereo.frames(), 44100);
    }

    #[test]
    fn test_chunk_covers_requested_range() {
        let track = track_1s_mono();
        let chunk = track.chunk(200, 500);
        assert_eq!(chunk.start_ms, 200);
        assert_eq!(chunk.frames(), 300);
        assert!((chunk.samples[0] - 0.2).abs() < 1e-6);
        assert!((chunk.samples[299] - 0.499).abs() < 1e-6);
    }

    #[test]
    fn test_chunk_is_clamped_to_track_end() {
        let track = track_1s_mono();
        let chunk = track.chunk(800, 5000);
        assert_eq!(chunk.frames(), 200);
        assert_eq!(chunk.duration_ms(), 200);

        let past_end = track.chunk(2000, 3000);
        assert_eq!(past_end.frames(), 0);
        assert_eq!(past_end.duration_ms(), 0);
    }

    #[test]
    fn test_chunk_of_stereo_keeps_interleaving() {
        // Left channel holds the frame index, right channel its negation.
        let mut samples = Vec::new();
        for i in 0..100 {
            samples.push(i as f32);
            samples.push(-(i as f32));
        }
        let track = TrackAudio::from_samples(samples, 100, 2);
        let chunk = track.chunk(100, 300);
        assert_eq!(chunk.frames(), 20);
        assert_eq!(chunk.samples[0], 10.0);
        assert_eq!(chunk.samples[1], -10.0);
    }

    #[test]
    fn test_empty_and_inverted_ranges() {
        let track = track_1s_mono();
        assert_eq!(track.chunk(500, 500).frames(), 0);
        assert_eq!(track.chunk(600, 400).frames(), 0);
    }

    #[test]
    fn test_load_missing_file_is_an_error() {
        let err = TrackAudio::load(Path::new("/nonexistent/song.mp3"));
        assert!(matches!(err, Err(DetectionError::AudioRead { .. })));
    }
}
