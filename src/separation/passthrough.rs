//! Identity separation backend.
//!
//! Treats the mixed audio as if it were the vocal stem. Useful for material
//! that is already vocals-only (a cappella tracks, pre-separated stems) and
//! for exercising the detection pipeline in tests without a model.

use super::VocalSeparator;
use crate::audio_analysis::mix_to_mono;
use crate::error::Result;
use crate::track::AudioChunk;

pub struct PassthroughSeparator;

impl VocalSeparator for PassthroughSeparator {
    fn separate_vocals(&mut self, chunk: &AudioChunk) -> Result<Vec<f32>> {
        Ok(mix_to_mono(&chunk.samples, chunk.channels))
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }
}
