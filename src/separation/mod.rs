//! Vocal separation backends.
//!
//! The `VocalSeparator` trait abstracts over stem separation so the scanner
//! can run against the real Demucs model or a cheap stand-in without
//! changing calling code.

mod demucs;
mod model;
mod passthrough;

pub use demucs::DemucsSeparator;
pub use model::ModelManager;
pub use passthrough::PassthroughSeparator;

use crate::error::Result;
use crate::track::AudioChunk;

/// Trait for vocal separation backends
///
/// Implementations take one chunk of track audio and return the isolated
/// vocal stem as mono samples at the chunk's sample rate. Given the same
/// chunk twice, an implementation must return the same stem.
pub trait VocalSeparator {
    /// Separate the vocal stem from one chunk of audio.
    ///
    /// # Arguments
    /// * `chunk` - Interleaved track audio positioned in track time
    ///
    /// # Returns
    /// Mono vocal samples, one per input frame. Failures are reported with
    /// the chunk's start offset so a run can be traced to the exact stretch
    /// of audio that broke it.
    fn separate_vocals(&mut self, chunk: &AudioChunk) -> Result<Vec<f32>>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}
