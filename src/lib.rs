pub mod audio_analysis;
pub mod config;
pub mod confidence;
pub mod error;
pub mod onset;
pub mod scanner;
pub mod search;
pub mod separation;
pub mod songfile;
pub mod track;

pub use config::{Defaults, DetectionConfig};
pub use confidence::ConfidencePolicy;
pub use error::{DetectionError, Result};
pub use onset::OnsetCandidate;
pub use search::{DetectionOutcome, DetectionResult, GapDetector};
pub use separation::{DemucsSeparator, ModelManager, PassthroughSeparator, VocalSeparator};
pub use songfile::SongFile;
pub use track::TrackAudio;
