use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::confidence::ConfidencePolicy;
use crate::error::{DetectionError, Result};
use crate::onset::OnsetParams;

/// All parameters of one detection run.
///
/// Values are range-checked once by `validate`; the detection code itself
/// assumes a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// RMS analysis window in milliseconds
    pub frame_ms: f64,
    /// Step between analysis windows in milliseconds
    pub hop_ms: f64,
    /// Leading stretch of each chunk used for the noise floor estimate
    pub noise_floor_ms: f64,
    /// Multiplier on sigma above the noise floor
    pub snr_multiplier: f32,
    /// Absolute linear RMS the threshold never drops below
    pub abs_threshold: f32,
    /// Silence required before a transition counts, in milliseconds
    pub min_silence_ms: f64,
    /// Sound required to confirm an onset, in milliseconds
    pub min_voiced_ms: f64,
    /// How far past a rise the confirmation may look, in frames
    pub lookahead_frames: usize,
    /// Backward onset refinement limit in milliseconds
    pub hysteresis_ms: f64,
    /// Separation chunk length in milliseconds
    pub chunk_ms: u64,
    /// Overlap between consecutive chunks in milliseconds
    pub overlap_ms: u64,
    /// Initial search radius around the expected position in milliseconds
    pub initial_radius_ms: u64,
    /// Radius growth per search iteration in milliseconds
    pub radius_increment_ms: u64,
    /// Maximum number of radius expansions
    pub max_iterations: u32,
    /// Candidates closer together than this are treated as one
    pub dedup_ms: u64,
    /// Confidence scoring policy
    pub policy: ConfidencePolicy,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        DetectionConfig {
            frame_ms: 25.0,
            hop_ms: 10.0,
            noise_floor_ms: 800.0,
            snr_multiplier: 6.0,
            abs_threshold: 0.02,
            min_silence_ms: 300.0,
            min_voiced_ms: 500.0,
            lookahead_frames: 50,
            hysteresis_ms: 120.0,
            chunk_ms: 12_000,
            overlap_ms: 6_000,
            initial_radius_ms: 5_000,
            radius_increment_ms: 5_000,
            max_iterations: 5,
            dedup_ms: 1_000,
            policy: ConfidencePolicy::WeightedFactors,
        }
    }
}

impl DetectionConfig {
    /// Range-check all parameters, rejecting the run before any audio work.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(DetectionError::InvalidConfig(msg.to_string()));

        if self.frame_ms <= 0.0 || self.hop_ms <= 0.0 {
            return invalid("frame_ms and hop_ms must be positive");
        }
        if self.noise_floor_ms <= 0.0 {
            return invalid("noise_floor_ms must be positive");
        }
        if self.snr_multiplier < 0.0 || !self.snr_multiplier.is_finite() {
            return invalid("snr_multiplier must be a non-negative number");
        }
        if self.abs_threshold <= 0.0 || !self.abs_threshold.is_finite() {
            return invalid("abs_threshold must be positive");
        }
        if self.min_silence_ms <= 0.0 || self.min_voiced_ms <= 0.0 {
            return invalid("min_silence_ms and min_voiced_ms must be positive");
        }
        if self.lookahead_frames == 0 {
            return invalid("lookahead_frames must be at least 1");
        }
        if self.hysteresis_ms < 0.0 {
            return invalid("hysteresis_ms must not be negative");
        }
        if self.chunk_ms == 0 {
            return invalid("chunk_ms must be positive");
        }
        if self.overlap_ms >= self.chunk_ms {
            return invalid("overlap_ms must be smaller than chunk_ms");
        }
        if (self.chunk_ms as f64) < self.frame_ms {
            return invalid("chunk_ms must cover at least one analysis frame");
        }
        if self.initial_radius_ms == 0 || self.radius_increment_ms == 0 {
            return invalid("initial_radius_ms and radius_increment_ms must be positive");
        }
        if self.max_iterations == 0 {
            return invalid("max_iterations must be at least 1");
        }
        Ok(())
    }

    /// Step between chunk starts in milliseconds
    pub fn chunk_hop_ms(&self) -> u64 {
        self.chunk_ms - self.overlap_ms
    }

    /// Analysis frame length in samples at the given rate.
    pub fn frame_samples(&self, sample_rate: u32) -> usize {
        (self.frame_ms * sample_rate as f64 / 1000.0).round() as usize
    }

    /// Analysis hop length in samples at the given rate, at least 1.
    pub fn hop_samples(&self, sample_rate: u32) -> usize {
        ((self.hop_ms * sample_rate as f64 / 1000.0).round() as usize).max(1)
    }

    /// Number of leading frames used for the noise floor estimate.
    pub fn noise_floor_frames(&self) -> usize {
        ((self.noise_floor_ms / self.hop_ms).round() as usize).max(1)
    }

    /// Map the millisecond durations onto frame counts for one hop length.
    pub fn onset_params(&self) -> OnsetParams {
        let frames = |ms: f64| ((ms / self.hop_ms).round() as usize).max(1);
        OnsetParams {
            snr_multiplier: self.snr_multiplier,
            abs_threshold: self.abs_threshold,
            min_silence_frames: frames(self.min_silence_ms),
            min_sound_frames: frames(self.min_voiced_ms),
            lookahead_frames: self.lookahead_frames,
            hysteresis_frames: (self.hysteresis_ms / self.hop_ms).round() as usize,
        }
    }
}

/// Parse a policy name as given on the command line or in the defaults file.
pub fn parse_policy(name: &str) -> Result<ConfidencePolicy> {
    match name {
        "weighted-factors" | "weighted" => Ok(ConfidencePolicy::WeightedFactors),
        "snr-sigmoid" | "sigmoid" => Ok(ConfidencePolicy::SnrSigmoid),
        other => Err(DetectionError::InvalidConfig(format!(
            "Unknown confidence policy: {} (expected weighted-factors or snr-sigmoid)",
            other
        ))),
    }
}

/// Configuration defaults that can be saved to a file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snr_multiplier: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub abs_threshold: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_silence_ms: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_voiced_ms: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hysteresis_ms: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlap_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_radius_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub radius_increment_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Defaults {
    /// Create a new empty defaults set
    pub fn new() -> Self {
        Defaults {
            snr_multiplier: None,
            abs_threshold: None,
            min_silence_ms: None,
            min_voiced_ms: None,
            hysteresis_ms: None,
            chunk_ms: None,
            overlap_ms: None,
            initial_radius_ms: None,
            radius_increment_ms: None,
            max_iterations: None,
            policy: None,
            model: None,
        }
    }

    /// Get the defaults file path (~/.state/gapfix/defaults.toml)
    pub fn get_config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME").map_err(|_| {
            DetectionError::InvalidConfig("HOME environment variable not set".to_string())
        })?;

        let config_dir = Path::new(&home).join(".state").join("gapfix");
        Ok(config_dir.join("defaults.toml"))
    }

    /// Load defaults from file
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if !config_path.exists() {
            return Ok(Defaults::new());
        }

        let content = fs::read_to_string(&config_path)?;
        let defaults: Defaults = toml::from_str(&content).map_err(|e| {
            DetectionError::InvalidConfig(format!("{}: {}", config_path.display(), e))
        })?;
        Ok(defaults)
    }

    /// Save defaults to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(|e| {
            DetectionError::InvalidConfig(format!("Failed to serialize defaults: {}", e))
        })?;
        fs::write(&config_path, toml_string)?;

        Ok(())
    }

    /// Merge this defaults set with another, preferring values from other
    pub fn merge(&mut self, other: &Defaults) {
        if other.snr_multiplier.is_some() {
            self.snr_multiplier = other.snr_multiplier;
        }
        if other.abs_threshold.is_some() {
            self.abs_threshold = other.abs_threshold;
        }
        if other.min_silence_ms.is_some() {
            self.min_silence_ms = other.min_silence_ms;
        }
        if other.min_voiced_ms.is_some() {
            self.min_voiced_ms = other.min_voiced_ms;
        }
        if other.hysteresis_ms.is_some() {
            self.hysteresis_ms = other.hysteresis_ms;
        }
        if other.chunk_ms.is_some() {
            self.chunk_ms = other.chunk_ms;
        }
        if other.overlap_ms.is_some() {
            self.overlap_ms = other.overlap_ms;
        }
        if other.initial_radius_ms.is_some() {
            self.initial_radius_ms = other.initial_radius_ms;
        }
        if other.radius_increment_ms.is_some() {
            self.radius_increment_ms = other.radius_increment_ms;
        }
        if other.max_iterations.is_some() {
            self.max_iterations = other.max_iterations;
        }
        if other.policy.is_some() {
            self.policy = other.policy.clone();
        }
        if other.model.is_some() {
            self.model = other.model.clone();
        }
    }

    /// Overlay these defaults onto a detection configuration.
    pub fn apply_to(&self, config: &mut DetectionConfig) -> Result<()> {
        if let Some(v) = self.snr_multiplier {
            config.snr_multiplier = v;
        }
        if let Some(v) = self.abs_threshold {
            config.abs_threshold = v;
        }
        if let Some(v) = self.min_silence_ms {
            config.min_silence_ms = v;
        }
        if let Some(v) = self.min_voiced_ms {
            config.min_voiced_ms = v;
        }
        if let Some(v) = self.hysteresis_ms {
            config.hysteresis_ms = v;
        }
        if let Some(v) = self.chunk_ms {
            config.chunk_ms = v;
        }
        if let Some(v) = self.overlap_ms {
            config.overlap_ms = v;
        }
        if let Some(v) = self.initial_radius_ms {
            config.initial_radius_ms = v;
        }
        if let Some(v) = self.radius_increment_ms {
            config.radius_increment_ms = v;
        }
        if let Some(v) = self.max_iterations {
            config.max_iterations = v;
        }
        if let Some(name) = &self.policy {
            config.policy = parse_policy(name)?;
        }
        Ok(())
    }

    /// Print the defaults in a human-readable format
    pub fn print(&self, title: &str) {
        println!("{}:", title);

        if let Some(v) = self.snr_multiplier {
            println!("  SNR multiplier:     {}", v);
        }
        if let Some(v) = self.abs_threshold {
            println!("  Absolute threshold: {}", v);
        }
        if let Some(v) = self.min_silence_ms {
            println!("  Min silence:        {} ms", v);
        }
        if let Some(v) = self.min_voiced_ms {
            println!("  Min voiced:         {} ms", v);
        }
        if let Some(v) = self.hysteresis_ms {
            println!("  Hysteresis:         {} ms", v);
        }
        if let Some(v) = self.chunk_ms {
            println!("  Chunk length:       {} ms", v);
        }
        if let Some(v) = self.overlap_ms {
            println!("  Chunk overlap:      {} ms", v);
        }
        if let Some(v) = self.initial_radius_ms {
            println!("  Initial radius:     {} ms", v);
        }
        if let Some(v) = self.radius_increment_ms {
            println!("  Radius increment:   {} ms", v);
        }
        if let Some(v) = self.max_iterations {
            println!("  Max iterations:     {}", v);
        }
        if let Some(v) = &self.policy {
            println!("  Confidence policy:  {}", v);
        }
        if let Some(v) = &self.model {
            println!("  Model path:         {}", v);
        }
    }
}

impl Default for Defaults {
    fn default() -> Self {
        Self::new()
    }
}
