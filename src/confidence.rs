//! Confidence scoring policies for detected onsets.

use serde::{Deserialize, Serialize};

// Reference values that map raw onset factors onto [0, 1]. A factor at or
// beyond its reference contributes its full weight.
const REF_RMS: f32 = 0.05;
const REF_SUSTAIN_MS: f64 = 2000.0;
const REF_SNR_DB: f32 = 20.0;
const REF_RISE: f32 = 0.01;

const WEIGHT_RMS: f32 = 0.30;
const WEIGHT_SUSTAIN: f32 = 0.25;
const WEIGHT_SNR: f32 = 0.25;
const WEIGHT_RISE: f32 = 0.20;

// Sigmoid parameters for the SNR-only policy.
const SIGMOID_CENTER_DB: f32 = 10.0;
const SIGMOID_SLOPE: f32 = 0.1;

/// Available confidence scoring policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ConfidencePolicy {
    /// Weighted blend of onset strength, sustain, SNR and attack steepness.
    /// Robust on separated stems, where SNR alone saturates.
    #[default]
    WeightedFactors,

    /// Logistic squash of the SNR factor alone
    SnrSigmoid,
}

impl ConfidencePolicy {
    /// Display name for CLI output
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::WeightedFactors => "weighted-factors",
            Self::SnrSigmoid => "snr-sigmoid",
        }
    }

    /// Score an onset from its measured factors.
    ///
    /// # Arguments
    /// * `rms` - Linear RMS at the onset frame
    /// * `sustain_ms` - How long the signal stayed above threshold
    /// * `snr_db` - Onset level over the noise floor in dB
    /// * `rise` - Per-frame RMS slope across the attack
    ///
    /// # Returns
    /// A score in [0.0, 1.0].
    pub fn score(&self, rms: f32, sustain_ms: f64, snr_db: f32, rise: f32) -> f32 {
        match self {
            Self::WeightedFactors => {
                let rms_part = (rms / REF_RMS).clamp(0.0, 1.0);
                let sustain_part = (sustain_ms / REF_SUSTAIN_MS).clamp(0.0, 1.0) as f32;
                let snr_part = (snr_db / REF_SNR_DB).clamp(0.0, 1.0);
                let rise_part = (rise / REF_RISE).clamp(0.0, 1.0);
                (WEIGHT_RMS * rms_part
                    + WEIGHT_SUSTAIN * sustain_part
                    + WEIGHT_SNR * snr_part
                    + WEIGHT_RISE * rise_part)
                    .clamp(0.0, 1.0)
            }
            Self::SnrSigmoid => {
                let x = SIGMOID_SLOPE * (snr_db - SIGMOID_CENTER_DB);
                (1.0 / (1.0 + (-x).exp())).clamp(0.0, 1.0)
            }
        }
    }
}
