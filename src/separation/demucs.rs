//! Demucs vocal separation via ONNX Runtime.
//!
//! Runs the htdemucs model on one chunk at a time. The model takes stereo
//! input of shape `[1, 2, N]` and produces `[1, 4, 2, N]`; only the vocals
//! stem is kept and downmixed to mono.

use std::path::Path;

use ndarray::Array3;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;

use super::VocalSeparator;
use crate::error::{DetectionError, Result};
use crate::track::AudioChunk;

// htdemucs stem order: drums=0, bass=1, other=2, vocals=3
const VOCALS_STEM: usize = 3;

pub struct DemucsSeparator {
    session: Session,
}

impl DemucsSeparator {
    /// Load an htdemucs ONNX model from disk.
    pub fn load(model_path: &Path) -> Result<DemucsSeparator> {
        if !model_path.exists() {
            return Err(DetectionError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        log::info!("Loading ONNX model from {:?}", model_path);
        let session = Session::builder()
            .map_err(|e| DetectionError::BackendInitFailed(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| DetectionError::BackendInitFailed(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| {
                DetectionError::BackendInitFailed(format!("Failed to load ONNX model: {}", e))
            })?;

        Ok(DemucsSeparator { session })
    }
}

/// Demucs expects stereo; duplicate mono, or take the first two channels of
/// anything wider.
fn to_stereo(chunk: &AudioChunk) -> Vec<f32> {
    match chunk.channels {
        0 | 1 => chunk.samples.iter().flat_map(|&s| [s, s]).collect(),
        2 => chunk.samples.clone(),
        ch => chunk
            .samples
            .chunks(ch as usize)
            .flat_map(|frame| [frame[0], frame.get(1).copied().unwrap_or(frame[0])])
            .collect(),
    }
}

impl VocalSeparator for DemucsSeparator {
    fn separate_vocals(&mut self, chunk: &AudioChunk) -> Result<Vec<f32>> {
        let fail = |message: String| DetectionError::Separation {
            chunk_start_ms: chunk.start_ms,
            message,
        };

        let stereo = to_stereo(chunk);
        let num_samples = stereo.len() / 2;
        if num_samples == 0 {
            return Ok(Vec::new());
        }

        // Shape [batch=1, channels=2, samples]
        let mut input = Array3::<f32>::zeros((1, 2, num_samples));
        for (i, frame) in stereo.chunks(2).enumerate() {
            input[[0, 0, i]] = frame[0];
            input[[0, 1, i]] = frame[1];
        }

        log::debug!(
            "separating chunk at {}ms ({} samples)",
            chunk.start_ms,
            num_samples
        );

        let input_tensor = Tensor::from_array(input)
            .map_err(|e| fail(format!("Failed to create input tensor: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs!["input" => input_tensor])
            .map_err(|e| fail(format!("Inference failed: {}", e)))?;

        let output = outputs
            .iter()
            .next()
            .ok_or_else(|| fail("No output tensor".to_string()))?
            .1;

        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| fail(format!("Failed to extract output: {}", e)))?;

        // Expected shape: [1, 4, 2, N]
        let output_shape: Vec<i64> = shape.iter().copied().collect();
        if output_shape.len() != 4 || output_shape[1] as usize <= VOCALS_STEM {
            return Err(fail(format!(
                "Unexpected output shape: {:?}, expected [1, 4, 2, N]",
                output_shape
            )));
        }

        let num_channels = output_shape[2] as usize;
        let out_samples = output_shape[3] as usize;

        // Flat index into the row-major [1, stems, channels, samples] tensor
        let flat_idx =
            |stem: usize, channel: usize, sample: usize| sample + out_samples * (channel + num_channels * stem);

        let mut vocals = Vec::with_capacity(out_samples);
        for i in 0..out_samples {
            let left = data[flat_idx(VOCALS_STEM, 0, i)];
            let right = if num_channels > 1 {
                data[flat_idx(VOCALS_STEM, 1, i)]
            } else {
                left
            };
            vocals.push(0.5 * (left + right));
        }

        Ok(vocals)
    }

    fn name(&self) -> &'static str {
        "demucs"
    }
}
