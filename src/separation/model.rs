//! Model management for vocal separation.
//!
//! Handles downloading, caching, and locating the Demucs ONNX model. The
//! model is fetched on first use and cached locally.

use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;

use crate::error::{DetectionError, Result};

const MODEL_FILENAME: &str = "htdemucs.onnx";
// The graph stores its weights as ONNX external data and references this
// file by name, so it must sit next to the .onnx file.
const MODEL_DATA_FILENAME: &str = "htdemucs.onnx.data";

const MODEL_URL: &str = "https://github.com/gapfix/gapfix/releases/download/models/htdemucs.onnx";
const MODEL_DATA_URL: &str =
    "https://github.com/gapfix/gapfix/releases/download/models/htdemucs.onnx.data";

/// Manages the model download and cache
pub struct ModelManager {
    cache_dir: PathBuf,
}

impl ModelManager {
    /// Create a manager with the default cache directory,
    /// `~/.cache/gapfix/models/`.
    pub fn new() -> Result<ModelManager> {
        let base = dirs::cache_dir().ok_or_else(|| {
            DetectionError::InvalidConfig("Could not determine cache directory".to_string())
        })?;
        Ok(ModelManager {
            cache_dir: base.join("gapfix").join("models"),
        })
    }

    /// Create a manager with a custom cache directory
    pub fn with_cache_dir(cache_dir: PathBuf) -> ModelManager {
        ModelManager { cache_dir }
    }

    /// Local path of the .onnx file
    pub fn model_path(&self) -> PathBuf {
        self.cache_dir.join(MODEL_FILENAME)
    }

    fn data_path(&self) -> PathBuf {
        self.cache_dir.join(MODEL_DATA_FILENAME)
    }

    /// Check whether both model files are already cached
    pub fn is_available(&self) -> bool {
        self.model_path().exists() && self.data_path().exists()
    }

    /// Get the model path, downloading the model files if necessary.
    ///
    /// The optional callback receives overall progress in [0, 1]. The
    /// weights file carries nearly all the bytes, so when both files are
    /// fetched its download is scaled onto the 2-100% range.
    pub fn ensure(&self, progress: Option<Box<dyn Fn(f32) + Send>>) -> Result<PathBuf> {
        let model_path = self.model_path();
        let data_path = self.data_path();

        if self.is_available() {
            log::info!("Model found at {:?}", model_path);
            if let Some(cb) = &progress {
                cb(1.0);
            }
            return Ok(model_path);
        }

        let download_model = !model_path.exists();
        let download_data = !data_path.exists();

        if download_model {
            // The graph file is a few MB; no byte progress for it.
            self.download_file(MODEL_URL, &model_path, None)?;
            if download_data {
                if let Some(cb) = &progress {
                    cb(0.02);
                }
            }
        }

        if download_data {
            let data_progress: Option<Box<dyn Fn(f32) + Send>> = if download_model {
                progress.map(|cb| {
                    Box::new(move |p: f32| cb(0.02 + p * 0.98)) as Box<dyn Fn(f32) + Send>
                })
            } else {
                progress
            };
            self.download_file(MODEL_DATA_URL, &data_path, data_progress)?;
        } else if let Some(cb) = &progress {
            cb(1.0);
        }

        Ok(model_path)
    }

    /// Download a file into the cache directory via a temp file, verifying
    /// the size against Content-Length before moving it into place.
    fn download_file(
        &self,
        url: &str,
        target_path: &std::path::Path,
        progress: Option<Box<dyn Fn(f32) + Send>>,
    ) -> Result<()> {
        fs::create_dir_all(&self.cache_dir).map_err(DetectionError::Io)?;

        let temp_path = target_path.with_extension("tmp");

        log::info!("Downloading {} to {:?}", url, target_path);

        let response = ureq::get(url)
            .call()
            .map_err(|e| DetectionError::ModelDownloadFailed(e.to_string()))?;

        let content_length: Option<u64> = response
            .header("Content-Length")
            .and_then(|s| s.parse().ok());

        let mut file = fs::File::create(&temp_path).map_err(DetectionError::Io)?;

        let mut reader = response.into_reader();
        let mut buffer = [0u8; 8192];
        let mut downloaded: u64 = 0;
        loop {
            let bytes_read = reader.read(&mut buffer).map_err(DetectionError::Io)?;
            if bytes_read == 0 {
                break;
            }
            file.write_all(&buffer[..bytes_read])
                .map_err(DetectionError::Io)?;
            downloaded += bytes_read as u64;
            if let (Some(cb), Some(total)) = (&progress, content_length) {
                // Hold back 100% until the size check has passed.
                cb((downloaded as f32 / total as f32).min(0.99));
            }
        }
        file.flush().map_err(DetectionError::Io)?;
        drop(file);

        let actual_size = fs::metadata(&temp_path).map_err(DetectionError::Io)?.len();
        if let Some(expected) = content_length {
            if actual_size != expected {
                fs::remove_file(&temp_path).ok();
                return Err(DetectionError::ModelDownloadFailed(format!(
                    "Download incomplete: expected {} bytes, got {}",
                    expected, actual_size
                )));
            }
        }

        fs::rename(&temp_path, target_path).map_err(DetectionError::Io)?;

        log::info!("Downloaded {:?} ({} bytes)", target_path, actual_size);
        if let Some(cb) = progress {
            cb(1.0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_model_path_is_under_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::with_cache_dir(dir.path().to_path_buf());
        assert_eq!(manager.model_path(), dir.path().join("htdemucs.onnx"));
    }

    #[test]
    fn test_is_available_requires_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::with_cache_dir(dir.path().to_path_buf());
        assert!(!manager.is_available());

        fs::write(dir.path().join(MODEL_FILENAME), b"onnx").unwrap();
        assert!(!manager.is_available());

        fs::write(dir.path().join(MODEL_DATA_FILENAME), b"weights").unwrap();
        assert!(manager.is_available());
    }

    #[test]
    fn test_ensure_reports_completion_for_cached_model() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(MODEL_FILENAME), b"onnx").unwrap();
        fs::write(dir.path().join(MODEL_DATA_FILENAME), b"weights").unwrap();
        let manager = ModelManager::with_cache_dir(dir.path().to_path_buf());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let path = manager
            .ensure(Some(Box::new(move |p| sink.lock().unwrap().push(p))))
            .unwrap();

        assert_eq!(path, dir.path().join(MODEL_FILENAME));
        assert_eq!(*seen.lock().unwrap(), vec![1.0]);
    }
}
