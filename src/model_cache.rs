//! One loaded Whisper model per process.
//!
//! The cache owns at most one `WhisperContext`. Requesting the already
//! loaded model is a no-op; requesting a different one drops the old
//! context before loading the new, so peak memory stays at one model.

use std::path::{Path, PathBuf};

use whisper_rs::{WhisperContext, WhisperContextParameters};

use crate::error::WorkerError;

/// Models small enough to run on the GPU without exhausting shared memory
/// on common hardware. Everything else runs on CPU.
const ACCELERATOR_MODELS: &[&str] = &["tiny", "tiny.en", "base", "base.en"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Accelerator,
}

pub fn device_for(identifier: &str) -> Device {
    if ACCELERATOR_MODELS.contains(&identifier) {
        Device::Accelerator
    } else {
        Device::Cpu
    }
}

/// On-disk file name for a model identifier.
pub fn model_file_name(identifier: &str) -> String {
    format!("ggml-{}.bin", identifier)
}

/// Whether a request for `requested` can reuse the loaded model.
pub fn is_cache_hit(loaded: Option<&str>, requested: &str) -> bool {
    loaded == Some(requested)
}

pub struct CachedModel {
    identifier: String,
    device: Device,
    context: WhisperContext,
}

impl std::fmt::Debug for CachedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedModel")
            .field("identifier", &self.identifier)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl CachedModel {
    fn load(models_dir: &Path, identifier: &str) -> Result<Self, WorkerError> {
        let path = models_dir.join(model_file_name(identifier));
        if !path.exists() {
            return Err(WorkerError::ResourceLoad(format!(
                "Model file not found: {:?}. Download the model first",
                path
            )));
        }

        let device = device_for(identifier);
        log::info!("Loading model {} on {:?} from {:?}", identifier, device, path);

        let params = WhisperContextParameters {
            use_gpu: device == Device::Accelerator,
            ..Default::default()
        };
        let context = WhisperContext::new_with_params(&path.to_string_lossy(), params)
            .map_err(|e| WorkerError::ResourceLoad(format!("Failed to load {}: {}", identifier, e)))?;

        Ok(CachedModel {
            identifier: identifier.to_string(),
            device,
            context,
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn context(&self) -> &WhisperContext {
        &self.context
    }
}

pub struct ModelCache {
    models_dir: PathBuf,
    loaded: Option<CachedModel>,
}

impl ModelCache {
    pub fn new(models_dir: PathBuf) -> Self {
        ModelCache {
            models_dir,
            loaded: None,
        }
    }

    /// The loaded model for `identifier`, loading it first if needed.
    pub fn acquire(&mut self, identifier: &str) -> Result<&CachedModel, WorkerError> {
        if is_cache_hit(self.loaded.as_ref().map(|m| m.identifier()), identifier) {
            log::info!("Model {} already loaded, skipping reload", identifier);
        } else {
            if let Some(old) = self.loaded.take() {
                log::info!(
                    "Unloading model {} to load {}",
                    old.identifier(),
                    identifier
                );
                drop(old);
            }
            self.loaded = Some(CachedModel::load(&self.models_dir, identifier)?);
        }
        self.loaded
            .as_ref()
            .ok_or_else(|| WorkerError::ResourceLoad(format!("Model {} not loaded", identifier)))
    }

    pub fn current(&self) -> Option<&CachedModel> {
        self.loaded.as_ref()
    }
}

/// Default models directory under the platform data dir.
pub fn default_models_dir() -> Result<PathBuf, WorkerError> {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .map(|base| base.join("TranscribeWorker").join("models"))
        .ok_or_else(|| {
            WorkerError::ResourceLoad("Could not determine a models directory".to_string())
        })
}
