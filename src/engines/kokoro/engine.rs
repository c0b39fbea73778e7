use std::path::PathBuf;
use std::sync::Arc;

use super::model::{KokoroError, KokoroModel, SAMPLE_RATE, VOICES_FILE};
use super::phonemizer::EspeakConfig;
use super::voices::{VoiceArchive, VoiceData};
use crate::pipeline::{ModelCache, Pipeline};
use crate::{Device, ModelLoadError, SynthesisError, SynthesisModel, SynthesisResult, VoiceError};

/// Process-wide configuration for the Kokoro engine.
///
/// Built once at startup and moved into the model cache's factory; the
/// pipeline never re-reads the environment per request.
#[derive(Debug, Clone)]
pub struct KokoroConfig {
    /// Directory holding the checkpoint, the voice archive and `config.json`.
    pub model_dir: PathBuf,
    /// Compute device, resolved once (see [`detect_device`]).
    pub device: Device,
    /// Number of CPU threads to use for inference.
    /// `None` uses the ORT default (typically all available cores).
    pub num_threads: Option<usize>,
    /// Path for caching the Level3-optimized ONNX graph.
    ///
    /// - First load: ORT runs Level3 optimization and serialises the result here.
    /// - Subsequent loads: the pre-built graph is loaded at `Disable` optimization,
    ///   skipping the expensive 5–10 s re-optimization step entirely.
    ///
    /// Always point at a writable location (e.g. an app data dir); bundled
    /// resource directories may be read-only.
    pub optimized_model_cache_path: Option<PathBuf>,
    /// Where to find espeak-ng for phonemization.
    pub espeak: EspeakConfig,
}

impl KokoroConfig {
    /// Configuration for `model_dir` with the device probed once and all
    /// other settings at their defaults.
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            device: detect_device(),
            num_threads: None,
            optimized_model_cache_path: None,
            espeak: EspeakConfig::default(),
        }
    }

    /// Path of the voice archive inside the model directory.
    pub fn voices_path(&self) -> PathBuf {
        self.model_dir.join(VOICES_FILE)
    }
}

/// Probe the compute device once: CUDA if the feature is compiled in and the
/// provider reports itself available, CPU otherwise.
pub fn detect_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
        match CUDAExecutionProvider::default().is_available() {
            Ok(true) => {
                log::info!("CUDA is available; synthesis will run on GPU");
                return Device::Cuda;
            }
            Ok(false) => log::info!("CUDA not available; falling back to CPU"),
            Err(e) => log::warn!("CUDA availability probe failed: {e}; falling back to CPU"),
        }
    }
    Device::Cpu
}

impl SynthesisModel for KokoroModel {
    type Voice = VoiceData;

    fn load_voice(&self, voice_id: &str) -> Result<VoiceData, VoiceError> {
        self.voices().load(voice_id).map_err(|e| match e {
            KokoroError::VoiceNotFound(voice) => VoiceError::Unknown(voice),
            other => VoiceError::Load {
                voice: voice_id.to_string(),
                reason: other.to_string(),
            },
        })
    }

    fn synthesize(
        &self,
        text: &str,
        voice: &VoiceData,
        speed: f32,
    ) -> Result<SynthesisResult, SynthesisError> {
        let (samples, ipa) = self
            .synthesize_text(text, voice, speed)
            .map_err(|e| SynthesisError::Backend(e.to_string()))?;
        let phonemes = if ipa.trim().is_empty() { None } else { Some(ipa) };
        Ok(SynthesisResult {
            samples,
            sample_rate: SAMPLE_RATE,
            phonemes,
        })
    }
}

/// A generation pipeline backed by the Kokoro engine, with the voice archive
/// doubling as the catalog.
pub type KokoroPipeline = Pipeline<KokoroModel, VoiceArchive>;

/// Build a [`KokoroPipeline`] writing artifacts under `output_dir`.
///
/// The voice archive is opened immediately (it backs voice-id validation);
/// the model itself loads lazily on the first request.
pub fn pipeline(
    config: KokoroConfig,
    output_dir: impl Into<PathBuf>,
) -> Result<KokoroPipeline, KokoroError> {
    let catalog = VoiceArchive::open(&config.voices_path())?;
    let cache = Arc::new(ModelCache::new(move || {
        KokoroModel::load(&config).map_err(|e| ModelLoadError(e.to_string()))
    }));
    Ok(Pipeline::new(cache, catalog, output_dir))
}
