use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use ndarray::Array2;
use ort::execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch};
use ort::inputs;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;

#[cfg(feature = "cuda")]
use ort::execution_providers::CUDAExecutionProvider;

use super::engine::KokoroConfig;
use super::phonemizer::{phonemize, voice_lang, EspeakConfig};
use super::voices::{VoiceArchive, VoiceData};
use crate::Device;

/// Preferred checkpoint file inside the model directory.
pub const CHECKPOINT_FILE: &str = "kokoro-quant-convinteger.onnx";

/// Voice archive file inside the model directory.
pub const VOICES_FILE: &str = "voices-v1.0.bin";

/// Maximum number of phoneme tokens per chunk (before padding).
pub const MAX_PHONEME_LEN: usize = 510;

/// Style vector dimension for Kokoro.
pub const STYLE_DIM: usize = 256;

/// Output sample rate of the synthesized audio.
pub const SAMPLE_RATE: u32 = 22050;

/// Crossfade (in samples) used when concatenating chunk audio.
const CHUNK_CROSSFADE_SAMPLES: usize = 220; // 10ms @ 22.05kHz

#[derive(thiserror::Error, Debug)]
pub enum KokoroError {
    #[error("ONNX runtime error: {0}")]
    Ort(#[from] ort::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error(
        "espeak-ng not found. Install: Linux: `sudo apt-get install espeak-ng`, \
         macOS: `brew install espeak-ng`, Windows: https://espeak-ng.org/download"
    )]
    EspeakNotFound,
    #[error("Phonemization failed: {0}")]
    PhonemizerFailed(String),
    #[error("Voice '{0}' not found in the voice archive")]
    VoiceNotFound(String),
    #[error("Invalid config.json: {0}")]
    Config(String),
    #[error("Failed to parse voice file: {0}")]
    VoiceParse(String),
}

/// The loaded Kokoro ONNX model.
///
/// The session is guarded by a mutex: ONNX inference takes the session
/// mutably, so all synthesis calls serialize through this single critical
/// section. Voice data is not held here; it is loaded per request from the
/// [`VoiceArchive`].
pub struct KokoroModel {
    session: Mutex<Session>,
    voices: VoiceArchive,
    vocab: HashMap<char, i64>,
    espeak: EspeakConfig,
    /// Detected input name: "input_ids" or "tokens"
    tokens_input_name: String,
    /// True if the speed input expects int32, false for float32
    speed_is_int32: bool,
}

impl KokoroModel {
    /// Load the Kokoro model described by `config`.
    ///
    /// The model directory must contain an `.onnx` checkpoint (preferably
    /// [`CHECKPOINT_FILE`]), the [`VOICES_FILE`] voice archive, and a
    /// `config.json` with the phoneme vocabulary.
    pub fn load(config: &KokoroConfig) -> Result<Self, KokoroError> {
        let onnx_path = find_onnx_file(&config.model_dir)?;
        log::info!(
            "Loading Kokoro model from {} on {:?}",
            onnx_path.display(),
            config.device
        );

        let session = init_session(
            &onnx_path,
            config.device,
            config.num_threads,
            config.optimized_model_cache_path.as_deref(),
        )?;

        // Detect input names at load time
        let tokens_input_name = detect_tokens_input(&session);
        let speed_is_int32 = detect_speed_type(&session);
        log::info!(
            "Detected: tokens_input='{}', speed_is_int32={}",
            tokens_input_name,
            speed_is_int32
        );

        let voices = VoiceArchive::open(&config.model_dir.join(VOICES_FILE))?;
        let vocab = super::vocab::load_vocab(&config.model_dir.join("config.json"))?;

        Ok(Self {
            session: Mutex::new(session),
            voices,
            vocab,
            espeak: config.espeak.clone(),
            tokens_input_name,
            speed_is_int32,
        })
    }

    /// The voice archive this model was loaded with.
    pub fn voices(&self) -> &VoiceArchive {
        &self.voices
    }

    /// Synthesize audio from text using the given voice and speed.
    ///
    /// Returns the samples together with the IPA phoneme trace the audio was
    /// generated from. An empty trace yields empty samples; deciding whether
    /// that is an error is the caller's concern.
    pub fn synthesize_text(
        &self,
        text: &str,
        voice: &VoiceData,
        speed: f32,
    ) -> Result<(Vec<f32>, String), KokoroError> {
        let lang = voice_lang(voice.name());
        let phonemes = phonemize(text, lang, &self.vocab, &self.espeak)?;
        let ids = phonemes.ids;

        if ids.is_empty() {
            log::warn!("No phoneme tokens produced for text: {text:?}");
            return Ok((Vec::new(), phonemes.ipa));
        }

        // Split into chunks if needed. Keep a stable style index so adjacent
        // chunks don't change style/prosody based on chunk length.
        let style_idx = ids.len();
        let estimated_samples = ids.len() * 300;
        let chunks = if ids.len() > MAX_PHONEME_LEN {
            log::debug!(
                "Kokoro phoneme sequence exceeded limit ({} > {}), chunking",
                ids.len(),
                MAX_PHONEME_LEN
            );
            split_chunks(&ids)
        } else {
            vec![ids]
        };

        let mut combined = Vec::with_capacity(estimated_samples);
        let style = voice.style_for(style_idx);

        for chunk_ids in chunks.iter() {
            let audio = self.synthesize_chunk(chunk_ids, style, speed)?;
            if audio.is_empty() {
                continue;
            }

            if combined.is_empty() {
                combined.extend_from_slice(&audio);
            } else {
                append_with_crossfade(&mut combined, &audio, CHUNK_CROSSFADE_SAMPLES);
            }
        }

        Ok((combined, phonemes.ipa))
    }

    /// Run ONNX inference on a single chunk of phoneme token IDs.
    fn synthesize_chunk(
        &self,
        tokens: &[i64],
        style: &[f32; STYLE_DIM],
        speed: f32,
    ) -> Result<Vec<f32>, KokoroError> {
        let seq_len = tokens.len() + 2; // +2 for padding tokens

        // Build tokens tensor: [[0, t1..tN, 0]]
        let mut padded = vec![0i64; seq_len];
        padded[1..seq_len - 1].copy_from_slice(tokens);
        let tokens_arr = Array2::from_shape_vec((1, seq_len), padded)?;

        // Build style tensor: [[s0..s255]] — a view avoids copying the array
        let style_view = ndarray::ArrayView2::from_shape((1, STYLE_DIM), style.as_slice())?;

        // All synthesis serializes through this lock; a prior panic inside
        // the critical section must not wedge later requests.
        let mut session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let output = if self.speed_is_int32 {
            let speed_arr = ndarray::arr1(&[speed as i32]);
            let inputs = inputs![
                self.tokens_input_name.as_str() => TensorRef::from_array_view(tokens_arr.view())?,
                "style" => TensorRef::from_array_view(style_view)?,
                "speed" => TensorRef::from_array_view(speed_arr.view())?,
            ];
            session.run(inputs)?
        } else {
            let speed_arr = ndarray::arr1(&[speed]);
            let inputs = inputs![
                self.tokens_input_name.as_str() => TensorRef::from_array_view(tokens_arr.view())?,
                "style" => TensorRef::from_array_view(style_view)?,
                "speed" => TensorRef::from_array_view(speed_arr.view())?,
            ];
            session.run(inputs)?
        };

        // Extract first output as waveform
        let first_output = output
            .iter()
            .next()
            .ok_or_else(|| KokoroError::Ort(ort::Error::new("No output from model")))?;
        let waveform = first_output.1.try_extract_array::<f32>()?;

        Ok(waveform.as_slice().unwrap_or(&[]).to_vec())
    }
}

/// Find the ONNX checkpoint in the given directory.
///
/// Prefers [`CHECKPOINT_FILE`], then falls back to the first `.onnx` file found.
fn find_onnx_file(model_dir: &Path) -> Result<PathBuf, KokoroError> {
    let preferred = model_dir.join(CHECKPOINT_FILE);
    if preferred.exists() {
        return Ok(preferred);
    }

    // Scan for any .onnx file
    for entry in std::fs::read_dir(model_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("onnx") {
            log::info!("Using ONNX file: {}", path.display());
            return Ok(path);
        }
    }

    Err(KokoroError::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("No .onnx file found in {}", model_dir.display()),
    )))
}

fn execution_providers(device: Device) -> Vec<ExecutionProviderDispatch> {
    let mut providers = Vec::new();
    if device == Device::Cuda {
        #[cfg(feature = "cuda")]
        providers.push(CUDAExecutionProvider::default().build());
        #[cfg(not(feature = "cuda"))]
        log::warn!("CUDA device selected but the cuda feature is disabled; using CPU");
    }
    providers.push(CPUExecutionProvider::default().build());
    providers
}

/// Initialize an ONNX session with optional on-disk graph caching.
///
/// The first time a model is loaded, ORT runs Level3 graph optimization
/// (5–10 s) and serialises the result to `optimized_cache_path`. Every
/// subsequent load reads the pre-optimized file directly at `Disable`
/// optimization level, cutting cold-start time to under one second.
///
/// If `optimized_cache_path` is `None` the graph is re-optimized on every
/// load, which is useful for unit-testing or read-only deployments.
fn init_session(
    onnx_path: &Path,
    device: Device,
    num_threads: Option<usize>,
    optimized_cache_path: Option<&Path>,
) -> Result<Session, KokoroError> {
    let providers = execution_providers(device);

    // Choose load path and optimization level depending on cache state.
    let (load_path, opt_level, write_cache) = match optimized_cache_path {
        // Pre-optimized graph already on disk → load it directly.
        Some(cache) if cache.exists() => {
            log::info!(
                "Loading pre-optimized Kokoro graph ({:.1} MB) from {:?} — skipping Level3",
                cache
                    .metadata()
                    .map(|m| m.len() as f64 / 1_048_576.0)
                    .unwrap_or(0.0),
                cache
            );
            (cache, GraphOptimizationLevel::Disable, false)
        }
        // Cache path given but file does not exist yet → build + persist.
        Some(cache) => {
            log::info!(
                "First load: running Level3 optimization; saving graph to {:?}",
                cache
            );
            (onnx_path, GraphOptimizationLevel::Level3, true)
        }
        None => (onnx_path, GraphOptimizationLevel::Level3, false),
    };

    let mut builder = Session::builder()?
        .with_optimization_level(opt_level)?
        .with_execution_providers(providers)?
        .with_parallel_execution(true)?;

    if write_cache {
        // Serialise the optimized graph so the next launch can skip optimization.
        let cache = optimized_cache_path.unwrap();
        builder = builder.with_optimized_model_path(cache)?;
    }

    if let Some(threads) = num_threads {
        builder = builder
            .with_intra_threads(threads)?
            .with_inter_threads(threads)?;
    }

    Ok(builder.commit_from_file(load_path)?)
}

/// Detect the token input name ("input_ids" or "tokens") from session inputs.
fn detect_tokens_input(session: &Session) -> String {
    for input in session.inputs() {
        if input.name() == "input_ids" || input.name() == "tokens" {
            return input.name().to_string();
        }
    }
    // Default to "input_ids" if neither is found
    "input_ids".to_string()
}

/// Detect whether the speed input expects int32 (true) or float32 (false).
fn detect_speed_type(session: &Session) -> bool {
    for input in session.inputs() {
        if input.name() == "speed" {
            let type_str = format!("{:?}", input.dtype());
            return type_str.contains("Int32") || type_str.contains("int32");
        }
    }
    // Default: modern Kokoro models use int32
    true
}

/// Split phoneme IDs into chunks of at most `MAX_PHONEME_LEN`, preferring
/// punctuation boundaries.
fn split_chunks(ids: &[i64]) -> Vec<Vec<i64>> {
    // Punctuation token ids in the Kokoro vocabulary:
    // ';':1 ':':2 ',':3 '.':4 '!':5 '?':6
    const PUNCT_IDS: &[i64] = &[1, 2, 3, 4, 5, 6];

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < ids.len() {
        let end = (start + MAX_PHONEME_LEN).min(ids.len());
        if end == ids.len() {
            chunks.push(ids[start..end].to_vec());
            break;
        }

        // Split at the last punctuation before `end`, if any.
        let split = ids[start..end]
            .iter()
            .enumerate()
            .rev()
            .find(|(_, &id)| PUNCT_IDS.contains(&id))
            .map(|(i, _)| start + i + 1)
            .unwrap_or(end);

        chunks.push(ids[start..split].to_vec());
        start = split;
    }

    chunks
}

fn append_with_crossfade(dst: &mut Vec<f32>, src: &[f32], crossfade_samples: usize) {
    let overlap = crossfade_samples.min(dst.len()).min(src.len());
    if overlap == 0 {
        dst.extend_from_slice(src);
        return;
    }

    let dst_start = dst.len() - overlap;
    for i in 0..overlap {
        let t = (i + 1) as f32 / (overlap as f32 + 1.0);
        let left = dst[dst_start + i] * (1.0 - t);
        let right = src[i] * t;
        dst[dst_start + i] = left + right;
    }

    dst.extend_from_slice(&src[overlap..]);
}
