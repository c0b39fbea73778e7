//! # kokoro-pipeline
//!
//! A Rust library that turns text into a playable audio file with the Kokoro
//! TTS engine, reporting per-stage progress while the slow parts run.
//!
//! ## Features
//!
//! - **Staged generation pipeline**: model load, voice load, synthesis,
//!   persistence and transcoding, observable as a lazy event stream
//! - **Model caching**: the synthesis model is built once per process and
//!   reused across requests
//! - **Output formats**: WAV (lossless), MP3 and AAC (192 kbps via ffmpeg)
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! kokoro-pipeline = { version = "0.3", features = ["kokoro"] }
//! ```
//!
//! ```ignore
//! use kokoro_pipeline::engines::kokoro::{self, KokoroConfig};
//! use kokoro_pipeline::pipeline::{GenerationRequest, OutputFormat};
//!
//! let config = KokoroConfig::new("models/kokoro");
//! let pipeline = kokoro::pipeline(config, "outputs")?;
//!
//! let request = GenerationRequest::builder()
//!     .voice("af_bella")
//!     .text("Hello world")
//!     .format(OutputFormat::Mp3)
//!     .build()?;
//!
//! for event in pipeline.generate(request) {
//!     println!("{event}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod engines;
pub mod pipeline;

use std::path::Path;

/// The result of a synthesis (text-to-speech) operation.
///
/// Contains raw f32 audio samples, the sample rate of the output audio, and
/// the phoneme trace the audio was synthesized from.
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    /// Raw audio samples as f32 values
    pub samples: Vec<f32>,
    /// Sample rate of the audio (22050 for Kokoro)
    pub sample_rate: u32,
    /// IPA phoneme trace, if the engine produced one
    pub phonemes: Option<String>,
}

impl SynthesisResult {
    /// Write the audio to a 32-bit float WAV file.
    pub fn write_wav(&self, path: &Path) -> Result<(), hound::Error> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for &sample in &self.samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()
    }

    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Compute device the synthesis model runs on.
///
/// Resolved once at process start and injected into the engine
/// configuration; the pipeline never re-evaluates it per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    /// CUDA execution provider (requires the `cuda` feature)
    Cuda,
    /// CPU execution provider
    #[default]
    Cpu,
}

/// The synthesis model failed to construct.
///
/// Covers a missing or undeserializable checkpoint as well as runtime
/// initialization failures.
#[derive(thiserror::Error, Debug)]
#[error("failed to load synthesis model: {0}")]
pub struct ModelLoadError(pub String);

/// A voice identifier could not be resolved to usable voice data.
#[derive(thiserror::Error, Debug)]
pub enum VoiceError {
    /// The id is not a known catalog entry.
    #[error("unknown voice '{0}'")]
    Unknown(String),
    /// The id is known but its backing data is corrupt or incompatible.
    #[error("failed to load voice '{voice}': {reason}")]
    Load { voice: String, reason: String },
}

/// The model ran but produced no usable output, or failed outright.
#[derive(thiserror::Error, Debug)]
pub enum SynthesisError {
    #[error("synthesis produced no audio")]
    EmptyWaveform,
    #[error("synthesis produced an empty phoneme trace")]
    EmptyPhonemes,
    #[error("synthesis failed: {0}")]
    Backend(String),
}

/// Common interface for text-to-speech synthesis models.
///
/// The generation pipeline treats the model as an opaque box behind this
/// contract: resolve a voice id to loaded voice data, then synthesize text
/// with that voice at a given speed. Implementations must be shareable
/// behind an `Arc`; the Kokoro engine serializes its ONNX session through an
/// internal mutex.
pub trait SynthesisModel {
    /// Resolved, validated per-voice data. Request-scoped; the pipeline never
    /// caches it across requests.
    type Voice;

    /// Resolve and validate a voice identifier.
    ///
    /// Must have no side effects beyond the returned value.
    fn load_voice(&self, voice_id: &str) -> Result<Self::Voice, VoiceError>;

    /// Synthesize speech from the given text.
    ///
    /// `speed` is a speech-rate multiplier; callers are expected to have
    /// validated it against [`pipeline::GenerationRequest::SPEED_RANGE`].
    fn synthesize(
        &self,
        text: &str,
        voice: &Self::Voice,
        speed: f32,
    ) -> Result<SynthesisResult, SynthesisError>;
}
