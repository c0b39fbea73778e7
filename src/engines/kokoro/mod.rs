//! Kokoro-82M text-to-speech engine implementation.
//!
//! This module implements the pipeline's [`crate::SynthesisModel`] contract
//! on top of the Kokoro-82M ONNX model. Phonemization goes through
//! espeak-ng; voice style vectors come from the `.npz` voice archive, which
//! also serves as the pipeline's voice catalog.
//!
//! # System Requirements
//!
//! **espeak-ng** must be installed (or bundled via
//! [`phonemizer::EspeakConfig`]):
//! - **Linux**: `sudo apt-get install espeak-ng`
//! - **macOS**: `brew install espeak-ng`
//! - **Windows**: Download installer from <https://espeak-ng.org/download>
//!
//! **ffmpeg** is additionally required for MP3/AAC output.
//!
//! # Model Directory Layout
//!
//! ```text
//! models/kokoro/
//! ├── kokoro-quant-convinteger.onnx   # 8-bit quantized model (88MB, CPU-optimized)
//! ├── voices-v1.0.bin                 # Voice data archive (.npz format)
//! └── config.json                     # Phoneme vocabulary
//! ```
//!
//! Download links:
//! - Model: <https://github.com/taylorchu/kokoro-onnx/releases/tag/v0.2.0>
//! - Voices: <https://github.com/thewh1teagle/kokoro-onnx/releases/tag/model-files-v1.0>
//!
//! # Voice Naming Convention
//!
//! Voices follow the pattern `{language_prefix}_{name}`, e.g.:
//! - `af_bella` — American English female "bella"
//! - `bf_emma` — British English female "emma"
//! - `jf_alpha` — Japanese female "alpha"
//!
//! The two-character prefix selects the espeak-ng language (see
//! [`phonemizer::voice_lang`]).
//!
//! # Example
//!
//! ```rust,no_run
//! use kokoro_pipeline::engines::kokoro::{self, KokoroConfig};
//! use kokoro_pipeline::pipeline::{GenerationRequest, OutputFormat};
//!
//! let pipeline = kokoro::pipeline(KokoroConfig::new("models/kokoro"), "outputs")?;
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

pub mod engine;
pub mod model;
pub mod phonemizer;
pub mod vocab;
pub mod voices;

pub use engine::{detect_device, pipeline, KokoroConfig, KokoroPipeline};
pub use model::{KokoroError, KokoroModel, SAMPLE_RATE};
pub use phonemizer::EspeakConfig;
pub use voices::{VoiceArchive, VoiceData};
