//! Speech synthesis engines.
//!
//! This module contains implementations of the [`crate::SynthesisModel`]
//! contract consumed by the generation pipeline.
//!
//! # Available Engines
//!
//! Enable engines via Cargo features:
//! - `kokoro` - Kokoro TTS (ONNX format, espeak-ng required)
//! - `cuda` - adds the CUDA execution provider to the Kokoro engine

#[cfg(feature = "kokoro")]
pub mod kokoro;
