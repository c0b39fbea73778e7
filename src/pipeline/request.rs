//! Generation requests and output formats.

use std::fmt;
use std::ops::RangeInclusive;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use super::GenerationError;

/// Container/format of the final artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Lossless WAV, a byte-identical copy of the intermediate file.
    Wav,
    /// MP3 at a constant 192 kbps.
    Mp3,
    /// AAC (ADTS) at a constant 192 kbps.
    Aac,
}

impl OutputFormat {
    /// File extension for this format, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::Aac => "aac",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// A single text-to-speech request, immutable once submitted.
///
/// Construct directly or through the builder, which defaults `format` to
/// WAV and `speed` to 1.0:
///
/// ```
/// use kokoro_pipeline::pipeline::{GenerationRequest, OutputFormat};
///
/// let request = GenerationRequest::builder()
///     .voice("af_bella")
///     .text("Hello world")
///     .format(OutputFormat::Mp3)
///     .build()?;
/// assert_eq!(request.speed, 1.0);
/// # Ok::<(), kokoro_pipeline::pipeline::GenerationRequestBuilderError>(())
/// ```
///
/// Validation happens inside the pipeline rather than at construction so
/// that an invalid request still produces a well-formed terminal `Failed`
/// event instead of an out-of-band error.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into))]
pub struct GenerationRequest {
    /// Voice identifier, e.g. `"af_bella"`.
    pub voice: String,
    /// Text to synthesize. Must be non-empty after trimming whitespace.
    pub text: String,
    /// Requested output format.
    #[builder(default = "OutputFormat::Wav")]
    #[serde(default = "default_format")]
    pub format: OutputFormat,
    /// Speech-rate multiplier within [`Self::SPEED_RANGE`].
    #[builder(default = "1.0")]
    #[serde(default = "default_speed")]
    pub speed: f32,
}

fn default_format() -> OutputFormat {
    OutputFormat::Wav
}

fn default_speed() -> f32 {
    1.0
}

impl GenerationRequest {
    /// Supported speech-rate multipliers, bounds inclusive.
    pub const SPEED_RANGE: RangeInclusive<f32> = 0.5..=2.0;

    /// Start building a request.
    pub fn builder() -> GenerationRequestBuilder {
        GenerationRequestBuilder::default()
    }

    /// Check the request-local invariants: non-blank text and in-range speed.
    ///
    /// Voice-id validation needs the catalog and stays with the pipeline.
    pub(crate) fn validate(&self) -> Result<(), GenerationError> {
        if self.text.trim().is_empty() {
            return Err(GenerationError::EmptyText);
        }
        if !Self::SPEED_RANGE.contains(&self.speed) {
            return Err(GenerationError::SpeedOutOfRange(self.speed));
        }
        Ok(())
    }
}
