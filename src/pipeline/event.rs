//! Progress events emitted by the generation pipeline.

use std::fmt;
use std::path::{Path, PathBuf};

use super::GenerationError;

/// A pipeline stage, announced before its work runs.
///
/// `Idle` and input validation never appear in an event stream: validation
/// either passes silently or fails the whole run, so the first observable
/// stage is [`Stage::LoadingModel`] (or [`Stage::LoadingVoice`] when the
/// model cache is already warm).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Constructing the synthesis model (skipped on a warm cache).
    LoadingModel,
    /// Resolving the requested voice to loaded voice data.
    LoadingVoice,
    /// Running synthesis.
    Synthesizing,
    /// Writing the lossless intermediate file.
    Persisting,
    /// Converting the intermediate file into the requested format.
    Transcoding,
}

impl Stage {
    /// Human-readable stage label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::LoadingModel => "Loading model",
            Self::LoadingVoice => "Loading voice",
            Self::Synthesizing => "Generating speech",
            Self::Persisting => "Writing audio",
            Self::Transcoding => "Converting audio",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One element of the progress stream for a generation request.
///
/// The stream is finite and its last element is always terminal. A
/// `Stage` event announces that the named work is *about to* run, not that
/// it succeeded; success or failure of the whole run arrives only with the
/// terminal `Done` / `Failed` element.
#[derive(Debug)]
pub enum GenerationEvent {
    /// The pipeline is about to perform the given stage.
    Stage(Stage),
    /// Terminal: the artifact was written.
    Done {
        /// Path of the final audio file.
        artifact: PathBuf,
    },
    /// Terminal: a stage failed and the pipeline halted.
    Failed {
        /// What went wrong, stage-qualified.
        error: GenerationError,
    },
}

impl GenerationEvent {
    /// Whether this is the last element of the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Failed { .. })
    }

    /// The final artifact path, present only on a successful terminal event.
    pub fn artifact_path(&self) -> Option<&Path> {
        match self {
            Self::Done { artifact } => Some(artifact),
            _ => None,
        }
    }

    /// The failure, present only on a failed terminal event.
    pub fn error(&self) -> Option<&GenerationError> {
        match self {
            Self::Failed { error } => Some(error),
            _ => None,
        }
    }
}

impl fmt::Display for GenerationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stage(stage) => write!(f, "{stage}..."),
            Self::Done { artifact } => write!(f, "Saved: {}", artifact.display()),
            Self::Failed { error } => write!(f, "Error: {error}"),
        }
    }
}
