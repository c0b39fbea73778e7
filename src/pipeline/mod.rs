//! The text-to-speech generation pipeline.
//!
//! [`Pipeline::generate`] returns a lazy, finite iterator of
//! [`GenerationEvent`]s. Each pull performs the previously announced stage's
//! work and then announces the next stage, so a caller observes "about to do
//! X" before X completes. The final element is always terminal and carries
//! either the artifact path or a stage-qualified error; no failure crosses
//! the iterator boundary any other way.
//!
//! Stage order on a cold model cache:
//! `LoadingModel → LoadingVoice → Synthesizing → Persisting → Transcoding →
//! Done`. A warm cache omits `LoadingModel`, so consumers must not assume a
//! fixed event count. Invalid input (blank text, out-of-range speed, unknown
//! voice) produces exactly one terminal `Failed` event and touches neither
//! the model nor the filesystem.

pub mod cache;
pub mod catalog;
pub mod event;
mod output;
pub mod request;

pub use cache::ModelCache;
pub use catalog::VoiceCatalog;
pub use event::{GenerationEvent, Stage};
pub use request::{
    GenerationRequest, GenerationRequestBuilder, GenerationRequestBuilderError, OutputFormat,
};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;

use crate::{ModelLoadError, SynthesisError, SynthesisModel, SynthesisResult, VoiceError};

/// Everything that can fail a generation run, stage by stage.
#[derive(thiserror::Error, Debug)]
pub enum GenerationError {
    #[error("text must not be empty")]
    EmptyText,
    #[error("speed {0} is outside the supported range 0.5-2.0")]
    SpeedOutOfRange(f32),
    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),
    #[error(transparent)]
    Voice(#[from] VoiceError),
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
    #[error("failed to write intermediate audio: {0}")]
    Persistence(String),
    #[error("transcoding to {format} failed: {reason}")]
    Transcode {
        format: OutputFormat,
        reason: String,
    },
}

/// Sequences model load, voice load, synthesis, persistence and transcoding
/// for one request at a time.
///
/// The model cache is the only state shared across requests; everything else
/// is scoped to one [`Generation`].
pub struct Pipeline<M: SynthesisModel, C: VoiceCatalog> {
    cache: Arc<ModelCache<M>>,
    catalog: C,
    output_dir: PathBuf,
}

impl<M: SynthesisModel, C: VoiceCatalog> Pipeline<M, C> {
    /// Create a pipeline writing artifacts under `output_dir`.
    ///
    /// The directory is created on first successful transcode, not here, so
    /// constructing a pipeline has no filesystem effects.
    pub fn new(cache: Arc<ModelCache<M>>, catalog: C, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache,
            catalog,
            output_dir: output_dir.into(),
        }
    }

    /// The voice catalog this pipeline validates requests against.
    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Where final artifacts are written.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Start a generation run.
    ///
    /// Nothing happens until the returned iterator is pulled; dropping it
    /// mid-run abandons the remaining stages and cleans up any intermediate
    /// file.
    pub fn generate(&self, request: GenerationRequest) -> Generation<'_, M, C> {
        Generation {
            pipeline: self,
            request,
            state: State::Start,
        }
    }
}

enum State<M: SynthesisModel> {
    Start,
    LoadModel,
    LoadVoice {
        model: Arc<M>,
    },
    Synthesize {
        model: Arc<M>,
        voice: M::Voice,
    },
    Persist {
        result: SynthesisResult,
    },
    Transcode {
        intermediate: NamedTempFile,
    },
    Finished,
}

/// An in-flight generation run; see [`Pipeline::generate`].
pub struct Generation<'a, M: SynthesisModel, C: VoiceCatalog> {
    pipeline: &'a Pipeline<M, C>,
    request: GenerationRequest,
    state: State<M>,
}

impl<M: SynthesisModel, C: VoiceCatalog> Generation<'_, M, C> {
    fn fail(error: GenerationError) -> (State<M>, GenerationEvent) {
        (State::Finished, GenerationEvent::Failed { error })
    }

    /// Validate the request without announcing a stage, then enter the
    /// pipeline at `LoadModel` or, on a warm cache, directly at `LoadVoice`.
    fn start(&self) -> (State<M>, GenerationEvent) {
        if let Err(error) = self.request.validate() {
            return Self::fail(error);
        }
        if !self.pipeline.catalog.contains(&self.request.voice) {
            return Self::fail(VoiceError::Unknown(self.request.voice.clone()).into());
        }

        if self.pipeline.cache.is_warm() {
            // ensure() on a warm cache only clones the handle.
            match self.pipeline.cache.ensure() {
                Ok(model) => (
                    State::LoadVoice { model },
                    GenerationEvent::Stage(Stage::LoadingVoice),
                ),
                Err(error) => Self::fail(error.into()),
            }
        } else {
            (State::LoadModel, GenerationEvent::Stage(Stage::LoadingModel))
        }
    }

    fn load_model(&self) -> (State<M>, GenerationEvent) {
        match self.pipeline.cache.ensure() {
            Ok(model) => (
                State::LoadVoice { model },
                GenerationEvent::Stage(Stage::LoadingVoice),
            ),
            Err(error) => Self::fail(error.into()),
        }
    }

    fn load_voice(&self, model: Arc<M>) -> (State<M>, GenerationEvent) {
        log::info!("Loading voice: {}", self.request.voice);
        match model.load_voice(&self.request.voice) {
            Ok(voice) => (
                State::Synthesize { model, voice },
                GenerationEvent::Stage(Stage::Synthesizing),
            ),
            Err(error) => Self::fail(error.into()),
        }
    }

    fn synthesize(&self, model: Arc<M>, voice: M::Voice) -> (State<M>, GenerationEvent) {
        let result = match model.synthesize(&self.request.text, &voice, self.request.speed) {
            Ok(result) => result,
            Err(error) => return Self::fail(error.into()),
        };

        // "No audio produced" is an error condition, not a silent empty
        // artifact; an empty phoneme trace is treated the same way.
        if result.samples.is_empty() {
            return Self::fail(SynthesisError::EmptyWaveform.into());
        }
        match result.phonemes.as_deref() {
            Some(phonemes) if !phonemes.trim().is_empty() => {
                log::debug!("Generated phonemes: {phonemes}");
            }
            _ => return Self::fail(SynthesisError::EmptyPhonemes.into()),
        }

        (
            State::Persist { result },
            GenerationEvent::Stage(Stage::Persisting),
        )
    }

    fn persist(&self, result: SynthesisResult) -> (State<M>, GenerationEvent) {
        match output::persist(&result) {
            Ok(intermediate) => (
                State::Transcode { intermediate },
                GenerationEvent::Stage(Stage::Transcoding),
            ),
            Err(error) => Self::fail(error),
        }
    }

    fn transcode(&self, intermediate: NamedTempFile) -> (State<M>, GenerationEvent) {
        let outcome = output::transcode(
            intermediate.path(),
            self.request.format,
            &self.pipeline.output_dir,
        );
        // The intermediate is removed on both paths before the terminal
        // event; a cleanup failure is logged and never masks the outcome.
        if let Err(e) = intermediate.close() {
            log::warn!("Failed to remove intermediate file: {e}");
        }
        match outcome {
            Ok(artifact) => {
                log::info!("Saved: {}", artifact.display());
                (State::Finished, GenerationEvent::Done { artifact })
            }
            Err(error) => Self::fail(error),
        }
    }
}

impl<M: SynthesisModel, C: VoiceCatalog> Iterator for Generation<'_, M, C> {
    type Item = GenerationEvent;

    fn next(&mut self) -> Option<GenerationEvent> {
        let state = std::mem::replace(&mut self.state, State::Finished);
        let (state, event) = match state {
            State::Start => self.start(),
            State::LoadModel => self.load_model(),
            State::LoadVoice { model } => self.load_voice(model),
            State::Synthesize { model, voice } => self.synthesize(model, voice),
            State::Persist { result } => self.persist(result),
            State::Transcode { intermediate } => self.transcode(intermediate),
            State::Finished => return None,
        };
        self.state = state;
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Copy, Default)]
    struct FakeBehavior {
        corrupt_voice: bool,
        empty_audio: bool,
        empty_phonemes: bool,
    }

    struct FakeModel {
        behavior: FakeBehavior,
        synth_calls: Arc<AtomicUsize>,
    }

    impl SynthesisModel for FakeModel {
        type Voice = String;

        fn load_voice(&self, voice_id: &str) -> Result<String, VoiceError> {
            if self.behavior.corrupt_voice {
                return Err(VoiceError::Load {
                    voice: voice_id.to_string(),
                    reason: "bad style vector".to_string(),
                });
            }
            Ok(voice_id.to_string())
        }

        fn synthesize(
            &self,
            _text: &str,
            _voice: &String,
            _speed: f32,
        ) -> Result<SynthesisResult, SynthesisError> {
            self.synth_calls.fetch_add(1, Ordering::SeqCst);
            let samples = if self.behavior.empty_audio {
                Vec::new()
            } else {
                (0..2205).map(|i| (i as f32 * 0.03).sin() * 0.3).collect()
            };
            let phonemes = if self.behavior.empty_phonemes {
                Some(String::new())
            } else {
                Some("həlˈoʊ wˈɜːld".to_string())
            };
            Ok(SynthesisResult {
                samples,
                sample_rate: 22050,
                phonemes,
            })
        }
    }

    struct Fixture {
        pipeline: Pipeline<FakeModel, Vec<String>>,
        builds: Arc<AtomicUsize>,
        synth_calls: Arc<AtomicUsize>,
        output_dir: PathBuf,
        _workspace: tempfile::TempDir,
    }

    fn fixture(behavior: FakeBehavior) -> Fixture {
        let workspace = tempfile::tempdir().expect("tempdir");
        // Nested so an untouched filesystem is observable as a missing dir.
        let output_dir = workspace.path().join("outputs");

        let builds = Arc::new(AtomicUsize::new(0));
        let synth_calls = Arc::new(AtomicUsize::new(0));
        let build_counter = Arc::clone(&builds);
        let call_counter = Arc::clone(&synth_calls);
        let cache = Arc::new(ModelCache::new(move || {
            build_counter.fetch_add(1, Ordering::SeqCst);
            Ok(FakeModel {
                behavior,
                synth_calls: Arc::clone(&call_counter),
            })
        }));

        let catalog = vec!["af_bella".to_string(), "af_sarah".to_string()];
        Fixture {
            pipeline: Pipeline::new(cache, catalog, &output_dir),
            builds,
            synth_calls,
            output_dir,
            _workspace: workspace,
        }
    }

    fn request(voice: &str, text: &str, format: OutputFormat, speed: f32) -> GenerationRequest {
        GenerationRequest {
            voice: voice.to_string(),
            text: text.to_string(),
            format,
            speed,
        }
    }

    fn stages(events: &[GenerationEvent]) -> Vec<Stage> {
        events
            .iter()
            .filter_map(|event| match event {
                GenerationEvent::Stage(stage) => Some(*stage),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn cold_cache_runs_every_stage_in_order() {
        let fixture = fixture(FakeBehavior::default());
        let events: Vec<_> = fixture
            .pipeline
            .generate(request("af_bella", "Hello world", OutputFormat::Wav, 1.0))
            .collect();

        assert_eq!(events.len(), 6);
        assert_eq!(
            stages(&events),
            vec![
                Stage::LoadingModel,
                Stage::LoadingVoice,
                Stage::Synthesizing,
                Stage::Persisting,
                Stage::Transcoding,
            ]
        );
        let artifact = events[5].artifact_path().expect("terminal Done");
        assert!(artifact.exists());
        assert_eq!(artifact.extension().and_then(|e| e.to_str()), Some("wav"));
    }

    #[test]
    fn warm_cache_omits_the_model_stage() {
        let fixture = fixture(FakeBehavior::default());
        let first: Vec<_> = fixture
            .pipeline
            .generate(request("af_bella", "warm it up", OutputFormat::Wav, 1.0))
            .collect();
        assert_eq!(first.len(), 6);

        let second: Vec<_> = fixture
            .pipeline
            .generate(request("af_bella", "already warm", OutputFormat::Wav, 1.0))
            .collect();
        assert_eq!(second.len(), 5);
        assert_eq!(stages(&second)[0], Stage::LoadingVoice);
        assert!(second[4].is_terminal());
        assert_eq!(fixture.builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn blank_text_short_circuits_everything() {
        let fixture = fixture(FakeBehavior::default());
        for text in ["", "   ", "\t\n"] {
            let events: Vec<_> = fixture
                .pipeline
                .generate(request("af_bella", text, OutputFormat::Mp3, 1.0))
                .collect();
            assert_eq!(events.len(), 1);
            assert!(matches!(
                events[0].error(),
                Some(GenerationError::EmptyText)
            ));
        }
        assert_eq!(fixture.builds.load(Ordering::SeqCst), 0);
        assert_eq!(fixture.synth_calls.load(Ordering::SeqCst), 0);
        assert!(!fixture.output_dir.exists());
    }

    #[test]
    fn unknown_voice_fails_before_any_work() {
        let fixture = fixture(FakeBehavior::default());
        let events: Vec<_> = fixture
            .pipeline
            .generate(request(
                "nonexistent_voice",
                "Hello world",
                OutputFormat::Wav,
                1.0,
            ))
            .collect();

        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].error(),
            Some(GenerationError::Voice(VoiceError::Unknown(voice))) if voice == "nonexistent_voice"
        ));
        assert_eq!(fixture.builds.load(Ordering::SeqCst), 0);
        assert_eq!(fixture.synth_calls.load(Ordering::SeqCst), 0);
        assert!(!fixture.output_dir.exists());
    }

    #[test]
    fn speed_bounds_are_inclusive_and_enforced_before_synthesis() {
        let fixture = fixture(FakeBehavior::default());
        for speed in [0.5, 2.0] {
            let events: Vec<_> = fixture
                .pipeline
                .generate(request("af_bella", "boundary", OutputFormat::Wav, speed))
                .collect();
            assert!(
                events.last().expect("terminal").artifact_path().is_some(),
                "speed {speed} should be accepted"
            );
        }

        let calls_before = fixture.synth_calls.load(Ordering::SeqCst);
        for speed in [0.49, 2.01, -1.0] {
            let events: Vec<_> = fixture
                .pipeline
                .generate(request("af_bella", "boundary", OutputFormat::Wav, speed))
                .collect();
            assert_eq!(events.len(), 1);
            assert!(matches!(
                events[0].error(),
                Some(GenerationError::SpeedOutOfRange(_))
            ));
        }
        assert_eq!(fixture.synth_calls.load(Ordering::SeqCst), calls_before);
    }

    #[test]
    fn corrupt_voice_data_fails_the_voice_stage() {
        let fixture = fixture(FakeBehavior {
            corrupt_voice: true,
            ..Default::default()
        });
        let events: Vec<_> = fixture
            .pipeline
            .generate(request("af_bella", "Hello world", OutputFormat::Wav, 1.0))
            .collect();

        assert_eq!(stages(&events), vec![Stage::LoadingModel, Stage::LoadingVoice]);
        assert!(matches!(
            events.last().and_then(GenerationEvent::error),
            Some(GenerationError::Voice(VoiceError::Load { .. }))
        ));
        assert_eq!(fixture.synth_calls.load(Ordering::SeqCst), 0);
        assert!(!fixture.output_dir.exists());
    }

    #[test]
    fn empty_waveform_is_a_synthesis_error() {
        let fixture = fixture(FakeBehavior {
            empty_audio: true,
            ..Default::default()
        });
        let events: Vec<_> = fixture
            .pipeline
            .generate(request("af_bella", "Hello world", OutputFormat::Wav, 1.0))
            .collect();

        assert_eq!(
            stages(&events),
            vec![Stage::LoadingModel, Stage::LoadingVoice, Stage::Synthesizing]
        );
        assert!(matches!(
            events.last().and_then(GenerationEvent::error),
            Some(GenerationError::Synthesis(SynthesisError::EmptyWaveform))
        ));
        assert!(!fixture.output_dir.exists());
    }

    #[test]
    fn empty_phoneme_trace_is_a_synthesis_error() {
        let fixture = fixture(FakeBehavior {
            empty_phonemes: true,
            ..Default::default()
        });
        let events: Vec<_> = fixture
            .pipeline
            .generate(request("af_bella", "Hello world", OutputFormat::Wav, 1.0))
            .collect();

        assert!(matches!(
            events.last().and_then(GenerationEvent::error),
            Some(GenerationError::Synthesis(SynthesisError::EmptyPhonemes))
        ));
        assert!(!fixture.output_dir.exists());
    }

    #[test]
    fn failed_model_load_reports_and_stays_retryable() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let cache = Arc::new(ModelCache::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ModelLoadError("checkpoint missing".to_string()))
        }));
        let pipeline: Pipeline<FakeModel, _> = Pipeline::new(
            cache,
            vec!["af_bella".to_string()],
            workspace.path().join("outputs"),
        );

        let events: Vec<_> = pipeline
            .generate(request("af_bella", "Hello world", OutputFormat::Wav, 1.0))
            .collect();
        assert_eq!(stages(&events), vec![Stage::LoadingModel]);
        assert!(matches!(
            events.last().and_then(GenerationEvent::error),
            Some(GenerationError::ModelLoad(_))
        ));

        // The cache stays cold, so the next request tries again.
        let events: Vec<_> = pipeline
            .generate(request("af_bella", "again", OutputFormat::Wav, 1.0))
            .collect();
        assert_eq!(stages(&events), vec![Stage::LoadingModel]);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn wav_artifact_matches_the_synthesized_samples_exactly() {
        let fixture = fixture(FakeBehavior::default());
        let events: Vec<_> = fixture
            .pipeline
            .generate(request("af_bella", "Hello world", OutputFormat::Wav, 1.0))
            .collect();
        let artifact = events
            .last()
            .and_then(GenerationEvent::artifact_path)
            .expect("terminal Done");

        // Re-render the fake model's output and compare bytes: the wav path
        // must be format-preserving end to end.
        let model = FakeModel {
            behavior: FakeBehavior::default(),
            synth_calls: Arc::new(AtomicUsize::new(0)),
        };
        let expected = model
            .synthesize("Hello world", &"af_bella".to_string(), 1.0)
            .expect("fake synthesis");
        let reference = tempfile::Builder::new()
            .suffix(".wav")
            .tempfile()
            .expect("tempfile");
        expected.write_wav(reference.path()).expect("write wav");

        let artifact_bytes = std::fs::read(artifact).expect("read artifact");
        let reference_bytes = std::fs::read(reference.path()).expect("read reference");
        assert_eq!(artifact_bytes, reference_bytes);
    }

    #[test]
    fn mp3_request_encodes_when_ffmpeg_is_present() {
        // Skip when ffmpeg is unavailable in the execution environment.
        if std::process::Command::new("ffmpeg")
            .arg("-version")
            .output()
            .is_err()
        {
            return;
        }

        let fixture = fixture(FakeBehavior::default());
        let events: Vec<_> = fixture
            .pipeline
            .generate(request("af_bella", "Hello world", OutputFormat::Mp3, 1.0))
            .collect();

        assert_eq!(events.len(), 6);
        let artifact = events[5].artifact_path().expect("terminal Done");
        assert!(artifact.exists());
        assert_eq!(artifact.extension().and_then(|e| e.to_str()), Some("mp3"));
        // Exactly one artifact, no leftover intermediate next to it.
        let entries: Vec<_> = std::fs::read_dir(&fixture.output_dir)
            .expect("output dir")
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn events_after_the_terminal_one_are_never_produced() {
        let fixture = fixture(FakeBehavior::default());
        let mut generation = fixture
            .pipeline
            .generate(request("af_bella", "Hello world", OutputFormat::Wav, 1.0));
        let mut terminal_seen = false;
        while let Some(event) = generation.next() {
            assert!(!terminal_seen, "no events may follow a terminal event");
            terminal_seen = event.is_terminal();
        }
        assert!(terminal_seen);
        assert!(generation.next().is_none());
    }
}
