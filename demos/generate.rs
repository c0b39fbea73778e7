use std::time::Instant;

use kokoro_pipeline::engines::kokoro::{self, KokoroConfig};
use kokoro_pipeline::pipeline::{GenerationEvent, GenerationRequest, OutputFormat};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = KokoroConfig::new("models/kokoro");
    let pipeline = kokoro::pipeline(config, "outputs")?;

    println!("Available voices: {:?}", pipeline.catalog().names());

    let request = GenerationRequest::builder()
        .voice("af_bella")
        .text(
            "Hello! This is Kokoro, a text to speech model with multilingual support. \
             This request will be encoded as an MP3 file.",
        )
        .format(OutputFormat::Mp3)
        .speed(1.0)
        .build()?;

    let start = Instant::now();
    for event in pipeline.generate(request) {
        println!("[{:.2?}] {event}", start.elapsed());
        if let GenerationEvent::Done { artifact } = &event {
            println!("Artifact written to {}", artifact.display());
        }
    }

    // The model is now cached; a second request skips the load stage.
    let request = GenerationRequest::builder()
        .voice("af_bella")
        .text("The second request reuses the cached model.")
        .build()?;

    let start = Instant::now();
    for event in pipeline.generate(request) {
        println!("[{:.2?}] {event}", start.elapsed());
    }

    Ok(())
}
