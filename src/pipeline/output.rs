//! Intermediate-file persistence and format conversion.
//!
//! The waveform is first written to a scoped lossless WAV; the final
//! artifact is either a byte-identical copy of it (WAV) or a lossy
//! re-encode through ffmpeg (MP3/AAC) at a fixed constant bitrate.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::NamedTempFile;

use super::{GenerationError, OutputFormat};
use crate::SynthesisResult;

/// Constant bitrate for lossy encodes.
const ENCODE_BITRATE: &str = "192k";

/// Write the waveform to a scoped lossless intermediate file.
///
/// The file lives in the system temp directory and is removed when the
/// returned handle drops, so a failed write never leaves a partial file
/// behind.
pub(crate) fn persist(result: &SynthesisResult) -> Result<NamedTempFile, GenerationError> {
    let intermediate = tempfile::Builder::new()
        .prefix("kokoro_")
        .suffix(".wav")
        .tempfile()
        .map_err(|e| GenerationError::Persistence(e.to_string()))?;

    result
        .write_wav(intermediate.path())
        .map_err(|e| GenerationError::Persistence(e.to_string()))?;

    log::debug!(
        "Wrote {:.2}s intermediate WAV to {}",
        result.duration_secs(),
        intermediate.path().display()
    );
    Ok(intermediate)
}

/// Convert the intermediate file into the requested format.
///
/// Creates `output_dir` if absent and returns the path of the new artifact,
/// named `output_<YYYYMMDD_HHMMSS>.<ext>`. The intermediate file is left in
/// place; its removal is the caller's decision.
pub(crate) fn transcode(
    intermediate: &Path,
    format: OutputFormat,
    output_dir: &Path,
) -> Result<PathBuf, GenerationError> {
    fs::create_dir_all(output_dir).map_err(|e| GenerationError::Transcode {
        format,
        reason: format!("cannot create output directory: {e}"),
    })?;

    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let artifact = output_dir.join(format!("output_{timestamp}.{}", format.extension()));

    match format {
        OutputFormat::Wav => {
            fs::copy(intermediate, &artifact).map_err(|e| GenerationError::Transcode {
                format,
                reason: e.to_string(),
            })?;
        }
        OutputFormat::Mp3 => run_ffmpeg(intermediate, &artifact, "libmp3lame", format)?,
        OutputFormat::Aac => run_ffmpeg(intermediate, &artifact, "aac", format)?,
    }

    Ok(artifact)
}

fn run_ffmpeg(
    input: &Path,
    output: &Path,
    codec: &str,
    format: OutputFormat,
) -> Result<(), GenerationError> {
    let result = Command::new("ffmpeg")
        .arg("-y")
        .arg("-i")
        .arg(input)
        .args(["-c:a", codec, "-b:a", ENCODE_BITRATE])
        .arg(output)
        .output();

    let output_data = result.map_err(|e| {
        let reason = if e.kind() == std::io::ErrorKind::NotFound {
            "ffmpeg not found. Install: Linux: `sudo apt-get install ffmpeg`, \
             macOS: `brew install ffmpeg`, Windows: https://ffmpeg.org/download.html"
                .to_string()
        } else {
            e.to_string()
        };
        GenerationError::Transcode { format, reason }
    })?;

    if !output_data.status.success() {
        let stderr = String::from_utf8_lossy(&output_data.stderr);
        return Err(GenerationError::Transcode {
            format,
            reason: format!(
                "ffmpeg exited with code {:?}: {}",
                output_data.status.code(),
                stderr.trim()
            ),
        });
    }

    Ok(())
}
