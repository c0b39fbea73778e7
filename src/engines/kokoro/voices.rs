use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use super::model::{KokoroError, STYLE_DIM};
use crate::pipeline::VoiceCatalog;

/// The Kokoro voice archive: a `.npz` (numpy zip) file with one `.npy`
/// entry per voice.
///
/// Opening the archive only reads the entry names, which makes it cheap
/// enough to double as the voice catalog before any model is loaded. Voice
/// data itself is parsed lazily, one entry per request, and is not cached
/// across requests.
pub struct VoiceArchive {
    path: PathBuf,
    names: Vec<String>,
}

/// Style vectors for one voice, loaded for the duration of a request.
///
/// Each vector has [`STYLE_DIM`] floats; the index into the list
/// corresponds to the phoneme token count, enabling prosody-consistent
/// synthesis.
pub struct VoiceData {
    name: String,
    styles: Vec<[f32; STYLE_DIM]>,
}

impl VoiceData {
    /// The voice identifier this data belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The style vector for the given index, clamped to the valid range.
    pub fn style_for(&self, idx: usize) -> &[f32; STYLE_DIM] {
        let clamped = idx.min(self.styles.len().saturating_sub(1));
        &self.styles[clamped]
    }
}

impl VoiceArchive {
    /// Open a voice archive, reading only its entry names.
    pub fn open(path: &Path) -> Result<Self, KokoroError> {
        let file = File::open(path).map_err(|e| {
            KokoroError::VoiceParse(format!(
                "cannot open voice archive {}: {e}",
                path.display()
            ))
        })?;
        let zip = zip::ZipArchive::new(file)
            .map_err(|e| KokoroError::VoiceParse(format!("failed to open zip archive: {e}")))?;

        let mut names: Vec<String> = zip
            .file_names()
            .filter(|name| !name.ends_with('/'))
            .map(|name| name.trim_end_matches(".npy").to_string())
            .filter(|name| !name.is_empty())
            .collect();
        names.sort_unstable();

        log::info!("Voice archive lists {} voices", names.len());
        Ok(Self {
            path: path.to_path_buf(),
            names,
        })
    }

    /// All voice names in the archive, sorted.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Load and validate one voice's style vectors.
    pub fn load(&self, voice: &str) -> Result<VoiceData, KokoroError> {
        if !self.names.iter().any(|known| known == voice) {
            return Err(KokoroError::VoiceNotFound(voice.to_string()));
        }

        let file = File::open(&self.path)?;
        let mut zip = zip::ZipArchive::new(file)
            .map_err(|e| KokoroError::VoiceParse(format!("failed to open zip archive: {e}")))?;

        let entry_name = format!("{voice}.npy");
        let mut entry = zip
            .by_name(&entry_name)
            .map_err(|e| KokoroError::VoiceParse(format!("failed to read {entry_name}: {e}")))?;

        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .map_err(|e| KokoroError::VoiceParse(format!("failed to read {entry_name}: {e}")))?;

        let styles = parse_npy(&data, &entry_name)?;
        log::debug!("Loaded voice '{voice}' ({} style vectors)", styles.len());
        Ok(VoiceData {
            name: voice.to_string(),
            styles,
        })
    }
}

impl VoiceCatalog for VoiceArchive {
    fn list(&self) -> Vec<String> {
        self.names.clone()
    }

    fn contains(&self, voice_id: &str) -> bool {
        self.names.iter().any(|known| known == voice_id)
    }
}

/// Parse a numpy .npy file into a list of style vectors.
///
/// Expects a 2D float32 array of shape `[N, 256]` in little-endian format.
fn parse_npy(data: &[u8], name: &str) -> Result<Vec<[f32; STYLE_DIM]>, KokoroError> {
    // Verify numpy magic bytes: \x93NUMPY
    if data.len() < 10 {
        return Err(KokoroError::VoiceParse(format!(
            "{name}: file too short ({} bytes)",
            data.len()
        )));
    }

    if &data[0..6] != b"\x93NUMPY" {
        return Err(KokoroError::VoiceParse(format!(
            "{name}: invalid numpy magic bytes"
        )));
    }

    // major version at [6], minor at [7], header_len at [8..10] (little-endian u16)
    let header_len = u16::from_le_bytes([data[8], data[9]]) as usize;
    let data_offset = 10 + header_len;

    if data.len() < data_offset {
        return Err(KokoroError::VoiceParse(format!(
            "{name}: header truncated (need {data_offset} bytes, got {})",
            data.len()
        )));
    }

    let float_data = &data[data_offset..];
    if float_data.len() % 4 != 0 {
        return Err(KokoroError::VoiceParse(format!(
            "{name}: float data length {} is not a multiple of 4",
            float_data.len()
        )));
    }

    let n_floats = float_data.len() / 4;
    if n_floats % STYLE_DIM != 0 {
        return Err(KokoroError::VoiceParse(format!(
            "{name}: float count {n_floats} is not a multiple of {STYLE_DIM} (style vector dim)"
        )));
    }

    let n_styles = n_floats / STYLE_DIM;
    let mut result = Vec::with_capacity(n_styles);

    for i in 0..n_styles {
        let mut vec = [0f32; STYLE_DIM];
        for (j, slot) in vec.iter_mut().enumerate() {
            let offset = (i * STYLE_DIM + j) * 4;
            *slot = f32::from_le_bytes([
                float_data[offset],
                float_data[offset + 1],
                float_data[offset + 2],
                float_data[offset + 3],
            ]);
        }
        result.push(vec);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Serialize `n_styles` style vectors as a minimal .npy payload.
    fn npy_bytes(n_styles: usize) -> Vec<u8> {
        let header = format!(
            "{{'descr': '<f4', 'fortran_order': False, 'shape': ({n_styles}, {STYLE_DIM}), }}\n"
        );
        let mut data = Vec::new();
        data.extend_from_slice(b"\x93NUMPY");
        data.push(1);
        data.push(0);
        data.extend_from_slice(&(header.len() as u16).to_le_bytes());
        data.extend_from_slice(header.as_bytes());
        for i in 0..n_styles * STYLE_DIM {
            data.extend_from_slice(&(i as f32 * 0.001).to_le_bytes());
        }
        data
    }

    fn archive_with(entries: &[(&str, Vec<u8>)]) -> tempfile::NamedTempFile {
        let file = tempfile::Builder::new()
            .suffix(".bin")
            .tempfile()
            .expect("tempfile");
        let mut writer = zip::ZipWriter::new(file.reopen().expect("reopen"));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (name, bytes) in entries {
            writer
                .start_file(format!("{name}.npy"), options)
                .expect("start entry");
            writer.write_all(bytes).expect("write entry");
        }
        writer.finish().expect("finish zip");
        file
    }

    #[test]
    fn open_lists_voices_sorted_without_loading_them() {
        let file = archive_with(&[
            ("bf_emma", npy_bytes(2)),
            ("af_bella", npy_bytes(3)),
        ]);
        let archive = VoiceArchive::open(file.path()).expect("open archive");
        assert_eq!(archive.names(), ["af_bella", "bf_emma"]);
        assert!(archive.contains("af_bella"));
        assert!(!archive.contains("nonexistent_voice"));
    }

    #[test]
    fn load_parses_style_vectors() {
        let file = archive_with(&[("af_bella", npy_bytes(3))]);
        let archive = VoiceArchive::open(file.path()).expect("open archive");

        let voice = archive.load("af_bella").expect("load voice");
        assert_eq!(voice.name(), "af_bella");
        // Index follows token count, clamped at the last vector.
        assert_eq!(voice.style_for(0)[0], 0.0);
        assert_eq!(voice.style_for(1)[0], (STYLE_DIM as f32) * 0.001);
        let clamped = voice.style_for(500);
        assert_eq!(clamped[0], (2 * STYLE_DIM) as f32 * 0.001);
    }

    #[test]
    fn load_rejects_unknown_voices() {
        let file = archive_with(&[("af_bella", npy_bytes(1))]);
        let archive = VoiceArchive::open(file.path()).expect("open archive");
        assert!(matches!(
            archive.load("am_adam"),
            Err(KokoroError::VoiceNotFound(voice)) if voice == "am_adam"
        ));
    }

    #[test]
    fn corrupt_entries_fail_to_parse() {
        let bad_magic = b"NOTNUMPYJUNKJUNK".to_vec();
        let mut truncated = npy_bytes(1);
        truncated.truncate(12);
        let mut misaligned = npy_bytes(1);
        misaligned.extend_from_slice(&[0u8; 6]);

        for payload in [bad_magic, truncated, misaligned] {
            let file = archive_with(&[("af_bella", payload)]);
            let archive = VoiceArchive::open(file.path()).expect("open archive");
            assert!(matches!(
                archive.load("af_bella"),
                Err(KokoroError::VoiceParse(_))
            ));
        }
    }

    #[test]
    fn wrong_vector_width_is_rejected() {
        // 100 floats is not a multiple of STYLE_DIM.
        let header = "{'descr': '<f4', 'shape': (1, 100), }\n";
        let mut data = Vec::new();
        data.extend_from_slice(b"\x93NUMPY");
        data.push(1);
        data.push(0);
        data.extend_from_slice(&(header.len() as u16).to_le_bytes());
        data.extend_from_slice(header.as_bytes());
        data.extend_from_slice(&[0u8; 400]);

        let file = archive_with(&[("af_bella", data)]);
        let archive = VoiceArchive::open(file.path()).expect("open archive");
        assert!(matches!(
            archive.load("af_bella"),
            Err(KokoroError::VoiceParse(_))
        ));
    }

    #[test]
    fn missing_archive_is_a_parse_error() {
        let err = VoiceArchive::open(Path::new("/nonexistent/voices-v1.0.bin"))
            .expect_err("missing file");
        assert!(matches!(err, KokoroError::VoiceParse(_)));
    }
}
