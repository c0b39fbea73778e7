use std::borrow::Cow;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use super::model::KokoroError;

/// Where to find espeak-ng.
///
/// Both fields default to `None`, meaning the system `espeak-ng` from PATH
/// and its default data directory. Set them when bundling espeak-ng with an
/// application; bundled resource directories may be read-only, which is fine
/// here since phonemization never writes.
#[derive(Debug, Clone, Default)]
pub struct EspeakConfig {
    /// Explicit espeak-ng binary path.
    pub bin_path: Option<PathBuf>,
    /// Explicit espeak-ng data directory (the parent of `espeak-ng-data`).
    pub data_path: Option<PathBuf>,
}

/// The output of phonemization: token ids for the model and the IPA trace
/// they were derived from.
#[derive(Debug, Clone)]
pub struct Phonemes {
    /// Kokoro token ids. Characters missing from the vocab are dropped.
    pub ids: Vec<i64>,
    /// Human-readable IPA string, kept for progress reporting.
    pub ipa: String,
}

/// Map a voice name prefix to an espeak-ng language code.
///
/// Voice names follow the pattern `{prefix}_{name}` where the two-character
/// prefix encodes the language.
pub fn voice_lang(voice: &str) -> &'static str {
    let prefix = &voice[..voice.len().min(2)];
    match prefix {
        "af" | "am" => "en-us",
        "bf" | "bm" => "en-gb",
        "ef" | "em" => "es",
        "ff" => "fr",
        "hf" | "hm" => "hi",
        "if" | "im" => "it",
        "jf" | "jm" => "ja",
        "pf" | "pm" => "pt-br",
        "zf" | "zm" => "cmn",
        _ => "en-us",
    }
}

/// Convert text to Kokoro phoneme token IDs via espeak-ng.
///
/// Text is split at boundary punctuation (which espeak-ng would otherwise
/// swallow), the text segments are phonemized in one batched subprocess
/// call, and the punctuation is re-inserted between them.
pub fn phonemize(
    text: &str,
    lang: &str,
    vocab: &HashMap<char, i64>,
    espeak: &EspeakConfig,
) -> Result<Phonemes, KokoroError> {
    let parts = split_text_parts(text);
    if parts.is_empty() {
        return Ok(Phonemes {
            ids: Vec::new(),
            ipa: String::new(),
        });
    }

    let text_segments: Vec<&str> = parts
        .iter()
        .filter_map(|part| match part {
            TextPart::Text(segment) => Some(segment.as_str()),
            TextPart::Punct(_) => None,
        })
        .collect();

    let segment_ipa = if text_segments.is_empty() {
        Vec::new()
    } else {
        ipa_for_segments(&text_segments, lang, espeak)?
    };

    let mut ids = Vec::new();
    let mut ipa = String::new();
    let mut segment_index = 0usize;
    for part in parts {
        match part {
            TextPart::Text(_) => {
                if let Some(line) = segment_ipa.get(segment_index) {
                    if !ipa.is_empty() && !ipa.ends_with(char::is_whitespace) {
                        ipa.push(' ');
                    }
                    ipa.push_str(line);
                    ids.extend(ipa_to_ids(line, vocab));
                }
                segment_index += 1;
            }
            TextPart::Punct(ch) => {
                if let Some(&id) = vocab.get(&ch) {
                    ids.push(id);
                }
                ipa.push(ch);
            }
        }
    }

    Ok(Phonemes { ids, ipa })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TextPart {
    Text(String),
    Punct(char),
}

fn split_text_parts(text: &str) -> Vec<TextPart> {
    let mut parts = Vec::new();
    let mut current = String::new();

    for (idx, ch) in text.char_indices() {
        let ch_len = ch.len_utf8();
        if let Some(punct) = map_boundary_punctuation(ch) {
            if !is_numeric_connector_between_digits(text, idx, ch_len, ch) {
                flush_text_part(&mut parts, &mut current);
                parts.push(TextPart::Punct(punct));
                continue;
            }
        }

        if ch.is_whitespace() {
            if !current.is_empty() && !current.ends_with(' ') {
                current.push(' ');
            }
            continue;
        }

        current.push(ch);
    }

    flush_text_part(&mut parts, &mut current);
    parts
}

fn flush_text_part(parts: &mut Vec<TextPart>, current: &mut String) {
    let trimmed = current.trim();
    if trimmed.is_empty() {
        current.clear();
        return;
    }
    parts.push(TextPart::Text(trimmed.to_string()));
    current.clear();
}

fn map_boundary_punctuation(ch: char) -> Option<char> {
    match ch {
        '.' | '!' | '?' | ',' | ';' | ':' | '—' | '…' | '"' | '(' | ')' | '\u{201c}'
        | '\u{201d}' => Some(ch),
        '\n' | '\r' => Some('.'),
        _ => None,
    }
}

fn is_numeric_connector_between_digits(text: &str, idx: usize, ch_len: usize, ch: char) -> bool {
    if !matches!(ch, '.' | ',') {
        return false;
    }

    let prev = text[..idx].chars().next_back();
    let next = text[idx + ch_len..].chars().next();

    matches!(
        (prev, next),
        (Some(left), Some(right)) if left.is_ascii_digit() && right.is_ascii_digit()
    )
}

/// One IPA line per input segment.
fn ipa_for_segments(
    segments: &[&str],
    lang: &str,
    espeak: &EspeakConfig,
) -> Result<Vec<String>, KokoroError> {
    let batched_input = segments.join("\n");
    let output = run_espeak(&batched_input, lang, espeak)?;
    let lines: Vec<String> = output
        .lines()
        .map(|line| line.trim().to_string())
        .collect();

    // espeak-ng should emit one line per input line for stdin mode.
    // If this assumption breaks, fall back to per-segment invocation.
    if lines.len() != segments.len() {
        return segments
            .iter()
            .map(|segment| {
                let output = run_espeak(segment, lang, espeak)?;
                let joined = output
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ");
                Ok(joined)
            })
            .collect();
    }

    Ok(lines)
}

fn run_espeak(input: &str, lang: &str, espeak: &EspeakConfig) -> Result<String, KokoroError> {
    let program = espeak
        .bin_path
        .as_ref()
        .map(|path| path.as_os_str().to_os_string())
        .unwrap_or_else(|| "espeak-ng".into());

    let mut command = Command::new(program);
    command.args(["--ipa", "--stdin", "-q", "-v", lang]);
    if let Some(data_path) = &espeak.data_path {
        command.arg("--path").arg(data_path);
    }

    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                KokoroError::EspeakNotFound
            } else {
                KokoroError::Io(e)
            }
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        // espeak-ng treats stdin as line-oriented input. Without a final line
        // terminator, the last token can be under-processed. Enforce a
        // canonical, newline-terminated payload as part of this I/O contract.
        let stdin_payload = canonicalize_espeak_stdin_payload(input);
        stdin
            .write_all(stdin_payload.as_bytes())
            .map_err(KokoroError::Io)?;
    }

    let output = child.wait_with_output().map_err(KokoroError::Io)?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(KokoroError::PhonemizerFailed(format!(
            "espeak-ng exited with code {:?}: {stderr}",
            output.status.code()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn canonicalize_espeak_stdin_payload(input: &str) -> Cow<'_, str> {
    if input.ends_with('\n') {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(format!("{input}\n"))
    }
}

fn ipa_to_ids(ipa: &str, vocab: &HashMap<char, i64>) -> Vec<i64> {
    let mut ids = Vec::new();
    for line in ipa.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        for ch in line.chars() {
            if ch == '_' {
                continue;
            }
            if let Some(&id) = vocab.get(&ch) {
                ids.push(id);
            }
        }
    }
    ids
}
