use std::collections::HashMap;
use std::path::Path;

use super::model::KokoroError;

/// Load the Kokoro vocabulary from a config.json file.
///
/// The file must contain a `"vocab"` field mapping single-character strings
/// to integer token IDs. The checkpoint distribution always ships one, so a
/// missing or malformed file is a configuration error rather than something
/// to paper over with a fallback table.
pub fn load_vocab(config_path: &Path) -> Result<HashMap<char, i64>, KokoroError> {
    let content = std::fs::read_to_string(config_path).map_err(|e| {
        KokoroError::Config(format!("cannot read {}: {e}", config_path.display()))
    })?;
    let json: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| KokoroError::Config(format!("Failed to parse JSON: {e}")))?;

    let vocab_obj = json
        .get("vocab")
        .ok_or_else(|| KokoroError::Config("Missing 'vocab' field".to_string()))?
        .as_object()
        .ok_or_else(|| KokoroError::Config("'vocab' must be an object".to_string()))?;

    let mut map = HashMap::new();
    for (k, v) in vocab_obj {
        let ch = k
            .chars()
            .next()
            .ok_or_else(|| KokoroError::Config(format!("Empty key in vocab: {k:?}")))?;
        let id = v
            .as_i64()
            .ok_or_else(|| KokoroError::Config(format!("Non-integer vocab value for key {k:?}")))?;
        map.insert(ch, id);
    }

    Ok(map)
}
