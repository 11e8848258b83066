//! The `key = value` config-file parser.
//!
//! One pair per line. Whitespace around keys and values is trimmed, blank
//! lines and `#` comments are skipped, and a repeated key keeps its last
//! value.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use thiserror::Error;

/// Config-file syntax or I/O problems.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] io::Error),

    #[error("line {line}: expected `key = value`, got `{text}`")]
    Syntax { line: usize, text: String },

    #[error("line {line}: empty key")]
    EmptyKey { line: usize },
}

/// Parse config text into a key/value map.
pub fn parse(content: &str) -> Result<HashMap<String, String>, ConfigError> {
    let mut pairs = HashMap::new();
    for (idx, raw) in content.lines().enumerate() {
        let line = idx + 1;
        let text = raw.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }

        let Some((key, value)) = text.split_once('=') else {
            return Err(ConfigError::Syntax {
                line,
                text: text.to_string(),
            });
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::EmptyKey { line });
        }
        pairs.insert(key.to_string(), value.trim().to_string());
    }
    Ok(pairs)
}

/// Read and parse a config file.
pub fn parse_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse(&content)
}
