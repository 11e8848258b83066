//! Typed server settings.
//!
//! Settings bind the raw key/value pairs onto typed fields. A missing,
//! unparsable, or out-of-range value falls back to its default with a
//! warning on stderr; only an unreadable or syntactically broken file is
//! an error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::parser::{self, ConfigError};
use crate::cache::codec::CodecKind;
use crate::cache::policy::ReplacementPolicy;

/// Everything the server needs to start.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Entry cap of the store.
    pub max_file_count: usize,
    /// Byte cap of the store.
    pub max_bytes: usize,
    /// Number of worker threads.
    pub pool_size: usize,
    /// Listen backlog at the socket.
    pub backlog: i32,
    /// Capacity of the dispatcher→worker queue.
    pub task_queue_capacity: usize,
    /// Capacity of the log queue.
    pub log_queue_capacity: usize,
    /// Victim-selection policy.
    pub replacement_policy: ReplacementPolicy,
    /// UNIX-domain socket path.
    pub socket_path: PathBuf,
    /// Operation-log output file.
    pub log_path: PathBuf,
    /// Content codec applied at the store boundary.
    pub compression: CodecKind,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_file_count: 100,
            max_bytes: 10_000,
            pool_size: 10,
            backlog: 10,
            task_queue_capacity: 2048,
            log_queue_capacity: 2048,
            replacement_policy: ReplacementPolicy::Fifo,
            socket_path: PathBuf::from("/tmp/stashd.sk"),
            log_path: PathBuf::from("stashd-log.json"),
            compression: CodecKind::Identity,
        }
    }
}

impl Settings {
    /// Load settings from a config file, falling back per key.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let pairs = parser::parse_file(path)?;
        Ok(Self::from_pairs(&pairs))
    }

    /// Bind parsed key/value pairs onto settings.
    pub fn from_pairs(pairs: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        let mut settings = Self {
            max_file_count: bind_positive(pairs, "max-file-count", defaults.max_file_count),
            max_bytes: bind_positive(pairs, "max-bytes", defaults.max_bytes),
            pool_size: bind_positive(pairs, "pool-size", defaults.pool_size),
            backlog: bind_positive(pairs, "backlog", defaults.backlog as usize) as i32,
            task_queue_capacity: bind_positive(
                pairs,
                "task-queue-capacity",
                defaults.task_queue_capacity,
            ),
            log_queue_capacity: bind_positive(
                pairs,
                "log-queue-capacity",
                defaults.log_queue_capacity,
            ),
            replacement_policy: defaults.replacement_policy,
            socket_path: bind_path(pairs, "socket-path", defaults.socket_path),
            log_path: bind_path(pairs, "log-path", defaults.log_path),
            compression: defaults.compression,
        };

        if let Some(raw) = pairs.get("replacement-policy") {
            match raw.parse::<u64>().ok().and_then(ReplacementPolicy::from_code) {
                Some(policy) => settings.replacement_policy = policy,
                None => warn_fallback("replacement-policy", raw, "0 (FIFO)"),
            }
        }
        if let Some(raw) = pairs.get("compression") {
            match raw.parse::<u64>().ok().and_then(CodecKind::from_code) {
                Some(kind) => settings.compression = kind,
                None => warn_fallback("compression", raw, "0 (identity)"),
            }
        }

        for key in pairs.keys() {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                log::warn!("config: ignoring unknown option `{key}`");
            }
        }

        settings
    }
}

const KNOWN_KEYS: &[&str] = &[
    "max-file-count",
    "max-bytes",
    "pool-size",
    "backlog",
    "task-queue-capacity",
    "log-queue-capacity",
    "replacement-policy",
    "socket-path",
    "log-path",
    "compression",
];

fn bind_positive(pairs: &HashMap<String, String>, key: &str, default: usize) -> usize {
    let Some(raw) = pairs.get(key) else {
        return default;
    };
    match raw.parse::<usize>() {
        Ok(value) if value > 0 => value,
        _ => {
            warn_fallback(key, raw, &default.to_string());
            default
        }
    }
}

fn bind_path(pairs: &HashMap<String, String>, key: &str, default: PathBuf) -> PathBuf {
    match pairs.get(key) {
        Some(raw) if !raw.is_empty() => PathBuf::from(raw),
        Some(raw) => {
            warn_fallback(key, raw, &default.display().to_string());
            default
        }
        None => default,
    }
}

fn warn_fallback(key: &str, raw: &str, default: &str) {
    log::warn!("config: `{key} = {raw}` is out of range, using default {default}");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_input_yields_the_defaults() {
        let settings = Settings::from_pairs(&HashMap::new());
        let defaults = Settings::default();
        assert_eq!(settings.max_file_count, defaults.max_file_count);
        assert_eq!(settings.max_bytes, defaults.max_bytes);
        assert_eq!(settings.pool_size, defaults.pool_size);
        assert_eq!(settings.replacement_policy, ReplacementPolicy::Fifo);
        assert_eq!(settings.compression, CodecKind::Identity);
    }

    #[test]
    fn recognized_options_bind() {
        let settings = Settings::from_pairs(&pairs(&[
            ("max-file-count", "2"),
            ("max-bytes", "10"),
            ("pool-size", "3"),
            ("backlog", "64"),
            ("task-queue-capacity", "16"),
            ("log-queue-capacity", "32"),
            ("replacement-policy", "1"),
            ("socket-path", "/tmp/x.sk"),
            ("log-path", "/tmp/x.json"),
            ("compression", "1"),
        ]));
        assert_eq!(settings.max_file_count, 2);
        assert_eq!(settings.max_bytes, 10);
        assert_eq!(settings.pool_size, 3);
        assert_eq!(settings.backlog, 64);
        assert_eq!(settings.task_queue_capacity, 16);
        assert_eq!(settings.log_queue_capacity, 32);
        assert_eq!(settings.replacement_policy, ReplacementPolicy::Lru);
        assert_eq!(settings.socket_path, PathBuf::from("/tmp/x.sk"));
        assert_eq!(settings.log_path, PathBuf::from("/tmp/x.json"));
        assert_eq!(settings.compression, CodecKind::Rle);
    }

    #[test]
    fn out_of_range_values_fall_back() {
        let settings = Settings::from_pairs(&pairs(&[
            ("pool-size", "0"),
            ("max-bytes", "-5"),
            ("replacement-policy", "9"),
            ("compression", "banana"),
        ]));
        let defaults = Settings::default();
        assert_eq!(settings.pool_size, defaults.pool_size);
        assert_eq!(settings.max_bytes, defaults.max_bytes);
        assert_eq!(settings.replacement_policy, defaults.replacement_policy);
        assert_eq!(settings.compression, defaults.compression);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let settings = Settings::from_pairs(&pairs(&[("frobnicate", "yes")]));
        assert_eq!(settings.max_bytes, Settings::default().max_bytes);
    }
}
