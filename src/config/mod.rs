// Copyright (c) 2026 The Collector Authors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

//! Configuration (component J, §4.J): a flat `.properties`-style
//! key/value file, typed accessors, and optional filesystem-watch
//! hot-reload.
//!
//! The watcher is grounded on `Lowband21-ferrex/ferrex-core`'s
//! `scan::fs_watch` module: a `notify::RecommendedWatcher` built with a
//! closure that forwards events across a channel, rather than blocking
//! the calling thread on `notify`'s own event loop.

pub mod watch;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use watch::{spawn_hot_reload, ConfigWatcher};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// Line `N` is not a valid `key = value` (or `key value`) pair.
    #[error("malformed line {0}: {1:?}")]
    MalformedLine(usize, String),
    /// A required key was absent.
    #[error("missing required key {0:?}")]
    MissingKey(String),
    /// A key's value could not be parsed as the requested type.
    #[error("key {0:?} has invalid value {1:?} for type {2}")]
    InvalidValue(String, String, &'static str),
}

/// Which upstream a module reads descriptors from. Multiple sources may
/// be active for one module at once (§4.J, `Sources = Remote, Sync`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceType {
    /// Fetch directly from directory authorities / bridge authorities.
    Remote,
    /// Mirror from another CollecTor instance's published tree
    /// (component F).
    Sync,
    /// Read from a local directory a co-located process writes into
    /// (e.g. a local Tor relay's data directory).
    Local,
    /// Read from this instance's own on-disk cache of a prior fetch,
    /// without re-fetching (§4.J).
    Cache,
}

impl std::str::FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Remote" => Ok(SourceType::Remote),
            "Sync" => Ok(SourceType::Sync),
            "Local" => Ok(SourceType::Local),
            "Cache" => Ok(SourceType::Cache),
            other => Err(format!("unknown source type {other:?}")),
        }
    }
}

/// An immutable, parsed configuration snapshot. Hot-reload produces a
/// new instance wrapped in a fresh `Arc`; modules hold an `Arc` they
/// refresh only between ticks, never mid-tick (§10 ambient stack).
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    values: BTreeMap<String, String>,
}

impl ConfigSnapshot {
    /// Parse a `.properties`-style file: `key = value` or `key value`
    /// per line, `#`-prefixed comment lines and blank lines ignored.
    /// Repeated keys keep the last occurrence, matching the teacher's
    /// "later wins" convention for layered config.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse from an in-memory string (used by `load` and directly by
    /// tests).
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut values = BTreeMap::new();
        for (idx, raw_line) in content.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = split_key_value(line)
                .ok_or_else(|| ConfigError::MalformedLine(idx + 1, raw_line.to_string()))?;
            values.insert(key.to_string(), value.to_string());
        }
        Ok(Self { values })
    }

    /// Raw string value for `key`.
    pub fn string(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    /// Raw string value for `key`, or `ConfigError::MissingKey`.
    pub fn require_string(&self, key: &str) -> Result<&str, ConfigError> {
        self.string(key).ok_or_else(|| ConfigError::MissingKey(key.to_string()))
    }

    /// Comma-separated list, trimmed, empty entries dropped.
    pub fn string_list(&self, key: &str) -> Vec<String> {
        self.string(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Value interpreted as a filesystem path.
    pub fn path(&self, key: &str) -> Option<PathBuf> {
        self.string(key).map(PathBuf::from)
    }

    /// A single URL value (syntactic validation only: must parse as
    /// `scheme://...`).
    pub fn url(&self, key: &str) -> Result<Option<String>, ConfigError> {
        match self.string(key) {
            None => Ok(None),
            Some(v) => {
                if v.contains("://") {
                    Ok(Some(v.to_string()))
                } else {
                    Err(ConfigError::InvalidValue(key.to_string(), v.to_string(), "url"))
                }
            }
        }
    }

    /// Comma-separated list of URLs.
    pub fn url_list(&self, key: &str) -> Result<Vec<String>, ConfigError> {
        self.string_list(key)
            .into_iter()
            .map(|v| {
                if v.contains("://") {
                    Ok(v)
                } else {
                    Err(ConfigError::InvalidValue(key.to_string(), v, "url"))
                }
            })
            .collect()
    }

    /// `true`/`false`, case-insensitive.
    pub fn bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        match self.string(key) {
            None => Ok(None),
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                _ => Err(ConfigError::InvalidValue(key.to_string(), v.to_string(), "bool")),
            },
        }
    }

    /// An integer, with the literal `inf` mapping to `i64::MAX` (used by
    /// retention-period keys meaning "never expire").
    pub fn int_or_inf(&self, key: &str) -> Result<Option<i64>, ConfigError> {
        match self.string(key) {
            None => Ok(None),
            Some(v) if v.eq_ignore_ascii_case("inf") => Ok(Some(i64::MAX)),
            Some(v) => v
                .parse::<i64>()
                .map(Some)
                .map_err(|_| ConfigError::InvalidValue(key.to_string(), v.to_string(), "int-or-inf")),
        }
    }

    /// A plain `i64`.
    pub fn long(&self, key: &str) -> Result<Option<i64>, ConfigError> {
        match self.string(key) {
            None => Ok(None),
            Some(v) => v
                .parse::<i64>()
                .map(Some)
                .map_err(|_| ConfigError::InvalidValue(key.to_string(), v.to_string(), "long")),
        }
    }

    /// Comma-separated `SourceType` set, e.g. `Remote, Sync`.
    pub fn source_types(&self, key: &str) -> Result<Vec<SourceType>, ConfigError> {
        self.string_list(key)
            .into_iter()
            .map(|v| v.parse::<SourceType>().map_err(|_| ConfigError::InvalidValue(key.to_string(), v, "source-type")))
            .collect()
    }
}

fn split_key_value(line: &str) -> Option<(&str, &str)> {
    if let Some(idx) = line.find('=') {
        let (k, v) = line.split_at(idx);
        let key = k.trim();
        let value = v[1..].trim();
        if key.is_empty() {
            return None;
        }
        return Some((key, value));
    }
    let mut parts = line.splitn(2, char::is_whitespace);
    let key = parts.next()?.trim();
    let value = parts.next().unwrap_or("").trim();
    if key.is_empty() {
        None
    } else {
        Some((key, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_equals_and_whitespace_separated_lines() {
        let cfg = ConfigSnapshot::parse("Foo = bar\nBaz qux\n# comment\n\nEmpty=\n").unwrap();
        assert_eq!(cfg.string("Foo"), Some("bar"));
        assert_eq!(cfg.string("Baz"), Some("qux"));
        assert_eq!(cfg.string("Empty"), Some(""));
    }

    #[test]
    fn later_duplicate_key_wins() {
        let cfg = ConfigSnapshot::parse("Foo = 1\nFoo = 2\n").unwrap();
        assert_eq!(cfg.string("Foo"), Some("2"));
    }

    #[test]
    fn int_or_inf_accepts_inf_case_insensitively() {
        let cfg = ConfigSnapshot::parse("Retention = Inf\n").unwrap();
        assert_eq!(cfg.int_or_inf("Retention").unwrap(), Some(i64::MAX));
    }

    #[test]
    fn int_or_inf_parses_plain_numbers() {
        let cfg = ConfigSnapshot::parse("Retention = 42\n").unwrap();
        assert_eq!(cfg.int_or_inf("Retention").unwrap(), Some(42));
    }

    #[test]
    fn bool_rejects_non_boolean_values() {
        let cfg = ConfigSnapshot::parse("Flag = maybe\n").unwrap();
        assert!(cfg.bool("Flag").is_err());
    }

    #[test]
    fn source_types_parses_comma_separated_list() {
        let cfg = ConfigSnapshot::parse("Sources = Remote, Sync\n").unwrap();
        let types = cfg.source_types("Sources").unwrap();
        assert_eq!(types, vec![SourceType::Remote, SourceType::Sync]);
    }

    #[test]
    fn source_types_accepts_cache() {
        let cfg = ConfigSnapshot::parse("Sources = Cache\n").unwrap();
        assert_eq!(cfg.source_types("Sources").unwrap(), vec![SourceType::Cache]);
    }

    #[test]
    fn missing_key_is_none_not_error() {
        let cfg = ConfigSnapshot::parse("").unwrap();
        assert_eq!(cfg.string("Missing"), None);
        assert!(cfg.require_string("Missing").is_err());
    }
}
