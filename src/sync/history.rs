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

//! Per-peer sync history: which relative paths have already been fetched
//! from a given peer, so a re-run never re-downloads them (§4.F item 4).
//!
//! Line format and corruption handling mirror
//! `sanitize::secrets::SecretStore`: one `<path>` per line, and (like the
//! teacher's `networking::peer_registry`) a line that doesn't round-trip
//! disables history tracking for this peer's run rather than aborting it.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// History file errors.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Underlying I/O failure.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// The set of relative paths already fetched from one peer, backed by an
/// append-only (but periodically rewritten) file.
pub struct SyncHistory {
    path: PathBuf,
    seen: BTreeSet<String>,
    /// Set if a line failed to parse on load; history tracking is
    /// disabled for the run (every path is treated as unseen) rather than
    /// failing the whole sync.
    pub corrupt: bool,
}

impl SyncHistory {
    /// Load the history file at `path`, or start empty if it doesn't
    /// exist yet.
    pub fn open(path: &Path) -> Result<Self, HistoryError> {
        let mut history = Self {
            path: path.to_path_buf(),
            seen: BTreeSet::new(),
            corrupt: false,
        };
        if !path.exists() {
            return Ok(history);
        }
        let content = std::fs::read_to_string(path)?;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.contains('\u{0}') || line.contains('\n') {
                history.corrupt = true;
                history.seen.clear();
                break;
            }
            history.seen.insert(line.to_string());
        }
        Ok(history)
    }

    /// Whether `relative_path` has already been recorded as fetched.
    pub fn has_seen(&self, relative_path: &str) -> bool {
        if self.corrupt {
            return false;
        }
        self.seen.contains(relative_path)
    }

    /// Record `relative_path` as fetched, appending to disk immediately
    /// so a crash mid-batch never loses already-written history.
    pub fn record(&mut self, relative_path: &str) -> Result<(), HistoryError> {
        self.seen.insert(relative_path.to_string());
        if self.corrupt {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(f, "{relative_path}")?;
        let _ = f.sync_all();
        Ok(())
    }

    /// Add every path in `new_paths` and rewrite the file once, atomically
    /// (§4.F item 4: the history file is only ever rewritten as a whole
    /// after a sync batch completes, never appended to mid-batch).
    pub fn extend_and_persist(&mut self, new_paths: &[String]) -> Result<(), HistoryError> {
        self.seen.extend(new_paths.iter().cloned());
        self.compact(|_| true)
    }

    /// Rewrite the history file from the in-memory set, e.g. to drop
    /// entries for paths that have since aged out of the recent tree.
    pub fn compact(&mut self, keep: impl Fn(&str) -> bool) -> Result<(), HistoryError> {
        self.seen.retain(|p| keep(p.as_str()));
        let tmp = self.path.with_extension("tmp");
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        {
            let mut f = std::fs::File::create(&tmp)?;
            for p in &self.seen {
                writeln!(f, "{p}")?;
            }
            let _ = f.sync_all();
        }
        std::fs::rename(&tmp, &self.path)?;
        self.corrupt = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn unseen_paths_are_reported_unseen() {
        let dir = tempdir().unwrap();
        let history = SyncHistory::open(&dir.path().join("history")).unwrap();
        assert!(!history.has_seen("relay-descriptors/consensuses/x"));
    }

    #[test]
    fn recorded_paths_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history");
        let mut history = SyncHistory::open(&path).unwrap();
        history.record("a/b").unwrap();
        history.record("c/d").unwrap();

        let reopened = SyncHistory::open(&path).unwrap();
        assert!(reopened.has_seen("a/b"));
        assert!(reopened.has_seen("c/d"));
        assert!(!reopened.has_seen("e/f"));
    }

    #[test]
    fn compact_drops_entries_the_predicate_rejects() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history");
        let mut history = SyncHistory::open(&path).unwrap();
        history.record("keep").unwrap();
        history.record("drop").unwrap();
        history.compact(|p| p == "keep").unwrap();

        let reopened = SyncHistory::open(&path).unwrap();
        assert!(reopened.has_seen("keep"));
        assert!(!reopened.has_seen("drop"));
    }
}
