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

//! The monthly secret store backing the bridge sanitizer (§4.D).
//!
//! One append-only text file, one `YYYY-MM,<hex>` line per month. Line
//! validation follows the same "one bad line poisons the whole file"
//! shape as the teacher's `networking::peer_registry` validation, and
//! writes reuse the teacher's atomic-write-then-rename idiom from
//! `core::security::keystore`.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroize;

/// Current on-disk secret length, in bytes. Legacy 31- and 50-byte
/// secrets are accepted read-only (spec.md §9 Open Question, resolved in
/// SPEC_FULL.md §4): a month is only ever re-generated at the current
/// length, never widened in place.
pub const CURRENT_SECRET_LEN: usize = 83;
const LEGACY_SECRET_LENS: [usize; 2] = [31, 50];

/// Secret store errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecretStoreError {
    /// The file could not be read or written.
    #[error("io: {0}")]
    Io(String),
    /// At least one line failed validation; scrubbing is disabled for the
    /// current run (§4.D item 1).
    #[error("secrets file corrupt at line {0}")]
    Corrupt(usize),
}

/// Lifecycle state of a single month's secret, per §3's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretState {
    /// Not yet generated.
    Absent,
    /// Generated in-process, not yet (and possibly never) written to disk.
    Generated,
    /// Written to disk; safe to reuse across process restarts.
    Persisted,
    /// Persisted and within the retention horizon.
    Live,
    /// Removed from disk by `finalize()`.
    Pruned,
}

fn line_value_len_is_valid(hex_len: usize) -> bool {
    let byte_len = hex_len / 2;
    hex_len % 2 == 0
        && (byte_len == CURRENT_SECRET_LEN || LEGACY_SECRET_LENS.contains(&byte_len))
}

/// The append-only monthly secret store.
pub struct SecretStore {
    path: PathBuf,
    secrets: BTreeMap<String, Vec<u8>>,
    /// Months whose secret has been persisted to disk (vs. generated
    /// in-memory only because they fall outside the retention horizon).
    persisted: std::collections::BTreeSet<String>,
    /// Set once a malformed line has been observed; scrubbing is disabled
    /// crate-wide for the remainder of this process run (§4.D item 1).
    pub corrupt: bool,
}

impl SecretStore {
    /// Open (or create) the secret store at `path`, validating every line.
    ///
    /// A malformed line sets `corrupt = true` rather than failing outright:
    /// the caller is expected to check `corrupt` and skip scrubbing for the
    /// run while still allowing the rest of the module to proceed.
    pub fn open(path: &Path) -> Result<Self, SecretStoreError> {
        let mut store = Self {
            path: path.to_path_buf(),
            secrets: BTreeMap::new(),
            persisted: std::collections::BTreeSet::new(),
            corrupt: false,
        };

        if !path.exists() {
            return Ok(store);
        }

        let content = std::fs::read_to_string(path).map_err(|e| SecretStoreError::Io(e.to_string()))?;
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(line) {
                Some((month, bytes)) => {
                    store.persisted.insert(month.clone());
                    store.secrets.insert(month, bytes);
                }
                None => {
                    store.corrupt = true;
                    return Err(SecretStoreError::Corrupt(idx + 1));
                }
            }
        }
        Ok(store)
    }

    /// Get the secret bytes for `month` (`YYYY-MM`), if already known.
    pub fn get(&self, month: &str) -> Option<&[u8]> {
        self.secrets.get(month).map(|v| v.as_slice())
    }

    /// State of a given month's secret.
    pub fn state(&self, month: &str) -> SecretState {
        if !self.secrets.contains_key(month) {
            SecretState::Absent
        } else if self.persisted.contains(month) {
            SecretState::Persisted
        } else {
            SecretState::Generated
        }
    }

    /// Get the secret for `month`, generating a fresh 83-byte CSPRNG
    /// secret if absent. If `within_retention` is true the new secret is
    /// appended to disk before being returned; otherwise it is kept
    /// in-memory only for the remainder of this run (§4.D item 3).
    pub fn get_or_create(
        &mut self,
        month: &str,
        within_retention: bool,
    ) -> Result<&[u8], SecretStoreError> {
        if !self.secrets.contains_key(month) {
            let mut bytes = vec![0u8; CURRENT_SECRET_LEN];
            rand::thread_rng().fill_bytes(&mut bytes);
            if within_retention {
                self.append_to_disk(month, &bytes)?;
                self.persisted.insert(month.to_string());
            }
            self.secrets.insert(month.to_string(), bytes);
        }
        Ok(self.secrets.get(month).expect("just inserted"))
    }

    fn append_to_disk(&self, month: &str, bytes: &[u8]) -> Result<(), SecretStoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SecretStoreError::Io(e.to_string()))?;
        }
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| SecretStoreError::Io(e.to_string()))?;
        writeln!(f, "{month},{}", hex::encode(bytes)).map_err(|e| SecretStoreError::Io(e.to_string()))?;
        let _ = f.sync_all();
        Ok(())
    }

    /// Rewrite the file to exclude months strictly before `cutoff_month`
    /// (`YYYY-MM`, lexicographically comparable). Pruned months are
    /// dropped from memory too.
    pub fn finalize(&mut self, cutoff_month: &str) -> Result<usize, SecretStoreError> {
        let to_prune: Vec<String> = self
            .secrets
            .keys()
            .filter(|m| m.as_str() < cutoff_month)
            .cloned()
            .collect();
        for m in &to_prune {
            if let Some(mut bytes) = self.secrets.remove(m) {
                bytes.zeroize();
            }
            self.persisted.remove(m);
        }
        if to_prune.is_empty() {
            return Ok(0);
        }

        let tmp = self.path.with_extension("tmp");
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SecretStoreError::Io(e.to_string()))?;
        }
        {
            let mut f = std::fs::File::create(&tmp).map_err(|e| SecretStoreError::Io(e.to_string()))?;
            for (month, bytes) in &self.secrets {
                writeln!(f, "{month},{}", hex::encode(bytes))
                    .map_err(|e| SecretStoreError::Io(e.to_string()))?;
            }
            let _ = f.sync_all();
        }
        std::fs::rename(&tmp, &self.path).map_err(|e| SecretStoreError::Io(e.to_string()))?;
        Ok(to_prune.len())
    }
}

fn parse_line(line: &str) -> Option<(String, Vec<u8>)> {
    let (month, hex_part) = line.split_once(',')?;
    if month.len() != 7 || month.as_bytes()[4] != b'-' {
        return None;
    }
    if !line_value_len_is_valid(hex_part.len()) {
        return None;
    }
    let bytes = hex::decode(hex_part).ok()?;
    Some((month.to_string(), bytes))
}
