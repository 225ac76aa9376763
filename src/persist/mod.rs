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

//! Persistence writer (component B): atomic archive/recent writes with
//! annotation handling (§4.B).
//!
//! Atomic-write shape is grounded on the teacher's
//! `core::security::keystore::atomic_write_private`: write to a `.tmp`
//! sibling, best-effort `fsync`, then rename into place.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::descriptor::{default_annotation, split_annotation};

/// Persistence writer errors (§7).
#[derive(Debug, Error)]
pub enum PersistError {
    /// Underlying filesystem I/O failure.
    #[error("io: {0}")]
    Io(#[from] io::Error),
    /// Caller asked for an unsupported `OpenOption` combination (a bug).
    #[error("invalid write option")]
    InvalidOption,
}

/// Whether a write may append to, must create, or should replace an
/// existing target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail (without touching anything) if the target already exists.
    CreateNew,
    /// Append bytes to the target, via a `.tmp` copy-then-append-then-rename.
    Append,
}

/// The result of a single-file write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Bytes were written (archive: as a new file; recent: created or appended).
    Written,
    /// The target already existed; nothing was written (not an error).
    AlreadyPresent,
}

/// Prefix `bytes` with the kind-default annotation if they don't already
/// start with one (invariant 3).
fn with_annotation(kind: crate::descriptor::Kind, bytes: &[u8]) -> Vec<u8> {
    let (existing, _) = split_annotation(bytes);
    if existing.is_some() {
        return bytes.to_vec();
    }
    let mut out = default_annotation(kind).into_bytes();
    out.extend_from_slice(bytes);
    out
}

fn atomic_create_new(path: &Path, bytes: &[u8]) -> Result<WriteOutcome, PersistError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(mut f) => {
            use std::io::Write;
            f.write_all(bytes)?;
            let _ = f.sync_all();
            Ok(WriteOutcome::Written)
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(WriteOutcome::AlreadyPresent),
        Err(e) => Err(e.into()),
    }
}

fn atomic_append(path: &Path, bytes: &[u8]) -> Result<WriteOutcome, PersistError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = tmp_sibling(path);

    // If the target exists, copy it to `.tmp` first so the append happens
    // on the copy, then rename the copy back over the target (§4.B).
    let existed = path.exists();
    if existed {
        std::fs::copy(path, &tmp)?;
    }

    {
        use std::io::Write;
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&tmp)?;
        f.write_all(bytes)?;
        let _ = f.sync_all();
    }

    std::fs::rename(&tmp, path)?;
    Ok(WriteOutcome::Written)
}

/// Path of the `.tmp` sibling used during an append write.
fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    match path.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

/// Store a descriptor's bytes at `archive_path` using create-new semantics
/// (invariant 1: archive is never overwritten).
pub fn store_archive(
    kind: crate::descriptor::Kind,
    archive_path: &Path,
    raw: &[u8],
) -> Result<WriteOutcome, PersistError> {
    let bytes = with_annotation(kind, raw);
    atomic_create_new(archive_path, &bytes)
}

/// Store a descriptor's bytes at `recent_path`, appending if `mode` is
/// `Append` and the kind permits it, otherwise create-new.
pub fn store_recent(
    kind: crate::descriptor::Kind,
    recent_path: &Path,
    raw: &[u8],
    mode: WriteMode,
) -> Result<WriteOutcome, PersistError> {
    let bytes = with_annotation(kind, raw);
    match mode {
        WriteMode::CreateNew => atomic_create_new(recent_path, &bytes),
        WriteMode::Append => atomic_append(recent_path, &bytes),
    }
}

/// Store both archive and recent copies of a descriptor. Archive is
/// attempted first; recent is only attempted if archive actually wrote a
/// new file (§4.B rationale: archive is the source of truth).
pub fn store_both(
    kind: crate::descriptor::Kind,
    archive_path: &Path,
    recent_path: &Path,
    raw: &[u8],
) -> Result<(WriteOutcome, Option<WriteOutcome>), PersistError> {
    let archive_outcome = store_archive(kind, archive_path, raw)?;
    if archive_outcome != WriteOutcome::Written {
        return Ok((archive_outcome, None));
    }
    let mode = if kind.recent_is_append() {
        WriteMode::Append
    } else {
        WriteMode::CreateNew
    };
    let recent_outcome = store_recent(kind, recent_path, raw, mode)?;
    Ok((archive_outcome, Some(recent_outcome)))
}

/// Walk `root` and rename every `*.tmp` file to its stripped name,
/// deleting any pre-existing target first, so concurrent readers never
/// observe a partially written file.
pub fn promote_temporaries(root: &Path) -> Result<usize, PersistError> {
    let mut promoted = 0usize;
    for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("tmp") {
            continue;
        }
        let target = path.with_extension("");
        if target.exists() {
            std::fs::remove_file(&target)?;
        }
        std::fs::rename(path, &target)?;
        promoted += 1;
    }
    Ok(promoted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Kind;
    use tempfile::tempdir;

    #[test]
    fn create_new_twice_returns_already_present() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a/b/file");
        let first = store_archive(Kind::ExitList, &path, b"hello").unwrap();
        assert_eq!(first, WriteOutcome::Written);
        let second = store_archive(Kind::ExitList, &path, b"world").unwrap();
        assert_eq!(second, WriteOutcome::AlreadyPresent);
        // content from the first write is untouched
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.ends_with("hello"));
    }

    #[test]
    fn writes_prepend_default_annotation_when_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file");
        store_archive(Kind::ExitList, &path, b"ExitNode ABCD\n").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("@type tordnsel 1.0\n"));
    }

    #[test]
    fn writes_do_not_duplicate_existing_annotation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file");
        store_archive(Kind::ExitList, &path, b"@type tordnsel 1.0\nExitNode ABCD\n").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("@type").count(), 1);
    }

    #[test]
    fn append_mode_appends_to_existing_recent_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("recent-file");
        store_recent(Kind::RelayConsensus, &path, b"@type x 1.0\nfirst\n", WriteMode::Append).unwrap();
        store_recent(Kind::RelayConsensus, &path, b"@type x 1.0\nsecond\n", WriteMode::Append).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("@type").count(), 2);
        assert!(content.contains("first"));
        assert!(content.contains("second"));
    }

    #[test]
    fn store_both_skips_recent_when_archive_already_present() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("archive/file");
        let recent = dir.path().join("recent/file");
        let (a1, r1) = store_both(Kind::ExitList, &archive, &recent, b"x").unwrap();
        assert_eq!(a1, WriteOutcome::Written);
        assert_eq!(r1, Some(WriteOutcome::Written));

        std::fs::remove_file(&recent).unwrap();
        let (a2, r2) = store_both(Kind::ExitList, &archive, &recent, b"x").unwrap();
        assert_eq!(a2, WriteOutcome::AlreadyPresent);
        assert_eq!(r2, None);
        assert!(!recent.exists());
    }

    #[test]
    fn promote_temporaries_renames_and_overwrites_targets() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("final"), b"old").unwrap();
        std::fs::write(dir.path().join("final.tmp"), b"new").unwrap();
        let n = promote_temporaries(dir.path()).unwrap();
        assert_eq!(n, 1);
        let content = std::fs::read_to_string(dir.path().join("final")).unwrap();
        assert_eq!(content, "new");
        assert!(!dir.path().join("final.tmp").exists());
    }
}
